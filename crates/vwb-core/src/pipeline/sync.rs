use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{
    feed::ReleaseFeed,
    pipeline::{cancellable, ensure_active},
    store::{ProductUpsert, RunBatch},
    Result,
};

const API_PATH: &str = "/api/v1/products/";

/// Stages an upsert for every product in the upstream catalog.
pub struct CatalogSync {
    feed: Arc<dyn ReleaseFeed>,
}

impl CatalogSync {
    pub fn new(feed: Arc<dyn ReleaseFeed>) -> Self {
        Self { feed }
    }

    pub async fn sync(&self, batch: &mut RunBatch, cancel: &CancellationToken) -> Result<()> {
        tracing::info!(run_ts = %batch.run_ts, "fetching product catalog");
        let catalog = cancellable(cancel, self.feed.fetch_catalog()).await?;
        tracing::info!(
            run_ts = %batch.run_ts,
            total = catalog.total,
            entries = catalog.result.len(),
            "fetched product catalog"
        );

        batch.products.reserve(catalog.result.len());
        for entry in catalog.result {
            ensure_active(cancel)?;
            batch.products.push(ProductUpsert {
                info_url: info_url_for(&entry.uri),
                name: entry.name,
                label: entry.label,
                category: entry.category,
                catalog_url: entry.uri,
            });
        }
        Ok(())
    }
}

/// Human-facing product page for an API detail URI.
pub fn info_url_for(uri: &str) -> String {
    uri.replacen(API_PATH, "/", 1)
}
