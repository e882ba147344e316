use std::{sync::Arc, time::Duration};

use chrono::NaiveDate;
use tokio_util::sync::CancellationToken;

use crate::{
    domain::ProductId,
    errors::Error,
    feed::{Release, ReleaseFeed},
    pipeline::{cancellable, ensure_active},
    store::{RunBatch, Store, VersionRow},
    Result,
};

const PLACEHOLDER_VERSION: &str = "-";

/// Stages one version row per release of every watched product.
pub struct VersionSnapshot {
    store: Arc<dyn Store>,
    feed: Arc<dyn ReleaseFeed>,
    throttle: Duration,
    verbose: bool,
}

impl VersionSnapshot {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn ReleaseFeed>,
        throttle: Duration,
        verbose: bool,
    ) -> Self {
        Self {
            store,
            feed,
            throttle,
            verbose,
        }
    }

    pub async fn snapshot(&self, batch: &mut RunBatch, cancel: &CancellationToken) -> Result<()> {
        let watched = cancellable(cancel, self.store.watched_products()).await?;
        tracing::info!(run_ts = %batch.run_ts, watched = watched.len(), "snapshotting watched products");

        for product in watched {
            ensure_active(cancel)?;
            tokio::select! {
                _ = cancel.cancelled() => {
                    return Err(Error::Cancelled("pipeline run cancelled".to_string()));
                }
                _ = tokio::time::sleep(self.throttle) => {}
            }

            // Prefer the URI from this run's catalog over the stored one.
            let uri = batch
                .staged_product(&product.name)
                .map(|p| p.catalog_url.clone())
                .unwrap_or_else(|| product.catalog_url.clone());

            if self.verbose {
                tracing::info!(product = %product.name, "fetching product");
            } else {
                tracing::debug!(product = %product.name, "fetching product");
            }

            let detail = cancellable(cancel, self.feed.fetch_product(&uri)).await?;
            for release in &detail.result.releases {
                ensure_active(cancel)?;
                let row = version_row(product.id, release).map_err(|e| {
                    tracing::error!(run_ts = %batch.run_ts, product = %product.name, error = %e, "bad release");
                    e
                })?;
                batch.versions.push(row);
            }
        }
        Ok(())
    }
}

/// The version fields of one release: `(version, date, link)`.
///
/// `latest` supplies all three; `custom.apiVersion` overrides the version
/// string; with neither the version is `-` and the rest is empty.
pub fn derive_version(release: &Release) -> (String, Option<NaiveDate>, Option<String>) {
    let (mut version, date, link) = match &release.latest {
        Some(latest) => {
            let version = latest
                .name
                .clone()
                .unwrap_or_else(|| PLACEHOLDER_VERSION.to_string());
            let date = latest.date.as_deref().and_then(|raw| {
                let parsed = parse_date(raw);
                if parsed.is_none() {
                    tracing::warn!(release = %release.name, date = raw, "unparsable latest date");
                }
                parsed
            });
            (version, date, latest.link.clone())
        }
        None => (PLACEHOLDER_VERSION.to_string(), None, None),
    };

    if let Some(api_version) = release.custom.as_ref().and_then(|c| c.api_version.clone()) {
        version = api_version;
    }

    (version, date, link)
}

fn version_row(product_id: ProductId, release: &Release) -> Result<VersionRow> {
    let raw = release.release_date.as_deref().ok_or_else(|| {
        Error::Parse(format!("release {} has no releaseDate", release.name))
    })?;
    let release_date = parse_date(raw).ok_or_else(|| {
        Error::Parse(format!(
            "release {} has an invalid releaseDate: {raw}",
            release.name
        ))
    })?;

    let (version, version_release_date, version_release_link) = derive_version(release);
    Ok(VersionRow {
        product_id,
        release_name: release.name.clone(),
        release_codename: release.codename.clone(),
        release_label: release.label.clone(),
        release_date,
        version,
        version_release_date,
        version_release_link,
    })
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d").ok()
}
