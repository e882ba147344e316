use std::sync::Arc;

use crate::{
    domain::RunTimestamp,
    store::{EnrichedProduct, Store},
    Result,
};

/// Finds the products whose releases changed in a run.
///
/// A product counts as changed when it has a previous run and at least one
/// `(release_name, version, version_release_date)` of this run is absent
/// from it. A first snapshot is only a baseline.
pub struct ChangeDetector {
    store: Arc<dyn Store>,
}

impl ChangeDetector {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn changed(&self, run_ts: RunTimestamp) -> Result<Vec<EnrichedProduct>> {
        let candidates = self.store.product_ids_in_run(run_ts).await?;
        if candidates.is_empty() {
            tracing::info!(run_ts = %run_ts, "no snapshot rows in run");
            return Ok(Vec::new());
        }

        let changed = self
            .store
            .products_with_new_releases(run_ts, &candidates)
            .await?;
        tracing::info!(
            run_ts = %run_ts,
            candidates = candidates.len(),
            changed = changed.len(),
            "change detection complete"
        );
        Ok(changed)
    }
}
