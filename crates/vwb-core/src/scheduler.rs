//! Periodic pipeline trigger.

use std::{sync::Arc, time::Duration};

use tokio::{
    sync::Mutex,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::pipeline::{ReleasePipeline, RunReport};

/// Outcome of a single trigger.
#[derive(Debug)]
pub enum Firing {
    Completed(RunReport),
    Failed(String),
    /// A previous run still held the execution guard.
    Skipped,
}

pub struct PipelineScheduler {
    pipeline: Arc<ReleasePipeline>,
    interval: Duration,
    execution_lock: Mutex<()>,
}

impl PipelineScheduler {
    pub fn new(pipeline: Arc<ReleasePipeline>, interval: Duration) -> Self {
        Self {
            pipeline,
            interval,
            execution_lock: Mutex::new(()),
        }
    }

    /// Fire every `interval` until `cancel` is triggered. The first firing
    /// happens one interval after start.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval_secs = self.interval.as_secs(), "pipeline scheduler started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let scheduler = self.clone();
                    let cancel = cancel.clone();
                    // Runs are spawned so an overlapping tick can observe the
                    // held guard and skip.
                    tokio::spawn(async move {
                        scheduler.run_once(&cancel).await;
                    });
                }
            }
        }

        tracing::info!("pipeline scheduler stopped");
    }

    pub async fn run_once(&self, cancel: &CancellationToken) -> Firing {
        let Ok(_guard) = self.execution_lock.try_lock() else {
            tracing::warn!("previous pipeline run still in progress, skipping");
            return Firing::Skipped;
        };

        match self.pipeline.run(cancel).await {
            Ok(report) => Firing::Completed(report),
            Err(e) => {
                tracing::error!(error = %e, "scheduled pipeline run failed");
                Firing::Failed(e.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        pipeline::PipelineSettings,
        store::SqliteStore,
        test_support::{FakeFeed, FakeMessenger},
    };

    fn scheduler() -> Arc<PipelineScheduler> {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let pipeline = ReleasePipeline::new(
            store,
            Arc::new(FakeFeed::with_catalog(&[("nginx", "nginx")])),
            Arc::new(FakeMessenger::default()),
            PipelineSettings::default(),
        );
        Arc::new(PipelineScheduler::new(
            Arc::new(pipeline),
            Duration::from_secs(60),
        ))
    }

    #[tokio::test]
    async fn run_once_completes() {
        let s = scheduler();
        let firing = s.run_once(&CancellationToken::new()).await;
        match firing {
            Firing::Completed(report) => assert_eq!(report.commit.products_upserted, 1),
            other => panic!("unexpected firing: {other:?}"),
        }
    }

    #[tokio::test]
    async fn overlapping_firing_is_skipped() {
        let s = scheduler();
        let _held = s.execution_lock.lock().await;
        let firing = s.run_once(&CancellationToken::new()).await;
        assert!(matches!(firing, Firing::Skipped));
    }

    #[tokio::test]
    async fn loop_exits_on_cancel() {
        let s = scheduler();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(s.run(cancel.clone()));
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
