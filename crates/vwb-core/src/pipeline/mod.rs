//! The release-tracking job: sync, snapshot, commit, detect, notify.

use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::{timeout_at, Instant};
use tokio_util::sync::CancellationToken;

use crate::{
    config::Config,
    domain::RunTimestamp,
    errors::Error,
    feed::ReleaseFeed,
    messaging::port::MessagingPort,
    store::{RunBatch, RunCommit, Store},
    Result,
};

pub mod detect;
pub mod notify;
pub mod snapshot;
pub mod sync;

pub use detect::ChangeDetector;
pub use notify::{MessageLimits, NotifyReport, Notifier};
pub use snapshot::VersionSnapshot;
pub use sync::CatalogSync;

#[derive(Clone, Copy, Debug)]
pub struct PipelineSettings {
    /// Delay before each per-product detail fetch.
    pub throttle: Duration,
    /// Deadline for sync and snapshot; a commit that would land past it
    /// rolls back.
    pub timeout: Duration,
    pub limits: MessageLimits,
    /// Log every product fetch at info instead of debug.
    pub verbose_fetch: bool,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            throttle: cfg.upstream_throttle,
            timeout: cfg.pipeline_timeout,
            limits: MessageLimits {
                soft: cfg.notify_soft_limit,
                hard: cfg.telegram_message_limit,
            },
            verbose_fetch: cfg.app_env.is_development(),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            throttle: Duration::from_millis(100),
            timeout: Duration::from_secs(300),
            limits: MessageLimits::default(),
            verbose_fetch: false,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub run_ts: Option<RunTimestamp>,
    pub commit: RunCommit,
    pub changed_products: usize,
    pub notify: NotifyReport,
}

pub struct ReleasePipeline {
    store: Arc<dyn Store>,
    sync: CatalogSync,
    snapshot: VersionSnapshot,
    detector: ChangeDetector,
    notifier: Notifier,
    timeout: Duration,
}

impl ReleasePipeline {
    pub fn new(
        store: Arc<dyn Store>,
        feed: Arc<dyn ReleaseFeed>,
        messenger: Arc<dyn MessagingPort>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            sync: CatalogSync::new(feed.clone()),
            snapshot: VersionSnapshot::new(
                store.clone(),
                feed,
                settings.throttle,
                settings.verbose_fetch,
            ),
            detector: ChangeDetector::new(store.clone()),
            notifier: Notifier::new(store.clone(), messenger, settings.limits),
            store,
            timeout: settings.timeout,
        }
    }

    /// Sync the catalog and snapshot watched products in one commit.
    ///
    /// Nothing is written unless every fetch succeeds.
    pub async fn populate(&self, cancel: &CancellationToken) -> Result<(RunTimestamp, RunCommit)> {
        let run_ts = RunTimestamp::now();
        let commit = self
            .stage_and_commit(run_ts, cancel)
            .await
            .map_err(|e| log_failure(run_ts, e))?;
        Ok((run_ts, commit))
    }

    /// One full execution: populate, detect changes and notify subscribers.
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunReport> {
        let run_ts = RunTimestamp::now();
        let commit = self
            .stage_and_commit(run_ts, cancel)
            .await
            .map_err(|e| log_failure(run_ts, e))?;

        let changed = match self.detector.changed(run_ts).await {
            Ok(changed) => changed,
            Err(e) => {
                // The next run must still see this run's releases as new.
                if let Err(discard) = self.store.discard_run(run_ts).await {
                    tracing::error!(run_ts = %run_ts, error = %discard, "failed to discard undetected run");
                }
                return Err(log_failure(run_ts, e));
            }
        };

        let mut report = RunReport {
            run_ts: Some(run_ts),
            commit,
            changed_products: changed.len(),
            notify: NotifyReport::default(),
        };

        if changed.is_empty() {
            tracing::info!(run_ts = %run_ts, "no new releases, skipping fan-out");
            return Ok(report);
        }

        report.notify = self.notifier.notify(&changed, cancel).await?;
        tracing::info!(
            run_ts = %run_ts,
            changed = report.changed_products,
            subscribers = report.notify.subscribers_notified,
            messages = report.notify.messages_sent,
            failures = report.notify.delivery_failures,
            "pipeline run complete"
        );
        Ok(report)
    }

    /// Stage the run under the deadline, then commit it.
    ///
    /// The commit itself is never raced against the deadline: the store
    /// either commits or rolls back, so a late run leaves no rows behind.
    async fn stage_and_commit(
        &self,
        run_ts: RunTimestamp,
        cancel: &CancellationToken,
    ) -> Result<RunCommit> {
        let deadline = Instant::now() + self.timeout;
        let mut batch = RunBatch::new(run_ts);

        let staged = timeout_at(deadline, async {
            self.sync.sync(&mut batch, cancel).await?;
            self.snapshot.snapshot(&mut batch, cancel).await
        })
        .await;
        match staged {
            Ok(res) => res?,
            Err(_) => return Err(self.deadline_exceeded()),
        }

        ensure_active(cancel)?;
        if Instant::now() >= deadline {
            return Err(self.deadline_exceeded());
        }
        batch.commit_deadline = Some(deadline.into_std());

        let commit = self.store.commit_run(batch).await?;
        tracing::info!(
            run_ts = %run_ts,
            upserted = commit.products_upserted,
            unchanged = commit.products_unchanged,
            versions = commit.versions_inserted,
            "run committed"
        );
        Ok(commit)
    }

    fn deadline_exceeded(&self) -> Error {
        Error::Cancelled(format!(
            "pipeline exceeded its {:?} deadline",
            self.timeout
        ))
    }
}

fn log_failure(run_ts: RunTimestamp, e: Error) -> Error {
    tracing::error!(run_ts = %run_ts, error = %e, "pipeline run failed");
    e
}

pub(crate) fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled("pipeline run cancelled".to_string()));
    }
    Ok(())
}

/// Race `fut` against the cancellation token.
pub(crate) async fn cancellable<T>(
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        _ = cancel.cancelled() => Err(Error::Cancelled("pipeline run cancelled".to_string())),
        res = fut => res,
    }
}
