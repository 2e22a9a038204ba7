use thiserror::Error;
use tracing::{debug, info, warn};

use super::context::SyncContext;
use super::executor::{SubmitOutcome, UploadExecutor};
use super::partition::{load_subtrees, partition};
use super::progress::{BatchOutcome, ProgressReporter};
use super::reconcile::ReconciliationEngine;
use super::record::Pipeline;
use super::state::ImportStatus;
use super::store::StoreError;
use super::summary::{self, ImportSummary};

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("server unreachable; {completed_batches} batches completed before the connection was lost")]
    Offline { completed_batches: usize },
    #[error("local store failure: {0}")]
    Persistence(#[from] StoreError),
    #[error("{records} records left unsynced after transport failures")]
    Unsynced { records: usize },
    #[error("{records} records rejected or flagged by the server ({conflicts} conflicts)")]
    Rejected { records: usize, conflicts: usize },
}

/// Totals of one upload invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadReport {
    pub batches: usize,
    pub completed_batches: usize,
    pub reverted_batches: usize,
    pub synced: usize,
    pub warnings: usize,
    pub errors: usize,
    pub ignored: usize,
    /// Records of reverted batches.
    pub unsynced: usize,
    pub conflicts: usize,
    pub cancelled: bool,
}

impl UploadReport {
    /// Connectivity losses are reported ahead of server rejections.
    pub fn into_result(self) -> Result<Self, UploadError> {
        if self.unsynced > 0 {
            return Err(UploadError::Unsynced {
                records: self.unsynced,
            });
        }
        if self.errors + self.warnings > 0 {
            return Err(UploadError::Rejected {
                records: self.errors + self.warnings,
                conflicts: self.conflicts,
            });
        }
        Ok(self)
    }

    pub fn merge(&mut self, other: UploadReport) {
        self.batches += other.batches;
        self.completed_batches += other.completed_batches;
        self.reverted_batches += other.reverted_batches;
        self.synced += other.synced;
        self.warnings += other.warnings;
        self.errors += other.errors;
        self.ignored += other.ignored;
        self.unsynced += other.unsynced;
        self.conflicts += other.conflicts;
        self.cancelled |= other.cancelled;
    }

    fn record_applied(&mut self, summaries: &[ImportSummary]) -> BatchOutcome {
        let mut synced = 0;
        let mut warnings = 0;
        let mut errors = 0;
        let mut ignored = 0;
        for summary in summaries {
            match summary.status {
                ImportStatus::Success => synced += 1,
                ImportStatus::Warning => warnings += 1,
                ImportStatus::Error => errors += 1,
                ImportStatus::Ignored => ignored += 1,
            }
            self.conflicts += summary.conflicts.len();
        }
        self.synced += synced;
        self.warnings += warnings;
        self.errors += errors;
        self.ignored += ignored;
        BatchOutcome::Applied {
            synced,
            warnings,
            errors,
            ignored,
        }
    }
}

pub struct UploadEngine {
    context: SyncContext,
}

impl UploadEngine {
    pub fn new(context: SyncContext) -> Self {
        Self { context }
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Reverts uploads a previous run left in flight. Call before the first
    /// pass.
    pub async fn recover_interrupted(&self) -> Result<(u64, u64), StoreError> {
        let (records, files) = self.context.store.recover_interrupted().await?;
        if records > 0 || files > 0 {
            info!(records, files, "reverted interrupted uploads");
        }
        Ok((records, files))
    }

    /// Uploads every dirty subtree of `pipeline`, one batch at a time.
    ///
    /// A transport failure reverts its batch and moves on; an offline failure
    /// reverts its batch and stops. Batches already applied stay applied.
    pub async fn upload(
        &self,
        pipeline: Pipeline,
        reporter: &ProgressReporter,
    ) -> Result<UploadReport, UploadError> {
        let store = &self.context.store;
        let subtrees = load_subtrees(store, pipeline).await?;
        let batches = partition(subtrees, self.context.batch_limit);
        let total = batches.len();
        let mut report = UploadReport {
            batches: total,
            ..UploadReport::default()
        };
        if total == 0 {
            debug!(?pipeline, "nothing to upload");
            return Ok(report);
        }

        let executor = UploadExecutor::new(store, &self.context.client);
        let reconciler = ReconciliationEngine::new(store);

        for (index, batch) in batches.iter().enumerate() {
            if reporter.is_cancelled() {
                info!(?pipeline, index, total, "upload cancelled");
                report.cancelled = true;
                break;
            }
            debug!(?pipeline, index, total, items = batch.len(), "uploading batch");

            match executor.submit(batch).await? {
                SubmitOutcome::Response(response) => {
                    let summaries = summary::parse(&response, batch, self.context.clock.now());
                    reconciler.apply(&summaries, batch).await?;
                    let outcome = report.record_applied(&summaries);
                    info!(?pipeline, index, total, ?outcome, "batch applied");
                    reporter.on_batch_complete(pipeline, index, total, outcome);
                }
                SubmitOutcome::TransportFailure(reason) => {
                    warn!(?pipeline, index, total, %reason, "batch failed, reverting");
                    reconciler.restore(batch).await?;
                    report.reverted_batches += 1;
                    report.unsynced += batch.records.len();
                    reporter.on_batch_complete(
                        pipeline,
                        index,
                        total,
                        BatchOutcome::Reverted { reason },
                    );
                }
                SubmitOutcome::OfflineFailure(reason) => {
                    warn!(?pipeline, index, total, %reason, "server unreachable, aborting upload");
                    reconciler.restore(batch).await?;
                    reporter.on_batch_complete(
                        pipeline,
                        index,
                        total,
                        BatchOutcome::Reverted { reason },
                    );
                    return Err(UploadError::Offline {
                        completed_batches: report.completed_batches,
                    });
                }
            }
            report.completed_batches += 1;
        }
        Ok(report)
    }

    /// Runs both pipelines concurrently and merges their reports.
    pub async fn upload_all(&self, reporter: &ProgressReporter) -> Result<UploadReport, UploadError> {
        let (tracker, events) = tokio::join!(
            self.upload(Pipeline::Tracker, reporter),
            self.upload(Pipeline::Events, reporter)
        );
        let mut report = tracker?;
        report.merge(events?);
        Ok(report)
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
