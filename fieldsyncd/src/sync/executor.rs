use fieldsync_core::{FailureClass, ImportResponse, TrackerClient};
use tracing::debug;

use super::partition::Batch;
use super::store::{RecordStore, StoreError};

/// What came back from one submission.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Parsed body, including HTTP 409 validation responses.
    Response(ImportResponse),
    /// The batch did not get a usable answer; only this batch is affected.
    TransportFailure(String),
    /// The server is unreachable; remaining batches should not be attempted.
    OfflineFailure(String),
}

pub struct UploadExecutor<'a> {
    store: &'a RecordStore,
    client: &'a TrackerClient,
}

impl<'a> UploadExecutor<'a> {
    pub fn new(store: &'a RecordStore, client: &'a TrackerClient) -> Self {
        Self { store, client }
    }

    /// Marks the batch in flight, then posts it. Only local persistence
    /// failures are returned as errors.
    pub async fn submit(&self, batch: &Batch) -> Result<SubmitOutcome, StoreError> {
        self.store
            .mark_uploading(&batch.record_ids(), &batch.file_ids())
            .await?;

        let payload = batch.to_payload();
        debug!(
            records = batch.records.len(),
            file_resources = batch.file_resources.len(),
            "submitting batch"
        );
        match self.client.post_tracker_payload(&payload).await {
            Ok(response) => Ok(SubmitOutcome::Response(response)),
            Err(err) => match err.classification() {
                FailureClass::Offline => Ok(SubmitOutcome::OfflineFailure(err.to_string())),
                FailureClass::Transport => Ok(SubmitOutcome::TransportFailure(err.to_string())),
            },
        }
    }
}
