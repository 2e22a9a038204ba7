use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::record::Pipeline;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// The server answered and every record in the batch was resolved.
    Applied {
        synced: usize,
        warnings: usize,
        errors: usize,
        ignored: usize,
    },
    /// The submission failed and the batch was put back.
    Reverted { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub pipeline: Pipeline,
    pub index: usize,
    pub total: usize,
    pub outcome: BatchOutcome,
}

impl ProgressEvent {
    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }
}

/// Reports completed batches to the caller and carries its cancellation
/// request.
#[derive(Clone)]
pub struct ProgressReporter {
    events: Option<mpsc::UnboundedSender<ProgressEvent>>,
    cancel: CancellationToken,
}

impl ProgressReporter {
    pub fn new(events: mpsc::UnboundedSender<ProgressEvent>, cancel: CancellationToken) -> Self {
        Self {
            events: Some(events),
            cancel,
        }
    }

    /// Reporter with no listener.
    pub fn silent(cancel: CancellationToken) -> Self {
        Self {
            events: None,
            cancel,
        }
    }

    pub fn on_batch_complete(
        &self,
        pipeline: Pipeline,
        index: usize,
        total: usize,
        outcome: BatchOutcome,
    ) {
        if let Some(events) = &self.events {
            // A dropped receiver only means nobody is watching.
            let _ = events.send(ProgressEvent {
                pipeline,
                index,
                total,
                outcome,
            });
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
