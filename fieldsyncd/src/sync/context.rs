use std::sync::Arc;

use fieldsync_core::TrackerClient;
use time::OffsetDateTime;

use super::store::RecordStore;

const DEFAULT_BATCH_LIMIT: usize = 20;

/// Source of conflict timestamps (unix seconds).
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        OffsetDateTime::now_utc().unix_timestamp()
    }
}

/// Everything an upload pass needs, passed explicitly to the pipeline.
#[derive(Clone)]
pub struct SyncContext {
    pub store: RecordStore,
    pub client: TrackerClient,
    pub clock: Arc<dyn Clock>,
    pub batch_limit: usize,
}

impl SyncContext {
    pub fn new(store: RecordStore, client: TrackerClient) -> Self {
        Self {
            store,
            client,
            clock: Arc::new(SystemClock),
            batch_limit: DEFAULT_BATCH_LIMIT,
        }
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit.max(1);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[cfg(test)]
pub(crate) struct FixedClock(pub i64);

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> i64 {
        self.0
    }
}
