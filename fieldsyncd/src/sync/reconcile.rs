use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::partition::Batch;
use super::record::Record;
use super::state::{SyncState, aggregate, file_transition, transition};
use super::store::{OutcomeWrite, RecordStore, StoreError};
use super::summary::ImportSummary;

/// Record ids whose aggregated state must be recomputed, with their depth in
/// the hierarchy (roots are 0).
type Touched = HashMap<String, usize>;

pub struct ReconciliationEngine<'a> {
    store: &'a RecordStore,
}

impl<'a> ReconciliationEngine<'a> {
    pub fn new(store: &'a RecordStore) -> Self {
        Self { store }
    }

    /// Writes every outcome, one transaction per record, then refreshes the
    /// aggregated state of each touched ancestor chain, deepest first.
    pub async fn apply(&self, summaries: &[ImportSummary], batch: &Batch) -> Result<(), StoreError> {
        // Chains are resolved before any row can be removed.
        let mut touched = Touched::new();
        for record in &batch.records {
            self.touch(record, &mut touched).await?;
        }

        for summary in summaries {
            let Some(record) = batch.record(&summary.record_id) else {
                continue;
            };
            let sync_state = transition(summary.status);
            let remove = record.deleted && sync_state == SyncState::Synced;
            let file_state = record
                .kind
                .rules()
                .carries_files
                .then(|| file_transition(sync_state));
            self.store
                .write_outcome(&OutcomeWrite {
                    record_id: record.id.clone(),
                    sync_state,
                    remove,
                    conflicts: summary.conflicts.clone(),
                    file_state,
                })
                .await?;
            if remove {
                debug!(record = %record.id, "removed deleted record after upload");
            }
        }

        self.refresh(touched).await
    }

    /// Puts the batch back the way it was before submission. Conflicts and
    /// aggregated states are left untouched.
    pub async fn restore(&self, batch: &Batch) -> Result<(), StoreError> {
        self.store
            .restore_pre_upload(&batch.record_ids(), &batch.file_ids())
            .await
    }

    async fn touch(&self, record: &Record, touched: &mut Touched) -> Result<(), StoreError> {
        let mut chain = vec![record.id.clone()];
        chain.extend(self.ancestors(record.parent_id.as_deref()).await?);
        mark_chain(&chain, touched);

        if let Some(second) = record.second_parent_id.as_deref() {
            let chain = self.ancestors(Some(second)).await?;
            mark_chain(&chain, touched);
        }
        Ok(())
    }

    /// `start` and its ancestors through the owning edge, nearest first.
    async fn ancestors(&self, start: Option<&str>) -> Result<Vec<String>, StoreError> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();
        let mut next = start.map(str::to_string);
        while let Some(id) = next {
            if !seen.insert(id.clone()) {
                break;
            }
            next = match self.store.get_record(&id).await? {
                Some(record) => record.parent_id,
                None => None,
            };
            chain.push(id);
        }
        Ok(chain)
    }

    async fn refresh(&self, touched: Touched) -> Result<(), StoreError> {
        let mut order: Vec<(String, usize)> = touched.into_iter().collect();
        order.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        for (id, _) in order {
            let Some(record) = self.store.get_record(&id).await? else {
                continue;
            };
            let children = self.store.child_aggregated_states(&id).await?;
            let aggregated = aggregate(record.sync_state, children);
            if aggregated != record.aggregated_sync_state {
                self.store.set_aggregated_state(&id, aggregated).await?;
            }
        }
        Ok(())
    }
}

/// `chain` runs from a record up to its root.
fn mark_chain(chain: &[String], touched: &mut Touched) {
    let len = chain.len();
    for (i, id) in chain.iter().enumerate() {
        let depth = len - 1 - i;
        let entry = touched.entry(id.clone()).or_insert(depth);
        *entry = (*entry).max(depth);
    }
}

#[cfg(test)]
#[path = "reconcile_tests.rs"]
mod tests;
