use std::collections::HashMap;

use fieldsync_core::{ImportResponse, RawImportSummary};
use tracing::{debug, warn};

use super::partition::Batch;
use super::record::ImportConflict;
use super::state::ImportStatus;

/// Uniform outcome for one submitted record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportSummary {
    pub record_id: String,
    pub status: ImportStatus,
    pub conflicts: Vec<ImportConflict>,
    pub description: Option<String>,
}

#[derive(Default)]
struct Pending {
    status: Option<ImportStatus>,
    description: Option<String>,
    /// (description, value)
    conflicts: Vec<(String, Option<String>)>,
}

/// Normalizes a server response into exactly one summary per batch record,
/// in batch order.
pub fn parse(response: &ImportResponse, batch: &Batch, now: i64) -> Vec<ImportSummary> {
    let mut pending: HashMap<String, Pending> = HashMap::new();
    for summary in response.top_level() {
        collect(summary, batch, &mut pending);
    }

    let own_status = |id: &str| pending.get(id).and_then(|p| p.status);

    let mut out = Vec::with_capacity(batch.records.len());
    for record in &batch.records {
        let status = match own_status(&record.id) {
            Some(status) => status,
            None if !record.kind.rules().reports_outcome => record
                .parent_id
                .as_deref()
                .and_then(own_status)
                .unwrap_or(ImportStatus::Ignored),
            None => ImportStatus::Ignored,
        };

        let entry = pending.get(&record.id);
        let conflicts = match (status, entry) {
            (ImportStatus::Error | ImportStatus::Warning, Some(entry)) => entry
                .conflicts
                .iter()
                .map(|(description, value)| ImportConflict {
                    owner_id: record.id.clone(),
                    ancestor_ids: batch.ancestors_of(&record.id).to_vec(),
                    description: description.clone(),
                    value: value.clone(),
                    created_at: now,
                })
                .collect(),
            _ => Vec::new(),
        };

        out.push(ImportSummary {
            record_id: record.id.clone(),
            status,
            conflicts,
            description: entry.and_then(|e| e.description.clone()),
        });
    }
    out
}

fn collect(summary: &RawImportSummary, batch: &Batch, pending: &mut HashMap<String, Pending>) {
    for nested in summary.nested() {
        collect(nested, batch, pending);
    }

    let Some(reference) = summary.reference.as_deref() else {
        return;
    };
    if !batch.contains(reference) {
        debug!(reference, "dropping summary for record outside the batch");
        return;
    }

    let status = match summary.status.as_deref().map(ImportStatus::from_wire) {
        Some(Some(status)) => status,
        _ => {
            warn!(
                reference,
                status = ?summary.status,
                "unrecognized import status, treating as error"
            );
            ImportStatus::Error
        }
    };

    let entry = pending.entry(reference.to_string()).or_default();
    entry.status = Some(entry.status.map_or(status, |prev| prev.worst(status)));
    if let Some(description) = &summary.description {
        entry.description.get_or_insert_with(|| description.clone());
        entry
            .conflicts
            .push((description.clone(), Some(reference.to_string())));
    }

    for conflict in &summary.conflicts {
        let description = conflict.value.clone().unwrap_or_default();
        let value = conflict.object.clone();
        let owner = match conflict.object.as_deref() {
            Some(object) if object != reference && batch.contains(object) => object,
            _ => reference,
        };
        pending
            .entry(owner.to_string())
            .or_default()
            .conflicts
            .push((description, value));
    }
}

#[cfg(test)]
#[path = "summary_tests.rs"]
mod tests;
