use std::collections::{HashMap, HashSet};

use fieldsync_core::{TrackerPayload, WireRecord};

use super::record::{FileResource, Pipeline, Record, RecordKind, WireGroup};
use super::store::{RecordStore, StoreError};

/// Dirty part of one root's hierarchy. Always submitted as a whole.
#[derive(Debug, Clone, Default)]
pub struct Subtree {
    /// Records to submit, ordered by depth then id.
    pub records: Vec<Record>,
    pub file_resources: Vec<FileResource>,
    /// Ancestor ids of every record above, nearest first.
    pub ancestry: HashMap<String, Vec<String>>,
}

impl Subtree {
    pub fn len(&self) -> usize {
        self.records.len() + self.file_resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct Batch {
    pub records: Vec<Record>,
    pub file_resources: Vec<FileResource>,
    pub ancestry: HashMap<String, Vec<String>>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.records.len() + self.file_resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn record_ids(&self) -> Vec<&str> {
        self.records.iter().map(|r| r.id.as_str()).collect()
    }

    pub fn file_ids(&self) -> Vec<&str> {
        self.file_resources.iter().map(|f| f.id.as_str()).collect()
    }

    pub fn record(&self, id: &str) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.record(id).is_some()
    }

    pub fn ancestors_of(&self, id: &str) -> &[String] {
        self.ancestry.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn extend(&mut self, subtree: Subtree) {
        self.records.extend(subtree.records);
        self.file_resources.extend(subtree.file_resources);
        self.ancestry.extend(subtree.ancestry);
    }

    /// Request body for this batch. Values travel inside their owning event;
    /// a value whose event is not part of the batch is left out and comes
    /// back as ignored.
    pub fn to_payload(&self) -> TrackerPayload {
        let mut payload = TrackerPayload::default();
        let mut values: HashMap<&str, Vec<WireRecord>> = HashMap::new();

        for record in &self.records {
            if record.kind.rules().wire_group != WireGroup::DataValues {
                continue;
            }
            let Some(owner) = record.parent_id.as_deref() else {
                continue;
            };
            let files = self
                .file_resources
                .iter()
                .filter(|f| f.owner_id == record.id)
                .map(|f| f.id.clone())
                .collect();
            values
                .entry(owner)
                .or_default()
                .push(wire_record(record, Vec::new(), files));
        }

        for record in &self.records {
            let group = match record.kind.rules().wire_group {
                WireGroup::Subjects => &mut payload.subjects,
                WireGroup::Enrollments => &mut payload.enrollments,
                WireGroup::Events => &mut payload.events,
                WireGroup::Relationships => &mut payload.relationships,
                WireGroup::DataValues => continue,
            };
            let data_values = values.remove(record.id.as_str()).unwrap_or_default();
            group.push(wire_record(record, data_values, Vec::new()));
        }
        payload
    }
}

fn wire_record(record: &Record, data_values: Vec<WireRecord>, files: Vec<String>) -> WireRecord {
    WireRecord {
        id: record.id.clone(),
        parent: record.parent_id.clone(),
        second_parent: record.second_parent_id.clone(),
        deleted: record.deleted,
        last_updated: record.last_updated,
        payload: record.payload.clone(),
        data_values,
        file_resources: files,
    }
}

/// Packs whole subtrees into batches of at most `limit` items, keeping input
/// order. A subtree larger than `limit` gets a batch of its own.
pub fn partition(subtrees: Vec<Subtree>, limit: usize) -> Vec<Batch> {
    let limit = limit.max(1);
    let mut batches = Vec::new();
    let mut current = Batch::default();

    for subtree in subtrees {
        if subtree.is_empty() {
            continue;
        }
        if !current.is_empty() && current.len() + subtree.len() > limit {
            batches.push(std::mem::take(&mut current));
        }
        current.extend(subtree);
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Collects the dirty subtree of every dirty root of `pipeline`, oldest root
/// first.
pub async fn load_subtrees(
    store: &RecordStore,
    pipeline: Pipeline,
) -> Result<Vec<Subtree>, StoreError> {
    let roots = store.dirty_roots(pipeline).await?;
    let mut subtrees = Vec::with_capacity(roots.len());
    for root in roots {
        subtrees.push(load_subtree(store, root).await?);
    }
    Ok(subtrees)
}

async fn load_subtree(store: &RecordStore, root: Record) -> Result<Subtree, StoreError> {
    let mut visited: Vec<Record> = Vec::new();
    let mut ancestry: HashMap<String, Vec<String>> = HashMap::new();
    ancestry.insert(root.id.clone(), Vec::new());

    let mut level = vec![root];
    while !level.is_empty() {
        let mut next = Vec::new();
        for record in &level {
            let chain = ancestry.get(&record.id).cloned().unwrap_or_default();
            for child in store.list_owned(&record.id).await? {
                let mut child_chain = Vec::with_capacity(chain.len() + 1);
                child_chain.push(record.id.clone());
                child_chain.extend(chain.iter().cloned());
                ancestry.insert(child.id.clone(), child_chain);
                next.push(child);
            }
        }
        next.sort_by(|a, b| a.id.cmp(&b.id));
        visited.append(&mut level);
        level = next;
    }

    let mut included: HashSet<String> = visited
        .iter()
        .filter(|r| r.sync_state.is_uploadable())
        .map(|r| r.id.clone())
        .collect();
    // A value travels nested in its event.
    let carriers: Vec<String> = visited
        .iter()
        .filter(|r| r.kind == RecordKind::Value && included.contains(&r.id))
        .filter_map(|r| r.parent_id.clone())
        .collect();
    included.extend(carriers);

    let mut records = Vec::new();
    let mut file_resources = Vec::new();
    for record in visited {
        if !included.contains(&record.id) {
            continue;
        }
        if record.kind.rules().carries_files {
            file_resources.extend(store.pending_file_resources(&record.id).await?);
        }
        records.push(record);
    }
    ancestry.retain(|id, _| included.contains(id));

    Ok(Subtree {
        records,
        file_resources,
        ancestry,
    })
}

#[cfg(test)]
#[path = "partition_tests.rs"]
mod tests;
