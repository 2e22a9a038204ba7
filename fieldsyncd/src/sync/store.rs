use std::collections::{HashSet, VecDeque};
use std::{fs, path::Path, path::PathBuf};

use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Row, SqlitePool};
use thiserror::Error;

use super::record::{FileResource, ImportConflict, Pipeline, Record, RecordInput, RecordKind};
use super::state::{SyncState, aggregate};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS records (
        id TEXT PRIMARY KEY NOT NULL,
        kind TEXT NOT NULL,
        parent_id TEXT,
        second_parent_id TEXT,
        sync_state TEXT NOT NULL,
        aggregated_sync_state TEXT NOT NULL,
        pre_upload_state TEXT,
        deleted INTEGER NOT NULL DEFAULT 0,
        last_updated INTEGER NOT NULL,
        payload TEXT NOT NULL DEFAULT 'null'
    )",
    "CREATE INDEX IF NOT EXISTS records_parent ON records(parent_id)",
    "CREATE INDEX IF NOT EXISTS records_second_parent ON records(second_parent_id)",
    "CREATE TABLE IF NOT EXISTS conflicts (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        owner_id TEXT NOT NULL,
        ancestor_ids TEXT NOT NULL,
        description TEXT NOT NULL,
        value TEXT,
        created_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS conflicts_owner ON conflicts(owner_id)",
    "CREATE TABLE IF NOT EXISTS file_resources (
        id TEXT PRIMARY KEY NOT NULL,
        owner_id TEXT NOT NULL,
        sync_state TEXT NOT NULL,
        pre_upload_state TEXT
    )",
    "CREATE INDEX IF NOT EXISTS file_resources_owner ON file_resources(owner_id)",
];

/// `?1` and every record it owns, at any depth.
const OWNED_SUBTREE: &str = "WITH RECURSIVE owned(id) AS (
        SELECT ?1
        UNION
        SELECT records.id FROM records JOIN owned ON records.parent_id = owned.id
    )";

const RECORD_COLUMNS: &str = "id, kind, parent_id, second_parent_id, sync_state, aggregated_sync_state, pre_upload_state, deleted, last_updated, payload";

/// Any failure here means local state can no longer be trusted.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid stored json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("XDG data directory is unavailable")]
    MissingDataDir,
    #[error("invalid record kind: {0}")]
    InvalidKind(String),
    #[error("invalid sync state: {0}")]
    InvalidState(String),
    #[error("record not found after upsert")]
    MissingRecord,
}

/// Resolution of one record inside a reconciliation pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeWrite {
    pub record_id: String,
    pub sync_state: SyncState,
    /// Remove the row instead of updating it (deleted records the server
    /// accepted).
    pub remove: bool,
    pub conflicts: Vec<ImportConflict>,
    /// New state for the record's file resources that are still uploading.
    pub file_state: Option<SyncState>,
}

#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn new(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let store = Self { pool };
        store.init().await?;
        Ok(store)
    }

    pub async fn new_default() -> Result<Self, StoreError> {
        Self::open(&default_db_path()?).await
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Application-side write. The aggregated state of the record and of
    /// every record above it is recomputed in the same transaction.
    pub async fn upsert_record(&self, input: &RecordInput) -> Result<Record, StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "INSERT INTO records (
                id, kind, parent_id, second_parent_id, sync_state,
                aggregated_sync_state, deleted, last_updated, payload
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?5, ?6, ?7, ?8)
            ON CONFLICT(id) DO UPDATE SET
                kind = excluded.kind,
                parent_id = excluded.parent_id,
                second_parent_id = excluded.second_parent_id,
                sync_state = excluded.sync_state,
                deleted = excluded.deleted,
                last_updated = excluded.last_updated,
                payload = excluded.payload",
        )
        .bind(&input.id)
        .bind(input.kind.as_str())
        .bind(&input.parent_id)
        .bind(&input.second_parent_id)
        .bind(input.sync_state.as_str())
        .bind(if input.deleted { 1 } else { 0 })
        .bind(input.last_updated)
        .bind(serde_json::to_string(&input.payload)?)
        .execute(&mut *tx)
        .await?;
        refresh_lineage(&mut *tx, &input.id).await?;
        tx.commit().await?;

        self.get_record(&input.id)
            .await?
            .ok_or(StoreError::MissingRecord)
    }

    pub async fn get_record(&self, id: &str) -> Result<Option<Record>, StoreError> {
        let row = sqlx::query(&format!("SELECT {RECORD_COLUMNS} FROM records WHERE id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(record_from_row).transpose()
    }

    /// Records owned through `parent_id`, i.e. the containment subtree edge.
    pub async fn list_owned(&self, parent_id: &str) -> Result<Vec<Record>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE parent_id = ?1 ORDER BY id ASC"
        ))
        .bind(parent_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    /// Aggregated states of every direct child, including relationships that
    /// point at `id` from either side.
    pub async fn child_aggregated_states(&self, id: &str) -> Result<Vec<SyncState>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        child_states(&mut *conn, id).await
    }

    pub async fn set_aggregated_state(&self, id: &str, state: SyncState) -> Result<(), StoreError> {
        sqlx::query("UPDATE records SET aggregated_sync_state = ?2 WHERE id = ?1")
            .bind(id)
            .bind(state.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Roots of `pipeline` that may have something to upload, oldest first.
    /// A warning or error aggregate can hide dirty descendants, so any root
    /// that is not fully synced is returned.
    pub async fn dirty_roots(&self, pipeline: Pipeline) -> Result<Vec<Record>, StoreError> {
        let scope = match pipeline {
            Pipeline::Tracker => "kind = ?1",
            Pipeline::Events => "kind = ?1 AND parent_id IS NULL",
        };
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE {scope}
                AND (sync_state IN ('to_post', 'to_update', 'error')
                    OR aggregated_sync_state != 'synced')
             ORDER BY last_updated ASC, id ASC"
        ))
        .bind(pipeline.root_kind().as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(record_from_row).collect()
    }

    pub async fn upsert_file_resource(
        &self,
        id: &str,
        owner_id: &str,
        state: SyncState,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO file_resources (id, owner_id, sync_state)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                owner_id = excluded.owner_id,
                sync_state = excluded.sync_state",
        )
        .bind(id)
        .bind(owner_id)
        .bind(state.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_file_resource(&self, id: &str) -> Result<Option<FileResource>, StoreError> {
        let row = sqlx::query(
            "SELECT id, owner_id, sync_state, pre_upload_state FROM file_resources WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(file_resource_from_row).transpose()
    }

    /// File resources of `owner_id` that still have to reach the server.
    pub async fn pending_file_resources(
        &self,
        owner_id: &str,
    ) -> Result<Vec<FileResource>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, owner_id, sync_state, pre_upload_state FROM file_resources
             WHERE owner_id = ?1 AND sync_state != 'synced'
             ORDER BY id ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(file_resource_from_row).collect()
    }

    /// Marks records and file resources in flight, remembering the state each
    /// one had so a failed submission can put it back.
    pub async fn mark_uploading(
        &self,
        record_ids: &[&str],
        file_ids: &[&str],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for id in record_ids {
            sqlx::query(
                "UPDATE records SET pre_upload_state = sync_state, sync_state = 'uploading'
                 WHERE id = ?1 AND sync_state != 'uploading'",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        for id in file_ids {
            sqlx::query(
                "UPDATE file_resources SET pre_upload_state = sync_state, sync_state = 'uploading'
                 WHERE id = ?1 AND sync_state != 'uploading'",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Puts uploading records and file resources back to their pre-upload
    /// state. Rows that are not uploading are left alone.
    pub async fn restore_pre_upload(
        &self,
        record_ids: &[&str],
        file_ids: &[&str],
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for id in record_ids {
            sqlx::query(
                "UPDATE records
                 SET sync_state = COALESCE(pre_upload_state, 'to_update'), pre_upload_state = NULL
                 WHERE id = ?1 AND sync_state = 'uploading'",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        for id in file_ids {
            sqlx::query(
                "UPDATE file_resources
                 SET sync_state = COALESCE(pre_upload_state, 'to_post'), pre_upload_state = NULL
                 WHERE id = ?1 AND sync_state = 'uploading'",
            )
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Reverts everything a crashed pass left in flight. Returns the number
    /// of records and file resources reverted.
    pub async fn recover_interrupted(&self) -> Result<(u64, u64), StoreError> {
        let mut tx = self.pool.begin().await?;
        let records = sqlx::query(
            "UPDATE records
             SET sync_state = COALESCE(pre_upload_state, 'to_update'), pre_upload_state = NULL
             WHERE sync_state = 'uploading'",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        let files = sqlx::query(
            "UPDATE file_resources
             SET sync_state = COALESCE(pre_upload_state, 'to_post'), pre_upload_state = NULL
             WHERE sync_state = 'uploading'",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();
        tx.commit().await?;
        Ok((records, files))
    }

    /// Applies one record's resolution atomically: its conflicts are replaced,
    /// its state (or its removal) and its file resources are written together.
    pub async fn write_outcome(&self, outcome: &OutcomeWrite) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM conflicts WHERE owner_id = ?1")
            .bind(&outcome.record_id)
            .execute(&mut *tx)
            .await?;

        if outcome.remove {
            // Owned records go with their owner; the records table is cleared
            // last since the subtree is resolved through it.
            for statement in [
                "DELETE FROM conflicts WHERE owner_id IN (SELECT id FROM owned)",
                "DELETE FROM file_resources WHERE owner_id IN (SELECT id FROM owned)",
                "DELETE FROM records WHERE id IN (SELECT id FROM owned)",
            ] {
                sqlx::query(&format!("{OWNED_SUBTREE} {statement}"))
                    .bind(&outcome.record_id)
                    .execute(&mut *tx)
                    .await?;
            }
            tx.commit().await?;
            return Ok(());
        }

        let updated = sqlx::query(
            "UPDATE records SET sync_state = ?2, pre_upload_state = NULL WHERE id = ?1",
        )
        .bind(&outcome.record_id)
        .bind(outcome.sync_state.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if updated == 0 {
            // Removed earlier in the same pass along with a deleted owner.
            tx.commit().await?;
            return Ok(());
        }

        for conflict in &outcome.conflicts {
            sqlx::query(
                "INSERT INTO conflicts (owner_id, ancestor_ids, description, value, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .bind(&conflict.owner_id)
            .bind(serde_json::to_string(&conflict.ancestor_ids)?)
            .bind(&conflict.description)
            .bind(&conflict.value)
            .bind(conflict.created_at)
            .execute(&mut *tx)
            .await?;
        }

        if let Some(file_state) = outcome.file_state {
            sqlx::query(
                "UPDATE file_resources SET sync_state = ?2, pre_upload_state = NULL
                 WHERE owner_id = ?1 AND sync_state = 'uploading'",
            )
            .bind(&outcome.record_id)
            .bind(file_state.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn conflicts_for(&self, owner_id: &str) -> Result<Vec<ImportConflict>, StoreError> {
        let rows = sqlx::query(
            "SELECT owner_id, ancestor_ids, description, value, created_at
             FROM conflicts WHERE owner_id = ?1 ORDER BY id ASC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let ancestor_ids: String = row.try_get("ancestor_ids")?;
            out.push(ImportConflict {
                owner_id: row.try_get("owner_id")?,
                ancestor_ids: serde_json::from_str(&ancestor_ids)?,
                description: row.try_get("description")?,
                value: row.try_get("value")?,
                created_at: row.try_get("created_at")?,
            });
        }
        Ok(out)
    }

    pub async fn count_conflicts(&self) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT COUNT(*) AS total FROM conflicts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("total")?)
    }

    /// Removes a record and everything it owns, with their conflicts and
    /// file resources.
    pub async fn delete_record(&self, id: &str) -> Result<(), StoreError> {
        self.write_outcome(&OutcomeWrite {
            record_id: id.to_string(),
            sync_state: SyncState::Synced,
            remove: true,
            conflicts: Vec::new(),
            file_state: None,
        })
        .await
    }
}

/// Recomputes the aggregated state of `id`, then of every record above it
/// through both the owning and the second-parent edge.
async fn refresh_lineage(conn: &mut SqliteConnection, id: &str) -> Result<(), StoreError> {
    let mut pending = VecDeque::from([id.to_string()]);
    let mut seen = HashSet::new();
    while let Some(current) = pending.pop_front() {
        if !seen.insert(current.clone()) {
            continue;
        }
        let Some(row) = sqlx::query(
            "SELECT parent_id, second_parent_id, sync_state, aggregated_sync_state
             FROM records WHERE id = ?1",
        )
        .bind(&current)
        .fetch_optional(&mut *conn)
        .await?
        else {
            continue;
        };
        let own: String = row.try_get("sync_state")?;
        let stored: String = row.try_get("aggregated_sync_state")?;
        let parent: Option<String> = row.try_get("parent_id")?;
        let second_parent: Option<String> = row.try_get("second_parent_id")?;

        let children = child_states(conn, &current).await?;
        let aggregated = aggregate(SyncState::parse(&own)?, children);
        if aggregated != SyncState::parse(&stored)? {
            sqlx::query("UPDATE records SET aggregated_sync_state = ?2 WHERE id = ?1")
                .bind(&current)
                .bind(aggregated.as_str())
                .execute(&mut *conn)
                .await?;
        }
        pending.extend(parent);
        pending.extend(second_parent);
    }
    Ok(())
}

async fn child_states(conn: &mut SqliteConnection, id: &str) -> Result<Vec<SyncState>, StoreError> {
    let rows = sqlx::query(
        "SELECT aggregated_sync_state FROM records
         WHERE parent_id = ?1 OR second_parent_id = ?1",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    rows.iter()
        .map(|row| {
            let state: String = row.try_get("aggregated_sync_state")?;
            SyncState::parse(&state)
        })
        .collect()
}

fn record_from_row(row: &SqliteRow) -> Result<Record, StoreError> {
    let kind: String = row.try_get("kind")?;
    let sync_state: String = row.try_get("sync_state")?;
    let aggregated: String = row.try_get("aggregated_sync_state")?;
    let pre_upload: Option<String> = row.try_get("pre_upload_state")?;
    let deleted: i64 = row.try_get("deleted")?;
    let payload: String = row.try_get("payload")?;
    Ok(Record {
        id: row.try_get("id")?,
        kind: RecordKind::parse(&kind)?,
        parent_id: row.try_get("parent_id")?,
        second_parent_id: row.try_get("second_parent_id")?,
        sync_state: SyncState::parse(&sync_state)?,
        aggregated_sync_state: SyncState::parse(&aggregated)?,
        pre_upload_state: pre_upload.as_deref().map(SyncState::parse).transpose()?,
        deleted: deleted != 0,
        last_updated: row.try_get("last_updated")?,
        payload: serde_json::from_str(&payload)?,
    })
}

fn file_resource_from_row(row: &SqliteRow) -> Result<FileResource, StoreError> {
    let sync_state: String = row.try_get("sync_state")?;
    let pre_upload: Option<String> = row.try_get("pre_upload_state")?;
    Ok(FileResource {
        id: row.try_get("id")?,
        owner_id: row.try_get("owner_id")?,
        sync_state: SyncState::parse(&sync_state)?,
        pre_upload_state: pre_upload.as_deref().map(SyncState::parse).transpose()?,
    })
}

fn default_db_path() -> Result<PathBuf, StoreError> {
    let mut path = dirs::data_dir().ok_or(StoreError::MissingDataDir)?;
    path.push("fieldsync");
    path.push("records.db");
    Ok(path)
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
