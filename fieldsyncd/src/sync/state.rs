use super::store::StoreError;

/// Upload status of a single record, or of a file resource it owns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncState {
    ToPost,
    ToUpdate,
    /// In-flight marker; never a resting state.
    Uploading,
    Synced,
    Error,
    Warning,
}

impl SyncState {
    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            SyncState::ToPost => "to_post",
            SyncState::ToUpdate => "to_update",
            SyncState::Uploading => "uploading",
            SyncState::Synced => "synced",
            SyncState::Error => "error",
            SyncState::Warning => "warning",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "to_post" => Ok(SyncState::ToPost),
            "to_update" => Ok(SyncState::ToUpdate),
            "uploading" => Ok(SyncState::Uploading),
            "synced" => Ok(SyncState::Synced),
            "error" => Ok(SyncState::Error),
            "warning" => Ok(SyncState::Warning),
            other => Err(StoreError::InvalidState(other.to_string())),
        }
    }

    /// States picked up by an upload pass. Warnings were accepted by the
    /// server and wait for the next local edit.
    pub fn is_uploadable(self) -> bool {
        matches!(
            self,
            SyncState::ToPost | SyncState::ToUpdate | SyncState::Error
        )
    }

    fn is_unsynced(self) -> bool {
        matches!(
            self,
            SyncState::ToPost | SyncState::ToUpdate | SyncState::Uploading
        )
    }

    fn severity(self) -> u8 {
        match self {
            SyncState::Synced => 0,
            SyncState::ToPost | SyncState::ToUpdate | SyncState::Uploading => 1,
            SyncState::Warning => 2,
            SyncState::Error => 3,
        }
    }
}

/// Server outcome for one submitted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImportStatus {
    Success,
    Error,
    Warning,
    /// The record was submitted but the server did not report on it.
    Ignored,
}

impl ImportStatus {
    pub fn from_wire(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "SUCCESS" | "OK" => Some(ImportStatus::Success),
            "ERROR" => Some(ImportStatus::Error),
            "WARNING" => Some(ImportStatus::Warning),
            "IGNORED" => Some(ImportStatus::Ignored),
            _ => None,
        }
    }

    pub fn worst(self, other: Self) -> Self {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    fn severity(self) -> u8 {
        match self {
            ImportStatus::Success => 0,
            ImportStatus::Ignored => 1,
            ImportStatus::Warning => 2,
            ImportStatus::Error => 3,
        }
    }
}

/// Resting state of a record after the server reported `outcome` for it.
/// Ignored records are retried rather than presumed synced.
pub fn transition(outcome: ImportStatus) -> SyncState {
    match outcome {
        ImportStatus::Success => SyncState::Synced,
        ImportStatus::Error => SyncState::Error,
        ImportStatus::Warning => SyncState::Warning,
        ImportStatus::Ignored => SyncState::ToUpdate,
    }
}

/// State of an uploading file resource once its owner resolved to `owner`.
pub fn file_transition(owner: SyncState) -> SyncState {
    match owner {
        SyncState::Synced => SyncState::Synced,
        _ => SyncState::ToPost,
    }
}

/// Worst of `own` and the aggregated states of the direct children.
///
/// A parent whose own state is better than an unsynced child aggregates to
/// `ToUpdate`.
pub fn aggregate<I>(own: SyncState, children: I) -> SyncState
where
    I: IntoIterator<Item = SyncState>,
{
    let worst_child = children.into_iter().max_by_key(|state| state.severity());
    match worst_child {
        Some(child) if child.severity() > own.severity() => {
            if child.is_unsynced() {
                SyncState::ToUpdate
            } else {
                child
            }
        }
        _ => own,
    }
}
