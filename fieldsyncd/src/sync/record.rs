use super::state::SyncState;
use super::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RecordKind {
    Subject,
    Enrollment,
    Event,
    Value,
    /// Spans two subjects: `parent_id` is the "from" side, `second_parent_id`
    /// the "to" side.
    Relationship,
}

/// Request collection a kind is serialized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireGroup {
    Subjects,
    Enrollments,
    Events,
    Relationships,
    /// Nested inside the owning event.
    DataValues,
}

/// Per-kind upload rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KindRules {
    pub wire_group: WireGroup,
    /// Whether the server reports an import summary for records of this kind.
    pub reports_outcome: bool,
    /// Whether records of this kind may own file resources.
    pub carries_files: bool,
}

const SUBJECT_RULES: KindRules = KindRules {
    wire_group: WireGroup::Subjects,
    reports_outcome: true,
    carries_files: false,
};

const ENROLLMENT_RULES: KindRules = KindRules {
    wire_group: WireGroup::Enrollments,
    reports_outcome: true,
    carries_files: false,
};

const EVENT_RULES: KindRules = KindRules {
    wire_group: WireGroup::Events,
    reports_outcome: true,
    carries_files: false,
};

const VALUE_RULES: KindRules = KindRules {
    wire_group: WireGroup::DataValues,
    reports_outcome: false,
    carries_files: true,
};

const RELATIONSHIP_RULES: KindRules = KindRules {
    wire_group: WireGroup::Relationships,
    reports_outcome: true,
    carries_files: false,
};

impl RecordKind {
    pub fn rules(self) -> &'static KindRules {
        match self {
            RecordKind::Subject => &SUBJECT_RULES,
            RecordKind::Enrollment => &ENROLLMENT_RULES,
            RecordKind::Event => &EVENT_RULES,
            RecordKind::Value => &VALUE_RULES,
            RecordKind::Relationship => &RELATIONSHIP_RULES,
        }
    }

    pub(crate) fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Subject => "subject",
            RecordKind::Enrollment => "enrollment",
            RecordKind::Event => "event",
            RecordKind::Value => "value",
            RecordKind::Relationship => "relationship",
        }
    }

    pub(crate) fn parse(value: &str) -> Result<Self, StoreError> {
        match value {
            "subject" => Ok(RecordKind::Subject),
            "enrollment" => Ok(RecordKind::Enrollment),
            "event" => Ok(RecordKind::Event),
            "value" => Ok(RecordKind::Value),
            "relationship" => Ok(RecordKind::Relationship),
            other => Err(StoreError::InvalidKind(other.to_string())),
        }
    }
}

/// Independent upload invocation. Pipelines may run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pipeline {
    /// Subjects with their enrollments, events, values and outgoing
    /// relationships.
    Tracker,
    /// Events without an owning enrollment, with their values.
    Events,
}

impl Pipeline {
    pub fn root_kind(self) -> RecordKind {
        match self {
            Pipeline::Tracker => RecordKind::Subject,
            Pipeline::Events => RecordKind::Event,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordInput {
    pub id: String,
    pub kind: RecordKind,
    pub parent_id: Option<String>,
    pub second_parent_id: Option<String>,
    pub sync_state: SyncState,
    pub deleted: bool,
    pub last_updated: i64,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: String,
    pub kind: RecordKind,
    pub parent_id: Option<String>,
    pub second_parent_id: Option<String>,
    pub sync_state: SyncState,
    pub aggregated_sync_state: SyncState,
    pub pre_upload_state: Option<SyncState>,
    pub deleted: bool,
    pub last_updated: i64,
    pub payload: serde_json::Value,
}

impl Record {
    /// Every record this one is a direct child of.
    pub fn parent_ids(&self) -> impl Iterator<Item = &str> {
        self.parent_id
            .as_deref()
            .into_iter()
            .chain(self.second_parent_id.as_deref())
    }
}

/// Binary attachment owned by a value record; uploaded together with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResource {
    pub id: String,
    pub owner_id: String,
    pub sync_state: SyncState,
    pub pre_upload_state: Option<SyncState>,
}

/// Why the server rejected or flagged a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportConflict {
    pub owner_id: String,
    /// Owner's ancestors, nearest first.
    pub ancestor_ids: Vec<String>,
    pub description: String,
    pub value: Option<String>,
    pub created_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_values_inherit_outcomes_and_carry_files() {
        for kind in [
            RecordKind::Subject,
            RecordKind::Enrollment,
            RecordKind::Event,
            RecordKind::Relationship,
        ] {
            assert!(kind.rules().reports_outcome);
            assert!(!kind.rules().carries_files);
        }
        assert!(!RecordKind::Value.rules().reports_outcome);
        assert!(RecordKind::Value.rules().carries_files);
        assert_eq!(RecordKind::Value.rules().wire_group, WireGroup::DataValues);
    }

    #[test]
    fn relationship_has_two_parents() {
        let record = Record {
            id: "L1".into(),
            kind: RecordKind::Relationship,
            parent_id: Some("R1".into()),
            second_parent_id: Some("R2".into()),
            sync_state: SyncState::ToPost,
            aggregated_sync_state: SyncState::ToPost,
            pre_upload_state: None,
            deleted: false,
            last_updated: 0,
            payload: serde_json::Value::Null,
        };
        assert_eq!(record.parent_ids().collect::<Vec<_>>(), vec!["R1", "R2"]);
    }

    #[test]
    fn kind_names_parse_back() {
        for kind in [
            RecordKind::Subject,
            RecordKind::Enrollment,
            RecordKind::Event,
            RecordKind::Value,
            RecordKind::Relationship,
        ] {
            assert_eq!(RecordKind::parse(kind.as_str()).unwrap(), kind);
        }
        assert!(matches!(
            RecordKind::parse("note"),
            Err(StoreError::InvalidKind(_))
        ));
    }
}
