use serde::{Deserialize, Serialize};

/// Upload request body: one batch grouped by record kind.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TrackerPayload {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<WireRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enrollments: Vec<WireRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub events: Vec<WireRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub relationships: Vec<WireRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WireRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_parent: Option<String>,
    #[serde(default)]
    pub deleted: bool,
    pub last_updated: i64,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_values: Vec<WireRecord>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub file_resources: Vec<String>,
}

/// Server import response. Depending on the server version the summaries are
/// either wrapped in `response` or listed at the top level, and a summary may
/// nest the summaries of its children.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub response: Option<ImportSummaries>,
    #[serde(default)]
    pub import_summaries: Vec<RawImportSummary>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportSummaries {
    #[serde(default)]
    pub import_summaries: Vec<RawImportSummary>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct RawImportSummary {
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub conflicts: Vec<RawConflict>,
    #[serde(default)]
    pub enrollments: Option<ImportSummaries>,
    #[serde(default)]
    pub events: Option<ImportSummaries>,
    #[serde(default)]
    pub relationships: Option<ImportSummaries>,
}

impl RawImportSummary {
    pub fn nested(&self) -> impl Iterator<Item = &RawImportSummary> {
        [&self.enrollments, &self.events, &self.relationships]
            .into_iter()
            .flatten()
            .flat_map(|group| group.import_summaries.iter())
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
pub struct RawConflict {
    #[serde(default)]
    pub object: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

impl ImportResponse {
    /// Top-level summaries from either response shape, wrapped first.
    pub fn top_level(&self) -> impl Iterator<Item = &RawImportSummary> {
        self.response
            .iter()
            .flat_map(|wrapped| wrapped.import_summaries.iter())
            .chain(self.import_summaries.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_omits_empty_groups() {
        let payload = TrackerPayload {
            events: vec![WireRecord {
                id: "E1".into(),
                parent: None,
                second_parent: None,
                deleted: false,
                last_updated: 10,
                payload: serde_json::json!({"status": "ACTIVE"}),
                data_values: Vec::new(),
                file_resources: Vec::new(),
            }],
            ..TrackerPayload::default()
        };

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "events": [{
                    "id": "E1",
                    "deleted": false,
                    "lastUpdated": 10,
                    "payload": {"status": "ACTIVE"}
                }]
            })
        );
    }

    #[test]
    fn wrapped_and_flat_summaries_are_both_visible() {
        let response: ImportResponse = serde_json::from_value(serde_json::json!({
            "status": "ERROR",
            "response": {
                "responseType": "ImportSummaries",
                "importSummaries": [{"reference": "A", "status": "SUCCESS"}]
            },
            "importSummaries": [{"reference": "B", "status": "ERROR"}]
        }))
        .unwrap();

        let refs: Vec<_> = response
            .top_level()
            .filter_map(|s| s.reference.as_deref())
            .collect();
        assert_eq!(refs, vec!["A", "B"]);
    }

    #[test]
    fn nested_summaries_follow_child_groups() {
        let summary: RawImportSummary = serde_json::from_value(serde_json::json!({
            "reference": "R",
            "status": "SUCCESS",
            "enrollments": {"importSummaries": [{"reference": "N"}]},
            "relationships": {"importSummaries": [{"reference": "L"}]}
        }))
        .unwrap();

        let refs: Vec<_> = summary
            .nested()
            .filter_map(|s| s.reference.as_deref())
            .collect();
        assert_eq!(refs, vec!["N", "L"]);
    }
}
