use std::time::Duration;

use fieldsync_core::{FailureClass, TrackerClient, TrackerError, TrackerPayload, WireRecord};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn event_payload() -> TrackerPayload {
    TrackerPayload {
        events: vec![WireRecord {
            id: "E1".into(),
            parent: Some("N1".into()),
            second_parent: None,
            deleted: false,
            last_updated: 1_700_000_000,
            payload: json!({"programStage": "PS1"}),
            data_values: vec![WireRecord {
                id: "V1".into(),
                parent: Some("E1".into()),
                second_parent: None,
                deleted: false,
                last_updated: 1_700_000_000,
                payload: json!({"value": "5"}),
                data_values: Vec::new(),
                file_resources: Vec::new(),
            }],
            file_resources: Vec::new(),
        }],
        ..TrackerPayload::default()
    }
}

#[tokio::test]
async fn post_sends_token_strategy_and_grouped_body() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/tracker"))
        .and(query_param("strategy", "CREATE_AND_UPDATE"))
        .and(header("authorization", "ApiToken test-token"))
        .and(body_json(json!({
            "events": [{
                "id": "E1",
                "parent": "N1",
                "deleted": false,
                "lastUpdated": 1_700_000_000,
                "payload": {"programStage": "PS1"},
                "dataValues": [{
                    "id": "V1",
                    "parent": "E1",
                    "deleted": false,
                    "lastUpdated": 1_700_000_000,
                    "payload": {"value": "5"}
                }]
            }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "OK",
            "response": {
                "importSummaries": [{"reference": "E1", "status": "SUCCESS"}]
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = TrackerClient::new(&server.uri(), "test-token").unwrap();
    let response = client.post_tracker_payload(&event_payload()).await.unwrap();

    let summary = response.top_level().next().unwrap();
    assert_eq!(summary.reference.as_deref(), Some("E1"));
    assert_eq!(summary.status.as_deref(), Some("SUCCESS"));
}

#[tokio::test]
async fn conflict_status_is_returned_as_response() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/tracker"))
        .respond_with(ResponseTemplate::new(409).set_body_json(json!({
            "httpStatusCode": 409,
            "status": "ERROR",
            "response": {
                "importSummaries": [{
                    "reference": "E1",
                    "status": "ERROR",
                    "description": "Event validation failed",
                    "conflicts": [{"object": "V1", "value": "value_not_numeric"}]
                }]
            }
        })))
        .mount(&server)
        .await;

    let client = TrackerClient::new(&server.uri(), "test-token").unwrap();
    let response = client.post_tracker_payload(&event_payload()).await.unwrap();

    assert_eq!(response.status.as_deref(), Some("ERROR"));
    let summary = response.top_level().next().unwrap();
    assert_eq!(summary.conflicts.len(), 1);
    assert_eq!(summary.conflicts[0].object.as_deref(), Some("V1"));
}

#[tokio::test]
async fn server_error_is_transport_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/tracker"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let client = TrackerClient::new(&server.uri(), "test-token").unwrap();
    let err = client
        .post_tracker_payload(&event_payload())
        .await
        .expect_err("expected api error");

    assert!(matches!(err, TrackerError::Api { ref body, .. } if body == "maintenance"));
    assert_eq!(err.classification(), FailureClass::Transport);
}

#[tokio::test]
async fn unparseable_body_is_transport_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/tracker"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>proxy</html>"))
        .mount(&server)
        .await;

    let client = TrackerClient::new(&server.uri(), "test-token").unwrap();
    let err = client
        .post_tracker_payload(&event_payload())
        .await
        .expect_err("expected decode error");

    assert!(matches!(err, TrackerError::Decode(_)));
    assert_eq!(err.classification(), FailureClass::Transport);
}

#[tokio::test]
async fn slow_server_times_out_as_transport_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/tracker"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"importSummaries": []}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let client =
        TrackerClient::with_timeout(&server.uri(), "test-token", Duration::from_millis(100))
            .unwrap();
    let err = client
        .post_tracker_payload(&event_payload())
        .await
        .expect_err("expected timeout");

    assert_eq!(err.classification(), FailureClass::Transport);
}

#[tokio::test]
async fn refused_connection_is_offline() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = TrackerClient::new(&format!("http://{addr}"), "test-token").unwrap();
    let err = client
        .post_tracker_payload(&event_payload())
        .await
        .expect_err("expected connect error");

    assert_eq!(err.classification(), FailureClass::Offline);
}
