use anyhow::Context;
use fieldsync_core::TrackerClient;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::SyncConfig;
use crate::sync::context::SyncContext;
use crate::sync::engine::{UploadEngine, UploadError};
use crate::sync::progress::{BatchOutcome, ProgressEvent, ProgressReporter};
use crate::sync::store::RecordStore;

pub struct DaemonRuntime {
    config: SyncConfig,
    engine: UploadEngine,
}

impl DaemonRuntime {
    pub async fn bootstrap(config: SyncConfig) -> anyhow::Result<Self> {
        let client = TrackerClient::with_timeout(
            &config.server_url,
            config.api_token.clone(),
            config.request_timeout,
        )
        .context("failed to build tracker client")?;
        let store = match &config.db_path {
            Some(path) => RecordStore::open(path).await,
            None => RecordStore::new_default().await,
        }
        .context("failed to initialize record store")?;

        let context = SyncContext::new(store, client).with_batch_limit(config.batch_limit);
        let engine = UploadEngine::new(context);
        engine
            .recover_interrupted()
            .await
            .context("failed to recover interrupted uploads")?;

        Ok(Self { config, engine })
    }

    /// Runs upload passes until `cancel` fires. With `once`, runs one pass.
    pub async fn run(self, once: bool, cancel: CancellationToken) -> anyhow::Result<()> {
        info!(
            server = %self.config.server_url,
            batch_limit = self.config.batch_limit,
            interval_secs = self.config.upload_interval.as_secs(),
            "fieldsyncd started"
        );

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<ProgressEvent>();
        let progress_handle = tokio::spawn(async move {
            while let Some(event) = events_rx.recv().await {
                log_progress(&event);
            }
        });
        let reporter = ProgressReporter::new(events_tx, cancel.clone());

        let result = loop {
            match self.engine.upload_all(&reporter).await {
                Ok(report) => match report.into_result() {
                    Ok(report) => info!(
                        batches = report.batches,
                        synced = report.synced,
                        ignored = report.ignored,
                        "upload pass finished"
                    ),
                    Err(err) => warn!(%err, "upload pass finished with unsynced data"),
                },
                Err(UploadError::Offline { completed_batches }) => {
                    warn!(completed_batches, "server unreachable, will retry next pass");
                }
                Err(err @ UploadError::Persistence(_)) => {
                    error!(%err, "local store failure");
                    break Err(anyhow::Error::new(err));
                }
                Err(err) => warn!(%err, "upload pass failed"),
            }

            if once || cancel.is_cancelled() {
                break Ok(());
            }
            tokio::select! {
                _ = cancel.cancelled() => break Ok(()),
                _ = tokio::time::sleep(self.config.upload_interval) => {}
            }
        };

        drop(reporter);
        let _ = progress_handle.await;
        info!("fieldsyncd stopped");
        result
    }
}

fn log_progress(event: &ProgressEvent) {
    match &event.outcome {
        BatchOutcome::Applied {
            synced,
            warnings,
            errors,
            ignored,
        } => info!(
            pipeline = ?event.pipeline,
            batch = event.index + 1,
            total = event.total,
            synced,
            warnings,
            errors,
            ignored,
            "batch uploaded"
        ),
        BatchOutcome::Reverted { reason } => warn!(
            pipeline = ?event.pipeline,
            batch = event.index + 1,
            total = event.total,
            %reason,
            "batch reverted"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(server_url: String, db_path: std::path::PathBuf) -> SyncConfig {
        SyncConfig {
            server_url,
            api_token: "secret".into(),
            db_path: Some(db_path),
            batch_limit: 20,
            request_timeout: Duration::from_secs(5),
            upload_interval: Duration::from_secs(300),
        }
    }

    #[tokio::test]
    async fn single_pass_uploads_and_stops() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/tracker"))
            .and(header("authorization", "ApiToken secret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "importSummaries": [{"reference": "E1", "status": "SUCCESS"}]
            })))
            .expect(1)
            .mount(&server)
            .await;
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("records.db");
        let store = RecordStore::open(&db_path).await.unwrap();
        store
            .upsert_record(&crate::sync::record::RecordInput {
                id: "E1".into(),
                kind: crate::sync::record::RecordKind::Event,
                parent_id: None,
                second_parent_id: None,
                sync_state: crate::sync::state::SyncState::ToPost,
                deleted: false,
                last_updated: 1,
                payload: serde_json::json!({}),
            })
            .await
            .unwrap();

        let runtime = DaemonRuntime::bootstrap(config(server.uri(), db_path))
            .await
            .unwrap();
        runtime.run(true, CancellationToken::new()).await.unwrap();

        let e1 = store.get_record("E1").await.unwrap().unwrap();
        assert_eq!(e1.sync_state, crate::sync::state::SyncState::Synced);
    }

    #[tokio::test]
    async fn cancelled_loop_exits_after_first_pass() {
        let server = MockServer::start().await;
        let dir = tempdir().unwrap();
        let runtime = DaemonRuntime::bootstrap(config(server.uri(), dir.path().join("r.db")))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), runtime.run(false, cancel))
            .await
            .unwrap()
            .unwrap();
    }
}
