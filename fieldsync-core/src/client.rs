use std::time::Duration;

use reqwest::{Client, StatusCode};
use thiserror::Error;
use url::Url;

use crate::wire::{ImportResponse, TrackerPayload};

/// Merge directive: create records the server has not seen, update known ones.
pub const IMPORT_STRATEGY: &str = "CREATE_AND_UPDATE";

const UPLOAD_PATH: &str = "/api/tracker";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error("api returned {status}: {body}")]
    Api { status: StatusCode, body: String },
    #[error("malformed import response: {0}")]
    Decode(#[from] serde_json::Error),
}

/// How a failed submission should be treated by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The server could not be reached at all.
    Offline,
    /// The request reached the network but produced no usable response.
    Transport,
}

#[derive(Clone)]
pub struct TrackerClient {
    http: Client,
    base_url: Url,
    token: String,
}

impl TrackerClient {
    pub fn new(base_url: &str, token: impl Into<String>) -> Result<Self, TrackerError> {
        Self::with_timeout(base_url, token, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        token: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, TrackerError> {
        Ok(Self {
            http: Client::builder().timeout(timeout).build()?,
            base_url: Url::parse(base_url)?,
            token: token.into(),
        })
    }

    /// Posts one batch. HTTP 409 carries per-record validation outcomes and is
    /// returned as a normal response.
    pub async fn post_tracker_payload(
        &self,
        payload: &TrackerPayload,
    ) -> Result<ImportResponse, TrackerError> {
        let mut url = self.endpoint(UPLOAD_PATH)?;
        url.query_pairs_mut().append_pair("strategy", IMPORT_STRATEGY);
        let response = self
            .http
            .post(url)
            .header("Authorization", self.auth_header_value())
            .json(payload)
            .send()
            .await?;
        Self::handle_import_response(response).await
    }

    fn auth_header_value(&self) -> String {
        format!("ApiToken {}", self.token)
    }

    fn endpoint(&self, path: &str) -> Result<Url, TrackerError> {
        Ok(self.base_url.join(path)?)
    }

    async fn handle_import_response(
        response: reqwest::Response,
    ) -> Result<ImportResponse, TrackerError> {
        let status = response.status();
        if status.is_success() || status == StatusCode::CONFLICT {
            let body = response.bytes().await?;
            Ok(serde_json::from_slice(&body)?)
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(TrackerError::Api { status, body })
        }
    }
}

impl TrackerError {
    pub fn classification(&self) -> FailureClass {
        match self {
            TrackerError::Request(err) if err.is_connect() => FailureClass::Offline,
            _ => FailureClass::Transport,
        }
    }
}
