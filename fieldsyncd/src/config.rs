use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;

const DEFAULT_BATCH_LIMIT: u64 = 20;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const DEFAULT_UPLOAD_INTERVAL_SECS: u64 = 300;

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub server_url: String,
    pub api_token: String,
    /// `None` uses the store's default location.
    pub db_path: Option<PathBuf>,
    pub batch_limit: usize,
    pub request_timeout: Duration,
    pub upload_interval: Duration,
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let server_url = lookup("FIELDSYNC_SERVER_URL")
            .filter(|value| !value.trim().is_empty())
            .context("FIELDSYNC_SERVER_URL is not set")?;
        let api_token = lookup("FIELDSYNC_API_TOKEN")
            .filter(|value| !value.trim().is_empty())
            .context("FIELDSYNC_API_TOKEN is not set")?;
        let db_path = lookup("FIELDSYNC_DB_PATH")
            .filter(|value| !value.trim().is_empty())
            .map(PathBuf::from);
        let batch_limit = read_u64(&lookup, "FIELDSYNC_BATCH_LIMIT", DEFAULT_BATCH_LIMIT);
        let request_timeout = Duration::from_secs(read_u64(
            &lookup,
            "FIELDSYNC_TIMEOUT_SECS",
            DEFAULT_TIMEOUT_SECS,
        ));
        let upload_interval = Duration::from_secs(read_u64(
            &lookup,
            "FIELDSYNC_UPLOAD_INTERVAL_SECS",
            DEFAULT_UPLOAD_INTERVAL_SECS,
        ));

        Ok(Self {
            server_url,
            api_token,
            db_path,
            batch_limit: usize::try_from(batch_limit).unwrap_or(usize::MAX),
            request_timeout,
            upload_interval,
        })
    }
}

fn read_u64<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}
