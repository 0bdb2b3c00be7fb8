use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use thiserror::Error;
use tracing::debug;

use crate::model::{JobHistory, JobStates};

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request to backup service failed")]
    Request(#[from] reqwest::Error),
    #[error("{url} answered {status}")]
    Status { status: StatusCode, url: String },
    #[error("could not decode response from {url}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    /// Connection refused, DNS failure or timeout: the service isn't reachable at all.
    pub fn is_unreachable(&self) -> bool {
        match self {
            ApiError::Request(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}

/// Where job snapshots and history come from.
pub trait SnapshotSource: Send + Sync {
    fn job_states(&self) -> Result<JobStates, ApiError>;
    fn history(&self) -> Result<JobHistory, ApiError>;
    fn start_backup(&self) -> Result<StatusCode, ApiError>;
}

pub struct HttpSource {
    client: Client,
    base: String,
}

impl HttpSource {
    pub fn new(host: &str, timeout: Duration) -> Result<Self, ApiError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base: host.trim_end_matches('/').to_string(),
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/api/jobs/{}", self.base, path)
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let url = self.endpoint(path);
        let response = self.client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status { status, url });
        }
        let body = response.bytes()?;
        debug!(%url, len = body.len(), "Fetched");
        decode(&url, &body)
    }
}

pub(crate) fn decode<T: serde::de::DeserializeOwned>(url: &str, body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|source| ApiError::Decode {
        url: url.to_string(),
        source,
    })
}

impl SnapshotSource for HttpSource {
    fn job_states(&self) -> Result<JobStates, ApiError> {
        self.get_json("status")
    }

    fn history(&self) -> Result<JobHistory, ApiError> {
        self.get_json("history")
    }

    fn start_backup(&self) -> Result<StatusCode, ApiError> {
        let url = self.endpoint("incremental_backup");
        let status = self.client.post(&url).send()?.status();
        if !status.is_success() {
            return Err(ApiError::Status { status, url });
        }
        Ok(status)
    }
}
