//! Typed HTTP client for the orchestrator API.
//!
//! Every outbound call carries the `X-Worker-ID` header and a JSON body,
//! and is retried on transient failures (connection errors, 5xx) with
//! exponential backoff. A 404 from any endpoint after registration means
//! the orchestrator has forgotten this worker — surfaced as a distinct
//! `StateLoss` error so the sync controller can re-register.

use crate::models::{
    JobResultPayload, JobStatusPayload, RegistrationPayload, SyncPayload, SyncResponse,
    WorkerCapabilities,
};
use reqwest::{Method, StatusCode};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Maximum attempts per logical request
const MAX_ATTEMPTS: u32 = 3;

/// Exponential backoff base delay
const BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Exponential backoff cap
const BACKOFF_CAP: Duration = Duration::from_secs(5);

/// Per-call timeouts
const REGISTER_TIMEOUT: Duration = Duration::from_secs(10);
const SYNC_TIMEOUT: Duration = Duration::from_secs(10);
const UPDATE_TIMEOUT: Duration = Duration::from_secs(5);
const FINALIZE_TIMEOUT: Duration = Duration::from_secs(10);

/// Error type for orchestrator calls
#[derive(Debug, Error)]
pub enum ClientError {
    /// Orchestrator unreachable after all retry attempts
    #[error("Orchestrator unreachable: {0}")]
    Transport(String),

    /// Orchestrator rejected the request (4xx other than 404, or
    /// persistent 5xx)
    #[error("Orchestrator returned error status: {0}")]
    BadStatus(u16),

    /// Orchestrator lost this worker's state (404) and re-registration
    /// is required
    #[error("Orchestrator lost worker state (404)")]
    StateLoss,

    /// Response body was not the expected JSON shape
    #[error("Failed to decode orchestrator response: {0}")]
    Decode(String),
}

/// Delay before retry attempt `attempt` (0-based), doubling from the base
/// and capped.
fn backoff_delay(attempt: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(1u32 << attempt.min(16))
        .min(BACKOFF_CAP)
}

/// Whether a response status warrants another attempt
fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error()
}

/// Thin strongly-typed facade over the orchestrator HTTP API
pub struct OrchestratorClient {
    base_url: String,
    worker_id: String,
    http: reqwest::Client,
}

impl OrchestratorClient {
    /// Create a client for the given orchestrator base URL.
    ///
    /// # Errors
    /// Returns `ClientError::Transport` if the underlying HTTP client
    /// cannot be constructed.
    pub fn new(base_url: &str, worker_id: &str) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            worker_id: worker_id.to_string(),
            http,
        })
    }

    /// The identity this client announces on every request
    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// Issue one request with retries, returning the successful response.
    ///
    /// Retries are confined to transient conditions: connection failures
    /// and 5xx responses. A 404 short-circuits to `StateLoss`; other 4xx
    /// short-circuit to `BadStatus`.
    async fn send<P: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        payload: &P,
        timeout: Duration,
    ) -> Result<reqwest::Response, ClientError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_status: Option<u16> = None;
        let mut last_transport = String::new();

        for attempt in 0..MAX_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(backoff_delay(attempt - 1)).await;
            }

            let result = self
                .http
                .request(method.clone(), &url)
                .header("X-Worker-ID", &self.worker_id)
                .timeout(timeout)
                .json(payload)
                .send()
                .await;

            match result {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return Ok(resp);
                    }
                    if status == StatusCode::NOT_FOUND {
                        return Err(ClientError::StateLoss);
                    }
                    if !is_retryable_status(status) {
                        return Err(ClientError::BadStatus(status.as_u16()));
                    }
                    warn!(%url, status = status.as_u16(), attempt, "Retryable orchestrator error");
                    last_status = Some(status.as_u16());
                }
                Err(e) => {
                    warn!(%url, attempt, error = %e, "Orchestrator request failed");
                    last_status = None;
                    last_transport = e.to_string();
                }
            }
        }

        // Persistent 5xx carries its status; everything else was transport
        match last_status {
            Some(status) => Err(ClientError::BadStatus(status)),
            None => Err(ClientError::Transport(last_transport)),
        }
    }

    /// Declare worker capabilities to the orchestrator.
    ///
    /// Called once at startup and again on state-loss recovery; repeating
    /// it with identical capabilities is idempotent on the orchestrator.
    pub async fn register(&self, capabilities: &WorkerCapabilities) -> Result<(), ClientError> {
        let payload = RegistrationPayload {
            worker_id: self.worker_id.clone(),
            capabilities: capabilities.clone(),
        };

        debug!(worker_id = %self.worker_id, "Registering worker with orchestrator");
        self.send(
            Method::POST,
            "/api/v1/workers/register",
            &payload,
            REGISTER_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    /// Send worker state and receive a potential job assignment
    pub async fn sync(&self, payload: &SyncPayload) -> Result<SyncResponse, ClientError> {
        let resp = self
            .send(Method::POST, "/api/v1/workers/sync", payload, SYNC_TIMEOUT)
            .await?;

        resp.json::<SyncResponse>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Report transcoding progress for a running job
    pub async fn update_job_status(
        &self,
        job_id: &str,
        payload: &JobStatusPayload,
    ) -> Result<(), ClientError> {
        let path = format!("/api/v1/jobs/{}", job_id);
        self.send(Method::PATCH, &path, payload, UPDATE_TIMEOUT)
            .await?;
        Ok(())
    }

    /// Report terminal job completion or failure
    pub async fn finalize_job(
        &self,
        job_id: &str,
        payload: &JobResultPayload,
    ) -> Result<(), ClientError> {
        let path = format!("/api/v1/jobs/{}/finalize", job_id);
        self.send(Method::POST, &path, payload, FINALIZE_TIMEOUT)
            .await?;
        Ok(())
    }
}
