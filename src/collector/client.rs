//! Node status client
//!
//! HTTP client for the per-node `/workers_status` endpoint.

use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;

use super::status::WorkerResponse;
use crate::error::{EnforcerError, Result};

/// Fetches a node's self-reported worker status
#[async_trait]
pub trait NodeStatusClient: Send + Sync {
    async fn workers_status(&self, endpoint: &str, access_token: &str) -> Result<WorkerResponse>;
}

/// Configuration for the HTTP node client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Whole-request timeout
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// `reqwest`-backed node client
pub struct HttpNodeClient {
    client: Client,
}

impl HttpNodeClient {
    /// Create a new client
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| EnforcerError::Internal {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { client })
    }

    fn status_url(endpoint: &str) -> String {
        format!("{}/workers_status", endpoint.trim_end_matches('/'))
    }
}

#[async_trait]
impl NodeStatusClient for HttpNodeClient {
    async fn workers_status(&self, endpoint: &str, access_token: &str) -> Result<WorkerResponse> {
        let url = Self::status_url(endpoint);
        let unreachable = |reason: String| EnforcerError::PeerUnreachable {
            endpoint: endpoint.into(),
            reason,
        };

        let mut request = self.client.get(&url);
        if !access_token.is_empty() {
            request = request.bearer_auth(access_token);
        }

        let resp = request
            .send()
            .await
            .map_err(|e| unreachable(format!("request failed: {}", e)))?;

        if !resp.status().is_success() {
            return Err(unreachable(format!("status {}", resp.status())));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| unreachable(format!("failed to read body: {}", e)))?;

        let parsed = serde_json::from_slice::<WorkerResponse>(&body)
            .map_err(|e| unreachable(format!("malformed body: {}", e)))?;

        debug!(url = %url, bytes = body.len(), "Fetched worker status");
        Ok(parsed)
    }
}
