//! HTTP fetcher implementation
//!
//! This module sends page requests through a chosen egress point:
//! - One cached HTTP client per egress point
//! - Per-request user agent, session headers and timeout
//! - Error classification into timeouts, connection failures and the rest

use crate::egress::{build_client, EgressAddr};
use reqwest::header::USER_AGENT;
use reqwest::Client;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use thiserror::Error;

/// A single page request
#[derive(Debug, Clone)]
pub struct PageRequest {
    pub url: String,
    pub user_agent: String,
    pub egress: EgressAddr,
    pub timeout: Duration,
    /// Extra headers (cookie, referer)
    pub headers: Vec<(String, String)>,
}

/// Status and body of a completed request
#[derive(Debug, Clone)]
pub struct PageResponse {
    pub status: u16,
    pub body: String,
}

impl PageResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Transport-level failure; the request never produced a response
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,

    #[error("connection failed: {0}")]
    Connect(String),

    #[error("transport error: {0}")]
    Transport(String),
}

impl FetchError {
    /// Whether the failure is plausibly caused by the egress point
    pub fn is_egress_fault(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connect(_))
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Issues page requests
pub trait Fetcher: Send + Sync {
    fn get(
        &self,
        request: &PageRequest,
    ) -> impl Future<Output = Result<PageResponse, FetchError>> + Send;
}

/// Fetches pages with reqwest, one client per egress point
#[derive(Debug, Default)]
pub struct HttpFetcher {
    clients: Mutex<HashMap<EgressAddr, Client>>,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn client_for(&self, addr: &EgressAddr, timeout: Duration) -> Result<Client, FetchError> {
        let mut clients = self
            .clients
            .lock()
            .map_err(|_| FetchError::Transport("client cache poisoned".to_string()))?;

        if let Some(client) = clients.get(addr) {
            return Ok(client.clone());
        }

        let client = build_client(addr, timeout)
            .map_err(|e| FetchError::Transport(format!("failed to build client: {}", e)))?;
        clients.insert(addr.clone(), client.clone());
        Ok(client)
    }
}

impl Fetcher for HttpFetcher {
    async fn get(&self, request: &PageRequest) -> Result<PageResponse, FetchError> {
        let client = self.client_for(&request.egress, request.timeout)?;

        let mut builder = client
            .get(&request.url)
            .timeout(request.timeout)
            .header(USER_AGENT, &request.user_agent);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;

        Ok(PageResponse { status, body })
    }
}
