//! HTTP client for the Bloxs API.
//!
//! One client serves both targets (reqwest compiles to `fetch` on WASM).
//! Feed responses are passed through with their upstream status; only
//! transport problems surface as errors.

use bytes::Bytes;
use reqwest::Client;
use serde::{Deserialize, Serialize};
#[cfg(not(target_arch = "wasm32"))]
use std::time::Duration;
use tracing::{debug, warn};

#[cfg(not(target_arch = "wasm32"))]
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Errors talking to the Bloxs API.
#[derive(Debug)]
pub enum FetchError {
    Network(String),
    Http { status: u16, body: String },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Network(msg) => write!(f, "network error: {}", msg),
            FetchError::Http { status, .. } => write!(f, "HTTP {}", status),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AuthRequest<'a> {
    api_key: &'a str,
    api_secret: &'a str,
}

/// Body of a successful `/Authorization` exchange.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthReply {
    pub token: String,
    #[serde(default)]
    pub expiration: Option<String>,
}

/// A feed response as received: upstream status plus raw body bytes.
#[derive(Debug)]
pub struct FeedReply {
    pub status: u16,
    pub body: Bytes,
}

/// Seam between the request pipeline and the Bloxs API.
#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
pub trait FeedUpstream {
    /// Trade the configured credentials for a JWT.
    async fn authorize(&self) -> Result<AuthReply, FetchError>;

    /// GET a feed path (query included) with the given JWT.
    ///
    /// Non-2xx upstream statuses come back as an `Ok(FeedReply)`; `Err` means
    /// the upstream could not be reached at all.
    async fn fetch_feed(&self, path_and_query: &str, jwt: &str) -> Result<FeedReply, FetchError>;
}

/// reqwest-backed client for a single Bloxs deployment.
pub struct UpstreamClient {
    client: Client,
    base_url: String,
    api_key: String,
    api_secret: String,
}

impl UpstreamClient {
    /// Returns an error if the HTTP client fails to build (e.g., TLS
    /// configuration issues).
    pub fn new(base_url: &str, api_key: &str, api_secret: &str) -> Result<Self, String> {
        #[cfg(not(target_arch = "wasm32"))]
        let client = Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", e))?;
        #[cfg(target_arch = "wasm32")]
        let client = Client::builder()
            .build()
            .map_err(|e| format!("failed to build HTTP client: {}", e))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        })
    }
}

#[cfg_attr(not(target_arch = "wasm32"), async_trait::async_trait)]
#[cfg_attr(target_arch = "wasm32", async_trait::async_trait(?Send))]
impl FeedUpstream for UpstreamClient {
    async fn authorize(&self) -> Result<AuthReply, FetchError> {
        let url = format!("{}/Authorization", self.base_url);
        debug!(%url, "requesting Bloxs token");

        let response = self
            .client
            .post(&url)
            .json(&AuthRequest {
                api_key: &self.api_key,
                api_secret: &self.api_secret,
            })
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "(failed to read body)".to_string());
            warn!(status, "Bloxs authorization rejected");
            return Err(FetchError::Http { status, body });
        }

        response
            .json::<AuthReply>()
            .await
            .map_err(|e| FetchError::Network(format!("invalid authorization response: {}", e)))
    }

    async fn fetch_feed(&self, path_and_query: &str, jwt: &str) -> Result<FeedReply, FetchError> {
        let url = format!("{}{}", self.base_url, path_and_query);
        debug!(%url, "forwarding to Bloxs feed");

        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {}", jwt))
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;

        if status >= 400 {
            warn!(status, path = path_and_query, "Bloxs feed returned error status");
        }

        Ok(FeedReply { status, body })
    }
}
