//! Network side of fetch interception

use crate::asset_cache::{AssetRequest, AssetResponse, ResponseKind};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

/// Request headers that belong to a single connection and must not be forwarded
pub const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

pub fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP_HEADERS
        .iter()
        .any(|h| h.eq_ignore_ascii_case(name))
}

/// Whether a client request header may be sent upstream
///
/// `accept-encoding` is withheld: stored bodies are served to every client,
/// so they must arrive without content coding.
pub fn is_forwardable_request_header(name: &str) -> bool {
    !is_hop_by_hop(name) && !name.eq_ignore_ascii_case("accept-encoding")
}

/// Transport-level failure: no response was received
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            FetchError::InvalidRequest(e.to_string())
        } else {
            FetchError::Network(e.to_string())
        }
    }
}

/// Anything that can perform a network fetch for the cache
///
/// HTTP error statuses are responses, not errors: only transport failures
/// are reported as `FetchError`.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, FetchError>;
}

/// reqwest-backed fetcher for a single site origin
pub struct HttpFetcher {
    client: Client,
    origin: Url,
}

impl HttpFetcher {
    /// Create an HTTP fetcher for the given site origin
    pub fn new(
        origin: Url,
        timeout: Duration,
        user_agent: Option<&str>,
    ) -> Result<Self, FetchError> {
        let mut client_builder = Client::builder()
            .timeout(timeout)
            .redirect(reqwest::redirect::Policy::limited(5));

        if let Some(ua) = user_agent {
            client_builder = client_builder.user_agent(ua);
        }

        let client = client_builder.build()?;
        Ok(Self { client, origin })
    }

    pub fn origin(&self) -> &Url {
        &self.origin
    }
}

/// Same-origin responses are `Basic`; anything served from elsewhere is `Cors`
pub fn classify(origin: &Url, response_url: &Url) -> ResponseKind {
    if origin.origin() == response_url.origin() {
        ResponseKind::Basic
    } else {
        ResponseKind::Cors
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &AssetRequest) -> Result<AssetResponse, FetchError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::InvalidRequest(e.to_string()))?;

        let mut builder = self.client.request(method, request.url.clone());
        for (name, value) in &request.headers {
            if is_forwardable_request_header(name) {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }
        if !request.body.is_empty() {
            builder = builder.body(request.body.clone());
        }

        let response = builder.send().await?;

        let status = response.status().as_u16();
        let kind = classify(&self.origin, response.url());
        let url = response.url().to_string();
        let headers = response
            .headers()
            .iter()
            .filter(|(name, _)| !is_hop_by_hop(name.as_str()))
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response.bytes().await?;

        debug!("Fetched {} bytes from {} (status {})", body.len(), url, status);

        Ok(AssetResponse {
            status,
            headers,
            body,
            kind,
            url,
        })
    }
}
