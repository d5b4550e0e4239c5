use crate::asset_cache::fetcher::{is_forwardable_request_header, is_hop_by_hop};
use crate::asset_cache::lifecycle::FetchOutcome;
use crate::asset_cache::{AssetRequest, AssetResponse, RequestMode};
use crate::AppState;
use axum::{
    Json, Router,
    body::{Body, Bytes},
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Response header telling clients how a request was answered
pub const CACHE_STATUS_HEADER: &str = "x-sitecache";

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .route("/__sitecache/status", get(handle_status))
        .route("/__sitecache/install", post(handle_install))
        .fallback(handle_intercept)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Classify an inbound request the way a browser labels its fetches
pub fn request_mode(method: &Method, headers: &HeaderMap) -> RequestMode {
    match headers
        .get("sec-fetch-mode")
        .and_then(|v| v.to_str().ok())
    {
        Some("navigate") => RequestMode::Navigate,
        Some("same-origin") => RequestMode::SameOrigin,
        Some("no-cors") => RequestMode::NoCors,
        Some(_) => RequestMode::Cors,
        None => {
            // Clients that don't send fetch metadata: treat HTML page loads as navigations
            let wants_html = headers
                .get(header::ACCEPT)
                .and_then(|v| v.to_str().ok())
                .is_some_and(|accept| accept.contains("text/html"));
            if *method == Method::GET && wants_html {
                RequestMode::Navigate
            } else {
                RequestMode::NoCors
            }
        }
    }
}

fn forwarded_headers(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter(|(name, _)| is_forwardable_request_header(name.as_str()))
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_string(), v.to_string()))
        })
        .collect()
}

fn into_http_response(response: &AssetResponse, cache_status: &'static str) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let mut builder = Response::builder().status(status);
    for (name, value) in &response.headers {
        if !is_hop_by_hop(name) {
            builder = builder.header(name.as_str(), value.as_str());
        }
    }

    builder
        .header(CACHE_STATUS_HEADER, cache_status)
        .body(Body::from(response.body.clone()))
        .unwrap_or_else(|e| {
            error!("Failed to build response for {}: {}", response.url, e);
            (StatusCode::BAD_GATEWAY, "Malformed upstream response").into_response()
        })
}

async fn handle_intercept(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Only the path and query are taken from the client; the origin is fixed
    let mut url = state.cache().settings().origin.clone();
    url.set_path(uri.path());
    url.set_query(uri.query());

    let mode = request_mode(&method, &headers);
    let request = AssetRequest::new(method.as_str(), url, mode)
        .with_headers(forwarded_headers(&headers))
        .with_body(body);

    // The cache write, if any, finishes in the background
    let resolution = state.fetch(request).await;

    match resolution.outcome {
        FetchOutcome::Cached(response) => into_http_response(&response, "hit"),
        FetchOutcome::Network(response) => into_http_response(&response, "miss"),
        FetchOutcome::OfflineFallback(response) => {
            debug!("Serving offline page for {}", uri);
            into_http_response(&response, "offline")
        }
        FetchOutcome::Unavailable { reason } => {
            warn!("No response available for {}: {}", uri, reason);
            (
                StatusCode::GATEWAY_TIMEOUT,
                [(CACHE_STATUS_HEADER, "offline")],
                format!("Offline and not cached: {}", reason),
            )
                .into_response()
        }
    }
}

async fn handle_status(State(state): State<AppState>) -> impl IntoResponse {
    match state.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => {
            error!("Failed to read cache status: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Failed to read cache status").into_response()
        }
    }
}

async fn handle_install(State(state): State<AppState>) -> impl IntoResponse {
    info!("📡 Received install trigger");
    if let Err(e) = state.start().await {
        return (StatusCode::BAD_GATEWAY, format!("Install failed: {}", e)).into_response();
    }
    handle_status(State(state)).await.into_response()
}
