//! API route definitions.

pub mod channels;
pub mod health;
pub mod logging;
pub mod streams;

use axum::Router;
use axum::routing::post;

use crate::api::server::AppState;

/// Path the store files are served under when the public prefix is not a
/// local path (for example an absolute CDN URL).
pub const DEFAULT_STREAMS_PATH: &str = "/streams";

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    let streams_path = streams_mount(state.store().url_prefix());

    Router::new()
        .nest("/health", health::router())
        .route("/api/convert", post(channels::convert))
        .nest("/api/channels", channels::router())
        .nest("/api/logging", logging::router())
        .nest(&streams_path, streams::router())
        .with_state(state)
}

/// Local mount point for store files derived from the public prefix.
pub fn streams_mount(url_prefix: &str) -> String {
    let trimmed = url_prefix.trim_end_matches('/');
    if trimmed.starts_with('/') && trimmed.len() > 1 && !trimmed.contains(['{', '}', '*']) {
        trimmed.to_string()
    } else {
        DEFAULT_STREAMS_PATH.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_mount() {
        assert_eq!(streams_mount("/streams"), "/streams");
        assert_eq!(streams_mount("/live/hls/"), "/live/hls");
        assert_eq!(streams_mount("/"), DEFAULT_STREAMS_PATH);
        assert_eq!(streams_mount("https://cdn.example.com/hls"), DEFAULT_STREAMS_PATH);
    }
}
