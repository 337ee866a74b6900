//! Conversion request handling.
//!
//! Per-request flow: validate the source URL, open the upstream stream with
//! retry, then hand both ends to the relay. Status codes and headers are
//! committed exactly once, when the `Response` is returned; anything that
//! fails after that closes the connection instead.

use std::sync::{Arc, OnceLock};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use serde::Deserialize;
use tracing::error;

use crate::retry::{open_with_retry, RetryPolicy};
use crate::transcode::{relay, Transcoder};
use crate::upstream::MediaSource;

/// Shared per-process state; immutable after startup.
pub struct AppState {
    pub source: Arc<dyn MediaSource>,
    pub transcoder: Transcoder,
    pub retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
pub struct ConvertParams {
    #[serde(default)]
    pub url: String,
}

/// Accepted source URLs: youtube.com watch links and youtu.be short links.
fn is_supported_source(url: &str) -> bool {
    static RE: OnceLock<regex::Regex> = OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?i)^https?://(www\.)?(youtube\.com|youtu\.be)/").unwrap()
    })
    .is_match(url)
}

/// `GET /convert?url=<source>` — stream the source's audio as Ogg/Opus.
pub async fn convert_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ConvertParams>,
) -> Response {
    if !is_supported_source(&params.url) {
        return json_response(
            StatusCode::BAD_REQUEST,
            serde_json::json!({ "ok": false, "error": "invalid source url" }),
        );
    }

    let stream = match open_with_retry(state.source.as_ref(), &params.url, &state.retry).await {
        Ok(stream) => stream,
        Err(e) => {
            error!("failed to open upstream stream for {}: {e}", params.url);
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({ "ok": false }),
            );
        }
    };

    match relay(stream, &state.transcoder).await {
        Ok(body) => {
            let mut response = Response::new(body);
            response.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("audio/ogg"),
            );
            response.headers_mut().insert(
                header::CACHE_CONTROL,
                HeaderValue::from_static("no-store"),
            );
            response
        }
        Err(e) => {
            error!("encoding failed before any output for {}: {e}", params.url);
            status_response(StatusCode::BAD_GATEWAY)
        }
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response {
    let mut response = Response::new(Body::from(body.to_string()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn status_response(status: StatusCode) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = status;
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_platform_urls() {
        assert!(is_supported_source("https://www.youtube.com/watch?v=abc123"));
        assert!(is_supported_source("https://youtube.com/watch?v=abc123"));
        assert!(is_supported_source("http://youtu.be/abc123"));
        assert!(is_supported_source("HTTPS://WWW.YOUTUBE.COM/watch?v=abc123"));
    }

    #[test]
    fn rejects_everything_else() {
        assert!(!is_supported_source(""));
        assert!(!is_supported_source("ftp://x"));
        assert!(!is_supported_source("https://evil.example.com/v"));
        assert!(!is_supported_source("https://youtube.com.evil.com/watch"));
        assert!(!is_supported_source("youtube.com/watch?v=abc123"));
        assert!(!is_supported_source("https://youtube.com"));
    }
}
