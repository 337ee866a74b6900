//! Error types for the audio gateway.

use thiserror::Error;

/// Classified failure raised while opening the upstream audio stream.
///
/// The classification drives the retry policy: rate-limiting and forbidden
/// responses frequently clear on a later attempt, everything else is final.
#[derive(Error, Debug)]
pub enum OpenError {
    /// Upstream rejected the request with 429.
    #[error("upstream rate limited the request (HTTP {status})")]
    RateLimited { status: u16 },

    /// Upstream refused to serve the request (403).
    #[error("upstream forbade the request (HTTP {status})")]
    Forbidden { status: u16 },

    /// The source does not exist or is gone.
    #[error("source not found (HTTP {status})")]
    NotFound { status: u16 },

    /// Transport-level failure before any status was observed.
    #[error("network error: {0}")]
    Network(String),

    /// Extractor failure that does not map to a known class.
    #[error("extractor failure: {message}")]
    Extractor {
        status: Option<u16>,
        message: String,
    },
}

impl OpenError {
    /// Classify an HTTP-like status code observed during the open.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 => Self::RateLimited { status },
            403 => Self::Forbidden { status },
            404 | 410 => Self::NotFound { status },
            _ => Self::Extractor {
                status: Some(status),
                message: format!("unexpected upstream status {status}"),
            },
        }
    }

    /// Whether a retry may clear this failure.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited { .. } | Self::Forbidden { .. })
    }
}

/// Failure raised by the transcode relay before any output was produced.
///
/// Encoder errors after the first output byte are not representable here;
/// they surface through the body stream and tear the connection down.
#[derive(Error, Debug)]
pub enum EncodeError {
    #[error("failed to spawn encoder: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("encoder exited before producing output: {0}")]
    Startup(String),
}
