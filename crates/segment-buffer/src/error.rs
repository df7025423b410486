use dash::ManifestError;
use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum BufferError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("HTTP request failed: {source}")]
    Network {
        #[from]
        source: reqwest::Error,
    },

    #[error("request failed with HTTP {status} for {url}")]
    HttpStatus { status: StatusCode, url: String },

    #[error("failed to read response body for {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("decode sink error: {reason}")]
    Sink { reason: String },

    #[error("manifest error: {source}")]
    Manifest {
        #[from]
        source: ManifestError,
    },

    #[error("segment index {index} outside valid range 1..={max}")]
    Bounds { index: u64, max: u64 },

    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl BufferError {
    pub fn http_status(status: StatusCode, url: impl Into<String>) -> Self {
        Self::HttpStatus {
            status,
            url: url.into(),
        }
    }

    pub fn decode(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Decode {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    pub fn sink(reason: impl Into<String>) -> Self {
        Self::Sink {
            reason: reason.into(),
        }
    }

    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Whether a fetch that failed with this error is worth repeating.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { source } => {
                source.is_connect() || source.is_timeout() || source.is_request() || source.is_body()
            }
            Self::HttpStatus { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            Self::Decode { .. } => true,
            Self::Cancelled
            | Self::Sink { .. }
            | Self::Manifest { .. }
            | Self::Bounds { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => false,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
