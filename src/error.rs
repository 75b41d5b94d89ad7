use std::time::Duration;
use thiserror::Error;

/// Everything that can go wrong between receiving a URL and returning markup.
///
/// Display strings keep the wording callers historically matched on
/// ("timeout", "too large", "HTTP", "did not return HTML", "net::ERR_").
#[derive(Debug, Clone, Error)]
pub enum ScrapeError {
    #[error("URL parameter is required")]
    MissingUrl,

    #[error("{0}")]
    InvalidUrl(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Request timeout after {0:?}")]
    Timeout(Duration),

    #[error("Response too large (max {0} bytes)")]
    TooLarge(usize),

    #[error("HTTP {status}: {status_text}")]
    UpstreamHttp { status: u16, status_text: String },

    #[error("{0}")]
    UpstreamUnreachable(String),

    #[error("URL did not return HTML content (content-type: {0})")]
    UnsupportedContentType(String),

    #[error("Browser launch failed: {0}")]
    RenderEngineUnavailable(String),

    #[error("Page error: {0}")]
    PageError(String),

    #[error("Screenshot capture failed: {0}")]
    CaptureFailed(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Caller-facing error taxonomy; each kind maps to one HTTP status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Forbidden,
    Timeout,
    TooLarge,
    UpstreamHttp,
    UpstreamUnreachable,
    UnsupportedContentType,
    RenderEngineUnavailable,
    Internal,
}

impl ErrorKind {
    pub fn status_code(&self) -> u16 {
        match self {
            ErrorKind::InvalidInput => 400,
            ErrorKind::Forbidden => 400,
            ErrorKind::UnsupportedContentType => 400,
            ErrorKind::TooLarge => 413,
            ErrorKind::UpstreamHttp => 502,
            ErrorKind::UpstreamUnreachable => 502,
            ErrorKind::Timeout => 504,
            ErrorKind::RenderEngineUnavailable => 500,
            ErrorKind::Internal => 500,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TooLarge => "too_large",
            ErrorKind::UpstreamHttp => "upstream_http",
            ErrorKind::UpstreamUnreachable => "upstream_unreachable",
            ErrorKind::UnsupportedContentType => "unsupported_content_type",
            ErrorKind::RenderEngineUnavailable => "render_engine_unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

impl ScrapeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ScrapeError::MissingUrl | ScrapeError::InvalidUrl(_) => ErrorKind::InvalidInput,
            ScrapeError::Forbidden(_) => ErrorKind::Forbidden,
            ScrapeError::Timeout(_) => ErrorKind::Timeout,
            ScrapeError::TooLarge(_) => ErrorKind::TooLarge,
            ScrapeError::UpstreamHttp { .. } => ErrorKind::UpstreamHttp,
            ScrapeError::UpstreamUnreachable(_) => ErrorKind::UpstreamUnreachable,
            ScrapeError::UnsupportedContentType(_) => ErrorKind::UnsupportedContentType,
            ScrapeError::RenderEngineUnavailable(_) => ErrorKind::RenderEngineUnavailable,
            ScrapeError::PageError(_)
            | ScrapeError::CaptureFailed(_)
            | ScrapeError::NetworkError(_)
            | ScrapeError::ConfigurationError(_)
            | ScrapeError::IoError(_)
            | ScrapeError::SerializationError(_) => ErrorKind::Internal,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self.kind() {
            ErrorKind::InvalidInput | ErrorKind::Forbidden | ErrorKind::UnsupportedContentType => {
                ErrorSeverity::Low
            }
            ErrorKind::Timeout
            | ErrorKind::TooLarge
            | ErrorKind::UpstreamHttp
            | ErrorKind::UpstreamUnreachable => ErrorSeverity::Medium,
            ErrorKind::RenderEngineUnavailable => ErrorSeverity::Critical,
            ErrorKind::Internal => ErrorSeverity::High,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl From<std::io::Error> for ScrapeError {
    fn from(err: std::io::Error) -> Self {
        ScrapeError::IoError(err.to_string())
    }
}

impl From<serde_json::Error> for ScrapeError {
    fn from(err: serde_json::Error) -> Self {
        ScrapeError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for ScrapeError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_redirect() {
            // Redirect policy errors carry the rejection reason as their source.
            let reason = std::error::Error::source(&err)
                .map(|source| source.to_string())
                .unwrap_or_else(|| err.to_string());
            ScrapeError::Forbidden(reason)
        } else if err.is_connect() {
            ScrapeError::UpstreamUnreachable(err.to_string())
        } else {
            ScrapeError::NetworkError(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_follow_taxonomy() {
        assert_eq!(ScrapeError::MissingUrl.kind().status_code(), 400);
        assert_eq!(ScrapeError::Forbidden("x".into()).kind().status_code(), 400);
        assert_eq!(ScrapeError::Timeout(Duration::from_secs(5)).kind().status_code(), 504);
        assert_eq!(ScrapeError::TooLarge(10).kind().status_code(), 413);
        assert_eq!(
            ScrapeError::UpstreamHttp { status: 404, status_text: "Not Found".into() }
                .kind()
                .status_code(),
            502
        );
        assert_eq!(
            ScrapeError::UnsupportedContentType("application/json".into())
                .kind()
                .status_code(),
            400
        );
        assert_eq!(
            ScrapeError::RenderEngineUnavailable("no chrome".into())
                .kind()
                .status_code(),
            500
        );
        assert_eq!(ScrapeError::PageError("boom".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_messages_keep_matchable_wording() {
        let timeout = ScrapeError::Timeout(Duration::from_secs(5)).to_string();
        assert!(timeout.to_lowercase().contains("timeout"));
        assert!(ScrapeError::TooLarge(1024).to_string().contains("too large"));
        assert_eq!(
            ScrapeError::UpstreamHttp { status: 404, status_text: "Not Found".into() }.to_string(),
            "HTTP 404: Not Found"
        );
        assert!(ScrapeError::UnsupportedContentType("text/plain".into())
            .to_string()
            .contains("not return HTML"));
    }
}
