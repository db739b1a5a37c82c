// Installer backend API errors

use thiserror::Error;

/// Longest response body kept in an error (bodies can be whole HTML error pages).
const MAX_BODY_CHARS: usize = 512;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Unable to reach the installer backend: {0}")]
    Network(String),
    #[error("The installer backend did not answer in time: {0}")]
    Timeout(String),
    #[error("The installer backend rejected the request (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },
    #[error("Unexpected response from the installer backend: {0}")]
    Decode(String),
    #[error("Invalid backend URL: {0}")]
    Url(String),
}

impl ApiError {
    pub fn rejected(status: u16, body: &str) -> Self {
        let body = body.trim();
        let body = if body.chars().count() > MAX_BODY_CHARS {
            let cut: String = body.chars().take(MAX_BODY_CHARS).collect();
            format!("{}...", cut)
        } else {
            body.to_string()
        };
        ApiError::Rejected { status, body }
    }

    /// Worth retrying: the backend may be restarting or briefly overloaded.
    pub fn is_transient(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) => true,
            ApiError::Rejected { status, .. } => matches!(status, 502..=504),
            ApiError::Decode(_) | ApiError::Url(_) => false,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout(e.to_string())
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            ApiError::rejected(status.as_u16(), &e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}

impl From<url::ParseError> for ApiError {
    fn from(e: url::ParseError) -> Self {
        ApiError::Url(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2000);
        match ApiError::rejected(500, &body) {
            ApiError::Rejected { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body.chars().count(), MAX_BODY_CHARS + 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn only_gateway_errors_and_transport_failures_are_transient() {
        assert!(ApiError::Network("refused".into()).is_transient());
        assert!(ApiError::Timeout("5s".into()).is_transient());
        assert!(ApiError::rejected(503, "").is_transient());
        assert!(!ApiError::rejected(500, "").is_transient());
        assert!(!ApiError::rejected(400, "").is_transient());
        assert!(!ApiError::Decode("bad json".into()).is_transient());
    }
}
