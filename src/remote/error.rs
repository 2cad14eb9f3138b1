//! Shared error handling for remote adapters.
//!
//! Both REST clients funnel failures through [`ApiError`], which keeps the
//! HTTP status so the executor can tell credential problems (abort the batch)
//! from transient ones (fail the ticket, retry next tick).

use std::fmt;

use reqwest::StatusCode;

use crate::error::BridgeError;
use crate::types::Platform;

/// Maximum number of response-body bytes kept in an error message.
const MAX_BODY_IN_MESSAGE: usize = 300;

#[derive(Debug)]
pub struct ApiError {
    pub platform: Platform,
    /// HTTP status code, if a response was received
    pub status: Option<StatusCode>,
    /// Whether the request failed before a response (timeout, connect)
    pub network: bool,
    pub message: String,
}

impl ApiError {
    pub fn new(platform: Platform, message: impl Into<String>) -> Self {
        Self {
            platform,
            status: None,
            network: false,
            message: message.into(),
        }
    }

    pub fn with_status(platform: Platform, status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            platform,
            status: Some(status),
            network: false,
            message: message.into(),
        }
    }

    pub fn from_reqwest(platform: Platform, err: &reqwest::Error) -> Self {
        Self {
            platform,
            status: err.status(),
            network: err.is_timeout() || err.is_connect() || err.is_request(),
            message: err.to_string(),
        }
    }

    /// Build an error from a non-success response, keeping a bounded excerpt
    /// of the body for context.
    pub async fn from_response(platform: Platform, response: reqwest::Response) -> Self {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let mut excerpt: String = body.chars().take(MAX_BODY_IN_MESSAGE).collect();
        if body.chars().count() > MAX_BODY_IN_MESSAGE {
            excerpt.push_str("...");
        }
        let reason = status.canonical_reason().unwrap_or("Unknown");
        let message = if excerpt.trim().is_empty() {
            format!("HTTP {} {}", status.as_u16(), reason)
        } else {
            format!("HTTP {} {}: {}", status.as_u16(), reason, excerpt.trim())
        };
        Self::with_status(platform, status, message)
    }

    pub fn is_transient(&self) -> bool {
        if self.network {
            return true;
        }
        self.status
            .is_some_and(|s| s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS)
    }

    /// Convert into the crate error, keeping the classification.
    pub fn into_bridge_error(self, id: Option<&str>) -> BridgeError {
        let platform = self.platform;
        match self.status {
            Some(StatusCode::UNAUTHORIZED) => BridgeError::Unauthorized {
                platform,
                message: self.message,
            },
            Some(StatusCode::FORBIDDEN) => BridgeError::Forbidden {
                platform,
                message: self.message,
            },
            Some(StatusCode::NOT_FOUND) if id.is_some() => BridgeError::NotFound {
                platform,
                id: id.unwrap_or_default().to_string(),
            },
            _ if self.is_transient() => BridgeError::Transient {
                platform,
                message: self.message,
            },
            _ => BridgeError::Api {
                platform,
                message: self.message,
            },
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl From<ApiError> for BridgeError {
    fn from(error: ApiError) -> Self {
        error.into_bridge_error(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_statuses() {
        let err = ApiError::with_status(Platform::Tracker, StatusCode::UNAUTHORIZED, "nope");
        assert!(matches!(
            BridgeError::from(err),
            BridgeError::Unauthorized { .. }
        ));

        let err = ApiError::with_status(Platform::Board, StatusCode::FORBIDDEN, "scope");
        let converted = BridgeError::from(err);
        assert!(matches!(converted, BridgeError::Forbidden { .. }));
        assert!(converted.is_auth());
    }

    #[test]
    fn test_transient_statuses() {
        for status in [
            StatusCode::BAD_GATEWAY,
            StatusCode::SERVICE_UNAVAILABLE,
            StatusCode::TOO_MANY_REQUESTS,
        ] {
            let err = ApiError::with_status(Platform::Tracker, status, "later");
            assert!(err.is_transient(), "{status} should be transient");
            assert!(BridgeError::from(err).is_transient());
        }
    }

    #[test]
    fn test_not_found_needs_an_id() {
        let err = ApiError::with_status(Platform::Tracker, StatusCode::NOT_FOUND, "gone");
        assert!(err.into_bridge_error(Some("SEC-1")).is_not_found());

        let err = ApiError::with_status(Platform::Tracker, StatusCode::NOT_FOUND, "gone");
        assert!(matches!(err.into_bridge_error(None), BridgeError::Api { .. }));
    }

    #[test]
    fn test_client_error_is_permanent() {
        let err = ApiError::with_status(Platform::Board, StatusCode::BAD_REQUEST, "bad field");
        assert!(!err.is_transient());
        assert!(matches!(BridgeError::from(err), BridgeError::Api { .. }));
    }
}
