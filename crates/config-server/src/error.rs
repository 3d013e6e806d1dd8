//! Plan delivery and installer errors

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use capr_client::StoreError;
use thiserror::Error;
use tracing::warn;

/// Why a connect request could not be served.
///
/// Everything that identifies the caller as not (yet) entitled to a plan maps
/// to an opaque 401; the rest is a 500 carrying the error text.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("unauthorized")]
    Unauthorized,

    #[error("unable to determine API Server URL")]
    MissingApiServerUrl,

    #[error("no plan available")]
    NoPlanAvailable,

    #[error("timeout waiting for plan")]
    PlanTimeout,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to render kubeconfig: {0}")]
    Render(#[from] serde_yaml::Error),

    #[error("failed to encode response: {0}")]
    Encode(#[from] serde_json::Error),
}

impl DeliveryError {
    /// True when the error is answered with 401
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Unauthorized => true,
            Self::Store(e) => e.is_not_found(),
            _ => false,
        }
    }
}

impl IntoResponse for DeliveryError {
    fn into_response(self) -> Response {
        if self.is_unauthorized() {
            return StatusCode::UNAUTHORIZED.into_response();
        }
        warn!(error = %self, "Plan delivery failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

/// Installer script generation errors
#[derive(Debug, Error)]
pub enum InstallerError {
    #[error("failed to fetch install script from {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("install script setting {0} is empty")]
    NoSource(String),

    #[error("install script is not valid UTF-8")]
    Encoding(#[from] std::string::FromUtf8Error),
}

impl IntoResponse for InstallerError {
    fn into_response(self) -> Response {
        warn!(error = %self, "Installer script generation failed");
        (StatusCode::INTERNAL_SERVER_ERROR, self.to_string()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_is_unauthorized() {
        let err = DeliveryError::from(StoreError::not_found("ServiceAccount", "ns", "sa1"));
        assert!(err.is_unauthorized());
        assert!(DeliveryError::Unauthorized.is_unauthorized());
    }

    #[test]
    fn test_internal_errors() {
        assert!(!DeliveryError::PlanTimeout.is_unauthorized());
        assert!(!DeliveryError::from(StoreError::Conflict("stale".to_string())).is_unauthorized());

        let response = DeliveryError::NoPlanAvailable.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let response = DeliveryError::Unauthorized.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_messages() {
        assert_eq!(DeliveryError::PlanTimeout.to_string(), "timeout waiting for plan");
        assert_eq!(DeliveryError::NoPlanAvailable.to_string(), "no plan available");
        assert_eq!(
            DeliveryError::MissingApiServerUrl.to_string(),
            "unable to determine API Server URL"
        );
    }
}
