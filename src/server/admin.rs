//! Operator token guarding `DELETE /cache`.
//!
//! This is not a user authentication layer: there are no identities and no
//! signed URLs. A single shared token, compared in constant time, protects
//! the one destructive endpoint.
//!
//! ```text
//! DELETE /cache?token=s3cret
//! ```
//!
//! A request without a token is rejected immediately. A wrong token, or any
//! token when none is configured, is rejected only after a delay so guessing
//! is slow.

use std::time::Duration;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use subtle::ConstantTimeEq;
use tracing::{debug, warn};

use super::handlers::ErrorResponse;

/// Default delay before answering a rejected token.
pub const DEFAULT_REJECT_DELAY: Duration = Duration::from_secs(7);

/// Why a cache deletion was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminError {
    /// No `token` parameter
    MissingToken,

    /// Token does not match, or no token is configured
    InvalidToken,
}

impl std::fmt::Display for AdminError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdminError::MissingToken => write!(f, "Missing token parameter"),
            AdminError::InvalidToken => write!(f, "Invalid token"),
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let status = StatusCode::FORBIDDEN;
        let error_type = match self {
            AdminError::MissingToken => "missing_token",
            AdminError::InvalidToken => "invalid_token",
        };
        let message = self.to_string();

        // Wrong tokens may be guessing attempts
        match self {
            AdminError::InvalidToken => {
                warn!(error_type = error_type, status = status.as_u16(), "Admin request rejected: {}", message);
            }
            AdminError::MissingToken => {
                debug!(error_type = error_type, status = status.as_u16(), "Admin request rejected: {}", message);
            }
        }

        let error_response = ErrorResponse::with_status(error_type, message, status);
        (status, Json(error_response)).into_response()
    }
}

/// Verifies operator tokens.
#[derive(Clone)]
pub struct AdminGuard {
    token: Option<Vec<u8>>,
    reject_delay: Duration,
}

impl AdminGuard {
    /// Create a guard. With `token = None` every request is refused.
    pub fn new(token: Option<String>) -> Self {
        Self {
            token: token.filter(|t| !t.is_empty()).map(String::into_bytes),
            reject_delay: DEFAULT_REJECT_DELAY,
        }
    }

    pub fn with_reject_delay(mut self, delay: Duration) -> Self {
        self.reject_delay = delay;
        self
    }

    pub fn reject_delay(&self) -> Duration {
        self.reject_delay
    }

    pub fn is_configured(&self) -> bool {
        self.token.is_some()
    }

    /// Check a provided token without any delay.
    pub fn verify(&self, provided: Option<&str>) -> Result<(), AdminError> {
        let provided = provided.ok_or(AdminError::MissingToken)?;
        let Some(expected) = &self.token else {
            return Err(AdminError::InvalidToken);
        };

        if provided.as_bytes().ct_eq(expected).into() {
            Ok(())
        } else {
            Err(AdminError::InvalidToken)
        }
    }

    /// Check a provided token, sleeping before returning an `InvalidToken`.
    pub async fn authorize(&self, provided: Option<&str>) -> Result<(), AdminError> {
        match self.verify(provided) {
            Err(AdminError::InvalidToken) => {
                tokio::time::sleep(self.reject_delay).await;
                Err(AdminError::InvalidToken)
            }
            other => other,
        }
    }
}

impl std::fmt::Debug for AdminGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminGuard")
            .field("configured", &self.is_configured())
            .field("reject_delay", &self.reject_delay)
            .finish()
    }
}
