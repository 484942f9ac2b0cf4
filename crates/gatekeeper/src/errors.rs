//! Gatekeeper HTTP boundary errors.
//!
//! Every gate failure maps to a fixed plain-text body. The detailed cause is
//! logged where it happens and never reaches the client.

use crate::auth::VerifyError;
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use thiserror::Error;

/// Challenge sent with every 401.
const WWW_AUTHENTICATE_CHALLENGE: &str = "Bearer realm=\"gatekeeper\"";

/// Gate rejection.
///
/// Maps to:
/// - MissingAuthorization, InvalidAuthorizationHeader, InvalidToken,
///   Unauthenticated: 401 Unauthorized
/// - Forbidden: 403 Forbidden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum GateError {
    #[error("missing authorization")]
    MissingAuthorization,

    #[error("invalid authorization header")]
    InvalidAuthorizationHeader,

    #[error("invalid token")]
    InvalidToken,

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("forbidden")]
    Forbidden,
}

impl GateError {
    /// HTTP status for this rejection.
    pub fn status_code(self) -> StatusCode {
        match self {
            GateError::MissingAuthorization
            | GateError::InvalidAuthorizationHeader
            | GateError::InvalidToken
            | GateError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GateError::Forbidden => StatusCode::FORBIDDEN,
        }
    }
}

/// Every verification failure looks the same from outside.
impl From<VerifyError> for GateError {
    fn from(_: VerifyError) -> Self {
        GateError::InvalidToken
    }
}

impl IntoResponse for GateError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let mut response = (status, self.to_string()).into_response();

        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static(WWW_AUTHENTICATE_CHALLENGE),
            );
        }

        response
    }
}
