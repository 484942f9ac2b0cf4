//! Authentication middleware for protected routes.
//!
//! Extracts the bearer token from the Authorization header, verifies it with
//! the [`TokenVerifier`], and injects the resulting [`Principal`] into request
//! extensions.

use crate::auth::{Principal, TokenVerifier};
use crate::errors::GateError;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::instrument;

/// State for the authentication middleware.
#[derive(Clone)]
pub struct AuthState {
    /// Verifier bound to the configured issuer.
    pub verifier: Arc<TokenVerifier>,
}

/// Pull the token out of `Authorization: Bearer <token>`.
///
/// The scheme is matched case-insensitively. The returned token may be empty;
/// the verifier rejects that.
///
/// # Errors
///
/// `MissingAuthorization` when the header is absent, and
/// `InvalidAuthorizationHeader` when it is not valid UTF-8 or not a bearer
/// credential.
pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, GateError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(GateError::MissingAuthorization)?;

    let value = value
        .to_str()
        .map_err(|_| GateError::InvalidAuthorizationHeader)?;

    match value.split_once(' ') {
        Some((scheme, token)) if scheme.eq_ignore_ascii_case("bearer") => Ok(token),
        _ => Err(GateError::InvalidAuthorizationHeader),
    }
}

/// Authentication middleware.
///
/// # Authorization Header Format
///
/// ```text
/// Authorization: Bearer <token>
/// ```
///
/// # Response
///
/// - 401 `missing authorization` if the header is absent
/// - 401 `invalid authorization header` if it is not a bearer credential
/// - 401 `invalid token` if verification fails for any reason
/// - Otherwise continues with the `Principal` in request extensions
#[instrument(skip_all, name = "gatekeeper.middleware.auth")]
pub async fn require_auth(
    State(state): State<Arc<AuthState>>,
    mut req: Request,
    next: Next,
) -> Result<impl IntoResponse, GateError> {
    let token = extract_bearer_token(req.headers()).inspect_err(|e| {
        tracing::debug!(target: "gatekeeper.middleware.auth", error = %e, "Rejecting request");
    })?;

    let principal = state.verifier.verify(token).await.map_err(|e| {
        tracing::info!(
            target: "gatekeeper.middleware.auth",
            reason = %e,
            "Token rejected"
        );
        GateError::from(e)
    })?;

    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}

/// Handlers can take `Principal` directly as an argument.
#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = GateError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(GateError::Unauthenticated)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::auth::jwks::{KeySource, DEFAULT_REFRESH_INTERVAL};
    use crate::auth::signing_key::{Jwk, JwkSet};
    use crate::auth::testing::InMemoryKeyFetcher;
    use axum::{body::Body, http::StatusCode, middleware, routing::get, Router};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn headers_with(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, value.parse().unwrap());
        headers
    }

    async fn app() -> Router {
        let fetcher = Arc::new(InMemoryKeyFetcher::new(JwkSet {
            keys: vec![Jwk::rsa("k1", "q6urq6urq6urq6urq6urq6urq6urq6urq6urq6urq6s", "AQAB")],
        }));
        let source = KeySource::initialize(fetcher, DEFAULT_REFRESH_INTERVAL)
            .await
            .unwrap();
        let state = Arc::new(AuthState {
            verifier: Arc::new(TokenVerifier::new(Arc::new(source), "issuer")),
        });

        Router::new()
            .route("/protected", get(|| async { "ok" }))
            .route_layer(middleware::from_fn_with_state(state, require_auth))
    }

    async fn call(app: Router, auth: Option<&'static str>) -> (StatusCode, String) {
        let mut builder = axum::http::Request::builder().uri("/protected");
        if let Some(value) = auth {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        let response = app.oneshot(builder.body(Body::empty()).unwrap()).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[test]
    fn test_auth_state_is_clone() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<AuthState>();
    }

    #[test]
    fn test_extract_bearer_token() {
        assert_eq!(extract_bearer_token(&headers_with("Bearer abc.def.ghi")), Ok("abc.def.ghi"));
        assert_eq!(extract_bearer_token(&headers_with("bearer abc")), Ok("abc"));
        assert_eq!(extract_bearer_token(&headers_with("BEARER abc")), Ok("abc"));
    }

    #[test]
    fn test_extract_bearer_token_missing_header() {
        assert_eq!(
            extract_bearer_token(&HeaderMap::new()),
            Err(GateError::MissingAuthorization)
        );
    }

    #[test]
    fn test_extract_bearer_token_wrong_scheme() {
        for value in ["Basic dXNlcjpwYXNz", "Bearer", "Token abc", "Bearerabc"] {
            assert_eq!(
                extract_bearer_token(&headers_with(value)),
                Err(GateError::InvalidAuthorizationHeader),
                "{value}"
            );
        }
    }

    #[test]
    fn test_extract_bearer_token_non_utf8() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            axum::http::HeaderValue::from_bytes(b"Bearer \xff\xfe").unwrap(),
        );

        assert_eq!(
            extract_bearer_token(&headers),
            Err(GateError::InvalidAuthorizationHeader)
        );
    }

    #[tokio::test]
    async fn test_missing_header_is_401() {
        let (status, body) = call(app().await, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "missing authorization");
    }

    #[tokio::test]
    async fn test_malformed_header_is_401() {
        let (status, body) = call(app().await, Some("Basic dXNlcjpwYXNz")).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "invalid authorization header");
    }

    #[tokio::test]
    async fn test_empty_bearer_token_is_401() {
        let (status, body) = call(app().await, Some("Bearer ")).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "invalid token");
    }

    #[tokio::test]
    async fn test_garbage_token_is_401() {
        let (status, body) = call(app().await, Some("Bearer not-a-jwt")).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body, "invalid token");
    }

    #[tokio::test]
    async fn test_principal_extractor_without_auth_is_401() {
        let app = Router::new().route(
            "/whoami",
            get(|principal: Principal| async move { principal.subject().to_string() }),
        );

        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/whoami")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(bytes.as_ref(), b"unauthenticated");
    }
}
