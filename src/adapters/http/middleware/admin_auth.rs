//! Bearer token middleware for the ledger admin routes.
//!
//! The admin surface exists only when an admin token is configured, so this
//! layer never has to handle "auth disabled". Tokens are compared in
//! constant time.
//!
//! # Example
//!
//! ```ignore
//! use axum::{middleware, routing::get, Router};
//!
//! let admin = Router::new()
//!     .route("/", get(list_events))
//!     .route_layer(middleware::from_fn_with_state(token, admin_auth_middleware));
//! ```

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;

/// Middleware state: the configured admin token.
pub type AdminToken = Arc<SecretString>;

/// Rejects requests whose `Authorization: Bearer` token does not match.
pub async fn admin_auth_middleware(
    State(token): State<AdminToken>,
    request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match presented {
        Some(presented) if token_matches(token.expose_secret(), presented) => {
            next.run(request).await
        }
        Some(_) => {
            tracing::warn!(path = %request.uri().path(), "admin request with invalid token");
            unauthorized("Invalid token")
        }
        None => unauthorized("Authentication required"),
    }
}

fn token_matches(expected: &str, presented: &str) -> bool {
    expected.as_bytes().ct_eq(presented.as_bytes()).into()
}

fn unauthorized(message: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error_code": "UNAUTHENTICATED",
            "message": message
        })),
    )
        .into_response()
}
