//! Axum router configuration for webhook endpoints.

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::adapters::http::middleware::admin_auth_middleware;

use super::handlers::{
    get_event, health, list_events, receive_webhook, replay_event, WebhookAppState,
};

/// Ledger admin routes, guarded by the admin bearer token.
///
/// # Routes
/// - `GET /` - List ledger rows (`?status=&limit=&offset=`)
/// - `GET /:event_id` - One row with its stored payload
/// - `POST /:event_id/replay` - Reprocess a `failed` or `received` row
fn admin_routes(state: &WebhookAppState) -> Option<Router<WebhookAppState>> {
    let token = state.admin_token.clone()?;
    Some(
        Router::new()
            .route("/", get(list_events))
            .route("/:event_id", get(get_event))
            .route("/:event_id/replay", post(replay_event))
            .route_layer(middleware::from_fn_with_state(token, admin_auth_middleware)),
    )
}

/// Create the complete webhook service router.
///
/// # Routes
/// - `GET /health` - Liveness
/// - `POST /webhooks/:provider` - Provider deliveries (signature verified)
/// - `/admin/webhooks/...` - Mounted only when an admin token is configured
///
/// Layers, outermost first: request id, tracing, request id propagation,
/// timeout, body limit.
pub fn webhook_router(state: WebhookAppState) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/webhooks/:provider", post(receive_webhook));

    if let Some(admin) = admin_routes(&state) {
        router = router.nest("/admin/webhooks", admin);
    }

    router
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(state.max_body_bytes))
        .layer(TimeoutLayer::new(state.request_timeout))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
