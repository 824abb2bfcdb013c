use axum::{
    Json, Router, middleware,
    routing::{get, post, put},
};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::{chat, gateway_ws, notifications, users};

/// The full HTTP surface: public auth, bearer-protected REST, and the gateway.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(|| async { Json(json!({ "status": "ok" })) }))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login));

    let protected_routes = Router::new()
        .route("/users/me", get(users::get_me))
        .route("/users/{user_id}/role", put(users::update_role))
        .route("/chat/contacts", get(chat::get_contacts))
        .route(
            "/chat/messages/{user_id}",
            get(chat::get_messages).post(chat::send_message),
        )
        // Mark-read stays reachable by GET for existing clients
        .route("/chat/read/{user_id}", get(chat::mark_read).post(chat::mark_read))
        .route("/chat/unread", get(chat::get_unread_count))
        .route("/chat/support-agent", get(chat::get_support_agent))
        .route(
            "/notifications",
            get(notifications::list_notifications).post(notifications::create_notification),
        )
        .route("/notifications/unread-count", get(notifications::get_unread_count))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{notification_id}/read", post(notifications::mark_read))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth));

    let ws_route = Router::new().route("/gateway", get(gateway_ws::ws_upgrade));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(ws_route)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
