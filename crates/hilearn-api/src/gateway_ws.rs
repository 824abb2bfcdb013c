use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::{IntoResponse, Response},
};
use axum_extra::TypedHeader;
use axum_extra::headers::{Authorization, authorization::Bearer};
use serde::Deserialize;
use tracing::debug;

use hilearn_gateway::auth::verify_token;
use hilearn_gateway::connection;

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct GatewayQuery {
    pub token: Option<String>,
}

/// GET /gateway — a token presented at upgrade time is checked before the
/// socket opens. Without one the client must send `identify` first.
pub async fn ws_upgrade(
    State(state): State<AppState>,
    Query(query): Query<GatewayQuery>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query
        .token
        .or_else(|| bearer.map(|TypedHeader(auth)| auth.token().to_string()));
    let ctx = state.gateway_context();

    match token {
        Some(token) => {
            let Some(claims) = verify_token(&state.jwt_secret, &token) else {
                debug!("Rejected gateway upgrade with invalid token");
                return ApiError::Unauthenticated.into_response();
            };
            ws.on_upgrade(move |socket| {
                connection::handle_connection_authenticated(socket, ctx, claims)
            })
        }
        None => ws.on_upgrade(move |socket| connection::handle_connection(socket, ctx)),
    }
}
