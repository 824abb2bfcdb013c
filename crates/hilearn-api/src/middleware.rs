use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};

use hilearn_gateway::auth::verify_token;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate the bearer token, then expose its `Claims` to handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or(ApiError::Unauthenticated)?;

    let claims = verify_token(&state.jwt_secret, token).ok_or(ApiError::Unauthenticated)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}
