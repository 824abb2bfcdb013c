use axum::{
    Extension, Json,
    extract::{Path, State},
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::info;
use uuid::Uuid;

use hilearn_types::api::{Claims, UpdateRoleRequest};
use hilearn_types::models::{Role, UserProfile};

use crate::auth::{AppState, stored_role};
use crate::error::ApiError;
use crate::run_db;

pub async fn get_me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let row = run_db(&state.db, move |db| db.get_user_by_id(&me))
        .await?
        .ok_or_else(|| ApiError::NotFound("account no longer exists".into()))?;

    Ok(Json(UserProfile::try_from(row)?))
}

/// PUT /users/{user_id}/role — admins only.
pub async fn update_role(
    State(state): State<AppState>,
    WithRejection(Path(user_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<UpdateRoleRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let (role, is_support) = (req.role, req.is_support);
    let id = user_id.to_string();
    let row = run_db(&state.db, move |db| {
        if stored_role(db, caller)? != Some(Role::Admin) {
            return Ok(Err(ApiError::Forbidden("only admins can change roles".into())));
        }
        if !db.update_user_role(&id, role.as_str(), is_support)? {
            return Ok(Err(ApiError::NotFound(format!("user {} not found", user_id))));
        }
        Ok(db
            .get_user_by_id(&id)?
            .ok_or_else(|| ApiError::NotFound(format!("user {} not found", user_id))))
    })
    .await??;

    info!(
        "{} set role of {} to {} (support={})",
        caller, user_id, role, is_support
    );

    Ok(Json(UserProfile::try_from(row)?))
}
