use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::{debug, warn};
use uuid::Uuid;

use hilearn_types::api::{
    Claims, CreateNotificationRequest, MarkReadResponse, NotificationQuery, UnreadCountResponse,
};
use hilearn_types::events::GatewayEvent;
use hilearn_types::models::Notification;

use crate::auth::{AppState, stored_role};
use crate::error::ApiError;
use crate::run_db;

pub async fn list_notifications(
    State(state): State<AppState>,
    WithRejection(Query(query), _): WithRejection<Query<NotificationQuery>, ApiError>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let unread_only = query.unread_only;
    let rows = run_db(&state.db, move |db| db.list_notifications(&me, unread_only)).await?;

    let notifications: Vec<Notification> = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            Notification::try_from(row)
                .map_err(|e| warn!("Skipping corrupt notification '{}': {}", id, e))
                .ok()
        })
        .collect();

    Ok(Json(notifications))
}

pub async fn get_unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let count = run_db(&state.db, move |db| db.unread_notification_count(&me)).await?;

    Ok(Json(UnreadCountResponse { count }))
}

pub async fn mark_read(
    State(state): State<AppState>,
    WithRejection(Path(notification_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (id, me) = (notification_id.to_string(), claims.sub.to_string());
    if !run_db(&state.db, move |db| db.mark_notification_read(&id, &me)).await? {
        return Err(ApiError::NotFound(format!("notification {} not found", notification_id)));
    }

    Ok(StatusCode::NO_CONTENT)
}

pub async fn mark_all_read(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let updated = run_db(&state.db, move |db| db.mark_all_notifications_read(&me)).await?;

    Ok(Json(MarkReadResponse { updated }))
}

/// POST /notifications — staff push a notification to one user's room.
pub async fn create_notification(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<CreateNotificationRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    if req.title.trim().is_empty() {
        return Err(ApiError::Validation("title must not be empty".into()));
    }

    let (caller, target) = (claims.sub, req.user_id);
    let row = run_db(&state.db, move |db| {
        if !stored_role(db, caller)?.is_some_and(|role| role.is_staff()) {
            return Ok(Err(ApiError::Forbidden("only staff can send notifications".into())));
        }
        let user_id = target.to_string();
        if db.get_user_by_id(&user_id)?.is_none() {
            return Ok(Err(ApiError::NotFound(format!("user {} not found", target))));
        }
        db.insert_notification(
            &Uuid::new_v4().to_string(),
            &user_id,
            &req.title,
            &req.message,
            req.kind.as_str(),
            req.link.as_deref(),
        )
        .map(Ok)
    })
    .await??;

    let notification = Notification::try_from(row)?;
    let delivered = state
        .dispatcher
        .send_to_user(target, GatewayEvent::Notification(notification.clone()))
        .await;
    debug!("Notification {} delivered to {} connections", notification.id, delivered);

    Ok((StatusCode::CREATED, Json(notification)))
}
