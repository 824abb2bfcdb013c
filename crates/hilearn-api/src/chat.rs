use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use axum_extra::extract::WithRejection;
use tracing::warn;
use uuid::Uuid;

use hilearn_db::models::{ContactRow, UserRow, parse_timestamp};
use hilearn_gateway::chat;
use hilearn_types::api::{
    Claims, ContactResponse, MarkReadResponse, SendMessageRequest, UnreadCountResponse,
};
use hilearn_types::models::{ChatMessage, UserSummary};

use crate::auth::{AppState, stored_role};
use crate::error::ApiError;
use crate::run_db;

/// GET /chat/contacts — staff see everyone they have talked to; learners
/// see only the support agent, or nothing when no agent is configured.
pub async fn get_contacts(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let caller = claims.sub;
    let me = caller.to_string();

    let rows = run_db(&state.db, move |db| {
        let partners = db.get_contacts(&me)?;
        if stored_role(db, caller)?.is_some_and(|role| role.is_staff()) {
            return Ok(partners);
        }

        let Some(agent) = db.find_support_agent()? else {
            return Ok(Vec::new());
        };
        if agent.id == me {
            return Ok(Vec::new());
        }
        let existing = partners.into_iter().find(|c| c.id == agent.id);
        Ok(vec![existing.unwrap_or_else(|| agent_contact(agent))])
    })
    .await?;

    let contacts: Vec<ContactResponse> = rows.into_iter().filter_map(to_contact).collect();
    Ok(Json(contacts))
}

/// GET /chat/messages/{user_id} — the whole conversation, oldest first.
pub async fn get_messages(
    State(state): State<AppState>,
    WithRejection(Path(other_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (me, other) = (claims.sub.to_string(), other_id.to_string());
    let rows = run_db(&state.db, move |db| db.get_conversation(&me, &other)).await?;

    let messages: Vec<ChatMessage> = rows
        .into_iter()
        .filter_map(|row| {
            let id = row.id.clone();
            ChatMessage::try_from(row)
                .map_err(|e| warn!("Skipping corrupt message '{}': {}", id, e))
                .ok()
        })
        .collect();

    Ok(Json(messages))
}

/// POST /chat/messages/{user_id} — REST twin of the gateway `sendMessage` command.
pub async fn send_message(
    State(state): State<AppState>,
    WithRejection(Path(receiver_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(claims): Extension<Claims>,
    WithRejection(Json(req), _): WithRejection<Json<SendMessageRequest>, ApiError>,
) -> Result<impl IntoResponse, ApiError> {
    let message =
        chat::send_message(&state.db, &state.dispatcher, claims.sub, receiver_id, &req.message)
            .await?;

    Ok((StatusCode::CREATED, Json(message)))
}

/// GET|POST /chat/read/{user_id} — flag everything that user sent me as read.
pub async fn mark_read(
    State(state): State<AppState>,
    WithRejection(Path(other_id), _): WithRejection<Path<Uuid>, ApiError>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (me, other) = (claims.sub.to_string(), other_id.to_string());
    let updated = run_db(&state.db, move |db| db.mark_conversation_read(&me, &other)).await?;

    Ok(Json(MarkReadResponse { updated }))
}

/// GET /chat/unread — recomputed on every call.
pub async fn get_unread_count(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let me = claims.sub.to_string();
    let count = run_db(&state.db, move |db| db.unread_message_count(&me)).await?;

    Ok(Json(UnreadCountResponse { count }))
}

/// GET /chat/support-agent — `null` when no staff member has the support flag.
pub async fn get_support_agent(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let agent = run_db(&state.db, |db| db.find_support_agent()).await?;
    let summary: Option<UserSummary> = agent.map(|row| row.summary()).transpose()?;

    Ok(Json(summary))
}

fn agent_contact(agent: UserRow) -> ContactRow {
    ContactRow {
        id: agent.id,
        name: agent.name,
        email: agent.email,
        role: agent.role,
        avatar: agent.avatar,
        unread_count: 0,
        last_message_at: None,
    }
}

fn to_contact(row: ContactRow) -> Option<ContactResponse> {
    let converted = (|| -> anyhow::Result<ContactResponse> {
        Ok(ContactResponse {
            id: row.id.parse()?,
            role: row.role.parse().map_err(anyhow::Error::msg)?,
            last_message_at: row.last_message_at.as_deref().map(parse_timestamp).transpose()?,
            name: row.name.clone(),
            email: row.email.clone(),
            avatar: row.avatar.clone(),
            unread_count: row.unread_count,
        })
    })();

    converted
        .map_err(|e| warn!("Skipping corrupt contact '{}': {}", row.id, e))
        .ok()
}
