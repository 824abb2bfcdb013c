use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};
use uuid::Uuid;

use hilearn_db::Database;
use hilearn_types::events::{ErrorCode, GatewayEvent};
use hilearn_types::models::ChatMessage;

use crate::dispatcher::Dispatcher;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    NotFound(String),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ChatError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::Validation,
            Self::NotFound(_) => ErrorCode::NotFound,
            Self::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Frame for the connection that issued the failed command.
    /// Internal details stay in the server log.
    pub fn to_event(&self) -> GatewayEvent {
        let message = match self {
            Self::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        };
        GatewayEvent::Error {
            code: self.code(),
            message,
        }
    }
}

/// Persist a direct message, then push it to the receiver's room.
///
/// Nothing is emitted unless the row was stored. The sender's own room
/// gets no echo; the caller receives the stored row instead.
pub async fn send_message(
    db: &Arc<Database>,
    dispatcher: &Dispatcher,
    sender_id: Uuid,
    receiver_id: Uuid,
    text: &str,
) -> Result<ChatMessage, ChatError> {
    if text.trim().is_empty() {
        return Err(ChatError::Validation("message must not be empty".into()));
    }
    if sender_id == receiver_id {
        return Err(ChatError::Validation("cannot message yourself".into()));
    }

    let db = db.clone();
    let text = text.to_string();
    let row = tokio::task::spawn_blocking(move || {
        let receiver = receiver_id.to_string();
        if db.get_user_by_id(&receiver)?.is_none() {
            return Ok(None);
        }
        db.insert_message(&Uuid::new_v4().to_string(), &sender_id.to_string(), &receiver, &text)
            .map(Some)
    })
    .await
    .map_err(|e| {
        error!("spawn_blocking join error: {}", e);
        anyhow::anyhow!("join error: {}", e)
    })?
    .map_err(|e: anyhow::Error| {
        error!("DB insert_message error: {}", e);
        ChatError::Internal(e)
    })?
    .ok_or_else(|| ChatError::NotFound(format!("user {} not found", receiver_id)))?;

    let message = ChatMessage::try_from(row)?;
    let delivered = dispatcher
        .send_to_user(receiver_id, GatewayEvent::NewMessage(message.clone()))
        .await;
    debug!(
        "Message {} from {} to {} delivered to {} connections",
        message.id, sender_id, receiver_id, delivered
    );

    Ok(message)
}
