use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ChatMessage, Notification, Role};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayEvent {
    /// Server confirms successful authentication
    #[serde(rename_all = "camelCase")]
    Ready { user_id: Uuid, name: String, role: Role },

    /// A direct message addressed to this user was stored
    NewMessage(ChatMessage),

    /// A notification was created for this user
    Notification(Notification),

    /// A command from this connection was rejected
    Error { code: ErrorCode, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    Validation,
    NotFound,
    Internal,
    BadCommand,
}

/// Commands sent FROM client TO server over WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum GatewayCommand {
    /// Authenticate the WebSocket connection when no token was given at upgrade
    Identify { token: String },

    /// Send a direct message
    #[serde(rename_all = "camelCase")]
    SendMessage { receiver_id: Uuid, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserSummary;

    #[test]
    fn send_message_command_uses_camel_case() {
        let raw = r#"{"type":"sendMessage","data":{"receiverId":"00000000-0000-0000-0000-000000000002","message":"hi"}}"#;
        let cmd: GatewayCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            GatewayCommand::SendMessage { receiver_id, message } => {
                assert_eq!(receiver_id, Uuid::from_u128(2));
                assert_eq!(message, "hi");
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn new_message_event_shape() {
        let sender = UserSummary { id: Uuid::from_u128(1), name: "Ada".into(), avatar: None };
        let event = GatewayEvent::NewMessage(ChatMessage {
            id: Uuid::from_u128(9),
            message: "hello".into(),
            sender_id: sender.id,
            receiver_id: Uuid::from_u128(2),
            read: false,
            created_at: chrono::Utc::now(),
            sender,
        });

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "newMessage");
        assert_eq!(value["data"]["message"], "hello");
        assert_eq!(value["data"]["senderId"], Uuid::from_u128(1).to_string());
        assert_eq!(value["data"]["sender"]["name"], "Ada");
        assert!(value["data"]["createdAt"].is_string());
    }
}
