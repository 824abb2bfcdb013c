//! Database row types. These map directly to SQLite rows and stay distinct
//! from the hilearn-types wire models; the `TryFrom` impls below bridge the two.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use uuid::Uuid;

use hilearn_types::models::{ChatMessage, Notification, UserProfile, UserSummary};

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: String,
    pub division_id: Option<String>,
    pub avatar: Option<String>,
    pub is_support: bool,
    pub created_at: String,
}

/// Input for `Database::create_user`.
pub struct NewUser<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub role: &'a str,
    pub division_id: Option<&'a str>,
    pub avatar: Option<&'a str>,
    pub is_support: bool,
}

/// A message joined with its sender's display fields.
pub struct MessageRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub message: String,
    pub read: bool,
    pub created_at: String,
    pub sender_name: String,
    pub sender_avatar: Option<String>,
}

pub struct ContactRow {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub avatar: Option<String>,
    pub unread_count: i64,
    pub last_message_at: Option<String>,
}

pub struct NotificationRow {
    pub id: String,
    pub user_id: String,
    pub title: String,
    pub message: String,
    pub kind: String,
    pub link: Option<String>,
    pub read: bool,
    pub created_at: String,
}

/// Current time in the format every `created_at` column uses. Microsecond
/// precision keeps lexical order equal to chronological order.
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    raw.parse::<DateTime<Utc>>()
        .or_else(|_| {
            // Rows written by the sqlite3 shell use datetime('now'): no zone, no fraction.
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .with_context(|| format!("bad timestamp '{}'", raw))
}

fn parse_id(raw: &str) -> Result<Uuid> {
    raw.parse().with_context(|| format!("bad id '{}'", raw))
}

impl TryFrom<UserRow> for UserProfile {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            role: row.role.parse().map_err(anyhow::Error::msg)?,
            created_at: parse_timestamp(&row.created_at)?,
            name: row.name,
            email: row.email,
            division_id: row.division_id,
            avatar: row.avatar,
            is_support: row.is_support,
        })
    }
}

impl UserRow {
    pub fn summary(&self) -> Result<UserSummary> {
        Ok(UserSummary {
            id: parse_id(&self.id)?,
            name: self.name.clone(),
            avatar: self.avatar.clone(),
        })
    }
}

impl TryFrom<MessageRow> for ChatMessage {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let sender_id = parse_id(&row.sender_id)?;
        Ok(Self {
            id: parse_id(&row.id)?,
            message: row.message,
            sender_id,
            receiver_id: parse_id(&row.receiver_id)?,
            read: row.read,
            created_at: parse_timestamp(&row.created_at)?,
            sender: UserSummary {
                id: sender_id,
                name: row.sender_name,
                avatar: row.sender_avatar,
            },
        })
    }
}

impl TryFrom<NotificationRow> for Notification {
    type Error = anyhow::Error;

    fn try_from(row: NotificationRow) -> Result<Self> {
        Ok(Self {
            id: parse_id(&row.id)?,
            user_id: parse_id(&row.user_id)?,
            kind: row.kind.parse().map_err(anyhow::Error::msg)?,
            created_at: parse_timestamp(&row.created_at)?,
            title: row.title,
            message: row.message,
            link: row.link,
            read: row.read,
        })
    }
}
