use crate::Database;
use crate::models::{ContactRow, MessageRow, NewUser, NotificationRow, UserRow, now_timestamp};
use anyhow::{Result, anyhow};
use rusqlite::{Connection, Row};

const USER_COLUMNS: &str =
    "id, name, email, password, role, division_id, avatar, is_support, created_at";

const MESSAGE_SELECT: &str =
    "SELECT m.id, m.sender_id, m.receiver_id, m.message, m.read, m.created_at, u.name, u.avatar
     FROM messages m
     LEFT JOIN users u ON m.sender_id = u.id";

const NOTIFICATION_COLUMNS: &str = "id, user_id, title, message, type, link, read, created_at";

impl Database {
    // -- Users --

    /// Returns false, inserting nothing, when the email is already taken.
    pub fn create_user(&self, user: &NewUser<'_>) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO users (id, name, email, password, role, division_id, avatar, is_support, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                 ON CONFLICT(email) DO NOTHING",
                rusqlite::params![
                    user.id,
                    user.name,
                    user.email,
                    user.password_hash,
                    user.role,
                    user.division_id,
                    user.avatar,
                    user.is_support,
                    now_timestamp(),
                ],
            )?;
            Ok(inserted == 1)
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email = ?1", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id = ?1", id))
    }

    /// Returns false when no user has that id.
    pub fn update_user_role(&self, id: &str, role: &str, is_support: bool) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE users SET role = ?2, is_support = ?3 WHERE id = ?1",
                rusqlite::params![id, role, is_support],
            )?;
            Ok(changed > 0)
        })
    }

    /// First staff member flagged for support, by account age.
    pub fn find_support_agent(&self) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM users
                 WHERE role IN ('ADMIN', 'INSTRUCTOR') AND is_support = 1
                 ORDER BY created_at ASC, rowid ASC
                 LIMIT 1",
                USER_COLUMNS
            );
            conn.query_row(&sql, [], map_user).optional()
        })
    }

    // -- Messages --

    /// Insert a message and read it back joined with the sender, in one transaction.
    pub fn insert_message(
        &self,
        id: &str,
        sender_id: &str,
        receiver_id: &str,
        message: &str,
    ) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO messages (id, sender_id, receiver_id, message, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, 0, ?5)",
                rusqlite::params![id, sender_id, receiver_id, message, now_timestamp()],
            )?;
            let row = tx
                .query_row(&format!("{} WHERE m.id = ?1", MESSAGE_SELECT), [id], map_message)
                .optional()?
                .ok_or_else(|| anyhow!("Message {} vanished after insert", id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// Full history between two users in either direction, oldest first.
    pub fn get_conversation(&self, user_a: &str, user_b: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{}
                 WHERE (m.sender_id = ?1 AND m.receiver_id = ?2)
                    OR (m.sender_id = ?2 AND m.receiver_id = ?1)
                 ORDER BY m.created_at ASC, m.rowid ASC",
                MESSAGE_SELECT
            ))?;

            let rows = stmt
                .query_map(rusqlite::params![user_a, user_b], map_message)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Flag every message from `sender_id` to `receiver_id` as read.
    /// Returns how many rows flipped.
    pub fn mark_conversation_read(&self, receiver_id: &str, sender_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE messages SET read = 1
                 WHERE receiver_id = ?1 AND sender_id = ?2 AND read = 0",
                [receiver_id, sender_id],
            )?;
            Ok(changed)
        })
    }

    pub fn unread_message_count(&self, receiver_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE receiver_id = ?1 AND read = 0",
                [receiver_id],
                |r| r.get(0),
            )?;
            Ok(count)
        })
    }

    /// Everyone who has exchanged at least one message with `user_id`,
    /// most recent conversation first.
    pub fn get_contacts(&self, user_id: &str) -> Result<Vec<ContactRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, u.email, u.role, u.avatar,
                        (SELECT COUNT(*) FROM messages un
                          WHERE un.sender_id = u.id AND un.receiver_id = ?1 AND un.read = 0),
                        MAX(m.created_at) AS last_at,
                        MAX(m.rowid) AS last_rowid
                 FROM messages m
                 JOIN users u
                   ON u.id = CASE WHEN m.sender_id = ?1 THEN m.receiver_id ELSE m.sender_id END
                 WHERE (m.sender_id = ?1 OR m.receiver_id = ?1) AND u.id != ?1
                 GROUP BY u.id
                 ORDER BY last_at DESC, last_rowid DESC",
            )?;

            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(ContactRow {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        role: row.get(3)?,
                        avatar: row.get(4)?,
                        unread_count: row.get(5)?,
                        last_message_at: row.get(6)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    // -- Notifications --

    pub fn insert_notification(
        &self,
        id: &str,
        user_id: &str,
        title: &str,
        message: &str,
        kind: &str,
        link: Option<&str>,
    ) -> Result<NotificationRow> {
        self.with_conn_mut(|conn| {
            let created_at = now_timestamp();
            conn.execute(
                "INSERT INTO notifications (id, user_id, title, message, type, link, read, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7)",
                rusqlite::params![id, user_id, title, message, kind, link, created_at],
            )?;
            Ok(NotificationRow {
                id: id.to_string(),
                user_id: user_id.to_string(),
                title: title.to_string(),
                message: message.to_string(),
                kind: kind.to_string(),
                link: link.map(str::to_string),
                read: false,
                created_at,
            })
        })
    }

    pub fn list_notifications(&self, user_id: &str, unread_only: bool) -> Result<Vec<NotificationRow>> {
        self.with_conn(|conn| {
            let filter = if unread_only { "AND read = 0" } else { "" };
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM notifications
                 WHERE user_id = ?1 {}
                 ORDER BY created_at DESC, rowid DESC",
                NOTIFICATION_COLUMNS, filter
            ))?;

            let rows = stmt
                .query_map([user_id], map_notification)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn unread_notification_count(&self, user_id: &str) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM notifications WHERE user_id = ?1 AND read = 0",
                [user_id],
                |r| r.get(0),
            )?;
            Ok(count)
        })
    }

    /// Returns false when the notification does not exist or belongs to someone else.
    pub fn mark_notification_read(&self, id: &str, user_id: &str) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1 WHERE id = ?1 AND user_id = ?2",
                [id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn mark_all_notifications_read(&self, user_id: &str) -> Result<usize> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE notifications SET read = 1 WHERE user_id = ?1 AND read = 0",
                [user_id],
            )?;
            Ok(changed)
        })
    }
}

fn query_user(conn: &Connection, predicate: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, predicate);
    conn.query_row(&sql, [value], map_user).optional()
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        role: row.get(4)?,
        division_id: row.get(5)?,
        avatar: row.get(6)?,
        is_support: row.get(7)?,
        created_at: row.get(8)?,
    })
}

fn map_message(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        message: row.get(3)?,
        read: row.get(4)?,
        created_at: row.get(5)?,
        sender_name: row.get::<_, Option<String>>(6)?.unwrap_or_else(|| "unknown".to_string()),
        sender_avatar: row.get(7)?,
    })
}

fn map_notification(row: &Row<'_>) -> rusqlite::Result<NotificationRow> {
    Ok(NotificationRow {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        message: row.get(3)?,
        kind: row.get(4)?,
        link: row.get(5)?,
        read: row.get(6)?,
        created_at: row.get(7)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn add_user(db: &Database, name: &str, role: &str, is_support: bool) -> String {
        let id = Uuid::new_v4().to_string();
        let email = format!("{}@hilearn.test", name.to_lowercase());
        db.create_user(&NewUser {
            id: &id,
            name,
            email: &email,
            password_hash: "not-a-real-hash",
            role,
            division_id: None,
            avatar: None,
            is_support,
        })
        .unwrap();
        id
    }

    fn send(db: &Database, from: &str, to: &str, text: &str) -> MessageRow {
        db.insert_message(&Uuid::new_v4().to_string(), from, to, text).unwrap()
    }

    #[test]
    fn duplicate_email_is_not_inserted() {
        let db = Database::open_in_memory().unwrap();
        let first = add_user(&db, "Ada", "STUDENT", false);

        let inserted = db
            .create_user(&NewUser {
                id: &Uuid::new_v4().to_string(),
                name: "Other Ada",
                email: "ada@hilearn.test",
                password_hash: "not-a-real-hash",
                role: "STUDENT",
                division_id: None,
                avatar: None,
                is_support: false,
            })
            .unwrap();
        assert!(!inserted);
        assert_eq!(db.get_user_by_email("ada@hilearn.test").unwrap().unwrap().id, first);
    }

    #[test]
    fn insert_message_returns_unread_row_with_sender() {
        let db = Database::open_in_memory().unwrap();
        let ada = add_user(&db, "Ada", "STUDENT", false);
        let bob = add_user(&db, "Bob", "ADMIN", true);

        let row = send(&db, &ada, &bob, "hello");
        assert_eq!(row.sender_id, ada);
        assert_eq!(row.receiver_id, bob);
        assert_eq!(row.sender_name, "Ada");
        assert!(!row.read);
    }

    #[test]
    fn insert_message_rejects_unknown_receiver() {
        let db = Database::open_in_memory().unwrap();
        let ada = add_user(&db, "Ada", "STUDENT", false);
        let ghost = Uuid::new_v4().to_string();

        assert!(db.insert_message(&Uuid::new_v4().to_string(), &ada, &ghost, "hi").is_err());
        assert!(db.get_conversation(&ada, &ghost).unwrap().is_empty());
    }

    #[test]
    fn conversation_is_symmetric_and_ordered() {
        let db = Database::open_in_memory().unwrap();
        let a = add_user(&db, "Ada", "STUDENT", false);
        let b = add_user(&db, "Bob", "ADMIN", true);
        let c = add_user(&db, "Cy", "STUDENT", false);

        send(&db, &a, &b, "1");
        send(&db, &b, &a, "2");
        send(&db, &c, &b, "unrelated");
        send(&db, &a, &b, "3");

        let from_a: Vec<String> =
            db.get_conversation(&a, &b).unwrap().into_iter().map(|m| m.id).collect();
        let from_b: Vec<String> =
            db.get_conversation(&b, &a).unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(from_a, from_b);

        let texts: Vec<String> =
            db.get_conversation(&a, &b).unwrap().into_iter().map(|m| m.message).collect();
        assert_eq!(texts, vec!["1", "2", "3"]);
    }

    #[test]
    fn mark_read_is_idempotent_and_directional() {
        let db = Database::open_in_memory().unwrap();
        let a = add_user(&db, "Ada", "STUDENT", false);
        let b = add_user(&db, "Bob", "ADMIN", true);

        send(&db, &a, &b, "one");
        send(&db, &a, &b, "two");
        send(&db, &b, &a, "reply");

        assert_eq!(db.unread_message_count(&b).unwrap(), 2);
        assert_eq!(db.unread_message_count(&a).unwrap(), 1);

        assert_eq!(db.mark_conversation_read(&b, &a).unwrap(), 2);
        assert_eq!(db.unread_message_count(&b).unwrap(), 0);
        assert_eq!(db.mark_conversation_read(&b, &a).unwrap(), 0);
        assert_eq!(db.unread_message_count(&b).unwrap(), 0);

        // Ada's unread reply is untouched by Bob reading
        assert_eq!(db.unread_message_count(&a).unwrap(), 1);
    }

    #[test]
    fn contacts_are_distinct_partners_with_unread_counts() {
        let db = Database::open_in_memory().unwrap();
        let admin = add_user(&db, "Admin", "ADMIN", true);
        let a = add_user(&db, "Ada", "STUDENT", false);
        let c = add_user(&db, "Cy", "STUDENT", false);
        add_user(&db, "Lurker", "STUDENT", false);

        send(&db, &a, &admin, "q1");
        send(&db, &a, &admin, "q2");
        send(&db, &admin, &a, "answer");
        send(&db, &c, &admin, "hi");

        let contacts = db.get_contacts(&admin).unwrap();
        assert_eq!(contacts.len(), 2);
        // Cy wrote last
        assert_eq!(contacts[0].id, c);
        assert_eq!(contacts[0].unread_count, 1);
        assert_eq!(contacts[1].id, a);
        assert_eq!(contacts[1].unread_count, 2);
    }

    #[test]
    fn support_agent_absent_until_flagged_staff_exists() {
        let db = Database::open_in_memory().unwrap();
        add_user(&db, "Ada", "STUDENT", false);
        // Support flag on a student does not qualify
        add_user(&db, "Sneaky", "STUDENT", true);
        add_user(&db, "Prof", "INSTRUCTOR", false);
        assert!(db.find_support_agent().unwrap().is_none());

        let first = add_user(&db, "First", "ADMIN", true);
        add_user(&db, "Second", "INSTRUCTOR", true);
        assert_eq!(db.find_support_agent().unwrap().unwrap().id, first);
    }

    #[test]
    fn update_role_reports_missing_user() {
        let db = Database::open_in_memory().unwrap();
        let a = add_user(&db, "Ada", "STUDENT", false);

        assert!(db.update_user_role(&a, "INSTRUCTOR", true).unwrap());
        let row = db.get_user_by_id(&a).unwrap().unwrap();
        assert_eq!(row.role, "INSTRUCTOR");
        assert!(row.is_support);

        assert!(!db.update_user_role(&Uuid::new_v4().to_string(), "ADMIN", false).unwrap());
    }

    #[test]
    fn notifications_scope_to_owner() {
        let db = Database::open_in_memory().unwrap();
        let a = add_user(&db, "Ada", "STUDENT", false);
        let b = add_user(&db, "Bob", "STUDENT", false);

        let n1 = db
            .insert_notification(&Uuid::new_v4().to_string(), &a, "Welcome", "hi", "info", None)
            .unwrap();
        db.insert_notification(&Uuid::new_v4().to_string(), &a, "Due", "soon", "warning", Some("/a/1"))
            .unwrap();

        assert_eq!(db.unread_notification_count(&a).unwrap(), 2);
        assert!(!db.mark_notification_read(&n1.id, &b).unwrap());
        assert!(db.mark_notification_read(&n1.id, &a).unwrap());
        assert_eq!(db.list_notifications(&a, true).unwrap().len(), 1);
        assert_eq!(db.list_notifications(&a, false).unwrap()[0].title, "Due");

        assert_eq!(db.mark_all_notifications_read(&a).unwrap(), 1);
        assert_eq!(db.unread_notification_count(&a).unwrap(), 0);
    }
}
