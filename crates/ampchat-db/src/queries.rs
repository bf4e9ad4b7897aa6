use crate::Database;
use crate::models::{EmailClick, EmailTrackingRow, MessageRow, NewUser, UserRow};
use anyhow::Result;
use rusqlite::{Connection, Row};

/// SQLite stores INTEGER keys as i64; the API speaks u64. Ids past
/// `i64::MAX` cannot exist in the store and are refused rather than wrapped.
fn sql_id(id: u64) -> Result<i64> {
    i64::try_from(id).map_err(|_| anyhow::anyhow!("id {} out of range", id))
}

fn id_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<u64> {
    row.get::<_, i64>(idx).map(|v| v as u64)
}

impl Database {
    // -- Users --

    pub fn create_user(&self, user: &NewUser<'_>) -> Result<u64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (fullname, firstname, lastname, image_url) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user.fullname, user.firstname, user.lastname, user.image_url],
            )?;
            Ok(conn.last_insert_rowid() as u64)
        })
    }

    pub fn user_exists(&self, user_id: u64) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                [sql_id(user_id)?],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    /// Batch-fetch display data for a set of users.
    pub fn get_users_by_ids(&self, user_ids: &[u64]) -> Result<Vec<UserRow>> {
        if user_ids.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=user_ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, fullname, firstname, lastname, image_url FROM users WHERE id IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let ids = user_ids.iter().map(|id| sql_id(*id)).collect::<Result<Vec<i64>>>()?;

            let rows = stmt
                .query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                    Ok(UserRow {
                        id: id_col(row, 0)?,
                        fullname: row.get(1)?,
                        firstname: row.get(2)?,
                        lastname: row.get(3)?,
                        image_url: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Chats --

    pub fn create_chat_room(&self) -> Result<u64> {
        self.with_conn(|conn| {
            conn.execute("INSERT INTO chat_rooms DEFAULT VALUES", [])?;
            Ok(conn.last_insert_rowid() as u64)
        })
    }

    pub fn add_to_roster(&self, chat_id: u64, user_id: u64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO chat_roster (chat_id, user_id) VALUES (?1, ?2)",
                [sql_id(chat_id)?, sql_id(user_id)?],
            )?;
            Ok(())
        })
    }

    pub fn is_chat_member(&self, chat_id: u64, user_id: u64) -> Result<bool> {
        self.with_conn(|conn| {
            let member = conn
                .query_row(
                    "SELECT 1 FROM chat_roster WHERE chat_id = ?1 AND user_id = ?2",
                    [sql_id(chat_id)?, sql_id(user_id)?],
                    |_| Ok(()),
                )
                .optional()?;
            Ok(member.is_some())
        })
    }

    pub fn get_chat_latest_message(&self, chat_id: u64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let latest = conn
                .query_row(
                    "SELECT latest_message FROM chat_rooms WHERE id = ?1",
                    [sql_id(chat_id)?],
                    |row| row.get::<_, Option<String>>(0),
                )
                .optional()?;
            Ok(latest.flatten())
        })
    }

    // -- Messages --

    /// Insert a message and bump the room's `latest_message` in one transaction,
    /// so a failure leaves neither change behind.
    pub fn insert_chat_message(&self, chat_id: u64, user_id: u64, message: &str) -> Result<u64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO chat_messages (chat_id, user_id, message) VALUES (?1, ?2, ?3)",
                rusqlite::params![sql_id(chat_id)?, sql_id(user_id)?, message],
            )?;
            let id = tx.last_insert_rowid() as u64;
            tx.execute(
                "UPDATE chat_rooms SET latest_message = datetime('now') WHERE id = ?1",
                [sql_id(chat_id)?],
            )?;
            tx.commit()?;
            Ok(id)
        })
    }

    /// Most recent messages of a chat, newest first.
    pub fn get_recent_messages(
        &self,
        chat_id: u64,
        limit: u32,
        exclude: Option<u64>,
    ) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_recent_messages(conn, chat_id, limit, exclude))
    }

    // -- Email tracking --

    pub fn create_email_tracking(
        &self,
        tracking_id: &str,
        user_id: u64,
        email_type: &str,
        recipient_email: &str,
    ) -> Result<u64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO email_tracking (tracking_id, user_id, email_type, recipient_email)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![tracking_id, sql_id(user_id)?, email_type, recipient_email],
            )?;
            Ok(conn.last_insert_rowid() as u64)
        })
    }

    pub fn get_email_tracking(&self, id: u64) -> Result<Option<EmailTrackingRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, tracking_id, user_id, email_type, recipient_email, replied_at, replied_via
                     FROM email_tracking WHERE id = ?1",
                    [sql_id(id)?],
                    |row| {
                        Ok(EmailTrackingRow {
                            id: id_col(row, 0)?,
                            tracking_id: row.get(1)?,
                            user_id: row.get::<_, Option<i64>>(2)?.map(|v| v as u64),
                            email_type: row.get(3)?,
                            recipient_email: row.get(4)?,
                            replied_at: row.get(5)?,
                            replied_via: row.get(6)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Stamp a tracking record as replied. Returns false when no such record exists.
    pub fn mark_email_replied(&self, id: u64, via: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE email_tracking SET replied_at = datetime('now'), replied_via = ?2 WHERE id = ?1",
                rusqlite::params![sql_id(id)?, via],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn record_email_click(&self, id: u64, click: &EmailClick<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO email_tracking_clicks (email_tracking_id, link_url, link_position, action)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![sql_id(id)?, click.link_url, click.link_position, click.action],
            )?;
            Ok(())
        })
    }

    pub fn count_email_clicks(&self, id: u64, action: &str) -> Result<u64> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM email_tracking_clicks WHERE email_tracking_id = ?1 AND action = ?2",
                rusqlite::params![sql_id(id)?, action],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

fn query_recent_messages(
    conn: &Connection,
    chat_id: u64,
    limit: u32,
    exclude: Option<u64>,
) -> Result<Vec<MessageRow>> {
    // Ids are assigned in insert order, so they double as the chronological key.
    let mut stmt = conn.prepare(
        "SELECT id, chat_id, user_id, message, created_at
         FROM chat_messages
         WHERE chat_id = ?1 AND id != ?2
         ORDER BY id DESC
         LIMIT ?3",
    )?;

    let excluded = exclude.map(sql_id).transpose()?.unwrap_or(0);
    let rows = stmt
        .query_map(rusqlite::params![sql_id(chat_id)?, excluded, limit], |row| {
            Ok(MessageRow {
                id: id_col(row, 0)?,
                chat_id: id_col(row, 1)?,
                user_id: id_col(row, 2)?,
                message: row.get(3)?,
                created_at: row.get(4)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
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

    fn seeded() -> (Database, u64, u64, u64) {
        let db = Database::open_in_memory().unwrap();
        let alice = db
            .create_user(&NewUser { fullname: Some("Alice"), ..Default::default() })
            .unwrap();
        let bob = db
            .create_user(&NewUser { firstname: Some("Bob"), ..Default::default() })
            .unwrap();
        let chat = db.create_chat_room().unwrap();
        db.add_to_roster(chat, alice).unwrap();
        db.add_to_roster(chat, bob).unwrap();
        (db, chat, alice, bob)
    }

    #[test]
    fn roster_membership() {
        let (db, chat, alice, _) = seeded();
        let stranger = db.create_user(&NewUser::default()).unwrap();

        assert!(db.is_chat_member(chat, alice).unwrap());
        assert!(!db.is_chat_member(chat, stranger).unwrap());
        assert!(!db.is_chat_member(chat + 1, alice).unwrap());

        // Re-adding is a no-op
        db.add_to_roster(chat, alice).unwrap();
        assert!(db.is_chat_member(chat, alice).unwrap());
    }

    #[test]
    fn recent_messages_newest_first_with_exclusion() {
        let (db, chat, alice, bob) = seeded();
        let first = db.insert_chat_message(chat, alice, "one").unwrap();
        db.insert_chat_message(chat, bob, "two").unwrap();
        db.insert_chat_message(chat, alice, "three").unwrap();

        let rows = db.get_recent_messages(chat, 5, None).unwrap();
        let texts: Vec<&str> = rows.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(texts, ["three", "two", "one"]);

        let rows = db.get_recent_messages(chat, 5, Some(first)).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.id != first));

        let rows = db.get_recent_messages(chat, 1, None).unwrap();
        assert_eq!(rows[0].message, "three");
    }

    #[test]
    fn insert_bumps_latest_message() {
        let (db, chat, alice, _) = seeded();
        assert!(db.get_chat_latest_message(chat).unwrap().is_none());
        db.insert_chat_message(chat, alice, "hello").unwrap();
        assert!(db.get_chat_latest_message(chat).unwrap().is_some());
    }

    #[test]
    fn insert_into_missing_chat_leaves_nothing() {
        let (db, chat, alice, _) = seeded();
        assert!(db.insert_chat_message(chat + 100, alice, "lost").is_err());
        assert!(db.get_recent_messages(chat + 100, 5, None).unwrap().is_empty());
    }

    #[test]
    fn users_batch_lookup() {
        let (db, _, alice, bob) = seeded();
        let mut rows = db.get_users_by_ids(&[alice, bob, 999]).unwrap();
        rows.sort_by_key(|r| r.id);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].fullname.as_deref(), Some("Alice"));
        assert_eq!(rows[1].firstname.as_deref(), Some("Bob"));
        assert!(db.get_users_by_ids(&[]).unwrap().is_empty());
        assert!(db.user_exists(alice).unwrap());
        assert!(!db.user_exists(999).unwrap());
    }

    #[test]
    fn ids_beyond_sqlite_range_are_refused() {
        let (db, chat, alice, _) = seeded();
        let wrapped = u64::MAX; // would alias -1 if cast

        assert!(db.is_chat_member(wrapped, alice).is_err());
        assert!(db.user_exists(wrapped).is_err());
        assert!(db.get_recent_messages(chat, 5, Some(wrapped)).is_err());
        assert!(db.insert_chat_message(chat, wrapped, "nope").is_err());
        assert!(db.get_users_by_ids(&[alice, wrapped]).is_err());
        assert!(db.get_recent_messages(chat, 5, None).unwrap().is_empty());
    }

    #[test]
    fn email_tracking_reply_marker() {
        let (db, _, alice, _) = seeded();
        let id = db
            .create_email_tracking("trk-1", alice, "chat_notification", "alice@example.org")
            .unwrap();

        assert!(db.mark_email_replied(id, "amp").unwrap());
        assert!(!db.mark_email_replied(id + 1, "amp").unwrap());

        let row = db.get_email_tracking(id).unwrap().unwrap();
        assert_eq!(row.replied_via.as_deref(), Some("amp"));
        assert!(row.replied_at.is_some());
        assert_eq!(row.user_id, Some(alice));

        let click = EmailClick {
            link_url: "amp://reply",
            link_position: "amp_reply_form",
            action: "amp_reply",
        };
        db.record_email_click(id, &click).unwrap();
        assert_eq!(db.count_email_clicks(id, "amp_reply").unwrap(), 1);
    }
}
