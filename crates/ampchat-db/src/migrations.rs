use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            fullname    TEXT,
            firstname   TEXT,
            lastname    TEXT,
            image_url   TEXT,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS chat_rooms (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            latest_message  TEXT,
            created_at      TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS chat_roster (
            chat_id     INTEGER NOT NULL REFERENCES chat_rooms(id),
            user_id     INTEGER NOT NULL REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (chat_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS chat_messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            chat_id     INTEGER NOT NULL REFERENCES chat_rooms(id),
            user_id     INTEGER NOT NULL REFERENCES users(id),
            message     TEXT NOT NULL,
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_chat_messages_chat
            ON chat_messages(chat_id, id);

        CREATE TABLE IF NOT EXISTS email_tracking (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            tracking_id     TEXT NOT NULL UNIQUE,
            user_id         INTEGER REFERENCES users(id),
            email_type      TEXT NOT NULL,
            recipient_email TEXT NOT NULL,
            sent_at         TEXT NOT NULL DEFAULT (datetime('now')),
            replied_at      TEXT,
            replied_via     TEXT
        );

        CREATE TABLE IF NOT EXISTS email_tracking_clicks (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            email_tracking_id   INTEGER NOT NULL REFERENCES email_tracking(id),
            link_url            TEXT NOT NULL,
            link_position       TEXT NOT NULL,
            action              TEXT NOT NULL,
            clicked_at          TEXT NOT NULL DEFAULT (datetime('now'))
        );
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
