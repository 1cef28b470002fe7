use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            username      TEXT NOT NULL UNIQUE,
            display_name  TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            role          TEXT NOT NULL DEFAULT 'user'
                          CHECK(role IN ('admin','user','agent')),
            is_online     INTEGER NOT NULL DEFAULT 0,
            last_seen     TEXT,
            created_at    TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS rooms (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL,
            description TEXT,
            type        TEXT NOT NULL DEFAULT 'group'
                        CHECK(type IN ('direct','group','channel')),
            is_archived INTEGER NOT NULL DEFAULT 0,
            created_by  INTEGER REFERENCES users(id),
            created_at  TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS room_members (
            room_id   INTEGER NOT NULL REFERENCES rooms(id),
            user_id   INTEGER NOT NULL REFERENCES users(id),
            role      TEXT NOT NULL DEFAULT 'member'
                      CHECK(role IN ('owner','member')),
            joined_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (room_id, user_id)
        );

        -- Integer autoincrement ids double as the ordering key: id order
        -- and created_at order always agree.
        CREATE TABLE IF NOT EXISTS messages (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            room_id    INTEGER NOT NULL REFERENCES rooms(id),
            sender_id  INTEGER NOT NULL REFERENCES users(id),
            text       TEXT NOT NULL,
            type       TEXT NOT NULL DEFAULT 'text'
                       CHECK(type IN ('text','file','system')),
            file_url   TEXT,
            file_name  TEXT,
            reply_to   INTEGER REFERENCES messages(id),
            is_edited  INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS message_reads (
            message_id INTEGER NOT NULL REFERENCES messages(id),
            user_id    INTEGER NOT NULL REFERENCES users(id),
            read_at    TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (message_id, user_id)
        );

        CREATE TABLE IF NOT EXISTS push_subscriptions (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            endpoint   TEXT NOT NULL,
            keys       TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE(user_id, endpoint)
        );

        CREATE TABLE IF NOT EXISTS user_permissions (
            user_id    INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            permission TEXT NOT NULL,
            value      TEXT NOT NULL DEFAULT 'true',
            granted_by INTEGER REFERENCES users(id),
            granted_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, permission)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_room
            ON messages(room_id, created_at);
        CREATE INDEX IF NOT EXISTS idx_room_members_user
            ON room_members(user_id);
        CREATE INDEX IF NOT EXISTS idx_message_reads_user
            ON message_reads(user_id);
        CREATE INDEX IF NOT EXISTS idx_push_subscriptions_user
            ON push_subscriptions(user_id);
        CREATE INDEX IF NOT EXISTS idx_user_permissions_user
            ON user_permissions(user_id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
