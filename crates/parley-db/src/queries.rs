use anyhow::Result;
use rusqlite::params;

use parley_types::models::{MessageKind, MessageView, Role, RoomMemberView, RoomView};

use crate::Database;
use crate::models::{MessageRow, PushSubscriptionRow, RoomRow, UserRow};

const MESSAGE_VIEW_COLUMNS: &str = "m.id, m.room_id, m.sender_id, m.text, m.type, \
     m.file_url, m.file_name, m.reply_to, m.is_edited, m.created_at, \
     u.username, u.display_name, u.role";

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        username: &str,
        display_name: &str,
        password_hash: &str,
        role: Role,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, display_name, password_hash, role)
                 VALUES (?1, ?2, ?3, ?4)",
                params![username, display_name, password_hash, role.as_str()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {USER_COLUMNS} FROM users WHERE username = ?1"
            ))?;
            let row = stmt.query_row(params![username], map_user_row).optional()?;
            Ok(row)
        })
    }

    pub fn get_user_by_id(&self, id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"))?;
            let row = stmt.query_row(params![id], map_user_row).optional()?;
            Ok(row)
        })
    }

    /// Flip the online flag and stamp last_seen. Single-row write; not
    /// transactionally coupled to any broadcast.
    pub fn set_user_presence(&self, user_id: i64, online: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE users SET is_online = ?1, last_seen = datetime('now') WHERE id = ?2",
                params![online as i64, user_id],
            )?;
            Ok(())
        })
    }

    /// Clear all online flags. Run at startup so a crash can't leave
    /// users stuck online.
    pub fn reset_presence(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("UPDATE users SET is_online = 0", [])?;
            Ok(())
        })
    }

    // -- Rooms & membership --

    /// Create a room with its owner and initial members in one
    /// transaction. Duplicate member ids are ignored.
    pub fn create_room(
        &self,
        name: &str,
        description: Option<&str>,
        kind: &str,
        created_by: i64,
        member_ids: &[i64],
    ) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO rooms (name, description, type, created_by)
                 VALUES (?1, ?2, ?3, ?4)",
                params![name, description, kind, created_by],
            )?;
            let room_id = tx.last_insert_rowid();
            tx.execute(
                "INSERT INTO room_members (room_id, user_id, role) VALUES (?1, ?2, 'owner')",
                params![room_id, created_by],
            )?;
            for &uid in member_ids {
                if uid != created_by {
                    tx.execute(
                        "INSERT OR IGNORE INTO room_members (room_id, user_id, role)
                         VALUES (?1, ?2, 'member')",
                        params![room_id, uid],
                    )?;
                }
            }
            tx.commit()?;
            Ok(room_id)
        })
    }

    /// A direct room is unique per unordered user pair.
    pub fn find_direct_room(&self, user_a: i64, user_b: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            let id = conn
                .query_row(
                    "SELECT r.id FROM rooms r
                     JOIN room_members rm1 ON r.id = rm1.room_id AND rm1.user_id = ?1
                     JOIN room_members rm2 ON r.id = rm2.room_id AND rm2.user_id = ?2
                     WHERE r.type = 'direct'
                     LIMIT 1",
                    params![user_a, user_b],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(id)
        })
    }

    pub fn get_room(&self, room_id: i64) -> Result<Option<RoomRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, name, description, type, is_archived, created_by, created_at
                     FROM rooms WHERE id = ?1",
                    params![room_id],
                    |row| {
                        Ok(RoomRow {
                            id: row.get(0)?,
                            name: row.get(1)?,
                            description: row.get(2)?,
                            kind: row.get(3)?,
                            is_archived: row.get::<_, i64>(4)? != 0,
                            created_by: row.get(5)?,
                            created_at: row.get(6)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// Membership existence is the access-control gate for every message
    /// operation.
    pub fn is_member(&self, room_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                    params![room_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Idempotent: inserting an existing (room, user) pair is a no-op.
    pub fn add_member(&self, room_id: i64, user_id: i64, role: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO room_members (room_id, user_id, role)
                 VALUES (?1, ?2, ?3)",
                params![room_id, user_id, role],
            )?;
            Ok(())
        })
    }

    pub fn remove_member(&self, room_id: i64, user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                params![room_id, user_id],
            )?;
            Ok(())
        })
    }

    pub fn member_role(&self, room_id: i64, user_id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let role = conn
                .query_row(
                    "SELECT role FROM room_members WHERE room_id = ?1 AND user_id = ?2",
                    params![room_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(role)
        })
    }

    pub fn room_member_ids(&self, room_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT user_id FROM room_members WHERE room_id = ?1")?;
            let ids = stmt
                .query_map(params![room_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Ids of every room the user belongs to; drives the initial channel
    /// subscriptions on connect.
    pub fn member_room_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT room_id FROM room_members WHERE user_id = ?1")?;
            let ids = stmt
                .query_map(params![user_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    pub fn room_members(&self, room_id: i64) -> Result<Vec<RoomMemberView>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.display_name, u.role, u.is_online, rm.role
                 FROM room_members rm JOIN users u ON rm.user_id = u.id
                 WHERE rm.room_id = ?1",
            )?;
            let members = stmt
                .query_map(params![room_id], |row| {
                    Ok(RoomMemberView {
                        id: row.get(0)?,
                        username: row.get(1)?,
                        display_name: row.get(2)?,
                        role: Role::parse(&row.get::<_, String>(3)?).unwrap_or(Role::User),
                        is_online: row.get::<_, i64>(4)? != 0,
                        room_role: row.get(5)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(members)
        })
    }

    /// Agent accounts that are members of the room; drives the
    /// allowed-agents policy check.
    pub fn agent_member_ids(&self, room_id: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id FROM room_members rm JOIN users u ON rm.user_id = u.id
                 WHERE rm.room_id = ?1 AND u.role = 'agent'",
            )?;
            let ids = stmt
                .query_map(params![room_id], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Room members currently marked offline, minus the sender. These are
    /// the push notification targets for a broadcast.
    pub fn offline_member_ids(&self, room_id: i64, exclude_user: i64) -> Result<Vec<i64>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id FROM room_members rm JOIN users u ON rm.user_id = u.id
                 WHERE rm.room_id = ?1 AND u.id != ?2 AND u.is_online = 0",
            )?;
            let ids = stmt
                .query_map(params![room_id, exclude_user], |row| row.get(0))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ids)
        })
    }

    /// Non-archived rooms the user belongs to, with last-message preview
    /// and unread count, most recently active first.
    pub fn rooms_for_user(&self, user_id: i64) -> Result<Vec<RoomView>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.id, r.name, r.description, r.type, r.is_archived, r.created_by,
                        r.created_at, rm.role,
                   (SELECT COUNT(*) FROM room_members WHERE room_id = r.id),
                   (SELECT m.text FROM messages m WHERE m.room_id = r.id
                      ORDER BY m.id DESC LIMIT 1),
                   (SELECT m.created_at FROM messages m WHERE m.room_id = r.id
                      ORDER BY m.id DESC LIMIT 1) AS last_message_at,
                   (SELECT u.display_name FROM messages m JOIN users u ON m.sender_id = u.id
                      WHERE m.room_id = r.id ORDER BY m.id DESC LIMIT 1),
                   (SELECT COUNT(*) FROM messages m
                      WHERE m.room_id = r.id
                        AND m.sender_id != ?1
                        AND m.id NOT IN (SELECT message_id FROM message_reads
                                         WHERE user_id = ?1))
                 FROM rooms r
                 JOIN room_members rm ON r.id = rm.room_id AND rm.user_id = ?1
                 WHERE r.is_archived = 0
                 ORDER BY last_message_at DESC NULLS LAST",
            )?;
            let rooms = stmt
                .query_map(params![user_id], |row| {
                    Ok(RoomView {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        description: row.get(2)?,
                        kind: parse_room_type(&row.get::<_, String>(3)?),
                        is_archived: row.get::<_, i64>(4)? != 0,
                        created_by: row.get(5)?,
                        created_at: row.get(6)?,
                        my_role: row.get(7)?,
                        member_count: row.get(8)?,
                        last_message: row.get(9)?,
                        last_message_at: row.get(10)?,
                        last_message_sender: row.get(11)?,
                        unread_count: row.get(12)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rooms)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        room_id: i64,
        sender_id: i64,
        text: &str,
        kind: MessageKind,
        reply_to: Option<i64>,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (room_id, sender_id, text, type, reply_to)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![room_id, sender_id, text, kind.as_str(), reply_to],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, room_id, sender_id, text, type, created_at
                     FROM messages WHERE id = ?1",
                    params![id],
                    |row| {
                        Ok(MessageRow {
                            id: row.get(0)?,
                            room_id: row.get(1)?,
                            sender_id: row.get(2)?,
                            text: row.get(3)?,
                            kind: row.get(4)?,
                            created_at: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            Ok(row)
        })
    }

    /// The fully-joined message as broadcast to room subscribers.
    pub fn get_message_view(&self, id: i64) -> Result<Option<MessageView>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_VIEW_COLUMNS}
                 FROM messages m JOIN users u ON m.sender_id = u.id
                 WHERE m.id = ?1"
            );
            let view = conn
                .query_row(&sql, params![id], map_message_view)
                .optional()?;
            Ok(view)
        })
    }

    pub fn edit_message(&self, id: i64, text: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE messages SET text = ?1, is_edited = 1 WHERE id = ?2",
                params![text, id],
            )?;
            Ok(())
        })
    }

    /// Delete a message and its read receipts as one atomic unit, so a
    /// crash can never leave receipts referencing a missing message.
    pub fn delete_message(&self, id: i64) -> Result<()> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            tx.execute("DELETE FROM message_reads WHERE message_id = ?1", params![id])?;
            tx.execute("DELETE FROM messages WHERE id = ?1", params![id])?;
            tx.commit()?;
            Ok(())
        })
    }

    /// One page of room history, oldest-first within the page. `before`
    /// restricts to strictly lower ids; without it the page is taken
    /// backward from the newest message.
    pub fn history(&self, room_id: i64, before: Option<i64>, limit: u32) -> Result<Vec<MessageView>> {
        self.with_conn(|conn| {
            let base = format!(
                "SELECT {MESSAGE_VIEW_COLUMNS}
                 FROM messages m JOIN users u ON m.sender_id = u.id"
            );
            let mut messages = match before {
                Some(before) => {
                    let sql = format!(
                        "{base} WHERE m.room_id = ?1 AND m.id < ?2
                         ORDER BY m.id DESC LIMIT ?3"
                    );
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(params![room_id, before, limit], map_message_view)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
                None => {
                    let sql =
                        format!("{base} WHERE m.room_id = ?1 ORDER BY m.id DESC LIMIT ?2");
                    let mut stmt = conn.prepare(&sql)?;
                    stmt.query_map(params![room_id, limit], map_message_view)?
                        .collect::<std::result::Result<Vec<_>, _>>()?
                }
            };
            messages.reverse();
            Ok(messages)
        })
    }

    /// Substring search within one room, most recent first.
    pub fn search_messages(&self, room_id: i64, query: &str, limit: u32) -> Result<Vec<MessageView>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {MESSAGE_VIEW_COLUMNS}
                 FROM messages m JOIN users u ON m.sender_id = u.id
                 WHERE m.room_id = ?1 AND m.text LIKE ?2
                 ORDER BY m.id DESC LIMIT ?3"
            );
            let mut stmt = conn.prepare(&sql)?;
            let pattern = format!("%{query}%");
            let messages = stmt
                .query_map(params![room_id, pattern, limit], map_message_view)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(messages)
        })
    }

    /// Messages the user has sent since the store's midnight; input to
    /// the daily-cap policy.
    pub fn messages_sent_today(&self, sender_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE sender_id = ?1 AND created_at >= date('now')",
                params![sender_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    /// Record a read receipt. Returns true only when the receipt was
    /// newly inserted, so callers broadcast at most once per transition.
    pub fn mark_read(&self, message_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO message_reads (message_id, user_id) VALUES (?1, ?2)",
                params![message_id, user_id],
            )?;
            Ok(changed == 1)
        })
    }

    /// Messages in the room not authored by the user and lacking a
    /// receipt for them.
    pub fn unread_count(&self, room_id: i64, user_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let count = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 WHERE m.room_id = ?1 AND m.sender_id != ?2
                   AND m.id NOT IN (SELECT message_id FROM message_reads WHERE user_id = ?2)",
                params![room_id, user_id],
                |row| row.get(0),
            )?;
            Ok(count)
        })
    }

    // -- Push subscriptions --

    /// One subscription per (user, endpoint); re-subscribing refreshes
    /// the keys.
    pub fn upsert_push_subscription(&self, user_id: i64, endpoint: &str, keys: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO push_subscriptions (user_id, endpoint, keys)
                 VALUES (?1, ?2, ?3)
                 ON CONFLICT(user_id, endpoint)
                 DO UPDATE SET keys = excluded.keys, updated_at = datetime('now')",
                params![user_id, endpoint, keys],
            )?;
            Ok(())
        })
    }

    pub fn delete_push_subscription(&self, user_id: i64, endpoint: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM push_subscriptions WHERE user_id = ?1 AND endpoint = ?2",
                params![user_id, endpoint],
            )?;
            Ok(())
        })
    }

    /// Prune a subscription the transport reported gone.
    pub fn delete_push_subscription_by_id(&self, id: i64) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM push_subscriptions WHERE id = ?1", params![id])?;
            Ok(())
        })
    }

    pub fn push_subscriptions(&self, user_id: i64) -> Result<Vec<PushSubscriptionRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, endpoint, keys FROM push_subscriptions
                 WHERE user_id = ?1",
            )?;
            let subs = stmt
                .query_map(params![user_id], |row| {
                    Ok(PushSubscriptionRow {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        endpoint: row.get(2)?,
                        keys: row.get(3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(subs)
        })
    }
}

fn map_message_view(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageView> {
    Ok(MessageView {
        id: row.get(0)?,
        room_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        kind: parse_message_kind(&row.get::<_, String>(4)?),
        file_url: row.get(5)?,
        file_name: row.get(6)?,
        reply_to: row.get(7)?,
        is_edited: row.get::<_, i64>(8)? != 0,
        created_at: row.get(9)?,
        sender_username: row.get(10)?,
        sender_name: row.get(11)?,
        sender_role: Role::parse(&row.get::<_, String>(12)?).unwrap_or(Role::User),
    })
}

fn parse_message_kind(s: &str) -> MessageKind {
    match s {
        "file" => MessageKind::File,
        "system" => MessageKind::System,
        _ => MessageKind::Text,
    }
}

fn parse_room_type(s: &str) -> parley_types::models::RoomType {
    use parley_types::models::RoomType;
    match s {
        "direct" => RoomType::Direct,
        "channel" => RoomType::Channel,
        _ => RoomType::Group,
    }
}

const USER_COLUMNS: &str =
    "id, username, display_name, password_hash, role, is_online, last_seen, created_at";

fn map_user_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        password_hash: row.get(3)?,
        role: row.get(4)?,
        is_online: row.get::<_, i64>(5)? != 0,
        last_seen: row.get(6)?,
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

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn user(db: &Database, name: &str, role: Role) -> i64 {
        db.create_user(name, name, "x", role).unwrap()
    }

    /// Two users plus a group room both belong to.
    fn room_with_pair(db: &Database) -> (i64, i64, i64) {
        let a = user(db, "alice", Role::User);
        let b = user(db, "bob", Role::User);
        let room = db.create_room("general", None, "group", a, &[b]).unwrap();
        (room, a, b)
    }

    #[test]
    fn message_ids_strictly_increase_with_creation_order() {
        let db = db();
        let (room, a, b) = room_with_pair(&db);

        let m1 = db.insert_message(room, a, "one", MessageKind::Text, None).unwrap();
        let m2 = db.insert_message(room, b, "two", MessageKind::Text, None).unwrap();
        let m3 = db.insert_message(room, a, "three", MessageKind::Text, None).unwrap();
        assert!(m1 < m2 && m2 < m3);

        let page = db.history(room, None, 50).unwrap();
        let ids: Vec<i64> = page.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![m1, m2, m3]);
        for w in page.windows(2) {
            assert!(w[0].created_at <= w[1].created_at);
        }
    }

    #[test]
    fn history_cursor_restricts_to_lower_ids() {
        let db = db();
        let (room, a, _) = room_with_pair(&db);
        let ids: Vec<i64> = (0..5)
            .map(|i| {
                db.insert_message(room, a, &format!("m{i}"), MessageKind::Text, None)
                    .unwrap()
            })
            .collect();

        let page = db.history(room, Some(ids[3]), 10).unwrap();
        let got: Vec<i64> = page.iter().map(|m| m.id).collect();
        assert_eq!(got, ids[..3].to_vec());

        // no cursor: backward from newest, limited
        let page = db.history(room, None, 2).unwrap();
        let got: Vec<i64> = page.iter().map(|m| m.id).collect();
        assert_eq!(got, ids[3..].to_vec());
    }

    #[test]
    fn duplicate_membership_is_a_noop() {
        let db = db();
        let (room, _, b) = room_with_pair(&db);
        db.add_member(room, b, "member").unwrap();
        db.add_member(room, b, "member").unwrap();

        let members = db.room_members(room).unwrap();
        assert_eq!(members.iter().filter(|m| m.id == b).count(), 1);
    }

    #[test]
    fn mark_read_is_idempotent() {
        let db = db();
        let (room, a, b) = room_with_pair(&db);
        let msg = db.insert_message(room, a, "hi", MessageKind::Text, None).unwrap();

        assert!(db.mark_read(msg, b).unwrap());
        assert!(!db.mark_read(msg, b).unwrap());
        assert_eq!(db.unread_count(room, b).unwrap(), 0);
    }

    #[test]
    fn unread_counts_track_receipts_and_authorship() {
        let db = db();
        let (room, a, b) = room_with_pair(&db);

        let m1 = db.insert_message(room, a, "one", MessageKind::Text, None).unwrap();
        db.insert_message(room, a, "two", MessageKind::Text, None).unwrap();

        // own messages never count as unread
        assert_eq!(db.unread_count(room, a).unwrap(), 0);
        assert_eq!(db.unread_count(room, b).unwrap(), 2);

        db.mark_read(m1, b).unwrap();
        assert_eq!(db.unread_count(room, b).unwrap(), 1);

        // a new message bumps every other member by exactly one
        db.insert_message(room, b, "reply", MessageKind::Text, None).unwrap();
        assert_eq!(db.unread_count(room, a).unwrap(), 1);
        assert_eq!(db.unread_count(room, b).unwrap(), 1);
    }

    #[test]
    fn delete_removes_receipts_and_history_entry() {
        let db = db();
        let (room, a, b) = room_with_pair(&db);
        let msg = db.insert_message(room, a, "ephemeral", MessageKind::Text, None).unwrap();
        db.mark_read(msg, b).unwrap();

        db.delete_message(msg).unwrap();

        assert!(db.get_message(msg).unwrap().is_none());
        assert!(db.history(room, None, 50).unwrap().iter().all(|m| m.id != msg));
        // receipt went with it, so re-reading would be a fresh insert
        let msg2 = db.insert_message(room, a, "next", MessageKind::Text, None).unwrap();
        assert!(db.mark_read(msg2, b).unwrap());
    }

    #[test]
    fn edit_sets_flag_and_new_text() {
        let db = db();
        let (room, a, _) = room_with_pair(&db);
        let msg = db.insert_message(room, a, "typo", MessageKind::Text, None).unwrap();

        db.edit_message(msg, "fixed").unwrap();

        let view = db.get_message_view(msg).unwrap().unwrap();
        assert_eq!(view.text, "fixed");
        assert!(view.is_edited);
        assert_eq!(view.sender_username, "alice");
    }

    #[test]
    fn search_is_substring_and_newest_first() {
        let db = db();
        let (room, a, _) = room_with_pair(&db);
        db.insert_message(room, a, "deploy the server", MessageKind::Text, None).unwrap();
        db.insert_message(room, a, "unrelated", MessageKind::Text, None).unwrap();
        let newest = db
            .insert_message(room, a, "server is down", MessageKind::Text, None)
            .unwrap();

        let hits = db.search_messages(room, "server", 50).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, newest);
    }

    #[test]
    fn direct_rooms_unique_per_pair() {
        let db = db();
        let a = user(&db, "alice", Role::User);
        let b = user(&db, "bob", Role::User);
        assert!(db.find_direct_room(a, b).unwrap().is_none());

        let dm = db.create_room("alice-bob", None, "direct", a, &[b]).unwrap();
        assert_eq!(db.find_direct_room(a, b).unwrap(), Some(dm));
        assert_eq!(db.find_direct_room(b, a).unwrap(), Some(dm));
    }

    #[test]
    fn offline_members_exclude_sender_and_online_users() {
        let db = db();
        let (room, a, b) = room_with_pair(&db);
        let c = user(&db, "carol", Role::User);
        db.add_member(room, c, "member").unwrap();

        db.set_user_presence(a, true).unwrap();
        db.set_user_presence(b, true).unwrap();
        // carol stays offline

        assert_eq!(db.offline_member_ids(room, a).unwrap(), vec![c]);

        db.set_user_presence(b, false).unwrap();
        let mut offline = db.offline_member_ids(room, a).unwrap();
        offline.sort();
        assert_eq!(offline, vec![b, c]);
    }

    #[test]
    fn daily_count_counts_only_today() {
        let db = db();
        let (room, a, _) = room_with_pair(&db);
        assert_eq!(db.messages_sent_today(a).unwrap(), 0);
        db.insert_message(room, a, "hello", MessageKind::Text, None).unwrap();
        db.insert_message(room, a, "again", MessageKind::Text, None).unwrap();
        assert_eq!(db.messages_sent_today(a).unwrap(), 2);
    }

    #[test]
    fn push_subscription_upsert_and_prune() {
        let db = db();
        let a = user(&db, "alice", Role::User);

        db.upsert_push_subscription(a, "https://push.example/ep1", "{}").unwrap();
        db.upsert_push_subscription(a, "https://push.example/ep1", r#"{"p256dh":"k"}"#)
            .unwrap();
        let subs = db.push_subscriptions(a).unwrap();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].keys, r#"{"p256dh":"k"}"#);

        db.delete_push_subscription_by_id(subs[0].id).unwrap();
        assert!(db.push_subscriptions(a).unwrap().is_empty());
    }

    #[test]
    fn rooms_for_user_skips_archived_and_counts_unread() {
        let db = db();
        let (room, a, b) = room_with_pair(&db);
        db.insert_message(room, a, "hello bob", MessageKind::Text, None).unwrap();

        let rooms = db.rooms_for_user(b).unwrap();
        assert_eq!(rooms.len(), 1);
        assert_eq!(rooms[0].id, room);
        assert_eq!(rooms[0].unread_count, 1);
        assert_eq!(rooms[0].member_count, 2);
        assert_eq!(rooms[0].last_message.as_deref(), Some("hello bob"));
    }
}
