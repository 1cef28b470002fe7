//! Per-user policy lookup with fixed defaults. The resolver is
//! policy-agnostic: admin bypass is the caller's concern.

use anyhow::Result;
use rusqlite::params;
use serde_json::{Value, json};

use crate::Database;

/// Default value for a permission key when no grant row exists.
pub fn default_for(key: &str) -> Value {
    match key {
        "can_send_files" => json!(true),
        "allowed_agents" => json!([]),
        // null means unlimited / unrestricted
        "max_messages_per_day" => Value::Null,
        "allowed_rooms" => Value::Null,
        _ => Value::Null,
    }
}

const KNOWN_KEYS: [&str; 4] = [
    "can_send_files",
    "allowed_agents",
    "max_messages_per_day",
    "allowed_rooms",
];

impl Database {
    /// Stored JSON-decoded grant value, or the fixed default for the key.
    /// Grant values that fail to parse as JSON are kept as plain strings,
    /// matching how they were written.
    pub fn permission(&self, user_id: i64, key: &str) -> Result<Value> {
        self.with_conn(|conn| {
            let raw: Option<String> = conn
                .query_row(
                    "SELECT value FROM user_permissions
                     WHERE user_id = ?1 AND permission = ?2",
                    params![user_id, key],
                    |row| row.get(0),
                )
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            Ok(match raw {
                Some(raw) => serde_json::from_str(&raw).unwrap_or(Value::String(raw)),
                None => default_for(key),
            })
        })
    }

    /// Full merged permission map (defaults overlaid by grants), for
    /// display surfaces.
    pub fn permissions(&self, user_id: i64) -> Result<serde_json::Map<String, Value>> {
        self.with_conn(|conn| {
            let mut merged = serde_json::Map::new();
            for key in KNOWN_KEYS {
                merged.insert(key.to_string(), default_for(key));
            }

            let mut stmt = conn.prepare(
                "SELECT permission, value FROM user_permissions WHERE user_id = ?1",
            )?;
            let rows = stmt.query_map(params![user_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (key, raw) = row?;
                let value = serde_json::from_str(&raw).unwrap_or(Value::String(raw));
                merged.insert(key, value);
            }
            Ok(merged)
        })
    }

    /// Write or replace a grant. Values are stored as JSON text.
    pub fn set_permission(
        &self,
        user_id: i64,
        key: &str,
        value: &Value,
        granted_by: Option<i64>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_permissions (user_id, permission, value, granted_by)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(user_id, permission)
                 DO UPDATE SET value = excluded.value, granted_by = excluded.granted_by,
                               granted_at = datetime('now')",
                params![user_id, key, value.to_string(), granted_by],
            )?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_types::models::Role;

    #[test]
    fn defaults_apply_without_grants() {
        let db = Database::open_in_memory().unwrap();
        let uid = db.create_user("dana", "Dana", "x", Role::User).unwrap();

        assert_eq!(db.permission(uid, "can_send_files").unwrap(), json!(true));
        assert_eq!(db.permission(uid, "allowed_agents").unwrap(), json!([]));
        assert_eq!(db.permission(uid, "max_messages_per_day").unwrap(), Value::Null);
        assert_eq!(db.permission(uid, "allowed_rooms").unwrap(), Value::Null);
    }

    #[test]
    fn grants_override_defaults() {
        let db = Database::open_in_memory().unwrap();
        let uid = db.create_user("dana", "Dana", "x", Role::User).unwrap();

        db.set_permission(uid, "max_messages_per_day", &json!(5), None).unwrap();
        db.set_permission(uid, "allowed_agents", &json!([42]), None).unwrap();

        assert_eq!(db.permission(uid, "max_messages_per_day").unwrap(), json!(5));
        assert_eq!(db.permission(uid, "allowed_agents").unwrap(), json!([42]));

        // replace in place
        db.set_permission(uid, "max_messages_per_day", &json!(10), None).unwrap();
        assert_eq!(db.permission(uid, "max_messages_per_day").unwrap(), json!(10));
    }

    #[test]
    fn merged_map_overlays_grants_on_defaults() {
        let db = Database::open_in_memory().unwrap();
        let uid = db.create_user("dana", "Dana", "x", Role::User).unwrap();
        db.set_permission(uid, "can_send_files", &json!(false), None).unwrap();

        let all = db.permissions(uid).unwrap();
        assert_eq!(all["can_send_files"], json!(false));
        assert_eq!(all["allowed_agents"], json!([]));
        assert!(all.contains_key("max_messages_per_day"));
    }
}
