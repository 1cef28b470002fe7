//! The single authorization predicate consulted by every mutating event
//! handler. Membership is the gate for everything; per-user policy
//! (daily cap, agent allowlist) applies on top and is bypassed by admins.

use parley_db::Database;
use parley_db::models::MessageRow;
use parley_types::events::Identity;
use parley_types::models::Role;

use crate::error::EventError;

pub enum Action<'a> {
    SendMessage { room_id: i64 },
    EditMessage { message: &'a MessageRow },
    DeleteMessage { message: &'a MessageRow },
    ReadRoom { room_id: i64 },
}

/// Explicit allow/deny for `actor` performing `action`. A deny carries
/// the reason in the error variant, which also decides whether the
/// client hears about it.
pub fn can(db: &Database, actor: &Identity, action: &Action<'_>) -> Result<(), EventError> {
    match action {
        Action::SendMessage { room_id } => {
            require_membership(db, *room_id, actor.user_id)?;
            if actor.role != Role::Admin {
                check_daily_cap(db, actor.user_id)?;
                check_agent_access(db, *room_id, actor.user_id)?;
            }
            Ok(())
        }

        Action::EditMessage { message } => {
            // Only the original sender may edit, admins included.
            if message.sender_id != actor.user_id {
                return Err(EventError::Forbidden("can only edit your own messages"));
            }
            Ok(())
        }

        Action::DeleteMessage { message } => {
            if message.sender_id != actor.user_id && actor.role != Role::Admin {
                return Err(EventError::Forbidden(
                    "only the sender or an admin may delete",
                ));
            }
            Ok(())
        }

        Action::ReadRoom { room_id } => require_membership(db, *room_id, actor.user_id),
    }
}

fn require_membership(db: &Database, room_id: i64, user_id: i64) -> Result<(), EventError> {
    if db.is_member(room_id, user_id)? {
        Ok(())
    } else {
        Err(EventError::Forbidden("not a member of this room"))
    }
}

fn check_daily_cap(db: &Database, user_id: i64) -> Result<(), EventError> {
    let cap = db.permission(user_id, "max_messages_per_day")?;
    if let Some(cap) = cap.as_i64() {
        let sent = db.messages_sent_today(user_id)?;
        if sent >= cap {
            return Err(EventError::Policy(format!(
                "Daily message limit of {cap} reached."
            )));
        }
    }
    Ok(())
}

fn check_agent_access(db: &Database, room_id: i64, user_id: i64) -> Result<(), EventError> {
    let agents = db.agent_member_ids(room_id)?;
    if agents.is_empty() {
        return Ok(());
    }

    let allowed = db.permission(user_id, "allowed_agents")?;
    let allowed: Vec<i64> = allowed
        .as_array()
        .map(|arr| arr.iter().filter_map(|v| v.as_i64()).collect())
        .unwrap_or_default();

    if agents.iter().any(|id| allowed.contains(id)) {
        Ok(())
    } else {
        Err(EventError::Policy(
            "You do not have access to AI agents in this room.".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn identity(user_id: i64, role: Role) -> Identity {
        Identity {
            user_id,
            username: format!("u{user_id}"),
            display_name: format!("User {user_id}"),
            role,
        }
    }

    fn setup() -> (Database, i64, i64) {
        let db = Database::open_in_memory().unwrap();
        let a = db.create_user("alice", "Alice", "x", Role::User).unwrap();
        let room = db.create_room("general", None, "group", a, &[]).unwrap();
        (db, room, a)
    }

    #[test]
    fn non_members_cannot_send() {
        let (db, room, _a) = setup();
        let outsider = db.create_user("eve", "Eve", "x", Role::User).unwrap();

        let deny = can(
            &db,
            &identity(outsider, Role::User),
            &Action::SendMessage { room_id: room },
        );
        assert!(matches!(deny, Err(EventError::Forbidden(_))));
    }

    #[test]
    fn daily_cap_applies_to_users_not_admins() {
        let (db, room, a) = setup();
        db.set_permission(a, "max_messages_per_day", &json!(1), None)
            .unwrap();

        let action = Action::SendMessage { room_id: room };
        assert!(can(&db, &identity(a, Role::User), &action).is_ok());

        db.insert_message(room, a, "first", parley_types::models::MessageKind::Text, None)
            .unwrap();

        let deny = can(&db, &identity(a, Role::User), &action);
        match deny {
            Err(EventError::Policy(msg)) => {
                assert_eq!(msg, "Daily message limit of 1 reached.")
            }
            other => panic!("expected policy deny, got {other:?}"),
        }

        // same user as admin sails through
        assert!(can(&db, &identity(a, Role::Admin), &action).is_ok());
    }

    #[test]
    fn agent_rooms_require_an_allowlist_grant() {
        let (db, room, a) = setup();
        let agent = db.create_user("bot", "Bot", "x", Role::Agent).unwrap();
        db.add_member(room, agent, "member").unwrap();

        let action = Action::SendMessage { room_id: room };
        let deny = can(&db, &identity(a, Role::User), &action);
        match deny {
            Err(EventError::Policy(msg)) => {
                assert_eq!(msg, "You do not have access to AI agents in this room.")
            }
            other => panic!("expected policy deny, got {other:?}"),
        }

        db.set_permission(a, "allowed_agents", &json!([agent]), None)
            .unwrap();
        assert!(can(&db, &identity(a, Role::User), &action).is_ok());
    }

    #[test]
    fn edit_is_sender_only_delete_allows_admin() {
        let (db, room, a) = setup();
        let b = db.create_user("bob", "Bob", "x", Role::User).unwrap();
        db.add_member(room, b, "member").unwrap();
        let mid = db
            .insert_message(room, a, "mine", parley_types::models::MessageKind::Text, None)
            .unwrap();
        let msg = db.get_message(mid).unwrap().unwrap();

        assert!(can(&db, &identity(a, Role::User), &Action::EditMessage { message: &msg }).is_ok());
        assert!(matches!(
            can(&db, &identity(b, Role::User), &Action::EditMessage { message: &msg }),
            Err(EventError::Forbidden(_))
        ));
        // admins may delete but not edit others' messages
        assert!(matches!(
            can(&db, &identity(b, Role::Admin), &Action::EditMessage { message: &msg }),
            Err(EventError::Forbidden(_))
        ));
        assert!(
            can(&db, &identity(b, Role::Admin), &Action::DeleteMessage { message: &msg }).is_ok()
        );
        assert!(matches!(
            can(&db, &identity(b, Role::User), &Action::DeleteMessage { message: &msg }),
            Err(EventError::Forbidden(_))
        ));
    }
}
