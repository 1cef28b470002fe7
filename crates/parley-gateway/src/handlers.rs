//! Client event handlers. Each call validates, authorizes, mutates the
//! ledger, and broadcasts — in that order. The connection loop invokes
//! these sequentially per connection, so events from one client are
//! processed strictly in arrival order.

use uuid::Uuid;

use parley_types::events::{ClientEvent, Identity, ServerEvent};
use parley_types::models::MessageKind;

use crate::GatewayState;
use crate::authz::{self, Action};
use crate::error::EventError;

const MAX_TEXT_CHARS: usize = 4000;

pub async fn handle_event(
    state: &GatewayState,
    conn_id: Uuid,
    identity: &Identity,
    event: ClientEvent,
) -> Result<(), EventError> {
    match event {
        ClientEvent::JoinRoom(room_id) => join_room(state, conn_id, identity, room_id).await,
        ClientEvent::LeaveRoom(room_id) => {
            state.dispatcher.unsubscribe(conn_id, room_id).await;
            Ok(())
        }
        ClientEvent::Message {
            room_id,
            text,
            kind,
            reply_to,
        } => send_message(state, identity, room_id, text, kind, reply_to).await,
        ClientEvent::MessageEdit { message_id, text } => {
            edit_message(state, identity, message_id, text).await
        }
        ClientEvent::MessageDelete { message_id } => {
            delete_message(state, identity, message_id).await
        }
        ClientEvent::MarkRead { message_id } => {
            mark_read(state, conn_id, identity, message_id).await
        }
        ClientEvent::Typing { room_id } => typing(state, conn_id, identity, room_id).await,
    }
}

/// Subscribe only when a live membership row exists; non-members get a
/// silent no-op rather than an error.
async fn join_room(
    state: &GatewayState,
    conn_id: Uuid,
    identity: &Identity,
    room_id: i64,
) -> Result<(), EventError> {
    if !state.db.is_member(room_id, identity.user_id)? {
        return Ok(());
    }
    state.dispatcher.subscribe(conn_id, room_id).await;
    state
        .dispatcher
        .send_to(conn_id, ServerEvent::JoinedRoom { room_id })
        .await;
    Ok(())
}

async fn send_message(
    state: &GatewayState,
    identity: &Identity,
    room_id: i64,
    text: String,
    kind: Option<String>,
    reply_to: Option<i64>,
) -> Result<(), EventError> {
    validate_text(&text)?;
    let kind = parse_kind(kind.as_deref())?;

    let lock = state.dispatcher.room_lock(room_id).await;
    let _guard = lock.lock().await;

    authz::can(&state.db, identity, &Action::SendMessage { room_id })?;

    if let Some(reply_to) = reply_to {
        let parent = state.db.get_message(reply_to)?.ok_or(EventError::NotFound)?;
        if parent.room_id != room_id {
            return Err(EventError::Validation(
                "reply_to references a message in another room".into(),
            ));
        }
    }

    let message_id = state
        .db
        .insert_message(room_id, identity.user_id, &text, kind, reply_to)?;
    let view = state
        .db
        .get_message_view(message_id)?
        .ok_or(EventError::NotFound)?;

    state
        .dispatcher
        .broadcast_room(room_id, &ServerEvent::Message(view), None)
        .await;
    drop(_guard);

    // Offline fan-out happens after the broadcast and never blocks it.
    if let Some(room) = state.db.get_room(room_id)? {
        state
            .notifier
            .notify_room(room_id, room.name, identity.user_id, text);
    }

    Ok(())
}

async fn edit_message(
    state: &GatewayState,
    identity: &Identity,
    message_id: i64,
    text: String,
) -> Result<(), EventError> {
    validate_text(&text)?;

    let msg = state.db.get_message(message_id)?.ok_or(EventError::NotFound)?;
    let lock = state.dispatcher.room_lock(msg.room_id).await;
    let _guard = lock.lock().await;

    // Revalidate under the lock; the message may have been deleted while
    // we waited.
    let msg = state.db.get_message(message_id)?.ok_or(EventError::NotFound)?;
    authz::can(&state.db, identity, &Action::EditMessage { message: &msg })?;

    state.db.edit_message(message_id, &text)?;
    state
        .dispatcher
        .broadcast_room(
            msg.room_id,
            &ServerEvent::MessageEdited {
                message_id,
                text,
                room_id: msg.room_id,
            },
            None,
        )
        .await;
    Ok(())
}

async fn delete_message(
    state: &GatewayState,
    identity: &Identity,
    message_id: i64,
) -> Result<(), EventError> {
    let msg = state.db.get_message(message_id)?.ok_or(EventError::NotFound)?;
    let lock = state.dispatcher.room_lock(msg.room_id).await;
    let _guard = lock.lock().await;

    let msg = state.db.get_message(message_id)?.ok_or(EventError::NotFound)?;
    authz::can(&state.db, identity, &Action::DeleteMessage { message: &msg })?;

    state.db.delete_message(message_id)?;
    state
        .dispatcher
        .broadcast_room(
            msg.room_id,
            &ServerEvent::MessageDeleted {
                message_id,
                room_id: msg.room_id,
            },
            None,
        )
        .await;
    Ok(())
}

/// Idempotent; broadcasts to the other subscribers only on the first
/// unread→read transition.
async fn mark_read(
    state: &GatewayState,
    conn_id: Uuid,
    identity: &Identity,
    message_id: i64,
) -> Result<(), EventError> {
    let msg = state.db.get_message(message_id)?.ok_or(EventError::NotFound)?;
    authz::can(
        &state.db,
        identity,
        &Action::ReadRoom {
            room_id: msg.room_id,
        },
    )?;

    if state.db.mark_read(message_id, identity.user_id)? {
        state
            .dispatcher
            .broadcast_room(
                msg.room_id,
                &ServerEvent::MessageRead {
                    message_id,
                    user_id: identity.user_id,
                },
                Some(conn_id),
            )
            .await;
    }
    Ok(())
}

/// Relayed, never persisted; clients throttle, the server does not.
async fn typing(
    state: &GatewayState,
    conn_id: Uuid,
    identity: &Identity,
    room_id: i64,
) -> Result<(), EventError> {
    if !state.dispatcher.is_subscribed(conn_id, room_id).await {
        return Ok(());
    }
    state
        .dispatcher
        .broadcast_room(
            room_id,
            &ServerEvent::Typing {
                room_id,
                user_id: identity.user_id,
                username: identity.username.clone(),
                display_name: identity.display_name.clone(),
            },
            Some(conn_id),
        )
        .await;
    Ok(())
}

fn validate_text(text: &str) -> Result<(), EventError> {
    let len = text.chars().count();
    if len == 0 {
        return Err(EventError::Validation("text must not be empty".into()));
    }
    if len > MAX_TEXT_CHARS {
        return Err(EventError::Validation(format!(
            "text exceeds {MAX_TEXT_CHARS} characters"
        )));
    }
    Ok(())
}

fn parse_kind(kind: Option<&str>) -> Result<MessageKind, EventError> {
    match kind {
        None | Some("text") => Ok(MessageKind::Text),
        Some("file") => Ok(MessageKind::File),
        Some("system") => Ok(MessageKind::System),
        Some(other) => Err(EventError::Validation(format!(
            "unknown message type '{other}'"
        ))),
    }
}
