use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use parley_types::events::{ClientEvent, Identity, ServerEvent};

use crate::GatewayState;
use crate::handlers;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Handle a pre-authenticated WebSocket connection. The token was already
/// validated at the HTTP upgrade layer, so the identity is trusted here.
///
/// On connect: register with the dispatcher, flip the online flag,
/// announce presence (first connection only), and subscribe to every room
/// the user is a member of. Membership is still re-checked per mutating
/// event to handle concurrent removal.
pub async fn handle_connection(socket: WebSocket, state: GatewayState, identity: Identity) {
    let (mut sender, mut receiver) = socket.split();

    info!(
        "{} ({}) connected to gateway",
        identity.username, identity.user_id
    );

    let (conn_id, mut event_rx, first) = state.dispatcher.register(identity.user_id).await;

    if let Err(e) = state.db.set_user_presence(identity.user_id, true) {
        warn!("failed to mark user {} online: {}", identity.user_id, e);
    }
    if first {
        state
            .dispatcher
            .broadcast_all(
                &ServerEvent::UserOnline {
                    user_id: identity.user_id,
                },
                Some(conn_id),
            )
            .await;
    }

    match state.db.member_room_ids(identity.user_id) {
        Ok(rooms) => state.dispatcher.subscribe_many(conn_id, &rooms).await,
        Err(e) => warn!(
            "failed to load memberships for user {}: {}",
            identity.user_id, e
        ),
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward dispatched events -> client, with heartbeat.
    let send_username = identity.username.clone();
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                result = event_rx.recv() => {
                    let Some(event) = result else { break };
                    let text = match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("failed to encode event for {}: {}", send_username, e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Read client events. Handled sequentially and to completion, so
    // events from this connection are processed strictly in arrival
    // order, and a disconnect mid-processing still finishes its write.
    let recv_state = state.clone();
    let recv_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientEvent>(&text) {
                    Ok(event) => {
                        dispatch_event(&recv_state, conn_id, &recv_identity, event).await;
                    }
                    Err(e) => {
                        let raw: String = text.chars().take(200).collect();
                        warn!(
                            "{} ({}) bad event: {} -- raw: {}",
                            recv_identity.username, recv_identity.user_id, e, raw
                        );
                    }
                },
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Wait for either task to finish
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    if let Some((user_id, last)) = state.dispatcher.unregister(conn_id).await {
        if last {
            if let Err(e) = state.db.set_user_presence(user_id, false) {
                warn!("failed to mark user {} offline: {}", user_id, e);
            }
            state
                .dispatcher
                .broadcast_all(&ServerEvent::UserOffline { user_id }, None)
                .await;
        }
    }
    info!(
        "{} ({}) disconnected from gateway",
        identity.username, identity.user_id
    );
}

/// Run one event to completion and contain its failure: policy denials
/// go back to this connection as an `error` event, everything else is
/// logged and dropped.
async fn dispatch_event(
    state: &GatewayState,
    conn_id: uuid::Uuid,
    identity: &Identity,
    event: ClientEvent,
) {
    if let Err(err) = handlers::handle_event(state, conn_id, identity, event).await {
        if err.user_visible() {
            state
                .dispatcher
                .send_to(
                    conn_id,
                    ServerEvent::Error {
                        message: err.to_string(),
                    },
                )
                .await;
        } else if matches!(err, crate::error::EventError::Storage(_)) {
            warn!(
                "{} ({}) event failed: {}",
                identity.username, identity.user_id, err
            );
        } else {
            debug!(
                "{} ({}) event dropped: {}",
                identity.username, identity.user_id, err
            );
        }
    }
}
