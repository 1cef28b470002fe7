use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use reqwest::StatusCode;
use serde_json::json;
use tracing::{debug, warn};

use parley_db::Database;

/// Maximum notification body length, in characters.
const BODY_LIMIT: usize = 100;

/// Best-effort push fan-out to offline room members. Runs strictly after
/// and independently of the room broadcast; nothing here can delay or
/// fail message delivery to online members.
#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    db: Arc<Database>,
    http: reqwest::Client,
}

impl Notifier {
    pub fn new(db: Arc<Database>, push_timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(push_timeout).build()?;
        Ok(Self {
            inner: Arc::new(NotifierInner { db, http }),
        })
    }

    /// Enqueue fan-out for a persisted broadcast. Fire-and-forget: the
    /// spawned task owns its failures.
    pub fn notify_room(&self, room_id: i64, room_name: String, sender_id: i64, text: String) {
        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = dispatch(&inner, room_id, &room_name, sender_id, &text).await {
                warn!("push fan-out for room {} failed: {}", room_id, e);
            }
        });
    }
}

async fn dispatch(
    inner: &NotifierInner,
    room_id: i64,
    room_name: &str,
    sender_id: i64,
    text: &str,
) -> Result<()> {
    let targets = inner.db.offline_member_ids(room_id, sender_id)?;
    if targets.is_empty() {
        return Ok(());
    }

    let payload = json!({
        "title": room_name,
        "body": truncate_body(text),
        "tag": format!("room-{room_id}"),
        "url": format!("/?room={room_id}"),
    });

    for user_id in targets {
        for sub in inner.db.push_subscriptions(user_id)? {
            match inner.http.post(&sub.endpoint).json(&payload).send().await {
                Ok(resp)
                    if resp.status() == StatusCode::NOT_FOUND
                        || resp.status() == StatusCode::GONE =>
                {
                    // subscription expired at the transport; prune it
                    debug!("pruning gone push subscription {}", sub.id);
                    inner.db.delete_push_subscription_by_id(sub.id)?;
                }
                Ok(resp) if !resp.status().is_success() => {
                    debug!("push to user {} returned {}", user_id, resp.status());
                }
                Ok(_) => {}
                Err(e) => {
                    // timeouts and connection errors count as best-effort
                    debug!("push to user {} failed: {}", user_id, e);
                }
            }
        }
    }

    Ok(())
}

fn truncate_body(text: &str) -> String {
    text.chars().take(BODY_LIMIT).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_truncates_at_char_boundary() {
        let short = "hello";
        assert_eq!(truncate_body(short), "hello");

        let long: String = "é".repeat(150);
        let body = truncate_body(&long);
        assert_eq!(body.chars().count(), 100);
    }
}
