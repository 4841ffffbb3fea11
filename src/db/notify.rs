//! Cross-process fan-out over Postgres LISTEN/NOTIFY.
//!
//! Each topic is a notification channel named after the topic string
//! (`tasks.<uuid>`, ...). Payloads are JSON envelopes.

use sqlx::PgPool;
use sqlx::postgres::PgListener;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::{Envelope, Topic};
use crate::fanout::{Publisher, RecentIds};

use super::Db;

/// Postgres rejects NOTIFY payloads of 8000 bytes or more.
pub const MAX_PAYLOAD_BYTES: usize = 7999;

/// Publishes envelopes with `pg_notify`.
#[derive(Clone)]
pub struct PgNotifier {
    pool: PgPool,
}

impl PgNotifier {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl Publisher for PgNotifier {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        let payload = serde_json::to_string(envelope)?;
        if payload.len() > MAX_PAYLOAD_BYTES {
            return Err(Error::Other(format!(
                "{} payload for {} is {} bytes, over the NOTIFY limit",
                envelope.event.name(),
                envelope.topic,
                payload.len()
            )));
        }
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(envelope.topic.to_string())
            .bind(&payload)
            .execute(&self.pool)
            .await?;
        debug!(topic = %envelope.topic, bytes = payload.len(), "notified");
        Ok(())
    }
}

/// A LISTEN connection on one or more topics. Drops redelivered messages.
pub struct PgSubscription {
    listener: PgListener,
    seen: RecentIds,
}

impl PgSubscription {
    pub async fn listen(db: &Db, topics: &[Topic], dedup_window: usize) -> Result<Self> {
        let mut listener = PgListener::connect_with(db.pool()).await?;
        let channels: Vec<String> = topics.iter().map(Topic::to_string).collect();
        listener
            .listen_all(channels.iter().map(String::as_str))
            .await?;
        debug!(channels = channels.len(), "listening");
        Ok(Self {
            listener,
            seen: RecentIds::new(dedup_window),
        })
    }

    /// Next unseen envelope. Malformed payloads are logged and skipped.
    pub async fn recv(&mut self) -> Result<Envelope> {
        loop {
            let notification = self.listener.recv().await?;
            let envelope: Envelope = match serde_json::from_str(notification.payload()) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(
                        channel = notification.channel(),
                        error = %e,
                        "malformed envelope dropped"
                    );
                    continue;
                }
            };
            if self.seen.insert(envelope.message_id) {
                return Ok(envelope);
            }
            debug!(message_id = %envelope.message_id, "duplicate dropped");
        }
    }
}
