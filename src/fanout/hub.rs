//! In-process pub/sub: one broadcast channel per live topic.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::error::Result;
use crate::event::{Envelope, Topic};

use super::{Publisher, RecentIds};

/// Hub for broadcasting envelopes to subscribers of a topic.
pub struct Hub {
    capacity: usize,
    topics: Mutex<HashMap<Topic, broadcast::Sender<Envelope>>>,
}

impl Hub {
    /// `capacity` bounds how far a slow subscriber may lag before it starts
    /// losing messages.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            topics: Mutex::new(HashMap::new()),
        }
    }

    /// Subscribe to a topic. `dedup_window` is how many recent message ids
    /// the subscription remembers.
    pub fn subscribe(&self, topic: Topic, dedup_window: usize) -> Subscription {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        // Drop channels whose subscribers all went away without further traffic.
        topics.retain(|_, sender| sender.receiver_count() > 0);
        let rx = topics
            .entry(topic)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe();
        Subscription {
            topic,
            rx,
            seen: RecentIds::new(dedup_window),
        }
    }

    /// Topics with a live channel.
    pub fn topic_count(&self) -> usize {
        self.topics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver to current subscribers. Returns how many received it.
    pub fn send(&self, envelope: &Envelope) -> usize {
        let mut topics = self.topics.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(sender) = topics.get(&envelope.topic) else {
            return 0;
        };
        match sender.send(envelope.clone()) {
            Ok(n) => n,
            Err(_) => {
                // Every subscriber is gone.
                topics.remove(&envelope.topic);
                0
            }
        }
    }
}

impl Default for Hub {
    fn default() -> Self {
        Self::new(256)
    }
}

impl Publisher for Hub {
    async fn publish(&self, envelope: &Envelope) -> Result<()> {
        let receivers = self.send(envelope);
        debug!(topic = %envelope.topic, receivers, "hub publish");
        Ok(())
    }
}

/// A live subscription to one topic. Drops redelivered messages.
pub struct Subscription {
    topic: Topic,
    rx: broadcast::Receiver<Envelope>,
    seen: RecentIds,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.topic
    }

    /// Next unseen envelope, or `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.recv().await {
                Ok(envelope) => {
                    if let Some(envelope) = self.admit(envelope) {
                        return Some(envelope);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next unseen envelope already waiting, without blocking.
    pub fn try_recv(&mut self) -> Option<Envelope> {
        loop {
            match self.rx.try_recv() {
                Ok(envelope) => {
                    if let Some(envelope) = self.admit(envelope) {
                        return Some(envelope);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    warn!(topic = %self.topic, skipped, "subscriber lagged");
                }
                Err(_) => return None,
            }
        }
    }

    fn admit(&mut self, envelope: Envelope) -> Option<Envelope> {
        if self.seen.insert(envelope.message_id) {
            Some(envelope)
        } else {
            debug!(topic = %self.topic, message_id = %envelope.message_id, "duplicate dropped");
            None
        }
    }
}
