//! Event bus for copytool batch and item outcomes.
//!
//! The bus provides a typed event enum and sequential identifiers. Internally
//! it uses `tokio::broadcast` with a bounded buffer; when the channel
//! overflows the oldest events are dropped, so publishers (item workers) never
//! wait on consumers.

pub mod error;
pub mod sink;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::sync::broadcast::{Receiver, Sender};
use uuid::Uuid;

pub use error::{SinkError, SinkResult};
pub use sink::EventSink;

/// Identifier assigned to each published event.
pub type EventId = u64;

/// Default buffer size of the broadcast channel.
pub const DEFAULT_CAPACITY: usize = 1_024;

/// Terminal classification of one action item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The item was executed and finalized.
    Completed,
    /// The item was not executed and not reported (cancel).
    Skipped,
    /// The item failed and the coordinator was asked to retry it.
    Retryable,
    /// The item failed for good.
    Failed,
}

/// Typed events emitted by the dispatch engine and item workers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A batch was received and accepted.
    BatchReceived {
        /// Batch correlation id.
        batch_id: Uuid,
        /// Filesystem the batch targets.
        fs_name: String,
        /// Backend the batch was routed to.
        archive_id: u32,
        /// Number of records in the batch.
        items: usize,
    },
    /// A batch was rejected before any item was dispatched.
    BatchRejected {
        /// Batch correlation id.
        batch_id: Uuid,
        /// Filesystem the batch claimed to target.
        fs_name: String,
        /// Human-readable reason.
        reason: String,
    },
    /// A worker was spawned for an item.
    ItemDispatched {
        /// Batch correlation id.
        batch_id: Uuid,
        /// Canonical file identity.
        fid: String,
        /// Lease cookie.
        cookie: u64,
        /// Action name.
        action: String,
    },
    /// A worker reached a terminal outcome.
    ItemFinished {
        /// Batch correlation id.
        batch_id: Uuid,
        /// Canonical file identity.
        fid: String,
        /// Lease cookie.
        cookie: u64,
        /// Action name.
        action: String,
        /// Terminal classification.
        outcome: OutcomeKind,
        /// Positive errno reported to the coordinator, zero on success.
        code: i32,
    },
    /// A compensating delete was issued after a failed finalize.
    CompensationIssued {
        /// Canonical file identity.
        fid: String,
        /// Object that was deleted.
        object_id: String,
        /// Whether the delete succeeded.
        succeeded: bool,
    },
    /// Remaining records of a batch were dropped.
    ItemsAbandoned {
        /// Batch correlation id.
        batch_id: Uuid,
        /// Number of records dropped.
        count: usize,
        /// Human-readable reason.
        reason: String,
    },
    /// The control loop stopped.
    Shutdown {
        /// Human-readable reason.
        reason: String,
    },
}

impl Event {
    /// Machine-friendly discriminator.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::BatchReceived { .. } => "batch_received",
            Self::BatchRejected { .. } => "batch_rejected",
            Self::ItemDispatched { .. } => "item_dispatched",
            Self::ItemFinished { .. } => "item_finished",
            Self::CompensationIssued { .. } => "compensation_issued",
            Self::ItemsAbandoned { .. } => "items_abandoned",
            Self::Shutdown { .. } => "shutdown",
        }
    }
}

/// Metadata wrapper tracking the event id and emission timestamp.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventEnvelope {
    /// Sequential identifier.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Payload.
    pub event: Event,
}

/// Shared event bus built on top of `tokio::broadcast`.
#[derive(Clone)]
pub struct EventBus {
    sender: Sender<EventEnvelope>,
    next_id: Arc<AtomicU64>,
}

impl EventBus {
    /// Construct a bus whose broadcast channel holds `capacity` events.
    ///
    /// A zero capacity is raised to one.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Construct a bus with the default buffer size.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Publish an event, assigning it a sequential identifier.
    ///
    /// Events published while nobody subscribes are dropped.
    pub fn publish(&self, event: Event) -> EventId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let _ = self.sender.send(EventEnvelope {
            id,
            timestamp: Utc::now(),
            event,
        });
        id
    }

    /// Subscribe to events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Live events of one subscriber.
pub struct EventStream {
    receiver: Receiver<EventEnvelope>,
}

impl EventStream {
    /// Receive the next event, skipping any the subscriber lagged behind on;
    /// `None` once every publisher is gone.
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(cookie: u64) -> Event {
        Event::ItemFinished {
            batch_id: Uuid::nil(),
            fid: "0x1:0x2:0x0".into(),
            cookie,
            action: "ARCHIVE".into(),
            outcome: OutcomeKind::Completed,
            code: 0,
        }
    }

    #[tokio::test]
    async fn subscribers_see_sequential_ids_from_subscription_on() {
        let bus = EventBus::with_capacity(16);
        assert_eq!(bus.publish(finished(0)), 1);

        let mut stream = bus.subscribe();
        for cookie in 1..4 {
            bus.publish(finished(cookie));
        }
        let mut received = Vec::new();
        for _ in 0..3 {
            if let Some(event) = stream.next().await {
                received.push(event.id);
            }
        }
        assert_eq!(received, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn lagging_subscriber_skips_to_retained_events() {
        let bus = EventBus::with_capacity(2);
        let mut stream = bus.subscribe();
        for cookie in 0..4 {
            bus.publish(finished(cookie));
        }
        let first = stream.next().await.map(|event| event.id);
        assert_eq!(first, Some(3));
    }

    #[tokio::test]
    async fn stream_ends_when_the_bus_is_dropped() {
        let bus = EventBus::new();
        let mut stream = bus.subscribe();
        drop(bus);
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn events_serialize_with_type_tag() -> anyhow::Result<()> {
        let json = serde_json::to_value(finished(9))?;
        assert_eq!(json["type"], "item_finished");
        assert_eq!(json["outcome"], "completed");
        assert_eq!(finished(9).kind(), "item_finished");
        Ok(())
    }
}
