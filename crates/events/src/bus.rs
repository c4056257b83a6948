//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`ChangeEvent`]s. It is
//! designed to be shared via `Arc<EventBus>` across the application.

use chrono::{DateTime, Utc};
use rvb_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// ChangeEvent
// ---------------------------------------------------------------------------

/// A row-level change on one of the matchmaking tables.
///
/// Constructed via [`ChangeEvent::new`] and enriched with the builder
/// methods [`with_lab`](ChangeEvent::with_lab),
/// [`with_entity`](ChangeEvent::with_entity), and
/// [`with_payload`](ChangeEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Unique event id, letting clients de-duplicate across reconnects.
    pub id: Uuid,

    /// Dot-separated event name, e.g. `"match_request.matched"`.
    pub event_type: String,

    /// Lab the change belongs to; the feed filters on this.
    pub lab_id: Option<DbId>,

    /// Id of the changed row.
    pub entity_id: Option<DbId>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was published (UTC).
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Create a new event with only the required `event_type`.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.into(),
            lab_id: None,
            entity_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Scope the event to a lab.
    pub fn with_lab(mut self, lab_id: DbId) -> Self {
        self.lab_id = Some(lab_id);
        self
    }

    /// Attach the changed row's id.
    pub fn with_entity(mut self, entity_id: DbId) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Whether this event is visible through a feed filtered by `lab_id`.
    ///
    /// A feed without a filter sees everything; an event without a lab is
    /// visible to every feed.
    pub fn matches_lab(&self, filter: Option<DbId>) -> bool {
        match (filter, self.lab_id) {
            (Some(wanted), Some(actual)) => wanted == actual,
            _ => true,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`ChangeEvent`]. Slow subscribers
/// that fall more than the buffer capacity behind observe `Lagged` and pick
/// up from the current position — acceptable, since every consumer also
/// polls.
pub struct EventBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped;
    /// nothing in the protocol depends on delivery.
    pub fn publish(&self, event: ChangeEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_and_receive_single_subscriber() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        let event = ChangeEvent::new("match_request.created")
            .with_lab(42)
            .with_entity(7)
            .with_payload(serde_json::json!({"team": "attacker"}));

        bus.publish(event);

        let received = rx.recv().await.expect("should receive the event");
        assert_eq!(received.event_type, "match_request.created");
        assert_eq!(received.lab_id, Some(42));
        assert_eq!(received.entity_id, Some(7));
        assert_eq!(received.payload["team"], "attacker");
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(ChangeEvent::new("lab_session.abandoned").with_lab(3));

        let e1 = rx1.recv().await.expect("subscriber 1 should receive");
        let e2 = rx2.recv().await.expect("subscriber 2 should receive");

        assert_eq!(e1.id, e2.id);
        assert_eq!(e1.event_type, "lab_session.abandoned");
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(ChangeEvent::new("orphan.event"));
    }

    #[test]
    fn lab_filtering() {
        let scoped = ChangeEvent::new("match_request.matched").with_lab(1);
        assert!(scoped.matches_lab(None));
        assert!(scoped.matches_lab(Some(1)));
        assert!(!scoped.matches_lab(Some(2)));

        let global = ChangeEvent::new("sweep.completed");
        assert!(global.matches_lab(Some(2)));
    }
}
