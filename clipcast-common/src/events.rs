//! Event types for the clipcast event system
//!
//! Provides the shared event definitions and the EventBus used to fan
//! server-side state changes out to SSE observers.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::api::{ChangeKind, FlatNode, NowPlayingEntry, Watermark};

/// Clipcast event types
///
/// Events are broadcast via [`EventBus`] and serialized for SSE
/// transmission. All events of the system flow through this central enum
/// for type safety and exhaustive matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClipcastEvent {
    /// The node tree changed.
    ///
    /// Exactly one event is emitted per successful mutation. Clients
    /// compare `previous_watermark` with the root watermark they last
    /// observed to detect missed events.
    TreeChanged {
        kind: ChangeKind,
        /// Affected node, flattened, parent reference included.
        node: FlatNode,
        /// Root watermark from before the mutation.
        previous_watermark: Watermark,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// The aggregated now-playing view changed.
    ///
    /// Carries the full union of (requester, clip) pairs across all live
    /// playback chains; an empty list means silence.
    NowPlaying {
        entries: Vec<NowPlayingEntry>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// Volume level or ceiling changed.
    VolumeChanged {
        /// Caller-set level, 0-100.
        level: u8,
        /// System-wide cap, 0-100.
        ceiling: u8,
        /// `level * ceiling / 100`.
        effective: u8,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// A spoken trigger phrase fired a playback command.
    SpeechTriggered {
        /// Triggered clip, or `None` for the reserved stop phrase.
        clip_id: Option<Uuid>,
        /// Original spoken words of the matched span.
        spoken: Vec<String>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },
}

impl ClipcastEvent {
    /// Event type name, used as the SSE event field.
    pub fn event_type(&self) -> &'static str {
        match self {
            ClipcastEvent::TreeChanged { .. } => "TreeChanged",
            ClipcastEvent::NowPlaying { .. } => "NowPlaying",
            ClipcastEvent::VolumeChanged { .. } => "VolumeChanged",
            ClipcastEvent::SpeechTriggered { .. } => "SpeechTriggered",
        }
    }
}

/// Central event distribution bus
///
/// Backed by `tokio::sync::broadcast`, providing non-blocking publish
/// (slow subscribers never block producers), multiple concurrent
/// subscribers, and automatic cleanup when subscribers drop.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ClipcastEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a new bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events.
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<ClipcastEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Returns `Ok(subscriber_count)`, or `Err` when nobody is listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: ClipcastEvent,
    ) -> Result<usize, broadcast::error::SendError<ClipcastEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the no-subscriber case.
    pub fn emit_lossy(&self, event: ClipcastEvent) {
        let _ = self.tx.send(event);
    }

    /// Number of currently attached subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Configured channel capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::NodeKindTag;

    fn sample_node() -> FlatNode {
        FlatNode {
            id: Uuid::new_v4(),
            parent: Some(Uuid::new_v4()),
            kind: NodeKindTag::Clip,
            name: "airhorn".into(),
            icon: None,
            tags: vec!["memes".into()],
            duration_ms: Some(1800),
            valid: Some(true),
            voice: None,
            watermark: None,
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_subscribe() {
        let bus = EventBus::new(10);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_eventbus_emit() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        let event = ClipcastEvent::NowPlaying {
            entries: vec![],
            timestamp: chrono::Utc::now(),
        };
        bus.emit(event).expect("emit should succeed");

        let received = rx.try_recv().expect("should receive event");
        assert_eq!(received.event_type(), "NowPlaying");
    }

    #[test]
    fn test_eventbus_emit_lossy_without_subscribers() {
        let bus = EventBus::new(2);
        // No subscribers: must not panic or error out
        for _ in 0..10 {
            bus.emit_lossy(ClipcastEvent::VolumeChanged {
                level: 80,
                ceiling: 100,
                effective: 80,
                timestamp: chrono::Utc::now(),
            });
        }
    }

    #[test]
    fn test_eventbus_multiple_subscribers() {
        let bus = EventBus::new(10);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emit(ClipcastEvent::SpeechTriggered {
            clip_id: None,
            spoken: vec!["stop".into()],
            timestamp: chrono::Utc::now(),
        })
        .expect("emit should succeed");

        assert_eq!(rx1.try_recv().unwrap().event_type(), "SpeechTriggered");
        assert_eq!(rx2.try_recv().unwrap().event_type(), "SpeechTriggered");
    }

    #[test]
    fn test_tree_changed_serialization_round_trip() {
        let event = ClipcastEvent::TreeChanged {
            kind: ChangeKind::Added,
            node: sample_node(),
            previous_watermark: Watermark::fresh(),
            timestamp: chrono::Utc::now(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"TreeChanged\""));
        assert!(json.contains("\"kind\":\"added\""));

        let back: ClipcastEvent = serde_json::from_str(&json).unwrap();
        match back {
            ClipcastEvent::TreeChanged { kind, node, .. } => {
                assert_eq!(kind, ChangeKind::Added);
                assert_eq!(node.name, "airhorn");
            }
            _ => panic!("wrong event type deserialized"),
        }
    }
}
