//! In-process fan-out hub for enquiry rooms.
//!
//! One broadcast channel per enquiry id. Producers (the chat service) publish
//! after a successful store commit; consumers (WebSocket connections) hold a
//! receiver per joined room. Delivery is at-most-once: nothing is queued for
//! offline clients, who re-fetch current state over HTTP when they reconnect.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::models::message::MessageResponse;

/// Events pushed to room members. Payload shapes match the corresponding
/// HTTP responses so clients have a single decoding path.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum RealtimeEvent {
    #[serde(rename = "message-created")]
    MessageCreated {
        enquiry_id: Uuid,
        message: MessageResponse,
        unread_counts: HashMap<Uuid, i32>,
    },
    #[serde(rename = "read-receipt")]
    ReadReceipt {
        enquiry_id: Uuid,
        user_id: Uuid,
        read_at: DateTime<Utc>,
    },
    #[serde(rename = "chat:joined")]
    Joined { enquiry_id: Uuid, user_id: Uuid },
    #[serde(rename = "chat:peer-joined")]
    PeerJoined { enquiry_id: Uuid, user_id: Uuid },
}

/// Process-wide room hub. Constructed once at startup and carried in app
/// state as a cloneable handle; clones share the same room table.
#[derive(Clone)]
pub struct RealtimeHub {
    rooms: Arc<RwLock<HashMap<Uuid, broadcast::Sender<RealtimeEvent>>>>,
    capacity: usize,
}

impl RealtimeHub {
    pub fn new() -> Self {
        Self::with_capacity(256)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity,
        }
    }

    /// Publish an event to a room. No-op when the room has no subscribers;
    /// send errors are swallowed, never surfaced to the caller.
    pub async fn publish(&self, enquiry_id: Uuid, event: RealtimeEvent) {
        let rooms = self.rooms.read().await;
        if let Some(tx) = rooms.get(&enquiry_id) {
            let _ = tx.send(event);
        }
    }

    /// Subscribe to a room, creating it on first join.
    pub async fn subscribe(&self, enquiry_id: Uuid) -> broadcast::Receiver<RealtimeEvent> {
        let mut rooms = self.rooms.write().await;
        let tx = rooms
            .entry(enquiry_id)
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        tx.subscribe()
    }

    /// Drop rooms with zero subscribers (housekeeping).
    pub async fn cleanup(&self) {
        let mut rooms = self.rooms.write().await;
        rooms.retain(|_, tx| tx.receiver_count() > 0);
    }
}

impl Default for RealtimeHub {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RealtimeHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeHub")
            .field("capacity", &self.capacity)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_subscribe_roundtrip() {
        let hub = RealtimeHub::new();
        let enquiry_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();
        let mut rx = hub.subscribe(enquiry_id).await;

        let event = RealtimeEvent::ReadReceipt {
            enquiry_id,
            user_id,
            read_at: Utc::now(),
        };
        hub.publish(enquiry_id, event.clone()).await;

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_noop() {
        let hub = RealtimeHub::new();
        // Should not panic or create a room
        hub.publish(
            Uuid::new_v4(),
            RealtimeEvent::PeerJoined {
                enquiry_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
            },
        )
        .await;
    }

    #[tokio::test]
    async fn test_events_stay_in_their_room() {
        let hub = RealtimeHub::new();
        let room_a = Uuid::new_v4();
        let room_b = Uuid::new_v4();
        let mut rx_a = hub.subscribe(room_a).await;
        let mut rx_b = hub.subscribe(room_b).await;

        hub.publish(
            room_a,
            RealtimeEvent::PeerJoined {
                enquiry_id: room_a,
                user_id: Uuid::new_v4(),
            },
        )
        .await;

        assert!(rx_a.recv().await.is_ok());
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cleanup_removes_empty_rooms() {
        let hub = RealtimeHub::new();
        let enquiry_id = Uuid::new_v4();
        let rx = hub.subscribe(enquiry_id).await;
        drop(rx);

        hub.cleanup().await;

        let rooms = hub.rooms.read().await;
        assert!(rooms.is_empty());
    }

    #[test]
    fn test_event_wire_tags() {
        let event = RealtimeEvent::Joined {
            enquiry_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "chat:joined");

        let event = RealtimeEvent::ReadReceipt {
            enquiry_id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            read_at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "read-receipt");
    }
}
