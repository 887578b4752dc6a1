//! WebSocket endpoint for the realtime gateway.
//!
//! The handshake is authenticated with the same JWT as the HTTP API (query
//! parameter or auth cookie); an unauthenticated upgrade is refused with 401
//! before the socket ever opens. Each connection runs two tasks (one
//! draining an outbound queue into the socket, one reading client frames)
//! plus one forwarder per joined room. There is no server-side session
//! resumption: a reconnecting client re-joins its rooms explicitly and
//! re-fetches thread state over HTTP.

use std::collections::HashMap;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use axum_extra::extract::cookie::CookieJar;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::middleware::auth::{authenticate_token, Claims};
use crate::middleware::error_handling::{AppError, Result};
use crate::realtime::hub::{RealtimeEvent, RealtimeHub};

/// Frames a client may send after the handshake.
#[derive(Debug, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ClientFrame {
    #[serde(rename = "chat:join")]
    Join { enquiry_id: Uuid },
    #[serde(rename = "chat:leave")]
    Leave { enquiry_id: Uuid },
}

#[derive(Debug, Deserialize)]
pub struct WsAuthQuery {
    pub token: Option<String>,
}

pub async fn realtime_ws(
    ws: WebSocketUpgrade,
    Query(auth): Query<WsAuthQuery>,
    jar: CookieJar,
    State(config): State<AppConfig>,
) -> Result<Response> {
    let token = auth
        .token
        .or_else(|| jar.get("auth_token").map(|cookie| cookie.value().to_string()))
        .ok_or(AppError::Unauthorized)?;

    let claims = authenticate_token(&config.jwt_secret, &token)?;
    let hub = config.realtime.clone();

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, claims, hub)))
}

async fn handle_socket(socket: WebSocket, claims: Claims, hub: RealtimeHub) {
    tracing::debug!("realtime channel opened for user {}", claims.user_id);

    let (sink, stream) = socket.split();
    // All writers funnel through one queue so the sink has a single owner.
    let (outbound, outbound_rx) = mpsc::channel::<WsMessage>(64);

    let mut send_task = tokio::spawn(write_outbound(sink, outbound_rx));
    let mut recv_task = tokio::spawn(read_inbound(stream, claims, hub, outbound));

    // Whichever side finishes first tears the other down; any broadcast in
    // flight to this channel is simply undelivered.
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    };
}

async fn write_outbound(
    mut sink: SplitSink<WebSocket, WsMessage>,
    mut outbound_rx: mpsc::Receiver<WsMessage>,
) {
    while let Some(message) = outbound_rx.recv().await {
        if sink.send(message).await.is_err() {
            break;
        }
    }
}

async fn read_inbound(
    mut stream: SplitStream<WebSocket>,
    claims: Claims,
    hub: RealtimeHub,
    outbound: mpsc::Sender<WsMessage>,
) {
    let mut joined_rooms: HashMap<Uuid, JoinHandle<()>> = HashMap::new();

    while let Some(Ok(frame)) = stream.next().await {
        let text = match frame {
            WsMessage::Text(text) => text,
            WsMessage::Close(_) => break,
            _ => continue,
        };

        match serde_json::from_str::<ClientFrame>(&text) {
            Ok(ClientFrame::Join { enquiry_id }) => {
                if joined_rooms.contains_key(&enquiry_id) {
                    continue;
                }

                let room_rx = hub.subscribe(enquiry_id).await;
                let forwarder =
                    tokio::spawn(forward_room(room_rx, claims.user_id, outbound.clone()));
                joined_rooms.insert(enquiry_id, forwarder);

                // Ack to the joining channel only
                let ack = RealtimeEvent::Joined {
                    enquiry_id,
                    user_id: claims.user_id,
                };
                send_event(&outbound, &ack).await;

                // Presence notice for the rest of the room, best-effort
                hub.publish(
                    enquiry_id,
                    RealtimeEvent::PeerJoined {
                        enquiry_id,
                        user_id: claims.user_id,
                    },
                )
                .await;
            }
            Ok(ClientFrame::Leave { enquiry_id }) => {
                if let Some(forwarder) = joined_rooms.remove(&enquiry_id) {
                    forwarder.abort();
                }
            }
            Err(err) => {
                tracing::debug!("ignoring malformed client frame: {}", err);
            }
        }
    }

    for forwarder in joined_rooms.into_values() {
        forwarder.abort();
    }
    tracing::debug!("realtime channel closed for user {}", claims.user_id);
}

async fn forward_room(
    mut room_rx: broadcast::Receiver<RealtimeEvent>,
    user_id: Uuid,
    outbound: mpsc::Sender<WsMessage>,
) {
    loop {
        match room_rx.recv().await {
            Ok(event) => {
                // A client does not need its own presence echoed back
                if let RealtimeEvent::PeerJoined { user_id: joined, .. } = &event {
                    if *joined == user_id {
                        continue;
                    }
                }
                if !send_event(&outbound, &event).await {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                // At-most-once delivery: the client re-fetches over HTTP
                tracing::warn!("realtime subscriber lagged, dropped {} events", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Serialize and enqueue an event. Returns false once the connection's
/// outbound queue is gone.
async fn send_event(outbound: &mpsc::Sender<WsMessage>, event: &RealtimeEvent) -> bool {
    match serde_json::to_string(event) {
        Ok(text) => outbound.send(WsMessage::Text(text)).await.is_ok(),
        Err(err) => {
            tracing::error!("failed to serialize realtime event: {}", err);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_join_frame() {
        let enquiry_id = Uuid::new_v4();
        let text = format!(r#"{{"type": "chat:join", "enquiry_id": "{}"}}"#, enquiry_id);

        let frame: ClientFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(frame, ClientFrame::Join { enquiry_id });
    }

    #[test]
    fn test_parse_leave_frame() {
        let enquiry_id = Uuid::new_v4();
        let text = format!(r#"{{"type": "chat:leave", "enquiry_id": "{}"}}"#, enquiry_id);

        let frame: ClientFrame = serde_json::from_str(&text).unwrap();
        assert_eq!(frame, ClientFrame::Leave { enquiry_id });
    }

    #[test]
    fn test_unknown_frame_is_rejected() {
        assert!(serde_json::from_str::<ClientFrame>(r#"{"type": "chat:nuke"}"#).is_err());
        assert!(serde_json::from_str::<ClientFrame>("not json").is_err());
    }

    #[tokio::test]
    async fn test_forwarder_skips_own_presence() {
        let hub = RealtimeHub::new();
        let enquiry_id = Uuid::new_v4();
        let me = Uuid::new_v4();
        let peer = Uuid::new_v4();

        let room_rx = hub.subscribe(enquiry_id).await;
        let (outbound, mut outbound_rx) = mpsc::channel::<WsMessage>(8);
        let forwarder = tokio::spawn(forward_room(room_rx, me, outbound));

        hub.publish(enquiry_id, RealtimeEvent::PeerJoined { enquiry_id, user_id: me })
            .await;
        hub.publish(enquiry_id, RealtimeEvent::PeerJoined { enquiry_id, user_id: peer })
            .await;

        // Only the peer's presence comes through
        let delivered = outbound_rx.recv().await.unwrap();
        let WsMessage::Text(text) = delivered else {
            panic!("expected text frame");
        };
        assert!(text.contains(&peer.to_string()));

        forwarder.abort();
    }
}
