//! Axum WebSocket handler.
//!
//! Upgrades the connection, performs the init handshake, and then acts as a
//! dumb pipe: every inbound frame becomes a [`SessionEvent`], every outbound
//! [`MessageRoute`] is serialized by a dedicated sender task. All conversation
//! logic lives in the session actor; a reconnecting client is spliced onto
//! its existing actor through the registry.

use axum::{
    extract::{
        ws::{close_code, Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::stream::{SplitStream, StreamExt};
use futures::SinkExt;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::messages::{IncomingMessage, MessageRoute, OutgoingMessage};
use crate::core::session::{DisconnectKind, SessionActor, SessionEvent, SessionProfile};
use crate::state::AppState;

/// Outbound buffer sized for audio bursts; the actor drops frames rather
/// than block when it fills.
const CHANNEL_BUFFER_SIZE: usize = 1024;

pub async fn ws_session_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
) -> Response {
    info!("session connection upgrade requested");
    ws.on_upgrade(move |socket| handle_session_socket(socket, state))
}

async fn handle_session_socket(socket: WebSocket, app_state: AppState) {
    let (mut sender, mut receiver) = socket.split();

    let (message_tx, mut message_rx) = mpsc::channel::<MessageRoute>(CHANNEL_BUFFER_SIZE);
    let sender_task = tokio::spawn(async move {
        while let Some(route) = message_rx.recv().await {
            let result = match route {
                MessageRoute::Outgoing(message) => match serde_json::to_string(&message) {
                    Ok(json) => sender.send(Message::Text(json.into())).await,
                    Err(e) => {
                        warn!("failed to serialize outgoing message: {e}");
                        continue;
                    }
                },
                MessageRoute::Binary(data) => sender.send(Message::Binary(data)).await,
            };
            if result.is_err() {
                break;
            }
        }
    });

    // First frame must be init; everything else is a protocol error.
    let events = match await_init(&mut receiver, &message_tx, &app_state).await {
        Some(events) => events,
        None => {
            sender_task.abort();
            return;
        }
    };

    let disconnect = socket_loop(&mut receiver, &events, &message_tx).await;
    let _ = events.send(SessionEvent::SocketClosed(disconnect)).await;

    // Give the actor a moment to flush final frames through the sender.
    drop(message_tx);
    let _ = tokio::time::timeout(std::time::Duration::from_secs(2), sender_task).await;
    info!("session transport closed");
}

/// Wait for the init message and hand the transport to a session actor,
/// either a fresh one or a parked one being resumed.
async fn await_init(
    receiver: &mut SplitStream<WebSocket>,
    message_tx: &mpsc::Sender<MessageRoute>,
    app_state: &AppState,
) -> Option<mpsc::Sender<SessionEvent>> {
    let frame = receiver.next().await?.ok()?;
    let text = match frame {
        Message::Text(text) => text,
        other => {
            warn!("expected init frame, got {other:?}");
            let _ = message_tx
                .send(MessageRoute::Outgoing(OutgoingMessage::Error {
                    message: "first message must be init".to_string(),
                }))
                .await;
            return None;
        }
    };

    let init = match serde_json::from_str::<IncomingMessage>(&text) {
        Ok(IncomingMessage::Init {
            user_id,
            profile_id,
            subject,
            language,
            band,
            document,
            resume_session_id,
        }) => (
            user_id,
            profile_id,
            subject,
            language,
            band,
            document,
            resume_session_id,
        ),
        Ok(other) => {
            warn!("first message was not init: {other:?}");
            let _ = message_tx
                .send(MessageRoute::Outgoing(OutgoingMessage::Error {
                    message: "first message must be init".to_string(),
                }))
                .await;
            return None;
        }
        Err(e) => {
            warn!("unparseable init frame: {e}");
            let _ = message_tx
                .send(MessageRoute::Outgoing(OutgoingMessage::Error {
                    message: format!("invalid init: {e}"),
                }))
                .await;
            return None;
        }
    };
    let (user_id, profile_id, subject, language, band, document, resume_session_id) = init;

    // Resume path: splice this transport onto the parked actor.
    if let Some(resume_id) = resume_session_id {
        if let Some(events) = app_state.registry.lookup(&resume_id) {
            info!(session_id = %resume_id, "resuming parked session");
            if events
                .send(SessionEvent::Attach {
                    sink: message_tx.clone(),
                })
                .await
                .is_ok()
            {
                return Some(events);
            }
        }
        debug!(session_id = %resume_id, "resume target gone, starting fresh");
    }

    let profile = SessionProfile {
        user_id,
        profile_id,
        subject,
        language: language.unwrap_or_else(|| app_state.config.stt.language.clone()),
        band: band.unwrap_or_else(|| "standard".to_string()),
        document,
    };
    let session_id = Uuid::new_v4().to_string();
    let events = SessionActor::spawn(
        session_id,
        profile,
        app_state.config.clone(),
        app_state.deps.clone(),
        app_state.registry.clone(),
        message_tx.clone(),
    );
    Some(events)
}

/// Pump socket frames into the session until the connection goes away, and
/// classify how it went away.
async fn socket_loop(
    receiver: &mut SplitStream<WebSocket>,
    events: &mpsc::Sender<SessionEvent>,
    message_tx: &mpsc::Sender<MessageRoute>,
) -> DisconnectKind {
    while let Some(frame) = receiver.next().await {
        let message = match frame {
            Ok(message) => message,
            Err(e) => {
                warn!("websocket receive error: {e}");
                return DisconnectKind::Dropped;
            }
        };
        match message {
            Message::Binary(data) => {
                if events.send(SessionEvent::Audio(data)).await.is_err() {
                    return DisconnectKind::Graceful;
                }
            }
            Message::Text(text) => {
                let parsed = match serde_json::from_str::<IncomingMessage>(&text) {
                    Ok(parsed) => parsed,
                    Err(e) => {
                        debug!("unparseable frame ignored: {e}");
                        continue;
                    }
                };
                let event = match parsed {
                    IncomingMessage::Init { .. } => {
                        debug!("duplicate init ignored");
                        continue;
                    }
                    IncomingMessage::TextMessage { text } => SessionEvent::TextTurn(text),
                    IncomingMessage::Ping => {
                        // Client-initiated keepalive; answered inline, the
                        // actor does not need to see it.
                        let _ = message_tx
                            .send(MessageRoute::Outgoing(OutgoingMessage::Pong))
                            .await;
                        continue;
                    }
                    IncomingMessage::Pong => SessionEvent::Pong,
                    IncomingMessage::ClientVisibility { visible } => {
                        SessionEvent::Visibility { visible }
                    }
                    IncomingMessage::ClientEndIntent => SessionEvent::EndIntent,
                    IncomingMessage::End => SessionEvent::End,
                };
                if events.send(event).await.is_err() {
                    return DisconnectKind::Graceful;
                }
            }
            Message::Close(frame) => {
                let kind = match frame {
                    Some(f) if f.code == close_code::NORMAL => DisconnectKind::Graceful,
                    Some(f) if f.code == close_code::AWAY => DisconnectKind::GoingAway,
                    _ => DisconnectKind::Dropped,
                };
                debug!(?kind, "close frame received");
                return kind;
            }
            Message::Ping(_) | Message::Pong(_) => {
                // Protocol-level frames; axum answers pings itself.
            }
        }
    }
    DisconnectKind::Dropped
}
