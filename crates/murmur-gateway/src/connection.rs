use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{info, warn};
use uuid::Uuid;

use murmur_chat::{ChatService, SubscriberId};
use murmur_types::auth::decode_token;
use murmur_types::error::ChatError;
use murmur_types::events::{GatewayCommand, GatewayEvent};


/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long an unauthenticated socket may take to send `Identify`.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle a WebSocket whose bearer token was already validated at the HTTP
/// upgrade layer: skip the Identify handshake and go straight to Ready.
pub async fn handle_connection_authenticated(socket: WebSocket, chat: ChatService, user_id: Uuid) {
    let (mut sender, receiver) = socket.split();

    info!("{} connected to gateway (pre-authenticated)", user_id);

    if send_event(&mut sender, &GatewayEvent::Ready { user_id }).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, chat, user_id).await;
}

/// Handle a WebSocket that must authenticate with an `Identify` command.
pub async fn handle_connection(socket: WebSocket, chat: ChatService, jwt_secret: String) {
    let (mut sender, mut receiver) = socket.split();

    let user_id = match wait_for_identify(&mut receiver, &jwt_secret).await {
        Some(id) => id,
        None => {
            warn!("WebSocket client failed to identify, closing");
            return;
        }
    };

    info!("{} connected to gateway", user_id);

    if send_event(&mut sender, &GatewayEvent::Ready { user_id }).await.is_err() {
        return;
    }

    run_connection_loop(sender, receiver, chat, user_id).await;
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &GatewayEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(text) => text,
        Err(e) => {
            warn!("Failed to serialize gateway event: {}", e);
            return Ok(());
        }
    };
    sender.send(Message::Text(text.into())).await
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    chat: ChatService,
    user_id: Uuid,
) {
    // Each connection is its own fanout subscriber; a user with several
    // devices holds several of these.
    let (subscriber_id, mut fanout_rx) = chat.dispatcher().register(user_id);

    // Failures of this connection's own commands. Join and Leave acks ride
    // the fanout queue so they stay ordered with conversation events.
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<GatewayEvent>();

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = fanout_rx.recv() => {
                    let Some(event) = event else { break };
                    if send_event(&mut sender, &event).await.is_err() {
                        break;
                    }
                }
                reply = reply_rx.recv() => {
                    let Some(reply) = reply else { break };
                    if send_event(&mut sender, &reply).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!("Heartbeat timeout (missed {} pongs), dropping connection", missed_heartbeats);
                            break;
                        }
                    }
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let chat_recv = chat.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => {
                        if let Some(reply) =
                            handle_command(&chat_recv, user_id, subscriber_id, cmd).await
                        {
                            if reply_tx.send(reply).is_err() {
                                break;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(
                            "{} bad command: {} -- raw: {}",
                            user_id,
                            e,
                            text.chars().take(200).collect::<String>()
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

    chat.dispatcher().disconnect(subscriber_id);
    info!("{} disconnected from gateway", user_id);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Option<Uuid> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                if let Ok(GatewayCommand::Identify { token }) =
                    serde_json::from_str::<GatewayCommand>(&text)
                {
                    return decode_token(&token, jwt_secret);
                }
            }
        }
        None
    };

    tokio::time::timeout(IDENTIFY_TIMEOUT, identify)
        .await
        .ok()
        .flatten()
}

fn error_event(err: &ChatError) -> GatewayEvent {
    let message = match err {
        ChatError::StorageFailure(_) => "internal server error".to_string(),
        other => other.to_string(),
    };
    GatewayEvent::Error {
        code: err.code().to_string(),
        message,
        retryable: err.is_retryable(),
    }
}

/// Apply one client command. Returns an `Error` event for this connection
/// when the command fails. Successful commands answer through the fanout:
/// `Joined`/`Left` acks on this connection's queue, status updates to every
/// joined connection.
pub async fn handle_command(
    chat: &ChatService,
    user_id: Uuid,
    subscriber_id: SubscriberId,
    cmd: GatewayCommand,
) -> Option<GatewayEvent> {
    match cmd {
        GatewayCommand::Identify { .. } => None, // Already handled

        GatewayCommand::Join { conversation_id } => {
            match chat.join(user_id, conversation_id, subscriber_id).await {
                Ok(()) => {
                    info!("{} joined conversation {}", user_id, conversation_id);
                    None
                }
                Err(e) => {
                    warn!("{} failed to join {}: {}", user_id, conversation_id, e);
                    Some(error_event(&e))
                }
            }
        }

        GatewayCommand::Leave { conversation_id } => {
            chat.leave(conversation_id, subscriber_id);
            None
        }

        GatewayCommand::MarkDelivered { conversation_id } => {
            match chat.mark_delivered(user_id, conversation_id, user_id).await {
                Ok(_) => None,
                Err(e) => Some(error_event(&e)),
            }
        }

        GatewayCommand::MarkSeen { conversation_id } => {
            match chat.mark_seen(user_id, conversation_id, user_id).await {
                Ok(_) => None,
                Err(e) => Some(error_event(&e)),
            }
        }
    }
}
