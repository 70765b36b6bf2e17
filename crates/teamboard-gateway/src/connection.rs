use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message, WebSocket, close_code};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{info, warn};

use teamboard_types::api::Claims;
use teamboard_types::events::ClientCommand;

use crate::error::AdmissionError;
use crate::lifecycle::{Admission, ConnectionManager};

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Drive one upgraded socket from admission to teardown.
///
/// `claims` is `Some` when the upgrade request already carried a verified
/// token. Otherwise the first frame must be `identify` within
/// `identify_timeout`, or the socket is closed without being registered.
pub async fn handle_socket(
    socket: WebSocket,
    manager: ConnectionManager,
    claims: Option<Claims>,
    identify_timeout: Duration,
) {
    let (mut sender, mut receiver) = socket.split();

    let claims = match claims {
        Some(claims) => claims,
        None => match wait_for_identify(&mut receiver, &manager, identify_timeout).await {
            Ok(claims) => claims,
            Err(e) => {
                warn!("Realtime connection rejected: {}", e);
                let _ = sender
                    .send(Message::Close(Some(CloseFrame {
                        code: close_code::POLICY,
                        reason: "authentication failed".into(),
                    })))
                    .await;
                return;
            }
        },
    };

    let admission = manager.admit(&claims).await;
    run_connection_loop(sender, receiver, manager, admission).await;
}

async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    manager: ConnectionManager,
    admission: Admission,
) {
    let Admission {
        session,
        mut outbound,
    } = admission;
    let conn = session.id;

    // Shared flag for heartbeat
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    // Forward queued events -> client, with heartbeat
    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound.recv() => {
                    // None: the router dropped our queue, we were torn down
                    let Some(event) = event else { break };

                    let text = match serde_json::to_string(&*event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to encode {}: {}", event.name(), e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(text.into())).await.is_err() {
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

    // Read commands from client
    let recv_manager = manager.clone();
    let email = session.email.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<ClientCommand>(&text) {
                    Ok(cmd) => recv_manager.handle_command(conn, cmd).await,
                    Err(e) => {
                        warn!(
                            "{} ({}) bad command: {} -- raw: {}",
                            email,
                            conn,
                            e,
                            truncate(&text, 200)
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

    manager.disconnect(conn).await;
    info!("{} ({}) left the realtime gateway", session.email, session.user_id);
}

async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    manager: &ConnectionManager,
    timeout: Duration,
) -> Result<Claims, AdmissionError> {
    let identify = async {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    return match serde_json::from_str::<ClientCommand>(&text) {
                        Ok(ClientCommand::Identify { token }) => manager.authenticate(Some(&token)),
                        _ => Err(AdmissionError::MissingToken),
                    };
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(AdmissionError::MissingToken)
    };

    tokio::time::timeout(timeout, identify)
        .await
        .map_err(|_| AdmissionError::IdentifyTimeout(timeout.as_secs()))?
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
