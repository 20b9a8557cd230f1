use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use agora_types::frames::{ClientFrame, ServerFrame};

use crate::handshake::Identity;
use crate::protocol::{ProtocolError, decode_frame, excerpt};
use crate::registry::{ConnectionHandle, Outbound};
use crate::relay::Relay;
use crate::session::Session;

/// Close code sent to a connection replaced by a newer one for the same user.
pub const CLOSE_SUPERSEDED: u16 = 4000;
/// Close code for a failed or timed-out handshake.
pub const CLOSE_AUTH_FAILED: u16 = 4001;

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

/// Serve a socket whose token was already verified at the HTTP upgrade.
pub async fn handle_connection_authenticated(socket: WebSocket, relay: Relay, identity: Identity) {
    let (sender, receiver) = socket.split();

    info!("{} connected to relay (pre-authenticated)", identity.user_id);

    let mut session = Session::new();
    if session.authenticate(identity).is_err() {
        return;
    }

    run_connection_loop(sender, receiver, relay, session).await;
}

/// Serve a socket that must authenticate with an `auth` frame first.
pub async fn handle_connection(socket: WebSocket, relay: Relay) {
    let (mut sender, mut receiver) = socket.split();
    let mut session = Session::new();

    let identity = match wait_for_auth(&mut sender, &mut receiver, &relay).await {
        Ok(identity) => identity,
        Err(reason) => {
            warn!("relay client failed to authenticate: {}", reason);
            let _ = sender
                .send(Message::Close(Some(CloseFrame {
                    code: CLOSE_AUTH_FAILED,
                    reason: reason.into(),
                })))
                .await;
            session.close();
            return;
        }
    };

    info!("{} connected to relay", identity.user_id);
    if session.authenticate(identity).is_err() {
        return;
    }

    run_connection_loop(sender, receiver, relay, session).await;
}

/// Read frames until a valid `auth` arrives or the handshake window closes.
/// Anything else gets an `unauthenticated` error and is otherwise ignored.
async fn wait_for_auth(
    sender: &mut WsSender,
    receiver: &mut WsReceiver,
    relay: &Relay,
) -> Result<Identity, &'static str> {
    let config = relay.config();

    let handshake = async {
        while let Some(Ok(msg)) = receiver.next().await {
            let text = match msg {
                Message::Text(text) => text,
                Message::Close(_) => return Err("closed during handshake"),
                _ => continue,
            };

            match decode_frame(text.as_str()) {
                Ok(ClientFrame::Auth { token, user_id }) => {
                    return match relay.verifier().authenticate(&token, user_id.as_ref()) {
                        Ok(identity) => Ok(identity),
                        Err(e) => {
                            warn!("handshake rejected: {}", e);
                            let _ = send_frame(sender, &ProtocolError::InvalidToken.to_frame()).await;
                            Err("invalid token")
                        }
                    };
                }
                Ok(frame) => {
                    debug!("dropping {} frame received before auth", frame.kind());
                    if config.protocol_error_frames {
                        let _ = send_frame(sender, &ProtocolError::Unauthenticated.to_frame()).await;
                    }
                }
                Err(e) => {
                    warn!("bad frame during handshake: {} -- raw: {}", e, excerpt(text.as_str(), 200));
                    if config.protocol_error_frames {
                        let _ = send_frame(sender, &e.to_frame()).await;
                    }
                }
            }
        }
        Err("disconnected during handshake")
    };

    tokio::time::timeout(config.handshake_timeout, handshake)
        .await
        .unwrap_or(Err("handshake timed out"))
}

async fn run_connection_loop(
    mut sender: WsSender,
    mut receiver: WsReceiver,
    relay: Relay,
    mut session: Session,
) {
    let Some(user_id) = session.identity().map(|identity| identity.user_id.clone()) else {
        return;
    };

    // Register before `ready` so nothing addressed to the user after they
    // see it can be missed. Frames queue until the send task starts.
    let (handle, mut outbound_rx) = ConnectionHandle::new(user_id.clone());
    let conn_id = handle.id();
    relay.registry().register(handle.clone());

    let ready = ServerFrame::Ready { user_id: user_id.clone() };
    if send_frame(&mut sender, &ready).await.is_err() {
        handle.close();
        relay.registry().unregister_connection(&user_id, conn_id);
        return;
    }

    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let heartbeat_interval = relay.config().heartbeat_interval;
    let max_missed = relay.config().max_missed_heartbeats;
    let user_send = user_id.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(heartbeat_interval);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                item = outbound_rx.recv() => {
                    match item {
                        Some(Outbound::Text(text)) => {
                            if sender.send(Message::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Evict) => {
                            info!("{} connection {} superseded, closing", user_send, conn_id);
                            let _ = sender
                                .send(Message::Close(Some(CloseFrame {
                                    code: CLOSE_SUPERSEDED,
                                    reason: "superseded".into(),
                                })))
                                .await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= max_missed {
                            warn!("{} heartbeat timeout (missed {} pongs), dropping connection", user_send, missed_heartbeats);
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

    let relay_recv = relay.clone();
    let handle_recv = handle.clone();
    let mut recv_task = tokio::spawn(async move {
        let error_frames = relay_recv.config().protocol_error_frames;

        while let Some(Ok(msg)) = receiver.next().await {
            let Some(identity) = session.identity() else {
                break;
            };

            match msg {
                Message::Text(text) => {
                    let result = match decode_frame(text.as_str()) {
                        Ok(frame) => relay_recv.router().route(identity, frame).await,
                        Err(e) => {
                            warn!(
                                "{} bad frame: {} -- raw: {}",
                                identity.user_id,
                                e,
                                excerpt(text.as_str(), 200)
                            );
                            Err(e)
                        }
                    };

                    if let Err(e) = result {
                        debug!("{} frame rejected: {}", identity.user_id, e);
                        if error_frames {
                            handle_recv.push_frame(&e.to_frame());
                        }
                    }
                }
                Message::Pong(_) => {
                    pong_flag_recv.store(true, Ordering::Release);
                }
                Message::Close(_) => break,
                _ => {}
            }
        }

        session.close();
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    handle.close();
    relay.registry().unregister_connection(&user_id, conn_id);
    info!("{} disconnected from relay", user_id);
}

async fn send_frame(sender: &mut WsSender, frame: &ServerFrame) -> Result<(), axum::Error> {
    let text = serde_json::to_string(frame).map_err(axum::Error::new)?;
    sender.send(Message::Text(text.into())).await
}
