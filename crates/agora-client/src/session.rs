use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agora_types::UserId;
use agora_types::frames::{ClientFrame, ServerFrame};

use crate::backoff::Backoff;
use crate::error::ClientError;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Close code the relay uses when a newer login takes over.
const CLOSE_SUPERSEDED: u16 = 4000;

/// What the session reports to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected(UserId),
    Frame(ServerFrame),
    Disconnected,
}

/// Queue frames for the relay. Frames sent while disconnected wait for the
/// next connection.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<ClientFrame>,
}

impl SessionHandle {
    pub fn send(&self, frame: ClientFrame) -> Result<(), ClientError> {
        self.tx.send(frame).map_err(|_| ClientError::Closed)
    }
}

enum PumpEnd {
    Cancelled,
    Dropped,
    Superseded,
}

/// A relay connection that survives network drops.
///
/// `run` authenticates with an `auth` frame, pumps frames both ways and
/// reconnects with [`Backoff`] whenever the socket goes away. It returns
/// when the cancellation token fires (logout) or the relay refuses the
/// session outright.
pub struct RelaySession {
    ws_url: String,
    token: String,
    backoff: Backoff,
    handshake_timeout: Duration,
    outbound: mpsc::UnboundedReceiver<ClientFrame>,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl RelaySession {
    pub fn new(
        ws_url: impl Into<String>,
        token: impl Into<String>,
    ) -> (Self, SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let session = Self {
            ws_url: ws_url.into(),
            token: token.into(),
            backoff: Backoff::default(),
            handshake_timeout: Duration::from_secs(10),
            outbound: out_rx,
            events: event_tx,
        };
        (session, SessionHandle { tx: out_tx }, event_rx)
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), ClientError> {
        loop {
            let connected = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                result = self.connect() => result,
            };

            match connected {
                Ok((socket, user_id)) => {
                    self.backoff.reset();
                    info!("relay session established for {}", user_id);
                    self.emit(SessionEvent::Connected(user_id));

                    let end = self.pump(socket, &cancel).await;
                    self.emit(SessionEvent::Disconnected);

                    match end {
                        PumpEnd::Cancelled => return Ok(()),
                        PumpEnd::Superseded => return Err(ClientError::Superseded),
                        PumpEnd::Dropped => {}
                    }
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!("relay connection failed: {}", e),
            }

            let delay = self.backoff.next_delay();
            debug!("reconnecting in {:?} (attempt {})", delay, self.backoff.attempt());
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    async fn connect(&self) -> Result<(Socket, UserId), ClientError> {
        let (mut socket, _) = connect_async(self.ws_url.as_str()).await?;

        let auth = ClientFrame::Auth {
            token: self.token.clone(),
            user_id: None,
        };
        socket
            .send(Message::text(serde_json::to_string(&auth)?))
            .await?;

        let ready = tokio::time::timeout(self.handshake_timeout, wait_for_ready(&mut socket))
            .await
            .map_err(|_| ClientError::Handshake("timed out waiting for ready".into()))??;

        Ok((socket, ready))
    }

    async fn pump(&mut self, mut socket: Socket, cancel: &CancellationToken) -> PumpEnd {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    let _ = socket.close(None).await;
                    return PumpEnd::Cancelled;
                }
                frame = self.outbound.recv() => {
                    // Every handle is gone: nobody can talk through us anymore.
                    let Some(frame) = frame else {
                        let _ = socket.close(None).await;
                        return PumpEnd::Cancelled;
                    };
                    let text = match serde_json::to_string(&frame) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("dropping unserializable {} frame: {}", frame.kind(), e);
                            continue;
                        }
                    };
                    if let Err(e) = socket.send(Message::text(text)).await {
                        warn!("send failed, {} frame lost: {}", frame.kind(), e);
                        return PumpEnd::Dropped;
                    }
                }
                msg = socket.next() => match msg {
                    Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerFrame>(text.as_str()) {
                        Ok(frame) => {
                            let _ = self.events.send(SessionEvent::Frame(frame));
                        }
                        Err(e) => warn!("ignoring unreadable frame from relay: {}", e),
                    },
                    Some(Ok(Message::Close(frame))) => {
                        if frame.is_some_and(|f| f.code == CloseCode::from(CLOSE_SUPERSEDED)) {
                            info!("relay session superseded by a newer login");
                            return PumpEnd::Superseded;
                        }
                        return PumpEnd::Dropped;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("relay socket error: {}", e);
                        return PumpEnd::Dropped;
                    }
                    None => return PumpEnd::Dropped,
                }
            }
        }
    }

    fn emit(&self, event: SessionEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }
}

async fn wait_for_ready(socket: &mut Socket) -> Result<UserId, ClientError> {
    while let Some(msg) = socket.next().await {
        let Message::Text(text) = msg? else {
            continue;
        };

        match serde_json::from_str::<ServerFrame>(text.as_str())? {
            ServerFrame::Ready { user_id } => return Ok(user_id),
            ServerFrame::Error { code, message } if code == "invalid_token" => {
                return Err(ClientError::Rejected(message));
            }
            other => debug!("ignoring {} frame before ready", other.kind()),
        }
    }
    Err(ClientError::Handshake("socket closed before ready".into()))
}
