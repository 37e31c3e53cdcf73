/// `link/session.rs` - the single WebSocket connection to the scene engine
///
/// `Session` owns the socket halves through two spawned tasks (writer fed by an
/// unbounded channel, reader feeding the event handler) and tracks the
/// Disconnected / Connecting / Connected state. Each connection carries a
/// generation number so a stale reader can never close a newer connection.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message};

use crate::config::LinkConfig;
use crate::error::{LinkError, LinkResult};

/// Close code reported when the socket went away without a close frame.
pub const ABNORMAL_CLOSURE: u16 = 1006;
const NO_STATUS: u16 = 1005;
const NORMAL_CLOSURE: u16 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: ConnectionState,
    pub url: String,
    pub reconnecting: bool,
    pub last_error: Option<String>,
    pub last_close_code: Option<u16>,
}

/// Connection events delivered to the handler passed to `connect`.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Open,
    Message(String),
    Closed { code: u16, reason: String },
    Error(String),
}

pub type EventHandler = Arc<dyn Fn(SessionEvent) + Send + Sync>;

enum Outgoing {
    Text(String),
    Close,
}

struct Link {
    status: SessionStatus,
    generation: u64,
    tx: Option<mpsc::UnboundedSender<Outgoing>>,
    handler: Option<EventHandler>,
}

struct SessionInner {
    link: Mutex<Link>,
    manual_disconnect: AtomicBool,
    reconnect_backoff: Option<Duration>,
}

impl SessionInner {
    fn lock(&self) -> MutexGuard<'_, Link> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(config: &LinkConfig) -> Self {
        let status = SessionStatus {
            state: ConnectionState::Disconnected,
            url: config.url.clone(),
            reconnecting: false,
            last_error: None,
            last_close_code: None,
        };

        Self {
            inner: Arc::new(SessionInner {
                link: Mutex::new(Link {
                    status,
                    generation: 0,
                    tx: None,
                    handler: None,
                }),
                manual_disconnect: AtomicBool::new(false),
                reconnect_backoff: config.reconnect.then(|| config.reconnect_backoff()),
            }),
        }
    }

    /// Open the socket. Settles once the handshake succeeds or fails.
    pub async fn connect(&self, url: &str, handler: EventHandler) -> LinkResult<()> {
        {
            let mut link = self.inner.lock();
            if link.status.state != ConnectionState::Disconnected {
                return Err(LinkError::AlreadyConnected);
            }
            link.status.state = ConnectionState::Connecting;
            link.status.url = url.to_string();
            link.handler = Some(handler);
        }
        self.inner.manual_disconnect.store(false, Ordering::SeqCst);
        open(self.inner.clone()).await
    }

    /// Queue a text frame. Fails immediately when not connected.
    pub fn send(&self, text: String) -> LinkResult<()> {
        let link = self.inner.lock();
        if link.status.state != ConnectionState::Connected {
            return Err(LinkError::NotConnected);
        }
        match &link.tx {
            Some(tx) => tx
                .send(Outgoing::Text(text))
                .map_err(|_| LinkError::NotConnected),
            None => Err(LinkError::NotConnected),
        }
    }

    /// Close the socket on purpose. Suppresses auto-reconnect.
    pub fn disconnect(&self) {
        self.inner.manual_disconnect.store(true, Ordering::SeqCst);

        let (was_connected, handler) = {
            let mut link = self.inner.lock();
            if let Some(tx) = link.tx.take() {
                let _ = tx.send(Outgoing::Close);
            }
            let was_connected = link.status.state == ConnectionState::Connected;
            link.status.state = ConnectionState::Disconnected;
            link.status.reconnecting = false;
            if was_connected {
                link.status.last_close_code = Some(NORMAL_CLOSURE);
            }
            (was_connected, link.handler.clone())
        };

        if was_connected {
            log::info!("Disconnected from engine");
            emit(
                &handler,
                SessionEvent::Closed {
                    code: NORMAL_CLOSURE,
                    reason: "client disconnect".to_string(),
                },
            );
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lock().status.state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.lock().status.clone()
    }
}

fn emit(handler: &Option<EventHandler>, event: SessionEvent) {
    if let Some(handler) = handler {
        handler(event);
    }
}

/// Handshake plus reader/writer tasks. Expects the state to be Connecting.
async fn open(inner: Arc<SessionInner>) -> LinkResult<()> {
    let url = inner.lock().status.url.clone();

    let ws_stream = match connect_async(url.as_str()).await {
        Ok((ws_stream, _)) => ws_stream,
        Err(e) => {
            let msg = format!("{url}: {e}");
            let mut link = inner.lock();
            link.status.state = ConnectionState::Disconnected;
            link.status.last_error = Some(msg.clone());
            return Err(LinkError::Connect(msg));
        }
    };

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outgoing>();

    let (generation, handler) = {
        let mut link = inner.lock();
        if inner.manual_disconnect.load(Ordering::SeqCst) {
            link.status.state = ConnectionState::Disconnected;
            return Err(LinkError::Connect("disconnected during handshake".to_string()));
        }
        link.generation += 1;
        link.tx = Some(tx);
        link.status.state = ConnectionState::Connected;
        link.status.reconnecting = false;
        link.status.last_error = None;
        (link.generation, link.handler.clone())
    };

    log::info!("Connected to {url}");
    emit(&handler, SessionEvent::Open);

    // Writer: drains the outgoing channel until it closes or a Close is queued
    tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            match out {
                Outgoing::Text(text) => {
                    if write.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Outgoing::Close => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "client disconnect".into(),
                    };
                    let _ = write.send(Message::Close(Some(frame))).await;
                    break;
                }
            }
        }
    });

    // Reader: forwards frames and reports the close exactly once
    let session = inner.clone();
    tokio::spawn(async move {
        let mut code = ABNORMAL_CLOSURE;
        let mut reason = "abnormal closure".to_string();

        while let Some(msg) = read.next().await {
            match msg {
                Ok(Message::Text(text)) => emit(&handler, SessionEvent::Message(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => emit(&handler, SessionEvent::Message(text)),
                    Err(_) => log::warn!("Ignoring non UTF-8 binary frame"),
                },
                Ok(Message::Close(frame)) => {
                    match frame {
                        Some(frame) => {
                            code = u16::from(frame.code);
                            reason = frame.reason.to_string();
                        }
                        None => {
                            code = NO_STATUS;
                            reason = String::new();
                        }
                    }
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let msg = e.to_string();
                    session.lock().status.last_error = Some(msg.clone());
                    if is_current(&session, generation) {
                        emit(&handler, SessionEvent::Error(msg));
                    }
                    break;
                }
            }
        }

        finish(session, generation, code, reason);
    });

    Ok(())
}

fn is_current(inner: &SessionInner, generation: u64) -> bool {
    let link = inner.lock();
    link.generation == generation && link.status.state == ConnectionState::Connected
}

fn finish(inner: Arc<SessionInner>, generation: u64, code: u16, reason: String) {
    let handler = {
        let mut link = inner.lock();
        if link.generation != generation || link.status.state != ConnectionState::Connected {
            return;
        }
        link.status.state = ConnectionState::Disconnected;
        link.status.last_close_code = Some(code);
        link.tx = None;
        link.handler.clone()
    };

    log::warn!("Connection closed ({code}): {reason}");
    emit(&handler, SessionEvent::Closed { code, reason });

    if let Some(backoff) = inner.reconnect_backoff {
        if !inner.manual_disconnect.load(Ordering::SeqCst) {
            schedule_reconnect(inner, backoff);
        }
    }
}

fn schedule_reconnect(inner: Arc<SessionInner>, backoff: Duration) {
    inner.lock().status.reconnecting = true;
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(backoff).await;
            if inner.manual_disconnect.load(Ordering::SeqCst) {
                inner.lock().status.reconnecting = false;
                break;
            }
            {
                let mut link = inner.lock();
                if link.status.state != ConnectionState::Disconnected {
                    break;
                }
                link.status.state = ConnectionState::Connecting;
            }
            log::info!("Reconnecting after {backoff:?}");
            match open(inner.clone()).await {
                Ok(()) => break,
                Err(e) => log::warn!("Reconnect failed: {e}"),
            }
        }
    });
}
