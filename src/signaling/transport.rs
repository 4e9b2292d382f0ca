//! Signaling-Transport
//!
//! Der Core braucht vom Transport nur `connect`/`disconnect`/`send` und einen
//! Strom eingehender Text-Frames. Der Standard-Transport ist ein WebSocket
//! (tokio-tungstenite) mit periodischem Ping, damit Idle-Timeouts von
//! Proxies die Verbindung nicht schließen.

use super::error::ConnectionError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};

/// Eingehende Text-Frames; der Strom endet, wenn die Verbindung abreißt
pub type InboundFrames = mpsc::UnboundedReceiver<String>;

/// Keep-Alive Intervall (unter typischen 30s Idle-Timeouts)
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(25);

// ============================================================================
// TRANSPORT TRAIT
// ============================================================================

/// Fähigkeit, die der SignalingClient von einem Transport erwartet
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Baut die Verbindung auf und liefert den Strom eingehender Frames
    async fn connect(&self, url: &str) -> Result<InboundFrames, ConnectionError>;

    /// Sendet einen Text-Frame (nicht blockierend)
    fn send(&self, frame: String) -> Result<(), ConnectionError>;

    /// Schließt die Verbindung. Mehrfacher Aufruf ist erlaubt.
    async fn disconnect(&self);
}

// ============================================================================
// WEBSOCKET TRANSPORT
// ============================================================================

enum Outbound {
    Text(String),
    Close,
}

struct Session {
    outbound: mpsc::UnboundedSender<Outbound>,
    reader: JoinHandle<()>,
}

/// WebSocket-Transport auf Basis von tokio-tungstenite
pub struct WebSocketTransport {
    session: Mutex<Option<Session>>,
    keepalive: Duration,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self {
            session: Mutex::new(None),
            keepalive: KEEPALIVE_INTERVAL,
        }
    }

    /// Setzt ein anderes Keep-Alive Intervall
    pub fn with_keepalive(mut self, keepalive: Duration) -> Self {
        self.keepalive = keepalive;
        self
    }

    /// Wandelt http(s) URLs in ws(s) URLs um
    fn websocket_url(url: &str) -> Result<String, ConnectionError> {
        let mut parsed =
            url::Url::parse(url).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;

        let scheme = match parsed.scheme() {
            "ws" | "http" => "ws",
            "wss" | "https" => "wss",
            other => {
                return Err(ConnectionError::InvalidUrl(format!(
                    "unsupported scheme '{}'",
                    other
                )))
            }
        };

        parsed
            .set_scheme(scheme)
            .map_err(|_| ConnectionError::InvalidUrl(url.to_string()))?;
        Ok(parsed.to_string())
    }

    fn close_session(session: Session) {
        let _ = session.outbound.send(Outbound::Close);
        session.reader.abort();
    }
}

#[async_trait]
impl SignalingTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<InboundFrames, ConnectionError> {
        let ws_url = Self::websocket_url(url)?;

        tracing::info!("Connecting to signaling server: {}", ws_url);

        let (ws_stream, _) = connect_async(ws_url.as_str())
            .await
            .map_err(|e| ConnectionError::ConnectFailed(e.to_string()))?;

        let (mut write, mut read) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        let (in_tx, in_rx) = mpsc::unbounded_channel::<String>();

        // Read-Task
        let reader = tokio::spawn(async move {
            while let Some(msg_result) = read.next().await {
                match msg_result {
                    Ok(Message::Text(text)) => {
                        if in_tx.send(text).is_err() {
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        tracing::info!("WebSocket closed by server");
                        break;
                    }
                    Err(e) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        });

        // Write-Task mit Keep-Alive
        let keepalive = self.keepalive;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval_at(tokio::time::Instant::now() + keepalive, keepalive);
            loop {
                tokio::select! {
                    msg = out_rx.recv() => match msg {
                        Some(Outbound::Text(text)) => {
                            if let Err(e) = write.send(Message::Text(text)).await {
                                tracing::error!("Failed to send WebSocket message: {}", e);
                                break;
                            }
                        }
                        Some(Outbound::Close) | None => {
                            let _ = write.send(Message::Close(None)).await;
                            break;
                        }
                    },
                    _ = interval.tick() => {
                        if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                            tracing::warn!("Keep-alive ping failed: {}", e);
                            break;
                        }
                    }
                }
            }
        });

        let previous = self.session.lock().replace(Session {
            outbound: out_tx,
            reader,
        });
        if let Some(previous) = previous {
            Self::close_session(previous);
        }

        Ok(in_rx)
    }

    fn send(&self, frame: String) -> Result<(), ConnectionError> {
        let session = self.session.lock();
        let session = session.as_ref().ok_or(ConnectionError::NotConnected)?;
        session
            .outbound
            .send(Outbound::Text(frame))
            .map_err(|e| ConnectionError::SendFailed(e.to_string()))
    }

    async fn disconnect(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            tracing::info!("Closing signaling WebSocket");
            Self::close_session(session);
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("open", &self.session.lock().is_some())
            .field("keepalive", &self.keepalive)
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
