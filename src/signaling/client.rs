//! Signaling Client
//!
//! Verwaltet den Signaling-Kanal über einen austauschbaren Transport:
//! - `connect` löst erst auf, wenn die Verbindung steht
//! - `send` nur im verbundenen Zustand
//! - Eingehende Nachrichten in Ankunftsreihenfolge an alle Subscriber
//! - Verbindungsabbrüche ohne lokales `disconnect` werden als unerwartet gemeldet

use super::error::{ConnectionError, SignalingError};
use super::messages::SignalingMessage;
use super::transport::SignalingTransport;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::mpsc;

// ============================================================================
// SIGNALING EVENTS
// ============================================================================

/// Events die vom SignalingClient ausgelöst werden
#[derive(Debug, Clone, PartialEq)]
pub enum SignalingEvent {
    /// Verbunden mit Signaling-Server
    Connected,

    /// Verbindung getrennt (`unexpected` = nicht durch `disconnect` ausgelöst)
    Disconnected { unexpected: bool },

    /// Eingehende Nachricht
    Message(SignalingMessage),

    /// Nicht dekodierbarer Frame (wird übersprungen)
    Error(SignalingError),
}

// ============================================================================
// CLIENT STATE
// ============================================================================

#[derive(Debug, Clone, Default)]
struct ClientState {
    is_connected: bool,
    closing: bool,
    url: Option<String>,
    /// Zählt Verbindungen, damit ein alter Read-Task keinen neuen Zustand überschreibt
    generation: u64,
}

type Subscribers = Arc<Mutex<Vec<mpsc::UnboundedSender<SignalingEvent>>>>;

// ============================================================================
// SIGNALING CLIENT
// ============================================================================

/// Client für den Signaling-Kanal
pub struct SignalingClient {
    transport: Arc<dyn SignalingTransport>,
    state: Arc<RwLock<ClientState>>,
    subscribers: Subscribers,
}

impl SignalingClient {
    /// Erstellt einen neuen SignalingClient über dem gegebenen Transport
    pub fn new(transport: Arc<dyn SignalingTransport>) -> Self {
        Self {
            transport,
            state: Arc::new(RwLock::new(ClientState::default())),
            subscribers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Gibt einen Event-Receiver zurück
    ///
    /// Unbegrenzter Kanal: es gehen keine Nachrichten verloren, die Reihenfolge
    /// entspricht der Ankunft.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SignalingEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Prüft ob verbunden
    pub fn is_connected(&self) -> bool {
        self.state.read().is_connected
    }

    /// URL der letzten Verbindung
    pub fn url(&self) -> Option<String> {
        self.state.read().url.clone()
    }

    /// Verbindet mit dem Signaling-Server
    pub async fn connect(&self, url: &str) -> Result<(), ConnectionError> {
        if self.is_connected() {
            tracing::debug!("Signaling already connected");
            return Ok(());
        }

        let mut inbound = self.transport.connect(url).await?;

        let generation = {
            let mut state = self.state.write();
            state.is_connected = true;
            state.closing = false;
            state.url = Some(url.to_string());
            state.generation += 1;
            state.generation
        };

        Self::publish(&self.subscribers, SignalingEvent::Connected);

        // Read-Task
        let state = Arc::clone(&self.state);
        let subscribers = Arc::clone(&self.subscribers);
        tokio::spawn(async move {
            while let Some(frame) = inbound.recv().await {
                match SignalingMessage::from_json(&frame) {
                    Ok(msg) => {
                        tracing::debug!("Signaling message received: {}", msg.type_name());
                        Self::publish(&subscribers, SignalingEvent::Message(msg));
                    }
                    Err(e) => {
                        tracing::warn!("Dropping malformed signaling frame: {}", e);
                        Self::publish(&subscribers, SignalingEvent::Error(e));
                    }
                }
            }

            // Disconnect-Status setzen (nur für die eigene Verbindung)
            let unexpected = {
                let mut s = state.write();
                if s.generation != generation {
                    return;
                }
                s.is_connected = false;
                !s.closing
            };

            if unexpected {
                tracing::warn!("Signaling connection lost");
            } else {
                tracing::info!("Signaling connection closed");
            }
            Self::publish(&subscribers, SignalingEvent::Disconnected { unexpected });
        });

        tracing::info!("Signaling connected to {}", url);
        Ok(())
    }

    /// Trennt die Verbindung. Mehrfacher Aufruf ist ein No-Op.
    pub async fn disconnect(&self) {
        {
            let mut state = self.state.write();
            state.closing = true;
            state.is_connected = false;
        }
        self.transport.disconnect().await;
    }

    /// Sendet eine Nachricht
    pub fn send(&self, message: &SignalingMessage) -> Result<(), ConnectionError> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }

        let text = message.to_json()?;
        tracing::debug!("Sending signaling message: {}", message.type_name());
        self.transport.send(text)
    }

    fn publish(subscribers: &Subscribers, event: SignalingEvent) {
        subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl std::fmt::Debug for SignalingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingClient")
            .field("state", &*self.state.read())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
