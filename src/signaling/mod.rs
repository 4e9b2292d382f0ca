//! Signaling Module - Transport-agnostischer Signaling-Kanal
//!
//! Dieses Modul verwaltet die Kommunikation mit dem Signaling-Server:
//! - Typisierte Nachrichten (JSON, `type`-getaggt)
//! - Austauschbarer Transport (WebSocket als Standard)
//! - Eingehende Nachrichten in Ankunftsreihenfolge an Subscriber
//!

mod client;
mod error;
mod messages;
mod transport;

pub use client::{SignalingClient, SignalingEvent};
pub use error::{ConnectionError, SignalingError};
pub use messages::*;
pub use transport::{InboundFrames, SignalingTransport, WebSocketTransport};
