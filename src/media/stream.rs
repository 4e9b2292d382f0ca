//! Stream Manager
//!
//! Besitzt die Zuordnung Peer-ID → Remote-Stream und hängt lokale Streams
//! an bestehende Peer Connections an.

use super::types::{MediaStream, MediaTrack};
use crate::connection::{ConnectionError, ConnectionManager, WeakConnectionManager};
use crate::events::{RtcEvent, RtcEventBus};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

struct StreamInner {
    remote: Mutex<HashMap<String, MediaStream>>,
    connection: Mutex<WeakConnectionManager>,
    bus: RtcEventBus,
}

/// Verwaltet Remote-Streams (billig klonbar)
#[derive(Clone)]
pub struct StreamManager {
    inner: Arc<StreamInner>,
}

impl StreamManager {
    pub fn new(bus: RtcEventBus) -> Self {
        Self {
            inner: Arc::new(StreamInner {
                remote: Mutex::new(HashMap::new()),
                connection: Mutex::new(WeakConnectionManager::default()),
                bus,
            }),
        }
    }

    /// Verbindet mit dem ConnectionManager (schwache Referenz)
    pub fn attach_connection(&self, connection: &ConnectionManager) {
        *self.inner.connection.lock() = connection.downgrade();
    }

    /// Setzt den Remote-Stream eines Peers (ein vorheriger wird beendet)
    pub fn add_remote_stream(&self, peer_id: &str, stream: MediaStream) {
        let previous = self
            .inner
            .remote
            .lock()
            .insert(peer_id.to_string(), stream.clone());

        if let Some(previous) = previous {
            if previous.id() != stream.id() {
                previous.stop();
            }
        }

        tracing::info!("Remote stream added for {}", peer_id);
        self.inner.bus.emit(RtcEvent::StreamAdded {
            peer_id: peer_id.to_string(),
            stream,
        });
    }

    /// Fügt einen einzelnen Remote-Track in den Stream des Peers ein
    pub fn add_remote_track(&self, peer_id: &str, track: MediaTrack) {
        let stream = {
            let mut remote = self.inner.remote.lock();
            let stream = remote.entry(peer_id.to_string()).or_insert_with(|| {
                let id = track.stream_id().unwrap_or(peer_id).to_string();
                MediaStream::with_id(id, Vec::new())
            });
            stream.add_track(track);
            stream.clone()
        };

        tracing::debug!("Remote track added for {}", peer_id);
        self.inner.bus.emit(RtcEvent::StreamAdded {
            peer_id: peer_id.to_string(),
            stream,
        });
    }

    /// Entfernt einen Remote-Track; ein leerer Stream wird entfernt
    pub fn remove_remote_track(&self, peer_id: &str, track_id: &str) {
        let now_empty = {
            let mut remote = self.inner.remote.lock();
            let Some(stream) = remote.get_mut(peer_id) else {
                return;
            };
            if let Some(track) = stream.remove_track(track_id) {
                track.stop();
            }
            stream.is_empty()
        };

        if now_empty {
            self.remove_remote_stream(peer_id);
        }
    }

    /// Entfernt und beendet den Remote-Stream eines Peers
    ///
    /// Idempotent: `StreamRemoved` wird genau einmal ausgelöst.
    pub fn remove_remote_stream(&self, peer_id: &str) -> bool {
        let Some(stream) = self.inner.remote.lock().remove(peer_id) else {
            return false;
        };

        stream.stop();
        tracing::info!("Remote stream removed for {}", peer_id);
        self.inner.bus.emit(RtcEvent::StreamRemoved {
            peer_id: peer_id.to_string(),
        });
        true
    }

    pub fn remote_stream(&self, peer_id: &str) -> Option<MediaStream> {
        self.inner.remote.lock().get(peer_id).cloned()
    }

    pub fn remote_peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.inner.remote.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Entfernt alle Remote-Streams
    pub fn clear(&self) {
        for peer_id in self.remote_peer_ids() {
            self.remove_remote_stream(&peer_id);
        }
    }

    /// Hängt einen lokalen Stream an die Peer Connection an
    ///
    /// Existiert keine Verbindung zu dem Peer, passiert nichts.
    pub async fn push_local_stream(
        &self,
        peer_id: &str,
        stream: &MediaStream,
    ) -> Result<(), ConnectionError> {
        let connection = self.inner.connection.lock().upgrade();
        let Some(connection) = connection.filter(|c| c.has_peer(peer_id)) else {
            tracing::warn!("No peer connection for {}, local stream not pushed", peer_id);
            return Ok(());
        };

        connection.add_local_stream(peer_id, stream).await
    }
}

impl std::fmt::Debug for StreamManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamManager")
            .field("remote", &self.remote_peer_ids())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================
