//! Generischer Event-Bus
//!
//! Handler werden pro Event-Art registriert und synchron in
//! Registrierungsreihenfolge aufgerufen. Zusätzlich wird jedes Event in einen
//! `broadcast`-Kanal gespiegelt, damit Tasks mit `recv().await` mitlesen können.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Kapazität des Broadcast-Abzweigs
const TAP_CAPACITY: usize = 256;

/// Event-Typen, die über einen [`EventBus`] laufen können
pub trait BusEvent: Clone + Send + Sync + 'static {
    /// Schlüssel für die Handler-Registry
    type Kind: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    fn kind(&self) -> Self::Kind;
}

/// Handle einer Registrierung, wird für `off` benötigt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E: BusEvent> {
    handlers: HashMap<E::Kind, Vec<(SubscriptionId, Handler<E>)>>,
}

/// Typisierter Publish/Subscribe-Bus (billig klonbar)
pub struct EventBus<E: BusEvent> {
    registry: Arc<Mutex<Registry<E>>>,
    next_id: Arc<AtomicU64>,
    tap: broadcast::Sender<E>,
}

impl<E: BusEvent> EventBus<E> {
    /// Erstellt einen leeren Bus
    pub fn new() -> Self {
        let (tap, _) = broadcast::channel(TAP_CAPACITY);

        Self {
            registry: Arc::new(Mutex::new(Registry {
                handlers: HashMap::new(),
            })),
            next_id: Arc::new(AtomicU64::new(1)),
            tap,
        }
    }

    /// Registriert einen Handler für eine Event-Art
    pub fn on<F>(&self, kind: E::Kind, handler: F) -> SubscriptionId
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry
            .lock()
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Entfernt einen Handler. Gibt `false` zurück, wenn er nicht (mehr) existiert.
    pub fn off(&self, kind: E::Kind, id: SubscriptionId) -> bool {
        let mut registry = self.registry.lock();
        let Some(list) = registry.handlers.get_mut(&kind) else {
            return false;
        };

        let before = list.len();
        list.retain(|(sub, _)| *sub != id);
        let removed = list.len() != before;

        if list.is_empty() {
            registry.handlers.remove(&kind);
        }
        removed
    }

    /// Entfernt alle Handler
    pub fn clear(&self) {
        self.registry.lock().handlers.clear();
    }

    /// Anzahl registrierter Handler für eine Event-Art
    pub fn handler_count(&self, kind: E::Kind) -> usize {
        self.registry
            .lock()
            .handlers
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    /// Gibt einen Receiver für alle Events zurück
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tap.subscribe()
    }

    /// Veröffentlicht ein Event
    ///
    /// Die Handler-Liste wird vor dem Aufruf kopiert, damit Handler selbst
    /// `on`/`off`/`emit` aufrufen dürfen.
    pub fn emit(&self, event: E) {
        let handlers: Vec<Handler<E>> = self
            .registry
            .lock()
            .handlers
            .get(&event.kind())
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(&event);
        }

        // Kein Receiver ist kein Fehler
        let _ = self.tap.send(event);
    }
}

impl<E: BusEvent> Clone for EventBus<E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            next_id: Arc::clone(&self.next_id),
            tap: self.tap.clone(),
        }
    }
}

impl<E: BusEvent> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: BusEvent> std::fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds = self.registry.lock().handlers.len();
        f.debug_struct("EventBus")
            .field("registered_kinds", &kinds)
            .field("receivers", &self.tap.receiver_count())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone, PartialEq)]
    enum Ping {
        A(u32),
        B,
    }

    impl BusEvent for Ping {
        type Kind = &'static str;

        fn kind(&self) -> Self::Kind {
            match self {
                Ping::A(_) => "a",
                Ping::B => "b",
            }
        }
    }

    #[test]
    fn test_handlers_only_see_their_kind() {
        let bus = EventBus::<Ping>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        bus.on("a", move |event| {
            if let Ping::A(n) = event {
                hits_clone.fetch_add(*n as usize, Ordering::SeqCst);
            }
        });

        bus.emit(Ping::A(2));
        bus.emit(Ping::B);
        bus.emit(Ping::A(3));

        assert_eq!(hits.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn test_off_removes_handler() {
        let bus = EventBus::<Ping>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let hits_clone = Arc::clone(&hits);
        let id = bus.on("b", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Ping::B);
        assert!(bus.off("b", id));
        assert!(!bus.off("b", id));
        bus.emit(Ping::B);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(bus.handler_count("b"), 0);
    }

    #[test]
    fn test_handler_may_emit_reentrantly() {
        let bus = EventBus::<Ping>::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let inner = bus.clone();
        bus.on("a", move |_| inner.emit(Ping::B));
        let hits_clone = Arc::clone(&hits);
        bus.on("b", move |_| {
            hits_clone.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(Ping::A(1));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_subscribe_receives_in_order() {
        let bus = EventBus::<Ping>::new();
        let mut rx = bus.subscribe();

        bus.emit(Ping::A(1));
        bus.emit(Ping::B);

        assert_eq!(rx.recv().await.unwrap(), Ping::A(1));
        assert_eq!(rx.recv().await.unwrap(), Ping::B);
    }
}
