//! Events Module - Typisiertes Publish/Subscribe
//!
//! Alle zustandsbehafteten Komponenten melden Änderungen über einen
//! gemeinsamen [`EventBus`]:
//! - Handler-Registry pro Event-Art (`on`/`off`)
//! - Broadcast-Abzweig für async Konsumenten (`subscribe`)
//!

mod bus;
mod types;

pub use bus::{BusEvent, EventBus, SubscriptionId};
pub use types::{ErrorSource, RtcEvent, RtcEventKind};

/// Bus-Typ, den alle Komponenten des Call-Cores teilen
pub type RtcEventBus = EventBus<RtcEvent>;
