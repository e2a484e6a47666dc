//! Event bus - broadcast fan-out for pool events
//!
//! Built on a tokio broadcast channel: the pool emits, any number of
//! consumers (CLI printer, tests, future UIs) subscribe. Emission is
//! fire-and-forget; a slow or absent subscriber never blocks the driver.

use tokio::sync::broadcast;
use tracing::debug;

use super::types::PoolEvent;

/// Default channel capacity (events)
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Broadcast bus for pool events
pub struct EventBus {
    tx: broadcast::Sender<PoolEvent>,
}

impl EventBus {
    /// Create a bus with the given capacity
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Create a bus with the default capacity
    pub fn with_default_capacity() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Emit an event to all subscribers
    ///
    /// If nobody is subscribed the event is dropped; if the channel is
    /// full the oldest events are dropped.
    pub fn emit(&self, event: PoolEvent) {
        debug!(event_type = event.event_type(), "EventBus::emit");
        let _ = self.tx.send(event);
    }

    /// Subscribe to events emitted after this call
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.tx.subscribe()
    }

    /// Create a cheap emitter handle
    pub fn emitter(&self) -> EventEmitter {
        EventEmitter { tx: self.tx.clone() }
    }

    /// Number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_default_capacity()
    }
}

/// Handle for emitting events without owning the bus
#[derive(Clone)]
pub struct EventEmitter {
    tx: broadcast::Sender<PoolEvent>,
}

impl EventEmitter {
    /// Emit a raw event
    pub fn emit(&self, event: PoolEvent) {
        debug!(event_type = event.event_type(), "EventEmitter::emit");
        let _ = self.tx.send(event);
    }

    /// Emit `package:started`
    pub fn package_started(&self, name: &str, attempt: u32) {
        self.emit(PoolEvent::PackageStarted {
            name: name.to_string(),
            attempt,
        });
    }

    /// Emit `package:completed`
    pub fn package_completed(&self, name: &str, duration_ms: u64) {
        self.emit(PoolEvent::PackageCompleted {
            name: name.to_string(),
            duration_ms,
        });
    }

    /// Emit `package:retrying`
    pub fn package_retrying(&self, name: &str, attempt: u32, delay_ms: u64, error: &str) {
        self.emit(PoolEvent::PackageRetrying {
            name: name.to_string(),
            attempt,
            delay_ms,
            error: error.to_string(),
        });
    }

    /// Emit `package:failed`
    pub fn package_failed(&self, name: &str, error: &str, attempts: u32, retriable: bool) {
        self.emit(PoolEvent::PackageFailed {
            name: name.to_string(),
            error: error.to_string(),
            attempts,
            retriable,
        });
    }

    /// Emit `package:skipped`
    pub fn package_skipped(&self, name: &str, reason: &str) {
        self.emit(PoolEvent::PackageSkipped {
            name: name.to_string(),
            reason: reason.to_string(),
        });
    }

    /// Emit `checkpoint:saved`
    pub fn checkpoint_saved(&self, path: &str) {
        self.emit(PoolEvent::CheckpointSaved {
            path: path.to_string(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_emit_without_subscribers_is_fine() {
        let bus = EventBus::with_default_capacity();
        bus.emit(PoolEvent::PackageStarted {
            name: "a".to_string(),
            attempt: 1,
        });
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribers_receive_events() {
        let bus = EventBus::with_default_capacity();
        let mut rx = bus.subscribe();

        bus.emitter().package_completed("a", 42);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type(), "package:completed");
    }

    #[tokio::test]
    async fn test_multiple_subscribers_all_receive() {
        let bus = EventBus::with_default_capacity();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.emitter().package_skipped("b", "dependency a failed");

        assert_eq!(rx1.recv().await.unwrap().package(), Some("b"));
        assert_eq!(rx2.recv().await.unwrap().package(), Some("b"));
    }

    #[tokio::test]
    async fn test_late_subscriber_misses_earlier_events() {
        let bus = EventBus::with_default_capacity();
        bus.emitter().package_started("a", 1);

        let mut rx = bus.subscribe();
        bus.emitter().package_started("b", 1);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.package(), Some("b"));
    }
}
