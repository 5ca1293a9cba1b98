//! Event bus for internal daemon communication.
//!
//! Carries stock updates from the ingress to the dispatcher. A single
//! consumer drains it one event at a time, so it is an mpsc channel.

use dropfleet_domain::Product;
use tokio::sync::mpsc;

use crate::error::{DaemonError, DaemonResult};

// =============================================================================
// Event Types
// =============================================================================

/// Events that flow through the daemon event bus.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// The monitor announced a product
    StockUpdate(Product),

    /// Shutdown signal
    Shutdown,
}

// =============================================================================
// Event Bus
// =============================================================================

/// Producer side of the event bus. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: mpsc::Sender<DaemonEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity.
    ///
    /// Producers wait once `capacity` events are buffered.
    pub fn new(capacity: usize) -> (Self, EventReceiver) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, EventReceiver { receiver })
    }

    /// Send an event, waiting for buffer space.
    ///
    /// # Errors
    /// `DaemonError::EventBus` once the receiver is gone.
    pub async fn send(&self, event: DaemonEvent) -> DaemonResult<()> {
        self.sender
            .send(event)
            .await
            .map_err(|_| DaemonError::EventBus("receiver dropped".to_string()))
    }

    /// Send without waiting. Returns whether the event was queued.
    pub fn try_send(&self, event: DaemonEvent) -> bool {
        self.sender.try_send(event).is_ok()
    }

    /// Whether the receiver is gone.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Consumer side of the event bus.
#[derive(Debug)]
pub struct EventReceiver {
    receiver: mpsc::Receiver<DaemonEvent>,
}

impl EventReceiver {
    /// Receive the next event.
    ///
    /// Returns `None` once every sender has been dropped.
    pub async fn recv(&mut self) -> Option<DaemonEvent> {
        self.receiver.recv().await
    }

    /// Try to receive an event without blocking.
    pub fn try_recv(&mut self) -> Option<DaemonEvent> {
        self.receiver.try_recv().ok()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use dropfleet_domain::Marketplace;

    #[tokio::test]
    async fn test_event_bus_send_recv() {
        let (bus, mut receiver) = EventBus::new(10);
        let product = Product::test_product(Marketplace::Us);

        bus.send(DaemonEvent::StockUpdate(product.clone())).await.unwrap();

        match receiver.recv().await.unwrap() {
            DaemonEvent::StockUpdate(p) => assert_eq!(p.id, product.id),
            _ => panic!("Expected StockUpdate event"),
        }
    }

    #[tokio::test]
    async fn test_event_bus_preserves_order() {
        let (bus, mut receiver) = EventBus::new(10);

        bus.send(DaemonEvent::StockUpdate(Product::test_product(Marketplace::Us))).await.unwrap();
        bus.send(DaemonEvent::StockUpdate(Product::test_product(Marketplace::Uk))).await.unwrap();
        bus.send(DaemonEvent::Shutdown).await.unwrap();

        assert!(matches!(receiver.recv().await, Some(DaemonEvent::StockUpdate(p)) if p.marketplace == Marketplace::Us));
        assert!(matches!(receiver.recv().await, Some(DaemonEvent::StockUpdate(p)) if p.marketplace == Marketplace::Uk));
        assert!(matches!(receiver.recv().await, Some(DaemonEvent::Shutdown)));
    }

    #[tokio::test]
    async fn test_event_bus_closed_receiver() {
        let (bus, receiver) = EventBus::new(10);
        drop(receiver);

        assert!(bus.is_closed());
        assert!(bus.send(DaemonEvent::Shutdown).await.is_err());
        assert!(!bus.try_send(DaemonEvent::Shutdown));
    }

    #[test]
    fn test_try_recv_empty() {
        let (_bus, mut receiver) = EventBus::new(10);

        // No events sent yet
        assert!(receiver.try_recv().is_none());
    }
}
