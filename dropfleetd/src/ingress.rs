//! Ingress bridge: stock monitor → event bus.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dropfleet_connectors::MonitorClient;
use dropfleet_domain::Product;

use crate::event_bus::{DaemonEvent, EventBus};

/// Buffered products between the monitor socket and the bridge.
const PRODUCT_BUFFER: usize = 256;

/// Spawn the monitor client and the bridge forwarding its products.
pub fn spawn_ingress(
    client: MonitorClient,
    bus: EventBus,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    let (tx, rx) = mpsc::channel(PRODUCT_BUFFER);

    tokio::spawn(async move {
        let bridge = tokio::spawn(forward_products(rx, bus));

        tokio::select! {
            _ = shutdown.cancelled() => info!("Ingress received shutdown signal"),
            _ = client.run(tx) => warn!("Monitor client exited"),
        }

        bridge.abort();
        info!("Ingress stopped");
    })
}

/// Forward every product as a stock update, in order. Returns the number
/// forwarded once the product channel closes or the bus is gone.
pub async fn forward_products(mut products: mpsc::Receiver<Product>, bus: EventBus) -> usize {
    let mut forwarded = 0;

    while let Some(product) = products.recv().await {
        if let Err(e) = bus.send(DaemonEvent::StockUpdate(product)).await {
            warn!(error = %e, "Dropping stock updates, event bus closed");
            break;
        }
        forwarded += 1;
    }

    forwarded
}
