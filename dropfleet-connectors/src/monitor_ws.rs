//! Stock Monitor WebSocket Client
//!
//! Connects to the stock monitor and forwards every announced product.
//! Normalizes monitor wire records to domain `Product`s.
//!
//! # Protocol
//!
//! - On connect, the shared secret is sent as a text frame
//! - `"ping"` is sent every 7 seconds; a text `"ping"` is answered with `"pong"`
//! - Any other text frame is a JSON array of product records

use std::time::Duration;

use chrono::{TimeZone, Utc};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message as WebSocketMessage};
use tracing::{debug, error, info, warn};

use dropfleet_domain::{DomainError, Marketplace, Product, ProductId, PurchaseParams};

/// Interval between keepalive pings (in seconds).
const PING_INTERVAL_SECS: u64 = 7;

/// First reconnect delay (in milliseconds).
const MIN_RECONNECT_DELAY_MS: u64 = 100;

/// Reconnect delay ceiling (in milliseconds).
const MAX_RECONNECT_DELAY_MS: u64 = 1000;

/// Growth factor of the reconnect delay.
const RECONNECT_GROW_FACTOR: f64 = 1.3;

/// Errors that can occur in the monitor client.
#[derive(Debug, Error)]
pub enum MonitorWsError {
    /// Failed to connect to WebSocket.
    #[error("Failed to connect to WebSocket: {0}")]
    ConnectionFailed(String),

    /// Failed to send message.
    #[error("Failed to send message: {0}")]
    SendFailed(String),

    /// Failed to receive message.
    #[error("Failed to receive message: {0}")]
    ReceiveError(String),

    /// Invalid message format.
    #[error("Invalid message format: {0}")]
    InvalidMessage(String),

    /// Connection closed by the monitor.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Product receiver was dropped.
    #[error("Channel closed unexpectedly")]
    ChannelClosed,
}

impl From<DomainError> for MonitorWsError {
    fn from(e: DomainError) -> Self {
        MonitorWsError::InvalidMessage(e.to_string())
    }
}

// =============================================================================
// Wire Types
// =============================================================================

/// Product record as published by the monitor.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorProduct {
    /// Availability flag
    pub instock: bool,
    /// Product id
    pub input: String,
    /// Source site
    #[serde(default)]
    pub site: String,
    /// Discovery time (milliseconds since epoch)
    pub ts: i64,
    /// Purchase parameters
    pub extra_data: MonitorExtraData,
}

/// Marketplace-specific parameters of a monitor record.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorExtraData {
    /// Product title
    #[serde(default)]
    pub product_string: String,
    /// Condition flag
    #[serde(default)]
    pub condition: bool,
    /// Listed price
    #[serde(default)]
    pub price: Decimal,
    /// Seller name
    #[serde(default)]
    pub seller: String,
    /// Offer reference
    pub offer: String,
    /// Shipping cost
    #[serde(default)]
    pub shipping: Decimal,
    /// Product image
    #[serde(default, rename = "imageURL")]
    pub image_url: String,
    /// Marketplace identifier
    pub marketplace_id: String,
}

impl MonitorProduct {
    /// Convert to a domain product.
    ///
    /// # Errors
    /// Fails when the product id or marketplace is not recognised.
    pub fn into_product(self) -> Result<Product, MonitorWsError> {
        let id = ProductId::new(self.input)?;
        let marketplace: Marketplace = self.extra_data.marketplace_id.parse()?;
        let discovered_at = Utc
            .timestamp_millis_opt(self.ts)
            .single()
            .unwrap_or_else(Utc::now);

        let mut product = Product::new(
            id,
            marketplace,
            discovered_at,
            PurchaseParams {
                offer: self.extra_data.offer,
                currency: marketplace.currency().to_string(),
                price: self.extra_data.price,
                title: self.extra_data.product_string,
                seller: self.extra_data.seller,
            },
        );
        product.in_stock = self.instock;
        Ok(product)
    }
}

/// Decoded text frame.
#[derive(Debug)]
pub enum MonitorFrame {
    /// Keepalive request; answer with `"pong"`
    Ping,
    /// Keepalive answer
    Pong,
    /// Product announcements, in publish order
    Products(Vec<MonitorProduct>),
}

/// Decode one text frame.
pub fn decode_frame(text: &str) -> Result<MonitorFrame, MonitorWsError> {
    match text {
        "ping" => Ok(MonitorFrame::Ping),
        "pong" => Ok(MonitorFrame::Pong),
        _ => serde_json::from_str(text)
            .map(MonitorFrame::Products)
            .map_err(|e| MonitorWsError::InvalidMessage(e.to_string())),
    }
}

// =============================================================================
// Monitor Client
// =============================================================================

/// Reconnecting monitor client.
pub struct MonitorClient {
    /// Monitor WebSocket URL
    url: String,
    /// Shared secret sent on connect
    secret: String,
}

impl MonitorClient {
    /// Create a new monitor client.
    pub fn new(url: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            secret: secret.into(),
        }
    }

    /// Run until the product receiver is dropped, reconnecting on any error.
    pub async fn run(&self, products: mpsc::Sender<Product>) {
        let min_delay = Duration::from_millis(MIN_RECONNECT_DELAY_MS);
        let max_delay = Duration::from_millis(MAX_RECONNECT_DELAY_MS);
        let mut delay = min_delay;

        loop {
            match self.run_session(&products, &mut delay).await {
                Err(MonitorWsError::ChannelClosed) => {
                    info!("Product receiver dropped, stopping monitor client");
                    return;
                },
                Err(e) => error!(error = %e, "Monitor session ended"),
                Ok(()) => warn!("Monitor socket closed, reconnecting"),
            }

            if products.is_closed() {
                return;
            }

            tokio::time::sleep(delay).await;
            delay = delay.mul_f64(RECONNECT_GROW_FACTOR).min(max_delay);
        }
    }

    /// One connection lifetime. Resets `delay` once connected.
    async fn run_session(
        &self,
        products: &mpsc::Sender<Product>,
        delay: &mut Duration,
    ) -> Result<(), MonitorWsError> {
        info!(url = %self.url, "Connecting to stock monitor");

        let (ws_stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| MonitorWsError::ConnectionFailed(e.to_string()))?;
        let (mut write, mut read) = ws_stream.split();

        *delay = Duration::from_millis(MIN_RECONNECT_DELAY_MS);
        info!("Monitor connected");

        write
            .send(WebSocketMessage::Text(self.secret.clone()))
            .await
            .map_err(|e| MonitorWsError::SendFailed(e.to_string()))?;

        let mut ping = tokio::time::interval(Duration::from_secs(PING_INTERVAL_SECS));
        ping.tick().await;

        loop {
            tokio::select! {
                _ = ping.tick() => {
                    write
                        .send(WebSocketMessage::Text("ping".to_string()))
                        .await
                        .map_err(|e| MonitorWsError::SendFailed(e.to_string()))?;
                }
                _ = products.closed() => {
                    return Err(MonitorWsError::ChannelClosed);
                }
                message = read.next() => {
                    let message = match message {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => return Err(MonitorWsError::ReceiveError(e.to_string())),
                        None => return Ok(()),
                    };

                    match message {
                        WebSocketMessage::Text(text) => match decode_frame(&text) {
                            Ok(MonitorFrame::Ping) => {
                                write
                                    .send(WebSocketMessage::Text("pong".to_string()))
                                    .await
                                    .map_err(|e| MonitorWsError::SendFailed(e.to_string()))?;
                            },
                            Ok(MonitorFrame::Pong) => {},
                            Ok(MonitorFrame::Products(records)) => {
                                forward(records, products).await?;
                            },
                            Err(e) => warn!(error = %e, "Ignoring malformed monitor frame"),
                        },
                        WebSocketMessage::Close(_) => return Ok(()),
                        _ => {},
                    }
                }
            }
        }
    }
}

/// Forward records in order, skipping ones that do not map to a product.
async fn forward(
    records: Vec<MonitorProduct>,
    products: &mpsc::Sender<Product>,
) -> Result<(), MonitorWsError> {
    for record in records {
        let input = record.input.clone();
        match record.into_product() {
            Ok(product) => {
                debug!(product = %product.id, marketplace = %product.marketplace, "Stock update");
                products.send(product).await.map_err(|_| MonitorWsError::ChannelClosed)?;
            },
            Err(e) => warn!(input = %input, error = %e, "Skipping monitor record"),
        }
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
