//! Tracing-backed notifier.
//!
//! Operators always get the event; the owner channel only when the
//! notification carries the owner's webhook. Delivery to real chat hooks
//! sits behind the same `Notifier` port.

use async_trait::async_trait;
use tracing::{error, info};

use dropfleet_exec::{ExecResult, Notification, NotificationKind, Notifier};

/// Action line shown with error notifications.
pub fn action(notification: &Notification) -> &'static str {
    if notification.removed {
        "Account Removed"
    } else {
        "None"
    }
}

/// Notifier that writes every notification to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &Notification) -> ExecResult<()> {
        let product = notification.product.as_ref().map(|p| p.id.to_string());

        match notification.kind {
            NotificationKind::Success => {
                let intent = notification.intent.as_ref();
                info!(
                    account = %notification.worker,
                    owner = notification.owner,
                    product = ?product,
                    title = ?notification.product.as_ref().map(|p| p.params.title.as_str()),
                    total = ?intent.map(|i| i.total),
                    seller = ?intent.map(|i| i.seller.as_str()),
                    delivery = ?intent.map(|i| i.delivery_estimate.as_str()),
                    "Checkout succeeded"
                );
            },
            NotificationKind::Error => {
                error!(
                    account = %notification.worker,
                    owner = notification.owner,
                    reason = %notification.message,
                    action = action(notification),
                    status = ?notification.status,
                    body = ?notification.body,
                    "Account error"
                );
            },
        }

        if let Some(webhook) = &notification.owner_webhook {
            info!(
                account = %notification.worker,
                owner = notification.owner,
                %webhook,
                kind = ?notification.kind,
                "Owner notified"
            );
        }

        Ok(())
    }
}
