use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::{AddressKey, OrderStatus};
use crate::services::checkout::state_machine::CheckoutStep;

/// Things that happened during a checkout, for audit and downstream consumers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CheckoutEvent {
    CheckoutStarted {
        session_id: Uuid,
        at: DateTime<Utc>,
    },
    StepChanged {
        session_id: Uuid,
        from: CheckoutStep,
        to: CheckoutStep,
    },
    ShippingResolved {
        session_id: Uuid,
        key: AddressKey,
        methods: usize,
        degraded: bool,
    },
    CouponApplied {
        session_id: Uuid,
        code: String,
        discount: Decimal,
    },
    CouponRemoved {
        session_id: Uuid,
        code: String,
        reason: String,
    },
    OrderCreated {
        session_id: Uuid,
        order_id: String,
        total: Decimal,
    },
    PaymentSessionOpened {
        session_id: Uuid,
        order_id: String,
    },
    PaymentSessionFailed {
        session_id: Uuid,
        order_id: String,
        reason: String,
    },
    OrderCancelled {
        session_id: Uuid,
        order_id: String,
    },
    CancellationFailed {
        session_id: Uuid,
        order_id: String,
        reason: String,
    },
    PaymentConfirmed {
        order_id: String,
        status: OrderStatus,
    },
    PaymentDeclined {
        order_id: String,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<CheckoutEvent>,
}

impl EventSender {
    pub fn new(sender: mpsc::Sender<CheckoutEvent>) -> Self {
        Self { sender }
    }

    /// Creates a sender together with the receiving end for [`process_events`].
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<CheckoutEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event, waiting for channel capacity.
    pub async fn send(&self, event: CheckoutEvent) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Best-effort publish. A full or closed channel is logged and otherwise ignored.
    pub fn send_or_log(&self, event: CheckoutEvent) {
        if let Err(e) = self.sender.try_send(event) {
            warn!("Dropping checkout event: {}", e);
        }
    }
}

/// Drains the event channel until every sender is gone.
pub async fn process_events(mut rx: mpsc::Receiver<CheckoutEvent>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            CheckoutEvent::CancellationFailed {
                order_id, reason, ..
            } => {
                error!(
                    "Order {} may still be open after a failed cancellation: {}",
                    order_id, reason
                );
            }
            CheckoutEvent::PaymentSessionFailed {
                order_id, reason, ..
            } => {
                warn!("Payment session failed for order {}: {}", order_id, reason);
            }
            _ => {}
        }

        match serde_json::to_string(&event) {
            Ok(json) => info!(target: "checkout_events", "{}", json),
            Err(e) => error!("Failed to serialize checkout event: {}", e),
        }
    }

    info!("Event processing loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_or_log_survives_a_closed_channel() {
        let (sender, rx) = EventSender::channel(1);
        drop(rx);
        sender.send_or_log(CheckoutEvent::PaymentDeclined {
            order_id: "7".into(),
        });
        assert!(sender
            .send(CheckoutEvent::PaymentDeclined {
                order_id: "7".into()
            })
            .await
            .is_err());
    }

    #[tokio::test]
    async fn events_are_delivered_in_order() {
        let (sender, mut rx) = EventSender::channel(8);
        let session_id = Uuid::new_v4();
        sender.send_or_log(CheckoutEvent::CheckoutStarted {
            session_id,
            at: Utc::now(),
        });
        sender.send_or_log(CheckoutEvent::OrderCancelled {
            session_id,
            order_id: "55".into(),
        });

        assert!(matches!(
            rx.recv().await,
            Some(CheckoutEvent::CheckoutStarted { .. })
        ));
        assert!(matches!(
            rx.recv().await,
            Some(CheckoutEvent::OrderCancelled { order_id, .. }) if order_id == "55"
        ));
    }

    #[test]
    fn events_serialize_with_a_tag() {
        let json = serde_json::to_value(CheckoutEvent::PaymentConfirmed {
            order_id: "9".into(),
            status: OrderStatus::Confirmed,
        })
        .unwrap();
        assert_eq!(json["event"], "payment_confirmed");
        assert_eq!(json["status"], "confirmed");
    }
}
