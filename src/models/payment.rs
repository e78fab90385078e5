use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::cart::CartLine;

/// Ephemeral gateway session used to render the payment form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSession {
    pub token: String,
    pub gateway_public_key: String,
    pub correlation_order_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackUrls {
    pub success: String,
    pub failure: String,
    pub cancel: String,
}

impl CallbackUrls {
    /// Substitutes `{order_id}` in every template.
    pub fn for_order(&self, order_id: &str) -> Self {
        Self {
            success: self.success.replace("{order_id}", order_id),
            failure: self.failure.replace("{order_id}", order_id),
            cancel: self.cancel.replace("{order_id}", order_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSessionRequest {
    pub order_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub customer_email: String,
    pub customer_name: String,
    pub cart_lines: Vec<CartLine>,
    pub callback_urls: CallbackUrls,
}

/// What the embedded payment form reported back to the browser. Advisory only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ClientPaymentSignal {
    Succeeded,
    Failed { reason: String },
    Closed,
}

/// Where to send the shopper after a client-side payment signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRoute {
    /// Show the "processing your payment" page until the server confirmation lands.
    AwaitConfirmation,
    /// The order is already confirmed.
    OrderConfirmed,
    /// Show the error and keep the cancel/retry options visible.
    ShowPaymentError,
    /// Keep the payment step open.
    StayOnPayment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmationStatus {
    Paid,
    Declined,
}

/// Server-to-server notification from the gateway, keyed by the correlation order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub event_id: String,
    pub order_id: String,
    pub status: ConfirmationStatus,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub transaction_ref: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_templates_receive_order_id() {
        let urls = CallbackUrls {
            success: "https://shop.example/checkout/{order_id}/ok".into(),
            failure: "https://shop.example/checkout/{order_id}/ko".into(),
            cancel: "https://shop.example/checkout/cancel".into(),
        };
        let resolved = urls.for_order("981");
        assert_eq!(resolved.success, "https://shop.example/checkout/981/ok");
        assert_eq!(resolved.failure, "https://shop.example/checkout/981/ko");
        assert_eq!(resolved.cancel, "https://shop.example/checkout/cancel");
    }
}
