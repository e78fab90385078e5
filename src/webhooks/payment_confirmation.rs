use axum::{extract::State, http::HeaderMap, http::StatusCode, response::IntoResponse, Json};
use bytes::Bytes;
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{info, instrument, warn};

use super::WebhookState;
use crate::errors::ServiceError;
use crate::models::{ConfirmationStatus, PaymentConfirmation};
use crate::services::checkout::coordinator::ConfirmationOutcome;

type HmacSha256 = Hmac<Sha256>;

pub const TIMESTAMP_HEADER: &str = "x-timestamp";
pub const SIGNATURE_HEADER: &str = "x-signature";

/// Envelope the gateway posts for every payment event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: PaymentEventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEventData {
    pub order_id: String,
    #[serde(default)]
    pub amount: Option<Decimal>,
    #[serde(default)]
    pub transaction_ref: Option<String>,
}

impl PaymentEvent {
    fn confirmation(&self) -> Option<PaymentConfirmation> {
        let status = match self.event_type.as_str() {
            "payment.succeeded" => ConfirmationStatus::Paid,
            "payment.failed" => ConfirmationStatus::Declined,
            _ => return None,
        };
        Some(PaymentConfirmation {
            event_id: self.id.clone(),
            order_id: self.data.order_id.clone(),
            status,
            amount: self.data.amount,
            transaction_ref: self.data.transaction_ref.clone(),
        })
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct WebhookAck {
    pub received: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ConfirmationOutcome>,
    #[serde(default)]
    pub duplicate: bool,
}

// POST /payments/confirmation
#[instrument(skip(state, headers, body))]
pub async fn payment_confirmation(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ServiceError> {
    if let Some(secret) = state.secret.as_deref() {
        verify_signature(&headers, &body, secret, state.tolerance_secs).map_err(|e| {
            warn!("Payment webhook signature verification failed: {}", e);
            e
        })?;
    }

    let event: PaymentEvent = serde_json::from_slice(&body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid payment event: {}", e)))?;

    if state.already_processed(&event.id) {
        info!("Payment event {} already processed", event.id);
        return Ok((
            StatusCode::OK,
            Json(WebhookAck {
                received: true,
                outcome: None,
                duplicate: true,
            }),
        ));
    }

    let Some(confirmation) = event.confirmation() else {
        info!("Unhandled payment webhook type: {}", event.event_type);
        return Ok((
            StatusCode::OK,
            Json(WebhookAck {
                received: true,
                outcome: None,
                duplicate: false,
            }),
        ));
    };

    let outcome = state.registry.dispatch_confirmation(&confirmation).await?;
    state.remember(&event.id);

    Ok((
        StatusCode::OK,
        Json(WebhookAck {
            received: true,
            outcome: Some(outcome),
            duplicate: false,
        }),
    ))
}

/// Checks the `x-timestamp` / `x-signature` pair: hex HMAC-SHA256 over
/// `"{timestamp}.{body}"`, with the timestamp inside the tolerance window.
pub fn verify_signature(
    headers: &HeaderMap,
    payload: &[u8],
    secret: &str,
    tolerance_secs: i64,
) -> Result<(), ServiceError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ServiceError::Unauthorized(format!("missing {} header", name)))
    };
    let timestamp = header(TIMESTAMP_HEADER)?;
    let signature = header(SIGNATURE_HEADER)?;

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| ServiceError::Unauthorized("malformed webhook timestamp".to_string()))?;
    let now = chrono::Utc::now().timestamp();
    if (now - ts).abs() > tolerance_secs {
        return Err(ServiceError::Unauthorized(
            "webhook timestamp outside tolerance".to_string(),
        ));
    }

    let expected = hex::decode(signature)
        .map_err(|_| ServiceError::Unauthorized("malformed webhook signature".to_string()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("webhook key: {}", e)))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| ServiceError::Unauthorized("invalid webhook signature".to_string()))
}

/// Signature a sender would put in `x-signature`.
pub fn sign_payload(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("webhook key: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
