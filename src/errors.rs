use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::services::checkout::state_machine::CheckoutStep;

/// Standardized error body returned by the HTTP surface.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP status category (e.g., "Bad Request", "Conflict")
    pub error: String,
    /// Human-readable error description
    pub message: String,
    /// What the caller can do about it
    pub next_action: NextAction,
    /// RFC 3339 timestamp when the error occurred
    pub timestamp: String,
}

/// The actionable next step offered to the shopper for a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    /// Correct the highlighted fields.
    FixInput,
    /// Pick a shipping method from the current list.
    SelectShippingMethod,
    /// Repeat the same action.
    Retry,
    /// Retry opening the payment form for the order that already exists.
    RetryPayment,
    /// Choose a different coupon, address or payment method.
    ChooseAnotherOption,
    /// The order may be in an ambiguous state and needs a human.
    ContactSupport,
    /// Nothing to do.
    None,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Validation error: {0}")]
    InvalidFields(#[from] validator::ValidationErrors),

    #[error("Select a shipping method: {0}")]
    StaleShippingSelection(String),

    #[error("Invalid transition from {from} to {to}")]
    InvalidTransition { from: CheckoutStep, to: CheckoutStep },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Coupon rejected: {0}")]
    CouponRejected(String),

    #[error("External service error: {0}")]
    ExternalServiceError(String),

    #[error("Order creation failed: {0}")]
    OrderCreationFailed(String),

    #[error("Payment session for order {order_id} could not be created: {reason}")]
    PaymentSessionFailed { order_id: String, reason: String },

    #[error("Order {order_id} could not be cancelled: {reason}")]
    CancellationFailed { order_id: String, reason: String },

    #[error("Checkout cancelled for order {0}")]
    CheckoutCancelled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::SerializationError(err.to_string())
    }
}

impl ServiceError {
    /// Returns the HTTP status code for this error.
    /// This is the single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::ValidationError(_)
            | Self::InvalidFields(_)
            | Self::StaleShippingSelection(_)
            | Self::CouponRejected(_)
            | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::InvalidTransition { .. } | Self::InvalidOperation(_) | Self::Conflict(_) => {
                StatusCode::CONFLICT
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::ExternalServiceError(_)
            | Self::OrderCreationFailed(_)
            | Self::PaymentSessionFailed { .. }
            | Self::CancellationFailed { .. } => StatusCode::BAD_GATEWAY,
            Self::CheckoutCancelled(_) => StatusCode::GONE,
            Self::SerializationError(_) | Self::InternalError(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Returns the error message suitable for HTTP responses.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn response_message(&self) -> String {
        match self {
            Self::SerializationError(_) | Self::InternalError(_) => {
                "Internal server error".to_string()
            }
            Self::ExternalServiceError(_) => "Upstream service unavailable".to_string(),
            _ => self.to_string(),
        }
    }

    /// The next step the shopper should be offered for this failure.
    pub fn next_action(&self) -> NextAction {
        match self {
            Self::ValidationError(_) | Self::InvalidFields(_) | Self::BadRequest(_) => {
                NextAction::FixInput
            }
            Self::StaleShippingSelection(_) => NextAction::SelectShippingMethod,
            Self::CouponRejected(_) => NextAction::ChooseAnotherOption,
            Self::ExternalServiceError(_) | Self::OrderCreationFailed(_) => NextAction::Retry,
            Self::PaymentSessionFailed { .. } => NextAction::RetryPayment,
            Self::CancellationFailed { .. } | Self::Conflict(_) => NextAction::ContactSupport,
            Self::CheckoutCancelled(_) => NextAction::ChooseAnotherOption,
            Self::InvalidTransition { .. } | Self::InvalidOperation(_) | Self::NotFound(_) => {
                NextAction::None
            }
            Self::Unauthorized(_) => NextAction::None,
            Self::SerializationError(_) | Self::InternalError(_) => NextAction::ContactSupport,
        }
    }

    /// Whether the error is a field-level problem that never touched the network.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::ValidationError(_)
                | Self::InvalidFields(_)
                | Self::StaleShippingSelection(_)
                | Self::InvalidTransition { .. }
        )
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let err = ErrorResponse {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.response_message(),
            next_action: self.next_action(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(err)).into_response()
    }
}
