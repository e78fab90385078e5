//! Boundaries to the systems the checkout consumes but does not own.
//!
//! Every external call goes through one of these traits so the checkout core can be
//! driven by scripted fakes in tests and by the HTTP adapters in production.

use async_trait::async_trait;
use reqwest::{Response, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::warn;

use crate::errors::ServiceError;
use crate::models::{
    ClientPaymentSignal, CouponValidation, CouponValidationRequest, OrderCreated, OrderPayload,
    OrderStatus, PaymentConfirmation, PaymentSession, PaymentSessionRequest, ShippingZone,
    ZoneLookupRequest,
};

pub mod commerce;
pub mod payment_gateway;

pub use commerce::HttpCommerceClient;
pub use payment_gateway::HttpPaymentGateway;

/// Validates a coupon code against the current cart contents.
#[async_trait]
pub trait CouponValidator: Send + Sync {
    async fn validate_coupon(
        &self,
        request: &CouponValidationRequest,
    ) -> Result<CouponValidation, ServiceError>;
}

/// Lists shipping zones and their methods for a region.
#[async_trait]
pub trait ShippingZoneSource: Send + Sync {
    async fn lookup_zones(
        &self,
        request: &ZoneLookupRequest,
    ) -> Result<Vec<ShippingZone>, ServiceError>;
}

/// Order lifecycle in the commerce backend.
#[async_trait]
pub trait OrderBackend: Send + Sync {
    async fn create_order(&self, payload: &OrderPayload) -> Result<OrderCreated, ServiceError>;

    /// Must be idempotent: cancelling an already-cancelled order reports `Cancelled`.
    async fn cancel_order(&self, order_id: &str) -> Result<OrderStatus, ServiceError>;

    async fn confirm_order(
        &self,
        order_id: &str,
        confirmation: &PaymentConfirmation,
    ) -> Result<OrderStatus, ServiceError>;
}

/// Gateway-specific payment session lifecycle.
#[async_trait]
pub trait PaymentSessionAdapter: Send + Sync {
    async fn create_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError>;

    /// Forwards the payment form submission. The returned signal is a routing hint,
    /// never a confirmation.
    async fn on_submit(
        &self,
        session: &PaymentSession,
        form_data: Value,
    ) -> Result<ClientPaymentSignal, ServiceError>;

    async fn teardown(&self, session: &PaymentSession) -> Result<(), ServiceError>;
}

/// Appends path segments to a base URL, percent-encoding each one.
pub(crate) fn endpoint(base: &Url, segments: &[&str]) -> Result<Url, ServiceError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ServiceError::InternalError(format!("{} cannot be a base URL", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Decodes a JSON body, turning non-2xx answers into `ExternalServiceError`.
pub(crate) async fn read_json<T: DeserializeOwned>(
    response: Response,
    what: &str,
) -> Result<T, ServiceError> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        warn!("{} failed with status {}: {}", what, status, text);
        return Err(ServiceError::ExternalServiceError(format!(
            "{} failed with status {}",
            what, status
        )));
    }
    response.json::<T>().await.map_err(|e| {
        ServiceError::ExternalServiceError(format!("{} returned an unreadable body: {}", what, e))
    })
}
