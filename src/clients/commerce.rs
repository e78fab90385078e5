use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::{debug, instrument};

use super::{endpoint, read_json, CouponValidator, OrderBackend, ShippingZoneSource};
use crate::errors::ServiceError;
use crate::models::{
    CouponValidation, CouponValidationRequest, OrderCreated, OrderPayload, OrderStatus,
    PaymentConfirmation, ShippingZone, ZoneLookupRequest,
};

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: OrderStatus,
}

/// REST client for the commerce backend: coupons, shipping zones and orders.
#[derive(Clone)]
pub struct HttpCommerceClient {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpCommerceClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;
        Self::with_client(base_url, api_key, client)
    }

    pub fn with_client(base_url: &str, api_key: Option<String>, client: Client) -> Result<Self, ServiceError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ServiceError::InternalError(format!("invalid commerce API url: {}", e)))?;
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn order_status_call(
        &self,
        url: Url,
        body: Option<&PaymentConfirmation>,
        what: &str,
    ) -> Result<OrderStatus, ServiceError> {
        let mut request = self.authorize(self.client.post(url));
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request.send().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("{} request failed: {}", what, e))
        })?;
        let parsed: StatusResponse = read_json(response, what).await?;
        Ok(parsed.status)
    }
}

#[async_trait]
impl CouponValidator for HttpCommerceClient {
    #[instrument(skip(self, request), fields(code = %request.code))]
    async fn validate_coupon(
        &self,
        request: &CouponValidationRequest,
    ) -> Result<CouponValidation, ServiceError> {
        let url = endpoint(&self.base_url, &["coupons", "validate"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("coupon validation request failed: {}", e))
            })?;
        read_json(response, "coupon validation").await
    }
}

#[async_trait]
impl ShippingZoneSource for HttpCommerceClient {
    #[instrument(skip(self, request), fields(region = %request.region))]
    async fn lookup_zones(
        &self,
        request: &ZoneLookupRequest,
    ) -> Result<Vec<ShippingZone>, ServiceError> {
        let url = endpoint(&self.base_url, &["shipping", "zones"])?;
        let mut query = vec![("region", request.region.as_str())];
        if let Some(district) = request.district.as_deref() {
            query.push(("district", district));
        }

        let response = self
            .authorize(self.client.get(url))
            .query(&query)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("shipping zone request failed: {}", e))
            })?;
        let zones: Vec<ShippingZone> = read_json(response, "shipping zone lookup").await?;
        debug!("Commerce backend returned {} zones", zones.len());
        Ok(zones)
    }
}

#[async_trait]
impl OrderBackend for HttpCommerceClient {
    #[instrument(skip(self, payload), fields(total = %payload.total))]
    async fn create_order(&self, payload: &OrderPayload) -> Result<OrderCreated, ServiceError> {
        let url = endpoint(&self.base_url, &["orders"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("order creation request failed: {}", e))
            })?;
        read_json(response, "order creation").await
    }

    #[instrument(skip(self))]
    async fn cancel_order(&self, order_id: &str) -> Result<OrderStatus, ServiceError> {
        let url = endpoint(&self.base_url, &["orders", order_id, "cancel"])?;
        self.order_status_call(url, None, "order cancellation").await
    }

    #[instrument(skip(self, confirmation))]
    async fn confirm_order(
        &self,
        order_id: &str,
        confirmation: &PaymentConfirmation,
    ) -> Result<OrderStatus, ServiceError> {
        let url = endpoint(&self.base_url, &["orders", order_id, "confirm"])?;
        self.order_status_call(url, Some(confirmation), "order confirmation")
            .await
    }
}
