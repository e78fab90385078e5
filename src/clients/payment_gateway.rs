use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, instrument};

use super::{endpoint, read_json, PaymentSessionAdapter};
use crate::errors::ServiceError;
use crate::models::{
    money::to_minor_units, CallbackUrls, CartLine, ClientPaymentSignal, PaymentSession,
    PaymentSessionRequest,
};

#[derive(Debug, Serialize)]
struct CreateSessionBody<'a> {
    order_id: &'a str,
    amount: Decimal,
    amount_minor: i64,
    currency: &'a str,
    customer_email: &'a str,
    customer_name: &'a str,
    cart_lines: &'a [CartLine],
    callback_urls: &'a CallbackUrls,
}

#[derive(Debug, Deserialize)]
struct CreateSessionResponse {
    session_token: String,
    gateway_public_key: String,
}

/// Payment gateway reached over its session REST API.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    client: Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("HTTP client: {}", e)))?;
        Self::with_client(base_url, api_key, client)
    }

    pub fn with_client(base_url: &str, api_key: Option<String>, client: Client) -> Result<Self, ServiceError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| ServiceError::InternalError(format!("invalid payment API url: {}", e)))?;
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
}

#[async_trait]
impl PaymentSessionAdapter for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError> {
        let body = CreateSessionBody {
            order_id: &request.order_id,
            amount: request.amount,
            amount_minor: to_minor_units(request.amount)?,
            currency: &request.currency,
            customer_email: &request.customer_email,
            customer_name: &request.customer_name,
            cart_lines: &request.cart_lines,
            callback_urls: &request.callback_urls,
        };

        let url = endpoint(&self.base_url, &["sessions"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("payment session request failed: {}", e))
            })?;
        let created: CreateSessionResponse = read_json(response, "payment session creation").await?;

        info!("Payment session created for order {}", request.order_id);
        Ok(PaymentSession {
            token: created.session_token,
            gateway_public_key: created.gateway_public_key,
            correlation_order_id: request.order_id.clone(),
        })
    }

    #[instrument(skip(self, session, form_data), fields(order_id = %session.correlation_order_id))]
    async fn on_submit(
        &self,
        session: &PaymentSession,
        form_data: Value,
    ) -> Result<ClientPaymentSignal, ServiceError> {
        let url = endpoint(&self.base_url, &["sessions", &session.token, "submit"])?;
        let response = self
            .authorize(self.client.post(url))
            .json(&form_data)
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("payment submission failed: {}", e))
            })?;
        read_json(response, "payment submission").await
    }

    #[instrument(skip(self, session), fields(order_id = %session.correlation_order_id))]
    async fn teardown(&self, session: &PaymentSession) -> Result<(), ServiceError> {
        let url = endpoint(&self.base_url, &["sessions", &session.token])?;
        let response = self
            .authorize(self.client.delete(url))
            .send()
            .await
            .map_err(|e| {
                ServiceError::ExternalServiceError(format!("payment session teardown failed: {}", e))
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => {
                debug!("Payment session already gone");
                Ok(())
            }
            status => Err(ServiceError::ExternalServiceError(format!(
                "payment session teardown failed with status {}",
                status
            ))),
        }
    }
}
