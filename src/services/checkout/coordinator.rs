use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, instrument, warn};

use super::pricing::PriceBreakdown;
use crate::clients::{OrderBackend, PaymentSessionAdapter};
use crate::errors::ServiceError;
use crate::models::{
    money::round2, Address, AppliedCoupon, BillingDetails, CallbackUrls, CartSnapshot,
    ClientPaymentSignal, ClientRoute, ConfirmationStatus, CouponLine, LineItemPayload,
    OrderPayload, OrderStatus, PaymentConfirmation, PaymentSession, PaymentSessionRequest,
    PendingOrder, PersonalData, ShippingLine, ShippingMethod,
};

/// Everything needed to turn a priced checkout into an order.
#[derive(Debug, Clone, Copy)]
pub struct CommitRequest<'a> {
    pub cart: &'a CartSnapshot,
    pub customer: &'a PersonalData,
    pub address: &'a Address,
    pub shipping_method: &'a ShippingMethod,
    pub coupon: Option<&'a AppliedCoupon>,
    pub breakdown: &'a PriceBreakdown,
    pub payment_method_id: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitOutcome {
    pub order: PendingOrder,
    pub session: PaymentSession,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CancellationOutcome {
    Cancelled { order_id: String },
    /// The order was already cancelled; nothing was sent to the backend.
    AlreadyCancelled { order_id: String },
    /// Order creation is still in flight; the commit will cancel the order itself.
    Requested,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConfirmationOutcome {
    Confirmed { order_id: String },
    AlreadyConfirmed { order_id: String },
    /// The order stays pending; the shopper may retry or cancel.
    Declined { order_id: String },
}

#[derive(Debug, Clone)]
struct PendingCommit {
    order: PendingOrder,
    payment_request: PaymentSessionRequest,
}

#[derive(Debug, Default)]
struct CommitState {
    pending: Option<PendingCommit>,
    session: Option<PaymentSession>,
    cancel_requested: bool,
    in_flight: bool,
}

/// Commits an order in two phases: pending order first, payment session second.
///
/// The coordinator is the only writer of the pending order status. Its lock is never
/// held across a call to the backend or the gateway.
pub struct OrderCommitCoordinator {
    orders: Arc<dyn OrderBackend>,
    payments: Arc<dyn PaymentSessionAdapter>,
    currency: String,
    callback_urls: CallbackUrls,
    state: Mutex<CommitState>,
}

impl OrderCommitCoordinator {
    pub fn new(
        orders: Arc<dyn OrderBackend>,
        payments: Arc<dyn PaymentSessionAdapter>,
        currency: impl Into<String>,
        callback_urls: CallbackUrls,
    ) -> Self {
        Self {
            orders,
            payments,
            currency: currency.into(),
            callback_urls,
            state: Mutex::new(CommitState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CommitState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn pending_order(&self) -> Option<PendingOrder> {
        self.lock().pending.as_ref().map(|p| p.order.clone())
    }

    pub fn payment_session(&self) -> Option<PaymentSession> {
        self.lock().session.clone()
    }

    pub fn cancel_requested(&self) -> bool {
        self.lock().cancel_requested
    }

    /// Runs both phases. Phase 2 only ever starts with an order id from phase 1.
    #[instrument(skip(self, request), fields(total = %request.breakdown.total))]
    pub async fn commit(&self, request: CommitRequest<'_>) -> Result<CommitOutcome, ServiceError> {
        {
            let mut state = self.lock();
            if state.in_flight {
                return Err(ServiceError::Conflict(
                    "an order submission is already in progress".to_string(),
                ));
            }
            if let Some(pending) = &state.pending {
                if pending.order.status.is_open() {
                    return Err(ServiceError::Conflict(format!(
                        "order {} is still pending; retry its payment or cancel it",
                        pending.order.id
                    )));
                }
            }
            *state = CommitState {
                in_flight: true,
                ..CommitState::default()
            };
        }

        let result = self.run_commit(request).await;
        self.lock().in_flight = false;
        result
    }

    async fn run_commit(&self, request: CommitRequest<'_>) -> Result<CommitOutcome, ServiceError> {
        let payload = build_order_payload(&request, &self.currency);

        let created = self.orders.create_order(&payload).await.map_err(|e| {
            error!("Order creation failed: {}", e);
            ServiceError::OrderCreationFailed(e.to_string())
        })?;

        let recorded = created.total;
        let order = PendingOrder::from_created(created, &payload);

        let payment_request = PaymentSessionRequest {
            order_id: order.id.clone(),
            amount: order.total,
            currency: self.currency.clone(),
            customer_email: request.customer.email.trim().to_string(),
            customer_name: request.customer.full_name(),
            cart_lines: request.cart.lines.clone(),
            callback_urls: self.callback_urls.for_order(&order.id),
        };

        if let Some(recorded) = recorded.filter(|r| round2(*r) != payload.total) {
            warn!(
                "Backend recorded total {} for order {} but {} was submitted",
                recorded, order.id, payload.total
            );
            // Kept so a failed compensation can be retried through `cancel`.
            {
                let mut state = self.lock();
                state.pending = Some(PendingCommit {
                    order: order.clone(),
                    payment_request,
                });
                state.cancel_requested = true;
            }
            self.compensate(&order.id).await?;
            return Err(ServiceError::OrderCreationFailed(format!(
                "order {} was recorded with total {} instead of {}",
                order.id, recorded, payload.total
            )));
        }

        info!("Created pending order {} for {}", order.id, order.total);

        let cancel_requested = {
            let mut state = self.lock();
            state.pending = Some(PendingCommit {
                order: order.clone(),
                payment_request: payment_request.clone(),
            });
            state.cancel_requested
        };

        if cancel_requested {
            info!("Cancellation requested while order {} was being created", order.id);
            self.compensate(&order.id).await?;
            return Err(ServiceError::CheckoutCancelled(order.id));
        }

        let session = self.open_payment_session(&payment_request).await?;
        Ok(CommitOutcome { order, session })
    }

    /// Opens a new payment session for the existing pending order.
    #[instrument(skip(self))]
    pub async fn retry_payment_session(&self) -> Result<PaymentSession, ServiceError> {
        let request = {
            let state = self.lock();
            let pending = state.pending.as_ref().ok_or_else(|| {
                ServiceError::InvalidOperation("there is no pending order to pay".to_string())
            })?;
            if state.cancel_requested || !pending.order.status.is_open() {
                return Err(ServiceError::InvalidOperation(format!(
                    "order {} is {}",
                    pending.order.id,
                    if state.cancel_requested {
                        "being cancelled".to_string()
                    } else {
                        pending.order.status.to_string()
                    }
                )));
            }
            if state.session.is_some() {
                return Err(ServiceError::Conflict(format!(
                    "order {} already has an open payment session",
                    pending.order.id
                )));
            }
            pending.payment_request.clone()
        };

        self.open_payment_session(&request).await
    }

    async fn open_payment_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError> {
        let session = self.payments.create_session(request).await.map_err(|e| {
            warn!(
                "Payment session for order {} could not be created: {}",
                request.order_id, e
            );
            ServiceError::PaymentSessionFailed {
                order_id: request.order_id.clone(),
                reason: e.to_string(),
            }
        })?;

        let cancelled = {
            let mut state = self.lock();
            if state.cancel_requested {
                true
            } else {
                state.session = Some(session.clone());
                false
            }
        };

        if cancelled {
            info!(
                "Discarding payment session for order {} opened after cancellation",
                request.order_id
            );
            self.teardown(&session).await;
            return Err(ServiceError::CheckoutCancelled(request.order_id.clone()));
        }

        info!("Payment session opened for order {}", request.order_id);
        Ok(session)
    }

    /// Compensating cancellation of the pending order.
    ///
    /// Safe while a phase is still in flight. Repeated calls for an order already
    /// known to be cancelled do not reach the backend.
    #[instrument(skip(self))]
    pub async fn cancel(&self) -> Result<CancellationOutcome, ServiceError> {
        let (order_id, session) = {
            let mut state = self.lock();
            state.cancel_requested = true;
            let Some(pending) = state.pending.as_ref() else {
                return Ok(CancellationOutcome::Requested);
            };
            let order_id = pending.order.id.clone();
            match pending.order.status {
                OrderStatus::Cancelled => {
                    return Ok(CancellationOutcome::AlreadyCancelled { order_id })
                }
                OrderStatus::Confirmed => {
                    return Err(ServiceError::Conflict(format!(
                        "order {} is already paid",
                        order_id
                    )))
                }
                OrderStatus::Pending | OrderStatus::OnHold => {}
            }
            (order_id, state.session.take())
        };

        if let Some(session) = session {
            self.teardown(&session).await;
        }

        self.compensate(&order_id).await?;
        Ok(CancellationOutcome::Cancelled { order_id })
    }

    async fn compensate(&self, order_id: &str) -> Result<(), ServiceError> {
        let status = self.orders.cancel_order(order_id).await.map_err(|e| {
            error!("Failed to cancel order {}: {}", order_id, e);
            ServiceError::CancellationFailed {
                order_id: order_id.to_string(),
                reason: e.to_string(),
            }
        })?;

        if status != OrderStatus::Cancelled {
            error!("Backend left order {} in status {}", order_id, status);
            return Err(ServiceError::CancellationFailed {
                order_id: order_id.to_string(),
                reason: format!("backend reported status {}", status),
            });
        }

        let mut state = self.lock();
        if let Some(pending) = state.pending.as_mut() {
            if pending.order.id == order_id {
                pending.order.status = OrderStatus::Cancelled;
            }
        }
        state.session = None;
        info!("Order {} cancelled", order_id);
        Ok(())
    }

    /// Applies a server-to-server payment confirmation to the pending order.
    #[instrument(skip(self, confirmation), fields(order_id = %confirmation.order_id))]
    pub async fn confirm(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let order_id = {
            let state = self.lock();
            let pending = state
                .pending
                .as_ref()
                .filter(|p| p.order.id == confirmation.order_id)
                .ok_or_else(|| {
                    ServiceError::NotFound(format!(
                        "no pending order {} in this checkout",
                        confirmation.order_id
                    ))
                })?;

            match pending.order.status {
                OrderStatus::Confirmed => {
                    return Ok(ConfirmationOutcome::AlreadyConfirmed {
                        order_id: pending.order.id.clone(),
                    })
                }
                OrderStatus::Cancelled => {
                    return Err(ServiceError::Conflict(format!(
                        "payment received for cancelled order {}",
                        pending.order.id
                    )))
                }
                OrderStatus::Pending | OrderStatus::OnHold => {}
            }
            if state.cancel_requested {
                return Err(ServiceError::Conflict(format!(
                    "payment received for order {} while it is being cancelled",
                    pending.order.id
                )));
            }
            if let Some(amount) = confirmation.amount {
                if round2(amount) != pending.order.total {
                    return Err(ServiceError::Conflict(format!(
                        "payment amount {} does not match order total {}",
                        amount, pending.order.total
                    )));
                }
            }
            pending.order.id.clone()
        };

        if confirmation.status == ConfirmationStatus::Declined {
            info!("Payment declined for order {}", order_id);
            return Ok(ConfirmationOutcome::Declined { order_id });
        }

        let status = self.orders.confirm_order(&order_id, confirmation).await?;

        let session = {
            let mut state = self.lock();
            if let Some(pending) = state.pending.as_mut() {
                pending.order.status = status;
            }
            state.session.take()
        };
        if let Some(session) = session {
            self.teardown(&session).await;
        }

        info!("Order {} confirmed with status {}", order_id, status);
        Ok(ConfirmationOutcome::Confirmed { order_id })
    }

    /// Confirmation for an order whose checkout is no longer in memory. The backend
    /// is the only judge of amount and status here.
    pub async fn confirm_detached(
        orders: &dyn OrderBackend,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let order_id = confirmation.order_id.clone();
        match confirmation.status {
            ConfirmationStatus::Declined => {
                info!("Payment declined for detached order {}", order_id);
                Ok(ConfirmationOutcome::Declined { order_id })
            }
            ConfirmationStatus::Paid => match orders.confirm_order(&order_id, confirmation).await? {
                OrderStatus::Cancelled => Err(ServiceError::Conflict(format!(
                    "payment received for cancelled order {}",
                    order_id
                ))),
                status => {
                    info!("Detached order {} confirmed with status {}", order_id, status);
                    Ok(ConfirmationOutcome::Confirmed { order_id })
                }
            },
        }
    }

    /// Forwards the payment form to the gateway and maps its answer to a route.
    pub async fn submit_payment_form(&self, form_data: Value) -> Result<ClientRoute, ServiceError> {
        let session = self.payment_session().ok_or_else(|| {
            ServiceError::InvalidOperation("there is no open payment session".to_string())
        })?;
        let signal = self.payments.on_submit(&session, form_data).await?;
        Ok(self.client_route(&signal))
    }

    /// Routing for a client-side payment signal. Never changes the order.
    pub fn client_route(&self, signal: &ClientPaymentSignal) -> ClientRoute {
        match signal {
            ClientPaymentSignal::Succeeded => {
                let confirmed = self
                    .lock()
                    .pending
                    .as_ref()
                    .map_or(false, |p| p.order.status == OrderStatus::Confirmed);
                if confirmed {
                    ClientRoute::OrderConfirmed
                } else {
                    ClientRoute::AwaitConfirmation
                }
            }
            ClientPaymentSignal::Failed { reason } => {
                info!("Payment form reported a failure: {}", reason);
                ClientRoute::ShowPaymentError
            }
            ClientPaymentSignal::Closed => ClientRoute::StayOnPayment,
        }
    }

    /// Clears a finished attempt so a new one can start.
    pub fn reset(&self) -> Result<(), ServiceError> {
        let mut state = self.lock();
        if state.in_flight {
            return Err(ServiceError::Conflict(
                "an order submission is still in progress".to_string(),
            ));
        }
        if let Some(pending) = &state.pending {
            if pending.order.status.is_open() && !state.cancel_requested {
                return Err(ServiceError::Conflict(format!(
                    "order {} is still pending",
                    pending.order.id
                )));
            }
        }
        *state = CommitState::default();
        Ok(())
    }

    async fn teardown(&self, session: &PaymentSession) {
        if let Err(e) = self.payments.teardown(session).await {
            warn!(
                "Failed to tear down payment session for order {}: {}",
                session.correlation_order_id, e
            );
        }
    }
}

/// Order payload for the current price breakdown. The shipping line carries the
/// effective cost and the total is the breakdown total.
pub fn build_order_payload(request: &CommitRequest<'_>, currency: &str) -> OrderPayload {
    OrderPayload {
        status: OrderStatus::Pending,
        currency: currency.to_string(),
        line_items: request.cart.lines.iter().map(LineItemPayload::from).collect(),
        billing_address: BillingDetails::new(request.customer, request.address),
        shipping_address: request.address.clone(),
        shipping_line: ShippingLine {
            method_id: request.shipping_method.id.clone(),
            title: request.shipping_method.title.clone(),
            cost: request.breakdown.shipping_cost,
        },
        coupon_line: request.coupon.map(|c| CouponLine {
            code: c.code().to_string(),
            discount: request.breakdown.discount_amount,
        }),
        payment_method_id: request.payment_method_id.to_string(),
        total: request.breakdown.total,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CartLine, Coupon, OrderCreated};
    use crate::services::checkout::free_shipping::FreeShippingPolicy;
    use crate::services::checkout::pricing::{compute_breakdown, PricingInputs};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use mockall::mock;
    use mockall::Sequence;
    use rust_decimal_macros::dec;

    mock! {
        pub Orders {}
        #[async_trait]
        impl OrderBackend for Orders {
            async fn create_order(&self, payload: &OrderPayload) -> Result<OrderCreated, ServiceError>;
            async fn cancel_order(&self, order_id: &str) -> Result<OrderStatus, ServiceError>;
            async fn confirm_order(
                &self,
                order_id: &str,
                confirmation: &PaymentConfirmation,
            ) -> Result<OrderStatus, ServiceError>;
        }
    }

    mock! {
        pub Payments {}
        #[async_trait]
        impl PaymentSessionAdapter for Payments {
            async fn create_session(
                &self,
                request: &PaymentSessionRequest,
            ) -> Result<PaymentSession, ServiceError>;
            async fn on_submit(
                &self,
                session: &PaymentSession,
                form_data: Value,
            ) -> Result<ClientPaymentSignal, ServiceError>;
            async fn teardown(&self, session: &PaymentSession) -> Result<(), ServiceError>;
        }
    }

    struct Fixture {
        cart: CartSnapshot,
        customer: PersonalData,
        address: Address,
        method: ShippingMethod,
        coupon: AppliedCoupon,
        breakdown: PriceBreakdown,
    }

    impl Fixture {
        fn new() -> Self {
            let cart = CartSnapshot::new(vec![CartLine::new(1, 1, dec!(100.00))]);
            let method = ShippingMethod::new("flat_rate:3", "Delivery", dec!(10.00));
            let coupon = AppliedCoupon {
                coupon: Coupon {
                    code: "DESC20".into(),
                    discount: None,
                    grants_free_shipping: false,
                },
                discount_amount: dec!(20.00),
                validated_cart: cart.fingerprint(),
            };
            let policy = FreeShippingPolicy::new(Some(dec!(150.00)));
            let breakdown = compute_breakdown(&PricingInputs {
                cart: &cart,
                coupon: Some(&coupon),
                shipping_method: Some(&method),
                policy: &policy,
            });
            Self {
                cart,
                customer: PersonalData {
                    first_name: "Rosa".into(),
                    surnames: "Quispe".into(),
                    document_id: "70123456".into(),
                    email: "rosa@example.com".into(),
                    phone: "987654321".into(),
                },
                address: Address::new("PE"),
                method,
                coupon,
                breakdown,
            }
        }

        fn request(&self) -> CommitRequest<'_> {
            CommitRequest {
                cart: &self.cart,
                customer: &self.customer,
                address: &self.address,
                shipping_method: &self.method,
                coupon: Some(&self.coupon),
                breakdown: &self.breakdown,
                payment_method_id: "card",
            }
        }
    }

    fn urls() -> CallbackUrls {
        CallbackUrls {
            success: "https://shop.example/ok/{order_id}".into(),
            failure: "https://shop.example/ko/{order_id}".into(),
            cancel: "https://shop.example/cancel/{order_id}".into(),
        }
    }

    fn session_for(order_id: &str) -> PaymentSession {
        PaymentSession {
            token: "tok_1".into(),
            gateway_public_key: "pk_test".into(),
            correlation_order_id: order_id.into(),
        }
    }

    fn created(order_id: &str) -> OrderCreated {
        OrderCreated {
            order_id: order_id.into(),
            status: OrderStatus::Pending,
            total: None,
        }
    }

    fn coordinator(orders: MockOrders, payments: MockPayments) -> OrderCommitCoordinator {
        OrderCommitCoordinator::new(Arc::new(orders), Arc::new(payments), "PEN", urls())
    }

    #[test]
    fn payload_uses_breakdown_figures() {
        let fx = Fixture::new();
        let payload = build_order_payload(&fx.request(), "PEN");
        assert_eq!(payload.total, dec!(90.00));
        assert_eq!(payload.shipping_line.cost, dec!(10.00));
        assert_eq!(payload.coupon_line.unwrap().discount, dec!(20.00));
        assert_eq!(payload.status, OrderStatus::Pending);
        assert_eq!(payload.line_items.len(), 1);
    }

    #[tokio::test]
    async fn order_is_created_before_the_payment_session() {
        let fx = Fixture::new();
        let mut seq = Sequence::new();
        let mut orders = MockOrders::new();
        let mut payments = MockPayments::new();

        orders
            .expect_create_order()
            .withf(|p| p.total == dec!(90.00))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(created("1001")));
        payments
            .expect_create_session()
            .withf(|r| {
                r.order_id == "1001"
                    && r.amount == dec!(90.00)
                    && r.callback_urls.success == "https://shop.example/ok/1001"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| Ok(session_for(&r.order_id)));

        let coordinator = coordinator(orders, payments);
        let outcome = coordinator.commit(fx.request()).await.unwrap();

        assert_eq!(outcome.order.id, "1001");
        assert_eq!(outcome.session.correlation_order_id, "1001");
        assert!(coordinator.payment_session().is_some());
    }

    #[tokio::test]
    async fn phase_one_failure_never_opens_a_session() {
        let fx = Fixture::new();
        let mut orders = MockOrders::new();
        orders
            .expect_create_order()
            .returning(|_| Err(ServiceError::ExternalServiceError("502".into())));
        let payments = MockPayments::new();

        let coordinator = coordinator(orders, payments);
        assert_matches!(
            coordinator.commit(fx.request()).await,
            Err(ServiceError::OrderCreationFailed(_))
        );
        assert!(coordinator.pending_order().is_none());
    }

    #[tokio::test]
    async fn phase_two_failure_keeps_the_pending_order_for_retry() {
        let fx = Fixture::new();
        let mut orders = MockOrders::new();
        orders
            .expect_create_order()
            .times(1)
            .returning(|_| Ok(created("1002")));

        let mut payments = MockPayments::new();
        let mut seq = Sequence::new();
        payments
            .expect_create_session()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ServiceError::ExternalServiceError("gateway down".into())));
        payments
            .expect_create_session()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|r| Ok(session_for(&r.order_id)));

        let coordinator = coordinator(orders, payments);
        assert_matches!(
            coordinator.commit(fx.request()).await,
            Err(ServiceError::PaymentSessionFailed { order_id, .. }) if order_id == "1002"
        );
        assert_eq!(
            coordinator.pending_order().unwrap().status,
            OrderStatus::Pending
        );

        assert_matches!(
            coordinator.commit(fx.request()).await,
            Err(ServiceError::Conflict(_))
        );

        let session = coordinator.retry_payment_session().await.unwrap();
        assert_eq!(session.correlation_order_id, "1002");
    }

    #[tokio::test]
    async fn mismatched_recorded_total_cancels_the_order() {
        let fx = Fixture::new();
        let mut orders = MockOrders::new();
        orders.expect_create_order().returning(|_| {
            Ok(OrderCreated {
                order_id: "1003".into(),
                status: OrderStatus::Pending,
                total: Some(dec!(89.99)),
            })
        });
        orders
            .expect_cancel_order()
            .withf(|id| id == "1003")
            .times(1)
            .returning(|_| Ok(OrderStatus::Cancelled));

        let coordinator = coordinator(orders, MockPayments::new());
        assert_matches!(
            coordinator.commit(fx.request()).await,
            Err(ServiceError::OrderCreationFailed(_))
        );
    }

    #[tokio::test]
    async fn failed_compensation_after_mismatch_keeps_the_order_cancellable() {
        let fx = Fixture::new();
        let mut orders = MockOrders::new();
        orders.expect_create_order().returning(|_| {
            Ok(OrderCreated {
                order_id: "1003".into(),
                status: OrderStatus::Pending,
                total: Some(dec!(89.99)),
            })
        });
        let mut seq = Sequence::new();
        orders
            .expect_cancel_order()
            .withf(|id| id == "1003")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(ServiceError::ExternalServiceError("down".into())));
        orders
            .expect_cancel_order()
            .withf(|id| id == "1003")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(OrderStatus::Cancelled));

        let coordinator = coordinator(orders, MockPayments::new());
        assert_matches!(
            coordinator.commit(fx.request()).await,
            Err(ServiceError::CancellationFailed { ref order_id, .. }) if order_id == "1003"
        );
        assert_eq!(
            coordinator.pending_order().map(|o| o.status),
            Some(OrderStatus::Pending)
        );
        assert!(coordinator.cancel_requested());

        assert_eq!(
            coordinator.cancel().await.unwrap(),
            CancellationOutcome::Cancelled {
                order_id: "1003".into()
            }
        );
        assert!(coordinator.reset().is_ok());
    }

    #[tokio::test]
    async fn cancellation_is_idempotent() {
        let fx = Fixture::new();
        let mut orders = MockOrders::new();
        orders
            .expect_create_order()
            .returning(|_| Ok(created("1004")));
        orders
            .expect_cancel_order()
            .times(1)
            .returning(|_| Ok(OrderStatus::Cancelled));

        let mut payments = MockPayments::new();
        payments
            .expect_create_session()
            .returning(|r| Ok(session_for(&r.order_id)));
        payments.expect_teardown().times(1).returning(|_| Ok(()));

        let coordinator = coordinator(orders, payments);
        coordinator.commit(fx.request()).await.unwrap();

        assert_eq!(
            coordinator.cancel().await.unwrap(),
            CancellationOutcome::Cancelled {
                order_id: "1004".into()
            }
        );
        assert_eq!(
            coordinator.cancel().await.unwrap(),
            CancellationOutcome::AlreadyCancelled {
                order_id: "1004".into()
            }
        );
        assert_eq!(
            coordinator.pending_order().unwrap().status,
            OrderStatus::Cancelled
        );
        assert!(coordinator.payment_session().is_none());
    }

    #[tokio::test]
    async fn failed_cancellation_is_reported_distinctly() {
        let fx = Fixture::new();
        let mut orders = MockOrders::new();
        orders
            .expect_create_order()
            .returning(|_| Ok(created("1005")));
        orders
            .expect_cancel_order()
            .returning(|_| Err(ServiceError::ExternalServiceError("timeout".into())));

        let mut payments = MockPayments::new();
        payments
            .expect_create_session()
            .returning(|r| Ok(session_for(&r.order_id)));
        payments.expect_teardown().returning(|_| Ok(()));

        let coordinator = coordinator(orders, payments);
        coordinator.commit(fx.request()).await.unwrap();

        assert_matches!(
            coordinator.cancel().await,
            Err(ServiceError::CancellationFailed { order_id, .. }) if order_id == "1005"
        );
        assert_eq!(
            coordinator.pending_order().unwrap().status,
            OrderStatus::Pending
        );
    }

    #[tokio::test]
    async fn confirmation_checks_the_amount() {
        let fx = Fixture::new();
        let mut orders = MockOrders::new();
        orders
            .expect_create_order()
            .returning(|_| Ok(created("1006")));
        orders
            .expect_confirm_order()
            .times(1)
            .returning(|_, _| Ok(OrderStatus::Confirmed));

        let mut payments = MockPayments::new();
        payments
            .expect_create_session()
            .returning(|r| Ok(session_for(&r.order_id)));
        payments.expect_teardown().times(1).returning(|_| Ok(()));

        let coordinator = coordinator(orders, payments);
        coordinator.commit(fx.request()).await.unwrap();

        let mut confirmation = PaymentConfirmation {
            event_id: "evt_1".into(),
            order_id: "1006".into(),
            status: ConfirmationStatus::Paid,
            amount: Some(dec!(89.00)),
            transaction_ref: None,
        };
        assert_matches!(
            coordinator.confirm(&confirmation).await,
            Err(ServiceError::Conflict(_))
        );

        confirmation.amount = Some(dec!(90.00));
        assert_eq!(
            coordinator.confirm(&confirmation).await.unwrap(),
            ConfirmationOutcome::Confirmed {
                order_id: "1006".into()
            }
        );
        assert_eq!(
            coordinator.confirm(&confirmation).await.unwrap(),
            ConfirmationOutcome::AlreadyConfirmed {
                order_id: "1006".into()
            }
        );
        assert_eq!(
            coordinator.client_route(&ClientPaymentSignal::Succeeded),
            ClientRoute::OrderConfirmed
        );
    }

    #[tokio::test]
    async fn client_success_signal_does_not_confirm() {
        let fx = Fixture::new();
        let mut orders = MockOrders::new();
        orders
            .expect_create_order()
            .returning(|_| Ok(created("1007")));
        orders.expect_confirm_order().never();

        let mut payments = MockPayments::new();
        payments
            .expect_create_session()
            .returning(|r| Ok(session_for(&r.order_id)));
        payments
            .expect_on_submit()
            .returning(|_, _| Ok(ClientPaymentSignal::Succeeded));

        let coordinator = coordinator(orders, payments);
        coordinator.commit(fx.request()).await.unwrap();

        let route = coordinator
            .submit_payment_form(serde_json::json!({"card": "tok"}))
            .await
            .unwrap();
        assert_eq!(route, ClientRoute::AwaitConfirmation);
        assert_eq!(
            coordinator.pending_order().unwrap().status,
            OrderStatus::Pending
        );
    }

    #[tokio::test]
    async fn detached_decline_leaves_backend_untouched() {
        let mut orders = MockOrders::new();
        orders.expect_confirm_order().never();
        let confirmation = PaymentConfirmation {
            event_id: "evt_9".into(),
            order_id: "77".into(),
            status: ConfirmationStatus::Declined,
            amount: None,
            transaction_ref: None,
        };
        assert_eq!(
            OrderCommitCoordinator::confirm_detached(&orders, &confirmation)
                .await
                .unwrap(),
            ConfirmationOutcome::Declined {
                order_id: "77".into()
            }
        );
    }
}
