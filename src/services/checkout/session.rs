use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::coordinator::{
    CancellationOutcome, CommitOutcome, CommitRequest, ConfirmationOutcome,
    OrderCommitCoordinator,
};
use super::coupons::{CouponCheck, CouponService};
use super::debounce::Debouncer;
use super::free_shipping::FreeShippingPolicy;
use super::pricing::{PriceBreakdown, PricingEngine, PricingInputs};
use super::registry::CheckoutRegistry;
use super::shipping_zones::{reconcile_selection, ResolutionSource, ResolvedMethods, ShippingZoneResolver};
use super::state_machine::{required_shipping_fields, CheckoutStateMachine, CheckoutStep};
use crate::errors::ServiceError;
use crate::events::{CheckoutEvent, EventSender};
use crate::models::{
    Address, AppliedCoupon, CartSnapshot, ClientPaymentSignal, ClientRoute, ConfirmationStatus,
    OrderStatus, PaymentConfirmation, PaymentSession, PersonalData, ShippingMethod,
};

/// Message for the shopper, shown once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notice {
    pub kind: NoticeKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NoticeKind {
    CouponRemoved,
    ShippingUnavailable,
    PaymentDeclined,
    PaymentError,
}

/// Outcome of an async shipping lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShippingResolution {
    Resolved(ResolvedMethods),
    /// The address changed while the lookup was in flight; the result was dropped.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponRevalidation {
    NoCoupon,
    /// The coupon was already validated for the current cart.
    Current,
    Kept(AppliedCoupon),
    Removed { code: String, reason: String },
    /// The cart or coupon changed while the validator was answering.
    Superseded,
    /// A later debounced call took over.
    Debounced,
}

/// Snapshot of the checkout for rendering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutView {
    pub session_id: Uuid,
    pub step: CheckoutStep,
    pub cart: CartSnapshot,
    pub personal_data: Option<PersonalData>,
    pub address: Address,
    pub required_shipping_fields: Vec<String>,
    pub shipping_methods: Vec<ShippingMethod>,
    pub shipping_unavailable: bool,
    pub selected_shipping_method: Option<String>,
    pub coupon_code: Option<String>,
    pub coupon_needs_revalidation: bool,
    pub payment_method: Option<String>,
    pub breakdown: PriceBreakdown,
    pub order_id: Option<String>,
    pub order_status: Option<OrderStatus>,
    pub payment_session: Option<PaymentSession>,
    pub can_cancel: bool,
    pub notices: Vec<Notice>,
}

/// Per-session configuration.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub country_code: String,
    pub free_shipping: FreeShippingPolicy,
}

#[derive(Debug)]
struct SessionState {
    machine: CheckoutStateMachine,
    cart: CartSnapshot,
    personal_data: Option<PersonalData>,
    address: Address,
    resolved: Option<ResolvedMethods>,
    selected_method: Option<String>,
    coupon: Option<AppliedCoupon>,
    payment_method: Option<String>,
    address_generation: u64,
    notices: Vec<Notice>,
}

impl SessionState {
    fn selected_method(&self) -> Option<&ShippingMethod> {
        let selected = self.selected_method.as_deref()?;
        self.resolved
            .as_ref()
            .and_then(|r| r.methods.iter().find(|m| m.id == selected))
    }

    fn coupon_is_stale(&self) -> bool {
        self.coupon
            .as_ref()
            .map_or(false, |c| c.validated_cart != self.cart.fingerprint())
    }

    fn ensure_step(&self, expected: CheckoutStep, action: &str) -> Result<(), ServiceError> {
        if self.machine.step() != expected {
            return Err(ServiceError::InvalidOperation(format!(
                "cannot {} while {}",
                action,
                self.machine.step()
            )));
        }
        Ok(())
    }

    fn ensure_cart_editable(&self, action: &str) -> Result<(), ServiceError> {
        match self.machine.step() {
            CheckoutStep::AwaitingPaymentCompletion | CheckoutStep::Completed => {
                Err(ServiceError::InvalidOperation(format!(
                    "cannot {} while {}",
                    action,
                    self.machine.step()
                )))
            }
            _ => Ok(()),
        }
    }

    fn clear_shipping_selection(&mut self) {
        self.address_generation += 1;
        self.resolved = None;
        self.selected_method = None;
    }
}

/// One shopper's checkout. All state lives behind a mutex that is never held across
/// an external call; results of calls that were overtaken by newer input are dropped.
pub struct CheckoutSession {
    id: Uuid,
    settings: SessionSettings,
    resolver: Arc<ShippingZoneResolver>,
    coupons: CouponService,
    coordinator: OrderCommitCoordinator,
    pricing: PricingEngine,
    debouncer: Debouncer,
    registry: Arc<CheckoutRegistry>,
    events: EventSender,
    state: Mutex<SessionState>,
}

impl std::fmt::Debug for CheckoutSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckoutSession")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl CheckoutSession {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: SessionSettings,
        cart: CartSnapshot,
        resolver: Arc<ShippingZoneResolver>,
        coupons: CouponService,
        coordinator: OrderCommitCoordinator,
        debouncer: Debouncer,
        registry: Arc<CheckoutRegistry>,
        events: EventSender,
    ) -> Self {
        let id = Uuid::new_v4();
        let address = Address::new(settings.country_code.clone());
        events.send_or_log(CheckoutEvent::CheckoutStarted {
            session_id: id,
            at: Utc::now(),
        });

        Self {
            id,
            settings,
            resolver,
            coupons,
            coordinator,
            pricing: PricingEngine::new(),
            debouncer,
            registry,
            events,
            state: Mutex::new(SessionState {
                machine: CheckoutStateMachine::new(),
                cart,
                personal_data: None,
                address,
                resolved: None,
                selected_method: None,
                coupon: None,
                payment_method: None,
                address_generation: 0,
                notices: Vec::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn step(&self) -> CheckoutStep {
        self.lock().machine.step()
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn record_step(&self, from: CheckoutStep, to: CheckoutStep) {
        if from != to {
            self.events.send_or_log(CheckoutEvent::StepChanged {
                session_id: self.id,
                from,
                to,
            });
        }
    }

    /// Replaces the cart snapshot. An applied coupon becomes stale until revalidated.
    pub fn update_cart(&self, cart: CartSnapshot) -> Result<PriceBreakdown, ServiceError> {
        cart.validate()?;
        {
            let mut state = self.lock();
            state.ensure_cart_editable("change the cart")?;
            state.cart = cart;
        }
        Ok(self.breakdown())
    }

    pub fn submit_personal_data(&self, data: PersonalData) -> Result<CheckoutStep, ServiceError> {
        let (from, to) = {
            let mut state = self.lock();
            let from = state.machine.step();
            let to = state.machine.advance_to_shipping(&data)?;
            state.personal_data = Some(data);
            (from, to)
        };
        self.record_step(from, to);
        Ok(to)
    }

    /// Changing the region always drops the district, postal code and shipping selection.
    pub fn select_region(&self, region_code: &str) -> Result<Vec<&'static str>, ServiceError> {
        let region_code = region_code.trim();
        if region_code.is_empty() {
            return Err(ServiceError::ValidationError(
                "shipping.region is required".to_string(),
            ));
        }
        let mut state = self.lock();
        state.ensure_step(CheckoutStep::CollectingShippingAddress, "change the address")?;
        state.address.set_region(region_code, self.resolver.directory());
        state.clear_shipping_selection();
        Ok(required_shipping_fields(&state.address))
    }

    pub fn set_district(&self, district: &str) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.ensure_step(CheckoutStep::CollectingShippingAddress, "change the address")?;
        let before = state.address.zone_key();
        state.address.district_or_province = district.trim().to_string();
        if state.address.zone_key() != before {
            state.clear_shipping_selection();
        }
        Ok(())
    }

    pub fn set_postal_code(&self, postal_code: &str) -> Result<(), ServiceError> {
        let mut state = self.lock();
        state.ensure_step(CheckoutStep::CollectingShippingAddress, "change the address")?;
        state.address.postal_code = postal_code.trim().to_string();
        Ok(())
    }

    /// Looks up the shipping methods for the current address.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn resolve_shipping(&self) -> Result<ShippingResolution, ServiceError> {
        let (address, generation) = {
            let state = self.lock();
            state.ensure_step(CheckoutStep::CollectingShippingAddress, "list shipping methods")?;
            (state.address.clone(), state.address_generation)
        };

        let resolved = self.resolver.resolve(&address).await?;

        let mut state = self.lock();
        if state.address_generation != generation {
            info!("Discarding shipping methods for a superseded address {}", resolved.key);
            return Ok(ShippingResolution::Superseded);
        }

        let previous = state.selected_method.clone();
        state.selected_method = reconcile_selection(&resolved, previous.as_deref());
        if previous.is_some() && state.selected_method.is_none() {
            info!("Selected shipping method is not offered for {}", resolved.key);
        }

        let degraded = resolved.source == ResolutionSource::Unavailable;
        if degraded {
            state.notices.push(Notice {
                kind: NoticeKind::ShippingUnavailable,
                message: "Shipping methods could not be loaded. Check the address and try again."
                    .to_string(),
            });
        }
        state.resolved = Some(resolved.clone());
        drop(state);

        self.events.send_or_log(CheckoutEvent::ShippingResolved {
            session_id: self.id,
            key: resolved.key.clone(),
            methods: resolved.methods.len(),
            degraded,
        });
        Ok(ShippingResolution::Resolved(resolved))
    }

    pub fn select_shipping_method(&self, method_id: &str) -> Result<PriceBreakdown, ServiceError> {
        {
            let mut state = self.lock();
            state.ensure_step(CheckoutStep::CollectingShippingAddress, "choose a shipping method")?;
            let offered = state
                .resolved
                .as_ref()
                .map_or(false, |r| r.contains(method_id));
            if !offered {
                return Err(ServiceError::StaleShippingSelection(format!(
                    "shipping method '{}' is not available for this address",
                    method_id
                )));
            }
            state.selected_method = Some(method_id.to_string());
        }
        Ok(self.breakdown())
    }

    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn apply_coupon(&self, code: &str) -> Result<PriceBreakdown, ServiceError> {
        let cart = {
            let state = self.lock();
            state.ensure_cart_editable("apply a coupon")?;
            state.cart.clone()
        };

        let applied = self.coupons.apply(code, &cart).await?;

        {
            let mut state = self.lock();
            state.ensure_cart_editable("apply a coupon")?;
            state.coupon = Some(applied.clone());
        }
        self.events.send_or_log(CheckoutEvent::CouponApplied {
            session_id: self.id,
            code: applied.code().to_string(),
            discount: applied.discount_amount,
        });
        Ok(self.breakdown())
    }

    pub fn remove_coupon(&self) -> Result<PriceBreakdown, ServiceError> {
        let removed = {
            let mut state = self.lock();
            state.ensure_cart_editable("remove a coupon")?;
            state.coupon.take()
        };
        if let Some(coupon) = removed {
            self.events.send_or_log(CheckoutEvent::CouponRemoved {
                session_id: self.id,
                code: coupon.code().to_string(),
                reason: "removed by shopper".to_string(),
            });
        }
        Ok(self.breakdown())
    }

    /// Re-checks the applied coupon if the cart changed since it was validated.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn revalidate_coupon(&self) -> Result<CouponRevalidation, ServiceError> {
        let (coupon, cart) = {
            let state = self.lock();
            match &state.coupon {
                None => return Ok(CouponRevalidation::NoCoupon),
                Some(_) if !state.coupon_is_stale() => return Ok(CouponRevalidation::Current),
                Some(coupon) => (coupon.clone(), state.cart.clone()),
            }
        };

        let check = self.coupons.revalidate(&coupon, &cart).await?;

        let mut state = self.lock();
        let same_coupon = state.coupon.as_ref().map(AppliedCoupon::code) == Some(coupon.code());
        if !same_coupon || state.cart.fingerprint() != cart.fingerprint() {
            return Ok(CouponRevalidation::Superseded);
        }

        match check {
            CouponCheck::Kept(fresh) => {
                state.coupon = Some(fresh.clone());
                drop(state);
                self.events.send_or_log(CheckoutEvent::CouponApplied {
                    session_id: self.id,
                    code: fresh.code().to_string(),
                    discount: fresh.discount_amount,
                });
                Ok(CouponRevalidation::Kept(fresh))
            }
            CouponCheck::Removed { code, reason } => {
                state.coupon = None;
                state.notices.push(Notice {
                    kind: NoticeKind::CouponRemoved,
                    message: format!("Coupon {} was removed: {}", code, reason),
                });
                drop(state);
                warn!("Coupon {} removed after cart change: {}", code, reason);
                self.events.send_or_log(CheckoutEvent::CouponRemoved {
                    session_id: self.id,
                    code: code.clone(),
                    reason: reason.clone(),
                });
                Ok(CouponRevalidation::Removed { code, reason })
            }
        }
    }

    /// Debounced variant for bursts of cart edits; only the last caller in a quiet
    /// window reaches the validator.
    pub async fn revalidate_coupon_debounced(&self) -> Result<CouponRevalidation, ServiceError> {
        if !self.debouncer.settle().await {
            return Ok(CouponRevalidation::Debounced);
        }
        self.revalidate_coupon().await
    }

    pub fn advance_to_payment(&self) -> Result<CheckoutStep, ServiceError> {
        let (from, to) = {
            let mut state = self.lock();
            let from = state.machine.step();
            let state = &mut *state;
            let resolved: &[ShippingMethod] = state
                .resolved
                .as_ref()
                .map(|r| r.methods.as_slice())
                .unwrap_or(&[]);
            let to = state.machine.advance_to_payment(
                &state.address,
                state.selected_method.as_deref(),
                resolved,
            )?;
            (from, to)
        };
        self.record_step(from, to);
        Ok(to)
    }

    /// Returns to the shipping step keeping every entered field.
    pub fn back_to_shipping(&self) -> Result<CheckoutStep, ServiceError> {
        let (from, to) = {
            let mut state = self.lock();
            let from = state.machine.step();
            (from, state.machine.back_to_shipping()?)
        };
        self.record_step(from, to);
        Ok(to)
    }

    pub fn select_payment_method(&self, method_id: &str) -> Result<(), ServiceError> {
        let method_id = method_id.trim();
        if method_id.is_empty() {
            return Err(ServiceError::ValidationError(
                "payment_method is required".to_string(),
            ));
        }
        let mut state = self.lock();
        state.ensure_step(CheckoutStep::SelectingPaymentMethod, "choose a payment method")?;
        state.payment_method = Some(method_id.to_string());
        Ok(())
    }

    /// Submits the order: revalidates a stale coupon, then runs the two-phase commit.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn submit_order(self: &Arc<Self>) -> Result<CommitOutcome, ServiceError> {
        {
            let state = self.lock();
            state.ensure_step(CheckoutStep::SelectingPaymentMethod, "submit the order")?;
        }

        self.debouncer.cancel_pending();
        match self.revalidate_coupon().await? {
            CouponRevalidation::Removed { code, reason } => {
                return Err(ServiceError::CouponRejected(format!(
                    "coupon {} no longer applies: {}",
                    code, reason
                )));
            }
            CouponRevalidation::Superseded => {
                return Err(ServiceError::Conflict(
                    "the cart changed while the order was being submitted".to_string(),
                ));
            }
            _ => {}
        }

        let (from, snapshot) = {
            let mut state = self.lock();
            if state.cart.is_empty() {
                return Err(ServiceError::ValidationError(
                    "the cart is empty".to_string(),
                ));
            }
            if state.coupon_is_stale() {
                return Err(ServiceError::Conflict(
                    "the cart changed while the order was being submitted".to_string(),
                ));
            }
            let customer = state.personal_data.clone().ok_or_else(|| {
                ServiceError::ValidationError("personal data is required".to_string())
            })?;
            state.address.validate_complete()?;
            let method = state.selected_method().cloned().ok_or_else(|| {
                ServiceError::StaleShippingSelection("no shipping method selected".to_string())
            })?;

            let from = state.machine.step();
            let payment_method = state.payment_method.clone();
            state.machine.begin_payment(payment_method.as_deref())?;

            let breakdown = self.pricing.compute(&PricingInputs {
                cart: &state.cart,
                coupon: state.coupon.as_ref(),
                shipping_method: Some(&method),
                policy: &self.settings.free_shipping,
            });
            (
                from,
                (
                    state.cart.clone(),
                    customer,
                    state.address.clone(),
                    method,
                    state.coupon.clone(),
                    breakdown,
                    payment_method.unwrap_or_default(),
                ),
            )
        };
        self.record_step(from, CheckoutStep::AwaitingPaymentCompletion);

        let (cart, customer, address, method, coupon, breakdown, payment_method) = snapshot;
        let result = self
            .coordinator
            .commit(CommitRequest {
                cart: &cart,
                customer: &customer,
                address: &address,
                shipping_method: &method,
                coupon: coupon.as_ref(),
                breakdown: &breakdown,
                payment_method_id: &payment_method,
            })
            .await;

        if let Some(order) = self.coordinator.pending_order() {
            if order.status.is_open() {
                self.registry.register(&order.id, self);
            }
        }

        match result {
            Ok(outcome) => {
                self.events.send_or_log(CheckoutEvent::OrderCreated {
                    session_id: self.id,
                    order_id: outcome.order.id.clone(),
                    total: outcome.order.total,
                });
                self.events.send_or_log(CheckoutEvent::PaymentSessionOpened {
                    session_id: self.id,
                    order_id: outcome.order.id.clone(),
                });
                Ok(outcome)
            }
            Err(ServiceError::PaymentSessionFailed { order_id, reason }) => {
                self.events.send_or_log(CheckoutEvent::PaymentSessionFailed {
                    session_id: self.id,
                    order_id: order_id.clone(),
                    reason: reason.clone(),
                });
                Err(ServiceError::PaymentSessionFailed { order_id, reason })
            }
            Err(ServiceError::CheckoutCancelled(order_id)) => {
                self.finish_cancellation(&order_id);
                Err(ServiceError::CheckoutCancelled(order_id))
            }
            Err(ServiceError::CancellationFailed { order_id, reason }) => {
                self.events.send_or_log(CheckoutEvent::CancellationFailed {
                    session_id: self.id,
                    order_id: order_id.clone(),
                    reason: reason.clone(),
                });
                Err(ServiceError::CancellationFailed { order_id, reason })
            }
            Err(err) => {
                warn!("Order submission failed: {}", err);
                let moved = {
                    let mut state = self.lock();
                    let from = state.machine.step();
                    state.machine.fail().ok().map(|to| (from, to))
                };
                if let Some((from, to)) = moved {
                    self.record_step(from, to);
                }
                Err(err)
            }
        }
    }

    /// Opens a fresh payment form for the order that already exists.
    pub async fn retry_payment_session(&self) -> Result<PaymentSession, ServiceError> {
        {
            let state = self.lock();
            state.ensure_step(CheckoutStep::AwaitingPaymentCompletion, "retry the payment")?;
        }
        match self.coordinator.retry_payment_session().await {
            Ok(session) => {
                self.events.send_or_log(CheckoutEvent::PaymentSessionOpened {
                    session_id: self.id,
                    order_id: session.correlation_order_id.clone(),
                });
                Ok(session)
            }
            Err(ServiceError::PaymentSessionFailed { order_id, reason }) => {
                self.events.send_or_log(CheckoutEvent::PaymentSessionFailed {
                    session_id: self.id,
                    order_id: order_id.clone(),
                    reason: reason.clone(),
                });
                Err(ServiceError::PaymentSessionFailed { order_id, reason })
            }
            Err(err) => Err(err),
        }
    }

    /// Cancels the pending order. Always reachable while awaiting payment, and safe to
    /// repeat once cancelled.
    #[instrument(skip(self), fields(session_id = %self.id))]
    pub async fn cancel(&self) -> Result<CancellationOutcome, ServiceError> {
        {
            let state = self.lock();
            match state.machine.step() {
                CheckoutStep::AwaitingPaymentCompletion | CheckoutStep::Cancelled => {}
                from => {
                    return Err(ServiceError::InvalidTransition {
                        from,
                        to: CheckoutStep::Cancelled,
                    })
                }
            }
        }

        match self.coordinator.cancel().await {
            Ok(CancellationOutcome::Cancelled { order_id }) => {
                self.finish_cancellation(&order_id);
                Ok(CancellationOutcome::Cancelled { order_id })
            }
            Ok(other) => Ok(other),
            Err(ServiceError::CancellationFailed { order_id, reason }) => {
                self.events.send_or_log(CheckoutEvent::CancellationFailed {
                    session_id: self.id,
                    order_id: order_id.clone(),
                    reason: reason.clone(),
                });
                Err(ServiceError::CancellationFailed { order_id, reason })
            }
            Err(err) => Err(err),
        }
    }

    /// Moves to `Cancelled` once; later calls for the same cancellation are no-ops.
    fn finish_cancellation(&self, order_id: &str) {
        self.registry.remove(order_id);
        let moved = {
            let mut state = self.lock();
            let from = state.machine.step();
            state.machine.cancel().ok().map(|to| (from, to))
        };
        let Some((from, to)) = moved else {
            return;
        };
        self.record_step(from, to);
        self.events.send_or_log(CheckoutEvent::OrderCancelled {
            session_id: self.id,
            order_id: order_id.to_string(),
        });
    }

    /// Back to payment method selection after a cancelled or failed attempt, without
    /// losing the entered data.
    pub fn restart_payment(&self) -> Result<CheckoutStep, ServiceError> {
        let (from, to) = {
            let mut state = self.lock();
            let from = state.machine.step();
            if !matches!(from, CheckoutStep::Cancelled | CheckoutStep::Failed) {
                return Err(ServiceError::InvalidTransition {
                    from,
                    to: CheckoutStep::SelectingPaymentMethod,
                });
            }
            self.coordinator.reset()?;
            (from, state.machine.restart_payment()?)
        };
        self.record_step(from, to);
        Ok(to)
    }

    /// Applies the authoritative server-side confirmation.
    #[instrument(skip(self, confirmation), fields(session_id = %self.id, order_id = %confirmation.order_id))]
    pub async fn confirm_payment(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        if confirmation.status == ConfirmationStatus::Declined {
            return self.payment_declined(confirmation).await;
        }

        let outcome = self.coordinator.confirm(confirmation).await?;
        if let ConfirmationOutcome::Confirmed { order_id } = &outcome {
            let moved = {
                let mut state = self.lock();
                let from = state.machine.step();
                state.machine.complete().ok().map(|to| (from, to))
            };
            if let Some((from, to)) = moved {
                self.record_step(from, to);
            }
            self.registry.remove(order_id);
            self.events.send_or_log(CheckoutEvent::PaymentConfirmed {
                order_id: order_id.clone(),
                status: self
                    .coordinator
                    .pending_order()
                    .map_or(OrderStatus::Confirmed, |o| o.status),
            });
        }
        Ok(outcome)
    }

    /// Records a declined payment. The order stays pending so the shopper can retry
    /// or cancel.
    pub async fn payment_declined(
        &self,
        confirmation: &PaymentConfirmation,
    ) -> Result<ConfirmationOutcome, ServiceError> {
        let declined = PaymentConfirmation {
            status: ConfirmationStatus::Declined,
            ..confirmation.clone()
        };
        let outcome = self.coordinator.confirm(&declined).await?;
        if let ConfirmationOutcome::Declined { order_id } = &outcome {
            self.lock().notices.push(Notice {
                kind: NoticeKind::PaymentDeclined,
                message: "The payment was declined. Try again or cancel the order.".to_string(),
            });
            self.events.send_or_log(CheckoutEvent::PaymentDeclined {
                order_id: order_id.clone(),
            });
        }
        Ok(outcome)
    }

    /// Routes the shopper after a client-side payment signal. Never changes the order.
    pub fn client_callback(&self, signal: &ClientPaymentSignal) -> ClientRoute {
        let route = self.coordinator.client_route(signal);
        if let ClientPaymentSignal::Failed { reason } = signal {
            self.lock().notices.push(Notice {
                kind: NoticeKind::PaymentError,
                message: reason.clone(),
            });
        }
        route
    }

    /// Forwards the payment form to the gateway.
    pub async fn submit_payment_form(&self, form_data: Value) -> Result<ClientRoute, ServiceError> {
        {
            let state = self.lock();
            state.ensure_step(CheckoutStep::AwaitingPaymentCompletion, "submit a payment")?;
        }
        self.coordinator.submit_payment_form(form_data).await
    }

    pub fn breakdown(&self) -> PriceBreakdown {
        let state = self.lock();
        self.pricing.compute(&PricingInputs {
            cart: &state.cart,
            coupon: state.coupon.as_ref(),
            shipping_method: state.selected_method(),
            policy: &self.settings.free_shipping,
        })
    }

    /// Current state for rendering. Drains the pending notices.
    pub fn view(&self) -> CheckoutView {
        let breakdown = self.breakdown();
        let order = self.coordinator.pending_order();
        let payment_session = self.coordinator.payment_session();

        let mut state = self.lock();
        let step = state.machine.step();
        CheckoutView {
            session_id: self.id,
            step,
            cart: state.cart.clone(),
            personal_data: state.personal_data.clone(),
            address: state.address.clone(),
            required_shipping_fields: required_shipping_fields(&state.address)
                .into_iter()
                .map(str::to_string)
                .collect(),
            shipping_methods: state
                .resolved
                .as_ref()
                .map(|r| r.methods.clone())
                .unwrap_or_default(),
            shipping_unavailable: state
                .resolved
                .as_ref()
                .map_or(false, |r| r.source == ResolutionSource::Unavailable),
            selected_shipping_method: state.selected_method.clone(),
            coupon_code: state.coupon.as_ref().map(|c| c.code().to_string()),
            coupon_needs_revalidation: state.coupon_is_stale(),
            payment_method: state.payment_method.clone(),
            breakdown,
            order_id: order.as_ref().map(|o| o.id.clone()),
            order_status: order.as_ref().map(|o| o.status),
            payment_session,
            can_cancel: step == CheckoutStep::AwaitingPaymentCompletion,
            notices: std::mem::take(&mut state.notices),
        }
    }
}

impl Drop for CheckoutSession {
    fn drop(&mut self) {
        if let Some(order) = self.coordinator.pending_order() {
            self.registry.release(&order.id);
        }
    }
}
