#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::Value;
use storefront_checkout::{
    clients::{CouponValidator, OrderBackend, PaymentSessionAdapter, ShippingZoneSource},
    events::{CheckoutEvent, EventSender},
    models::{
        CallbackUrls, CartLine, CartSnapshot, ClientPaymentSignal, CouponValidation,
        CouponValidationRequest, OrderCreated, OrderPayload, OrderStatus, PaymentConfirmation,
        PaymentSession, PaymentSessionRequest, PersonalData, RegionDirectory, ShippingZone,
        ZoneLookupRequest, ZoneMethod,
    },
    services::checkout::{
        CheckoutBackends, CheckoutServices, CheckoutSession, CheckoutSettings, FreeShippingPolicy,
    },
    ServiceError,
};
use tokio::sync::{mpsc, Notify};

/// Ordered record of every external call the fakes receive.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

/// Holds a fake call until the test releases it.
#[derive(Default)]
pub struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }

    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

#[derive(Debug, Clone)]
pub struct CouponRule {
    pub discount: Decimal,
    pub free_shipping: bool,
    pub min_subtotal: Option<Decimal>,
}

impl CouponRule {
    pub fn fixed(discount: Decimal) -> Self {
        Self {
            discount,
            free_shipping: false,
            min_subtotal: None,
        }
    }

    pub fn free_shipping() -> Self {
        Self {
            discount: Decimal::ZERO,
            free_shipping: true,
            min_subtotal: None,
        }
    }

    pub fn with_min_subtotal(mut self, min: Decimal) -> Self {
        self.min_subtotal = Some(min);
        self
    }
}

/// Commerce backend fake: coupons, shipping zones and orders.
pub struct FakeCommerce {
    pub calls: CallLog,
    zones: Mutex<Vec<ShippingZone>>,
    zones_unavailable: AtomicBool,
    coupons: Mutex<HashMap<String, CouponRule>>,
    coupon_transport_down: AtomicBool,
    orders: Mutex<HashMap<String, OrderStatus>>,
    next_order: AtomicU64,
    recorded_total_override: Mutex<Option<Decimal>>,
    fail_order_creation: AtomicBool,
    fail_cancellation: AtomicBool,
    pub last_order_payload: Mutex<Option<OrderPayload>>,
    gates: Mutex<HashMap<&'static str, Arc<Gate>>>,
}

impl FakeCommerce {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            zones: Mutex::new(default_zones()),
            zones_unavailable: AtomicBool::new(false),
            coupons: Mutex::new(HashMap::new()),
            coupon_transport_down: AtomicBool::new(false),
            orders: Mutex::new(HashMap::new()),
            next_order: AtomicU64::new(1001),
            recorded_total_override: Mutex::new(None),
            fail_order_creation: AtomicBool::new(false),
            fail_cancellation: AtomicBool::new(false),
            last_order_payload: Mutex::new(None),
            gates: Mutex::new(HashMap::new()),
        }
    }

    pub fn add_coupon(&self, code: &str, rule: CouponRule) {
        self.coupons.lock().unwrap().insert(code.to_string(), rule);
    }

    pub fn set_zones_unavailable(&self, down: bool) {
        self.zones_unavailable.store(down, Ordering::SeqCst);
    }

    pub fn set_coupon_transport_down(&self, down: bool) {
        self.coupon_transport_down.store(down, Ordering::SeqCst);
    }

    pub fn record_total_as(&self, total: Decimal) {
        *self.recorded_total_override.lock().unwrap() = Some(total);
    }

    pub fn set_order_creation_failing(&self, failing: bool) {
        self.fail_order_creation.store(failing, Ordering::SeqCst);
    }

    pub fn set_cancellation_failing(&self, failing: bool) {
        self.fail_cancellation.store(failing, Ordering::SeqCst);
    }

    pub fn order_status(&self, order_id: &str) -> Option<OrderStatus> {
        self.orders.lock().unwrap().get(order_id).copied()
    }

    pub fn gate(&self, operation: &'static str) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        self.gates.lock().unwrap().insert(operation, gate.clone());
        gate
    }

    async fn pass_gate(&self, operation: &'static str) {
        let gate = self.gates.lock().unwrap().remove(operation);
        if let Some(gate) = gate {
            gate.pass().await;
        }
    }
}

#[async_trait]
impl CouponValidator for FakeCommerce {
    async fn validate_coupon(
        &self,
        request: &CouponValidationRequest,
    ) -> Result<CouponValidation, ServiceError> {
        self.calls.push(format!("validate_coupon:{}", request.code));
        self.pass_gate("validate_coupon").await;
        if self.coupon_transport_down.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "coupon service unreachable".to_string(),
            ));
        }

        let rule = self.coupons.lock().unwrap().get(&request.code).cloned();
        let Some(rule) = rule else {
            return Ok(CouponValidation::rejected("coupon does not exist"));
        };
        let subtotal: Decimal = request.cart_lines.iter().map(CartLine::line_total).sum();
        if let Some(min) = rule.min_subtotal {
            if subtotal < min {
                return Ok(CouponValidation::rejected(format!(
                    "minimum spend of {} not reached",
                    min
                )));
            }
        }
        Ok(CouponValidation::accepted(rule.discount, rule.free_shipping))
    }
}

#[async_trait]
impl ShippingZoneSource for FakeCommerce {
    async fn lookup_zones(
        &self,
        request: &ZoneLookupRequest,
    ) -> Result<Vec<ShippingZone>, ServiceError> {
        self.calls.push(format!("lookup_zones:{}", request.region));
        self.pass_gate("lookup_zones").await;
        if self.zones_unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "zone service unreachable".to_string(),
            ));
        }
        Ok(self.zones.lock().unwrap().clone())
    }
}

#[async_trait]
impl OrderBackend for FakeCommerce {
    async fn create_order(&self, payload: &OrderPayload) -> Result<OrderCreated, ServiceError> {
        self.calls.push("create_order");
        *self.last_order_payload.lock().unwrap() = Some(payload.clone());
        self.pass_gate("create_order").await;
        if self.fail_order_creation.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "order service unreachable".to_string(),
            ));
        }

        let order_id = self.next_order.fetch_add(1, Ordering::SeqCst).to_string();
        self.orders
            .lock()
            .unwrap()
            .insert(order_id.clone(), OrderStatus::Pending);
        let total = self
            .recorded_total_override
            .lock()
            .unwrap()
            .unwrap_or(payload.total);
        Ok(OrderCreated {
            order_id,
            status: OrderStatus::Pending,
            total: Some(total),
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<OrderStatus, ServiceError> {
        self.calls.push(format!("cancel_order:{}", order_id));
        self.pass_gate("cancel_order").await;
        if self.fail_cancellation.load(Ordering::SeqCst) {
            return Err(ServiceError::ExternalServiceError(
                "order service unreachable".to_string(),
            ));
        }
        let mut orders = self.orders.lock().unwrap();
        let status = orders
            .entry(order_id.to_string())
            .or_insert(OrderStatus::Cancelled);
        if status.is_open() {
            *status = OrderStatus::Cancelled;
        }
        Ok(*status)
    }

    async fn confirm_order(
        &self,
        order_id: &str,
        _confirmation: &PaymentConfirmation,
    ) -> Result<OrderStatus, ServiceError> {
        self.calls.push(format!("confirm_order:{}", order_id));
        let mut orders = self.orders.lock().unwrap();
        let status = orders
            .entry(order_id.to_string())
            .or_insert(OrderStatus::Pending);
        if status.is_open() {
            *status = OrderStatus::Confirmed;
        }
        Ok(*status)
    }
}

/// Payment gateway fake.
pub struct FakeGateway {
    pub calls: CallLog,
    next_token: AtomicU64,
    failures_left: AtomicUsize,
    submit_signal: Mutex<ClientPaymentSignal>,
    pub requests: Mutex<Vec<PaymentSessionRequest>>,
    gate: Mutex<Option<Arc<Gate>>>,
}

impl FakeGateway {
    pub fn new(calls: CallLog) -> Self {
        Self {
            calls,
            next_token: AtomicU64::new(1),
            failures_left: AtomicUsize::new(0),
            submit_signal: Mutex::new(ClientPaymentSignal::Succeeded),
            requests: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    pub fn fail_next_sessions(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    pub fn answer_submit_with(&self, signal: ClientPaymentSignal) {
        *self.submit_signal.lock().unwrap() = signal;
    }

    pub fn gate_session_creation(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(gate.clone());
        gate
    }
}

#[async_trait]
impl PaymentSessionAdapter for FakeGateway {
    async fn create_session(
        &self,
        request: &PaymentSessionRequest,
    ) -> Result<PaymentSession, ServiceError> {
        self.calls.push(format!("create_session:{}", request.order_id));
        self.requests.lock().unwrap().push(request.clone());
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.pass().await;
        }

        let fail = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            return Err(ServiceError::ExternalServiceError(
                "gateway timed out".to_string(),
            ));
        }

        let token = format!("tok-{}", self.next_token.fetch_add(1, Ordering::SeqCst));
        Ok(PaymentSession {
            token,
            gateway_public_key: "pk_test_checkout".to_string(),
            correlation_order_id: request.order_id.clone(),
        })
    }

    async fn on_submit(
        &self,
        session: &PaymentSession,
        _form_data: Value,
    ) -> Result<ClientPaymentSignal, ServiceError> {
        self.calls.push(format!("submit:{}", session.token));
        Ok(self.submit_signal.lock().unwrap().clone())
    }

    async fn teardown(&self, session: &PaymentSession) -> Result<(), ServiceError> {
        self.calls.push(format!("teardown:{}", session.token));
        Ok(())
    }
}

pub fn zone(name: &str, methods: &[(&str, Decimal, bool)]) -> ShippingZone {
    ShippingZone {
        id: name.to_lowercase().replace(' ', "-"),
        name: name.to_string(),
        locations: Vec::new(),
        methods: methods
            .iter()
            .map(|(id, cost, enabled)| ZoneMethod {
                id: id.to_string(),
                title: id.to_string(),
                cost: *cost,
                enabled: *enabled,
            })
            .collect(),
    }
}

fn default_zones() -> Vec<ShippingZone> {
    vec![
        zone(
            "Miraflores",
            &[
                ("standard", dec!(10.00), true),
                ("express", dec!(25.00), true),
                ("pickup", dec!(0.00), false),
            ],
        ),
        zone("Barranco", &[("standard", dec!(12.00), true)]),
        zone("Arequipa", &[("standard", dec!(18.00), true)]),
    ]
}

pub fn region_directory() -> RegionDirectory {
    let mut names = BTreeMap::new();
    names.insert("ARE".to_string(), "Arequipa".to_string());
    names.insert("CUS".to_string(), "Cusco".to_string());
    RegionDirectory::new(["LIM", "CAL"], names)
}

pub fn buyer() -> PersonalData {
    PersonalData {
        first_name: "Ana".into(),
        surnames: "Quispe Mamani".into(),
        document_id: "45879632".into(),
        email: "ana@example.com".into(),
        phone: "+51 987 654 321".into(),
    }
}

pub fn cart(lines: &[(u64, u32, Decimal)]) -> CartSnapshot {
    CartSnapshot::new(
        lines
            .iter()
            .map(|(product_id, quantity, price)| CartLine::new(*product_id, *quantity, *price))
            .collect(),
    )
}

/// Checkout services wired to the fakes.
pub struct TestCheckout {
    pub services: CheckoutServices,
    pub commerce: Arc<FakeCommerce>,
    pub gateway: Arc<FakeGateway>,
    pub calls: CallLog,
    events: Mutex<mpsc::Receiver<CheckoutEvent>>,
}

impl TestCheckout {
    pub fn new() -> Self {
        Self::with_threshold(Some(dec!(150.00)))
    }

    pub fn with_threshold(threshold: Option<Decimal>) -> Self {
        let calls = CallLog::default();
        let commerce = Arc::new(FakeCommerce::new(calls.clone()));
        let gateway = Arc::new(FakeGateway::new(calls.clone()));
        let (sender, events) = EventSender::channel(1024);

        let settings = CheckoutSettings {
            country_code: "PE".to_string(),
            currency: "PEN".to_string(),
            free_shipping: FreeShippingPolicy::new(threshold),
            regions: region_directory(),
            shipping_cache_ttl: Some(Duration::from_secs(600)),
            coupon_debounce: Duration::from_millis(400),
            callback_urls: CallbackUrls {
                success: "https://shop.test/checkout/{order_id}/success".to_string(),
                failure: "https://shop.test/checkout/{order_id}/failure".to_string(),
                cancel: "https://shop.test/checkout/{order_id}/cancel".to_string(),
            },
        };
        let services = CheckoutServices::new(
            settings,
            CheckoutBackends {
                coupons: commerce.clone(),
                zones: commerce.clone(),
                orders: commerce.clone(),
                payments: gateway.clone(),
            },
            sender,
        );

        Self {
            services,
            commerce,
            gateway,
            calls,
            events: Mutex::new(events),
        }
    }

    /// Fills personal data and a Lima address, and selects the standard method.
    pub async fn at_shipping_selected(&self, cart: CartSnapshot) -> Arc<CheckoutSession> {
        let session = self.services.new_session(cart).unwrap();
        session.submit_personal_data(buyer()).unwrap();
        session.select_region("LIM").unwrap();
        session.set_district("Miraflores").unwrap();
        session.set_postal_code("15074").unwrap();
        session.resolve_shipping().await.unwrap();
        session.select_shipping_method("standard").unwrap();
        session
    }

    /// A session on the payment step with a card chosen.
    pub async fn ready_to_submit(&self, cart: CartSnapshot) -> Arc<CheckoutSession> {
        let session = self.at_shipping_selected(cart).await;
        session.advance_to_payment().unwrap();
        session.select_payment_method("card").unwrap();
        session
    }

    pub fn drain_events(&self) -> Vec<CheckoutEvent> {
        let mut rx = self.events.lock().unwrap();
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }
}
