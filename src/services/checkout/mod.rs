//! Checkout orchestration: pricing, shipping zones, coupons, the step machine and
//! the two-phase order commit, wired together per shopper session.

use std::sync::Arc;
use std::time::Duration;

use crate::clients::{CouponValidator, OrderBackend, PaymentSessionAdapter, ShippingZoneSource};
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::events::EventSender;
use crate::models::{CallbackUrls, CartSnapshot, RegionDirectory};

pub mod coordinator;
pub mod coupons;
pub mod debounce;
pub mod free_shipping;
pub mod pricing;
pub mod registry;
pub mod session;
pub mod shipping_zones;
pub mod state_machine;

pub use coordinator::{
    CancellationOutcome, CommitOutcome, CommitRequest, ConfirmationOutcome,
    OrderCommitCoordinator,
};
pub use coupons::{CouponCheck, CouponService};
pub use debounce::Debouncer;
pub use free_shipping::{FreeShippingDecision, FreeShippingPolicy, FreeShippingReason};
pub use pricing::{compute_breakdown, PriceBreakdown, PricingEngine, PricingInputs};
pub use registry::CheckoutRegistry;
pub use session::{
    CheckoutSession, CheckoutView, CouponRevalidation, Notice, NoticeKind, SessionSettings,
    ShippingResolution,
};
pub use shipping_zones::{ResolutionSource, ResolvedMethods, ShippingZoneResolver};
pub use state_machine::{CheckoutStateMachine, CheckoutStep};

/// Store-wide checkout settings.
#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub country_code: String,
    pub currency: String,
    pub free_shipping: FreeShippingPolicy,
    pub regions: RegionDirectory,
    pub shipping_cache_ttl: Option<Duration>,
    pub coupon_debounce: Duration,
    pub callback_urls: CallbackUrls,
}

impl CheckoutSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            country_code: config.country_code.trim().to_uppercase(),
            currency: config.currency.trim().to_uppercase(),
            free_shipping: config.free_shipping_policy(),
            regions: config.region_directory(),
            shipping_cache_ttl: config.shipping_cache_ttl(),
            coupon_debounce: config.coupon_debounce(),
            callback_urls: config.callback_urls(),
        }
    }
}

/// The external systems a checkout talks to.
#[derive(Clone)]
pub struct CheckoutBackends {
    pub coupons: Arc<dyn CouponValidator>,
    pub zones: Arc<dyn ShippingZoneSource>,
    pub orders: Arc<dyn OrderBackend>,
    pub payments: Arc<dyn PaymentSessionAdapter>,
}

/// Builds sessions that share the zone cache, the registry and the event channel.
pub struct CheckoutServices {
    settings: CheckoutSettings,
    backends: CheckoutBackends,
    resolver: Arc<ShippingZoneResolver>,
    registry: Arc<CheckoutRegistry>,
    events: EventSender,
}

impl CheckoutServices {
    pub fn new(settings: CheckoutSettings, backends: CheckoutBackends, events: EventSender) -> Self {
        let resolver = Arc::new(ShippingZoneResolver::new(
            backends.zones.clone(),
            settings.regions.clone(),
            settings.shipping_cache_ttl,
        ));
        let registry = Arc::new(CheckoutRegistry::new(backends.orders.clone()));
        Self {
            settings,
            backends,
            resolver,
            registry,
            events,
        }
    }

    pub fn settings(&self) -> &CheckoutSettings {
        &self.settings
    }

    pub fn registry(&self) -> Arc<CheckoutRegistry> {
        self.registry.clone()
    }

    pub fn new_session(&self, cart: CartSnapshot) -> Result<Arc<CheckoutSession>, ServiceError> {
        cart.validate()?;
        let coordinator = OrderCommitCoordinator::new(
            self.backends.orders.clone(),
            self.backends.payments.clone(),
            self.settings.currency.clone(),
            self.settings.callback_urls.clone(),
        );
        Ok(Arc::new(CheckoutSession::new(
            SessionSettings {
                country_code: self.settings.country_code.clone(),
                free_shipping: self.settings.free_shipping.clone(),
            },
            cart,
            self.resolver.clone(),
            CouponService::new(self.backends.coupons.clone()),
            coordinator,
            Debouncer::new(self.settings.coupon_debounce),
            self.registry.clone(),
            self.events.clone(),
        )))
    }
}
