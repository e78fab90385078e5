use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Mutex;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::free_shipping::{FreeShippingDecision, FreeShippingPolicy};
use crate::models::{
    money::{non_negative, round2},
    AppliedCoupon, CartSnapshot, ShippingMethod,
};

/// Everything the price depends on. Any change here means a full recomputation.
#[derive(Debug, Clone, Copy, Hash)]
pub struct PricingInputs<'a> {
    pub cart: &'a CartSnapshot,
    pub coupon: Option<&'a AppliedCoupon>,
    pub shipping_method: Option<&'a ShippingMethod>,
    pub policy: &'a FreeShippingPolicy,
}

impl PricingInputs<'_> {
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }
}

/// Derived price figures. All amounts are rounded to cents and
/// `total == round2(max(0, subtotal - discount_amount) + shipping_cost)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceBreakdown {
    pub subtotal: Decimal,
    pub discount_amount: Decimal,
    pub shipping_cost: Decimal,
    /// Cost of the selected method before any free-shipping override.
    pub nominal_shipping_cost: Decimal,
    pub is_shipping_free: bool,
    pub remaining_to_threshold: Decimal,
    pub total: Decimal,
}

/// Pure price computation.
pub fn compute_breakdown(inputs: &PricingInputs<'_>) -> PriceBreakdown {
    let subtotal = round2(inputs.cart.subtotal());
    let discount_amount = inputs
        .coupon
        .map(|c| round2(non_negative(c.discount_amount)))
        .unwrap_or(Decimal::ZERO);

    let FreeShippingDecision {
        is_shipping_free,
        remaining_to_threshold,
        ..
    } = inputs.policy.evaluate(subtotal, inputs.coupon);

    let nominal_shipping_cost = inputs
        .shipping_method
        .map(|m| round2(m.cost))
        .unwrap_or(Decimal::ZERO);
    let shipping_cost = if is_shipping_free {
        Decimal::ZERO
    } else {
        nominal_shipping_cost
    };

    let total = round2(non_negative(subtotal - discount_amount) + shipping_cost);

    PriceBreakdown {
        subtotal,
        discount_amount,
        shipping_cost,
        nominal_shipping_cost,
        is_shipping_free,
        remaining_to_threshold: round2(remaining_to_threshold),
        total,
    }
}

/// Memoizing front for [`compute_breakdown`], keyed on a structural hash of the inputs.
#[derive(Debug, Default)]
pub struct PricingEngine {
    last: Mutex<Option<(u64, PriceBreakdown)>>,
}

impl PricingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&self, inputs: &PricingInputs<'_>) -> PriceBreakdown {
        let key = inputs.fingerprint();
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some((cached_key, breakdown)) = last.as_ref() {
            if *cached_key == key {
                return breakdown.clone();
            }
        }

        let breakdown = compute_breakdown(inputs);
        debug!(
            subtotal = %breakdown.subtotal,
            discount = %breakdown.discount_amount,
            shipping = %breakdown.shipping_cost,
            total = %breakdown.total,
            "Price breakdown recomputed"
        );
        *last = Some((key, breakdown.clone()));
        breakdown
    }
}
