use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{money::non_negative, AppliedCoupon};

/// Merchant free-shipping rule. `threshold: None` means the feature is disabled.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FreeShippingPolicy {
    pub threshold: Option<Decimal>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeShippingDecision {
    pub is_shipping_free: bool,
    /// How much more the shopper has to add to reach the threshold; zero when
    /// shipping is already free or the feature is off.
    pub remaining_to_threshold: Decimal,
    pub reason: FreeShippingReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FreeShippingReason {
    Coupon,
    Threshold,
    NotEligible,
}

impl FreeShippingPolicy {
    pub fn new(threshold: Option<Decimal>) -> Self {
        Self { threshold }
    }

    pub fn disabled() -> Self {
        Self { threshold: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.threshold.is_some()
    }

    /// Decides whether shipping is free.
    ///
    /// A coupon that grants free shipping wins over everything; otherwise the
    /// subtotal (before discounts) is compared against the threshold.
    pub fn evaluate(&self, subtotal: Decimal, coupon: Option<&AppliedCoupon>) -> FreeShippingDecision {
        if coupon.map_or(false, AppliedCoupon::grants_free_shipping) {
            return FreeShippingDecision {
                is_shipping_free: true,
                remaining_to_threshold: Decimal::ZERO,
                reason: FreeShippingReason::Coupon,
            };
        }

        match self.threshold {
            Some(threshold) if subtotal >= threshold => FreeShippingDecision {
                is_shipping_free: true,
                remaining_to_threshold: Decimal::ZERO,
                reason: FreeShippingReason::Threshold,
            },
            Some(threshold) => FreeShippingDecision {
                is_shipping_free: false,
                remaining_to_threshold: non_negative(threshold - subtotal),
                reason: FreeShippingReason::NotEligible,
            },
            None => FreeShippingDecision {
                is_shipping_free: false,
                remaining_to_threshold: Decimal::ZERO,
                reason: FreeShippingReason::NotEligible,
            },
        }
    }
}
