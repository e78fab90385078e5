use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::cart::CartLine;

/// How a coupon's discount is expressed. Informational only: the discount amount
/// always comes from the coupon validator for the current cart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum DiscountDescriptor {
    Percentage(Decimal),
    FixedAmount(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coupon {
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub discount: Option<DiscountDescriptor>,
    pub grants_free_shipping: bool,
}

/// A coupon that passed validation, together with the discount it earned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppliedCoupon {
    pub coupon: Coupon,
    pub discount_amount: Decimal,
    /// Fingerprint of the cart the validator saw.
    pub validated_cart: u64,
}

impl AppliedCoupon {
    pub fn code(&self) -> &str {
        &self.coupon.code
    }

    pub fn grants_free_shipping(&self) -> bool {
        self.coupon.grants_free_shipping
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponValidationRequest {
    pub code: String,
    pub cart_lines: Vec<CartLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponValidation {
    pub valid: bool,
    #[serde(default)]
    pub discount_amount: Option<Decimal>,
    #[serde(default)]
    pub grants_free_shipping: Option<bool>,
    #[serde(default)]
    pub discount: Option<DiscountDescriptor>,
    #[serde(default)]
    pub error_reason: Option<String>,
}

impl CouponValidation {
    pub fn accepted(discount_amount: Decimal, grants_free_shipping: bool) -> Self {
        Self {
            valid: true,
            discount_amount: Some(discount_amount),
            grants_free_shipping: Some(grants_free_shipping),
            discount: None,
            error_reason: None,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            valid: false,
            discount_amount: None,
            grants_free_shipping: None,
            discount: None,
            error_reason: Some(reason.into()),
        }
    }
}
