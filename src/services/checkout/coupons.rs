use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::clients::CouponValidator;
use crate::errors::ServiceError;
use crate::models::{
    money::{non_negative, round2},
    AppliedCoupon, CartSnapshot, Coupon, CouponValidationRequest,
};

const MAX_COUPON_CODE_LENGTH: usize = 64;

/// Result of re-checking an applied coupon against a changed cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CouponCheck {
    Kept(AppliedCoupon),
    Removed { code: String, reason: String },
}

/// Applies and re-validates coupons. The discount amount always comes from the
/// validator for the cart it was shown.
#[derive(Clone)]
pub struct CouponService {
    validator: Arc<dyn CouponValidator>,
}

impl CouponService {
    pub fn new(validator: Arc<dyn CouponValidator>) -> Self {
        Self { validator }
    }

    #[instrument(skip(self, cart), fields(lines = cart.lines.len()))]
    pub async fn apply(&self, code: &str, cart: &CartSnapshot) -> Result<AppliedCoupon, ServiceError> {
        let code = normalize_code(code)?;
        if cart.is_empty() {
            return Err(ServiceError::ValidationError(
                "A coupon cannot be applied to an empty cart".to_string(),
            ));
        }

        let request = CouponValidationRequest {
            code: code.clone(),
            cart_lines: cart.lines.clone(),
        };
        let validation = self.validator.validate_coupon(&request).await?;

        if !validation.valid {
            let reason = validation
                .error_reason
                .unwrap_or_else(|| "coupon is not valid for this cart".to_string());
            info!("Coupon {} rejected: {}", code, reason);
            return Err(ServiceError::CouponRejected(reason));
        }

        let discount_amount = round2(non_negative(
            validation.discount_amount.unwrap_or(Decimal::ZERO),
        ));
        info!("Coupon {} accepted with discount {}", code, discount_amount);

        Ok(AppliedCoupon {
            coupon: Coupon {
                code,
                discount: validation.discount,
                grants_free_shipping: validation.grants_free_shipping.unwrap_or(false),
            },
            discount_amount,
            validated_cart: cart.fingerprint(),
        })
    }

    /// Re-queries the validator for `cart`.
    ///
    /// A rejection removes the coupon; a transport failure is returned as an error and
    /// leaves the decision to the caller.
    #[instrument(skip(self, applied, cart), fields(code = %applied.code()))]
    pub async fn revalidate(
        &self,
        applied: &AppliedCoupon,
        cart: &CartSnapshot,
    ) -> Result<CouponCheck, ServiceError> {
        if cart.is_empty() {
            return Ok(CouponCheck::Removed {
                code: applied.code().to_string(),
                reason: "the cart is empty".to_string(),
            });
        }

        match self.apply(applied.code(), cart).await {
            Ok(fresh) => Ok(CouponCheck::Kept(fresh)),
            Err(ServiceError::CouponRejected(reason)) => {
                warn!("Coupon {} no longer applies: {}", applied.code(), reason);
                Ok(CouponCheck::Removed {
                    code: applied.code().to_string(),
                    reason,
                })
            }
            Err(err) => Err(err),
        }
    }
}

fn normalize_code(code: &str) -> Result<String, ServiceError> {
    let code = code.trim();
    if code.is_empty() {
        return Err(ServiceError::ValidationError(
            "coupon code cannot be empty".to_string(),
        ));
    }
    if code.chars().count() > MAX_COUPON_CODE_LENGTH {
        return Err(ServiceError::ValidationError(format!(
            "coupon code must be {} characters or fewer",
            MAX_COUPON_CODE_LENGTH
        )));
    }
    Ok(code.to_string())
}
