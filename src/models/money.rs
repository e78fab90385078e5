use rust_decimal::{Decimal, RoundingStrategy};

use crate::errors::ServiceError;

/// Rounds a monetary amount to cents, half away from zero.
///
/// Every amount that is displayed or submitted goes through this function so the
/// figure the shopper sees is the figure the commerce backend receives.
pub fn round2(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Clamps an amount at zero.
pub fn non_negative(amount: Decimal) -> Decimal {
    amount.max(Decimal::ZERO)
}

/// Minor units (cents) for gateways that take integer amounts.
pub fn to_minor_units(amount: Decimal) -> Result<i64, ServiceError> {
    use rust_decimal::prelude::ToPrimitive;

    round2(amount)
        .checked_mul(Decimal::ONE_HUNDRED)
        .and_then(|cents| cents.to_i64())
        .ok_or_else(|| {
            ServiceError::ValidationError(format!("amount {} cannot be expressed in cents", amount))
        })
}
