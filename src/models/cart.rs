use std::collections::hash_map::DefaultHasher;
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

/// Upper bounds that keep every cart amount well inside `Decimal` range.
pub const MAX_UNIT_PRICE: Decimal = Decimal::from_parts(1_000_000_000, 0, 0, false, 0);
pub const MAX_LINE_QUANTITY: u32 = 100_000;

/// One line of the shopper's cart, as handed over by the cart aggregator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartLine {
    pub product_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<u64>,
    pub quantity: u32,
    pub unit_price: Decimal,
    /// attribute id -> chosen value
    #[serde(default)]
    pub selected_attributes: BTreeMap<String, String>,
}

impl CartLine {
    pub fn new(product_id: u64, quantity: u32, unit_price: Decimal) -> Self {
        Self {
            product_id,
            variation_id: None,
            quantity,
            unit_price,
            selected_attributes: BTreeMap::new(),
        }
    }

    pub fn with_variation(mut self, variation_id: u64) -> Self {
        self.variation_id = Some(variation_id);
        self
    }

    pub fn with_attribute(mut self, attribute: impl Into<String>, value: impl Into<String>) -> Self {
        self.selected_attributes.insert(attribute.into(), value.into());
        self
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }

    fn checked_line_total(&self) -> Option<Decimal> {
        self.unit_price.checked_mul(Decimal::from(self.quantity))
    }
}

/// Read-only view of the cart at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CartSnapshot {
    pub lines: Vec<CartLine>,
}

impl CartSnapshot {
    pub fn new(lines: Vec<CartLine>) -> Self {
        Self { lines }
    }

    /// Sum of `unit_price * quantity`, never reduced by discounts. Only call on a
    /// snapshot that passed [`CartSnapshot::validate`].
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn item_count(&self) -> u32 {
        self.lines.iter().map(|line| line.quantity).sum()
    }

    /// Structural hash of the cart composition.
    pub fn fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.hash(&mut hasher);
        hasher.finish()
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        for line in &self.lines {
            if line.quantity == 0 {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for product {} must be greater than zero",
                    line.product_id
                )));
            }
            if line.quantity > MAX_LINE_QUANTITY {
                return Err(ServiceError::ValidationError(format!(
                    "Quantity for product {} cannot exceed {}",
                    line.product_id, MAX_LINE_QUANTITY
                )));
            }
            if line.unit_price.is_sign_negative() {
                return Err(ServiceError::ValidationError(format!(
                    "Unit price for product {} cannot be negative",
                    line.product_id
                )));
            }
            if line.unit_price > MAX_UNIT_PRICE {
                return Err(ServiceError::ValidationError(format!(
                    "Unit price for product {} cannot exceed {}",
                    line.product_id, MAX_UNIT_PRICE
                )));
            }
        }

        self.lines
            .iter()
            .try_fold(Decimal::ZERO, |sum, line| {
                line.checked_line_total().and_then(|total| sum.checked_add(total))
            })
            .map(|_| ())
            .ok_or_else(|| ServiceError::ValidationError("cart subtotal is out of range".to_string()))
    }
}
