use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::address::Address;
use super::cart::CartLine;
use super::customer::PersonalData;

/// Order status as tracked by the commerce backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum OrderStatus {
    Pending,
    OnHold,
    Cancelled,
    Confirmed,
}

impl OrderStatus {
    /// Statuses in which the order still waits for its payment.
    pub fn is_open(&self) -> bool {
        matches!(self, OrderStatus::Pending | OrderStatus::OnHold)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemPayload {
    pub product_id: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variation_id: Option<u64>,
    pub quantity: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes_meta: BTreeMap<String, String>,
}

impl From<&CartLine> for LineItemPayload {
    fn from(line: &CartLine) -> Self {
        Self {
            product_id: line.product_id,
            variation_id: line.variation_id,
            quantity: line.quantity,
            attributes_meta: line.selected_attributes.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingDetails {
    pub first_name: String,
    pub last_name: String,
    pub document_id: String,
    pub email: String,
    pub phone: String,
    pub address: Address,
}

impl BillingDetails {
    pub fn new(customer: &PersonalData, address: &Address) -> Self {
        Self {
            first_name: customer.first_name.trim().to_string(),
            last_name: customer.surnames.trim().to_string(),
            document_id: customer.document_id.trim().to_string(),
            email: customer.email.trim().to_string(),
            phone: customer.phone.trim().to_string(),
            address: address.clone(),
        }
    }
}

/// Shipping line as submitted: `cost` is the effective cost, zero when shipping is free.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingLine {
    pub method_id: String,
    pub title: String,
    pub cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CouponLine {
    pub code: String,
    pub discount: Decimal,
}

/// Order creation request for the commerce backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPayload {
    pub status: OrderStatus,
    pub currency: String,
    pub line_items: Vec<LineItemPayload>,
    pub billing_address: BillingDetails,
    pub shipping_address: Address,
    pub shipping_line: ShippingLine,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coupon_line: Option<CouponLine>,
    pub payment_method_id: String,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: String,
    pub status: OrderStatus,
    /// Total as recorded by the backend, when it echoes one back.
    #[serde(default)]
    pub total: Option<Decimal>,
}

/// The order created before any payment is attempted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingOrder {
    pub id: String,
    pub status: OrderStatus,
    pub total: Decimal,
    pub line_items: Vec<LineItemPayload>,
    pub shipping_line: ShippingLine,
    pub coupon_lines: Vec<CouponLine>,
    pub created_at: DateTime<Utc>,
}

impl PendingOrder {
    pub fn from_created(created: OrderCreated, payload: &OrderPayload) -> Self {
        Self {
            id: created.order_id,
            status: created.status,
            total: payload.total,
            line_items: payload.line_items.clone(),
            shipping_line: payload.shipping_line.clone(),
            coupon_lines: payload.coupon_line.iter().cloned().collect(),
            created_at: Utc::now(),
        }
    }
}
