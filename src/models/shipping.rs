use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A shipping method the shopper can pick for the resolved zone.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShippingMethod {
    pub id: String,
    pub title: String,
    pub cost: Decimal,
}

impl ShippingMethod {
    pub fn new(id: impl Into<String>, title: impl Into<String>, cost: Decimal) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            cost,
        }
    }
}

/// Request sent to the zone/method lookup service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneLookupRequest {
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub district: Option<String>,
}

/// Method as reported by the commerce backend, including disabled ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneMethod {
    pub id: String,
    pub title: String,
    pub cost: Decimal,
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingZone {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub locations: Vec<String>,
    #[serde(default)]
    pub methods: Vec<ZoneMethod>,
}

impl ShippingZone {
    /// Enabled methods only, in the order the backend listed them.
    pub fn enabled_methods(&self) -> Vec<ShippingMethod> {
        self.methods
            .iter()
            .filter(|m| m.enabled)
            .map(|m| ShippingMethod::new(m.id.clone(), m.title.clone(), m.cost))
            .collect()
    }
}
