use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

static POSTAL_CODE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{5}$").unwrap());

const MAX_ADDRESS_FIELD_LENGTH: usize = 120;

/// Shipping address as collected during the shipping step.
///
/// The country is fixed for the whole storefront; changing the region clears
/// everything that hangs off it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub country_code: String,
    pub region_code: String,
    pub district_or_province: String,
    pub postal_code: String,
    pub is_metropolitan_zone: bool,
}

impl Address {
    pub fn new(country_code: impl Into<String>) -> Self {
        Self {
            country_code: country_code.into(),
            ..Default::default()
        }
    }

    /// Sets a new region, dropping the district and postal code that belonged to the old one.
    pub fn set_region(&mut self, region_code: impl Into<String>, directory: &RegionDirectory) {
        let region_code = region_code.into().trim().to_uppercase();
        self.is_metropolitan_zone = directory.is_metropolitan(&region_code);
        self.region_code = region_code;
        self.district_or_province.clear();
        self.postal_code.clear();
    }

    pub fn has_region(&self) -> bool {
        !self.region_code.trim().is_empty()
    }

    pub fn has_district(&self) -> bool {
        !self.district_or_province.trim().is_empty()
    }

    /// Key identifying the shipping zone this address resolves to.
    pub fn zone_key(&self) -> Option<AddressKey> {
        if !self.has_region() {
            return None;
        }
        if self.is_metropolitan_zone && !self.has_district() {
            return None;
        }
        Some(AddressKey::new(
            &self.country_code,
            &self.region_code,
            if self.is_metropolitan_zone {
                Some(self.district_or_province.as_str())
            } else {
                None
            },
        ))
    }

    /// Field-level completeness check for the shipping step.
    ///
    /// Metropolitan regions need a district and a postal code; elsewhere the
    /// district is free text and the postal code is optional.
    pub fn validate_complete(&self) -> Result<(), ServiceError> {
        if !self.has_region() {
            return Err(ServiceError::ValidationError(
                "shipping.region is required".to_string(),
            ));
        }
        let district = self.district_or_province.trim();
        if district.is_empty() {
            return Err(ServiceError::ValidationError(
                "shipping.district is required".to_string(),
            ));
        }
        if district.chars().count() > MAX_ADDRESS_FIELD_LENGTH {
            return Err(ServiceError::ValidationError(format!(
                "shipping.district must be {} characters or fewer",
                MAX_ADDRESS_FIELD_LENGTH
            )));
        }
        let postal = self.postal_code.trim();
        if self.is_metropolitan_zone && postal.is_empty() {
            return Err(ServiceError::ValidationError(
                "shipping.postal_code is required for metropolitan regions".to_string(),
            ));
        }
        if !postal.is_empty() && !POSTAL_CODE_RE.is_match(postal) {
            return Err(ServiceError::ValidationError(
                "shipping.postal_code must be five digits".to_string(),
            ));
        }
        Ok(())
    }
}

/// Normalized cache key for a resolvable address. The district keeps its case since
/// zone names are matched exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AddressKey(String);

impl AddressKey {
    pub fn new(country: &str, region: &str, district: Option<&str>) -> Self {
        let district = district.map(str::trim).unwrap_or_default();
        Self(format!(
            "{}|{}|{}",
            country.trim().to_uppercase(),
            region.trim().to_uppercase(),
            district
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AddressKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference data about regions that the zone resolver needs.
#[derive(Debug, Clone, Default)]
pub struct RegionDirectory {
    metropolitan: BTreeSet<String>,
    province_names: BTreeMap<String, String>,
}

impl RegionDirectory {
    pub fn new<I, S>(metropolitan: I, province_names: BTreeMap<String, String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            metropolitan: metropolitan
                .into_iter()
                .map(|code| code.as_ref().trim().to_uppercase())
                .collect(),
            province_names: province_names
                .into_iter()
                .map(|(code, name)| (code.trim().to_uppercase(), name))
                .collect(),
        }
    }

    pub fn is_metropolitan(&self, region_code: &str) -> bool {
        self.metropolitan
            .contains(&region_code.trim().to_uppercase())
    }

    /// Zone name a non-metropolitan region maps to. Unmapped codes are used verbatim.
    pub fn province_name(&self, region_code: &str) -> String {
        let code = region_code.trim().to_uppercase();
        self.province_names
            .get(&code)
            .cloned()
            .unwrap_or(code)
    }
}
