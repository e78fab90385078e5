use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::clients::ShippingZoneSource;
use crate::errors::ServiceError;
use crate::models::{Address, AddressKey, RegionDirectory, ShippingMethod, ZoneLookupRequest};

/// Where a resolution came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionSource {
    Cache,
    Upstream,
    /// The upstream lookup failed; the empty method list is not cached.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMethods {
    pub key: AddressKey,
    pub methods: Vec<ShippingMethod>,
    pub source: ResolutionSource,
}

impl ResolvedMethods {
    pub fn contains(&self, method_id: &str) -> bool {
        self.methods.iter().any(|m| m.id == method_id)
    }
}

#[derive(Debug, Clone)]
struct CachedMethods {
    methods: Vec<ShippingMethod>,
    stored_at: Instant,
}

/// Resolves the shipping methods for an address, caching per address key.
///
/// Metropolitan regions resolve to the zone named exactly like the district; every
/// other region resolves to the zone named like its province. Anything else yields
/// no methods.
pub struct ShippingZoneResolver {
    source: Arc<dyn ShippingZoneSource>,
    directory: RegionDirectory,
    cache: DashMap<AddressKey, CachedMethods>,
    ttl: Option<Duration>,
}

impl ShippingZoneResolver {
    pub fn new(
        source: Arc<dyn ShippingZoneSource>,
        directory: RegionDirectory,
        ttl: Option<Duration>,
    ) -> Self {
        Self {
            source,
            directory,
            cache: DashMap::new(),
            ttl,
        }
    }

    pub fn directory(&self) -> &RegionDirectory {
        &self.directory
    }

    /// Builds the upstream request and the zone name that must match, or explains
    /// what is still missing from the address.
    pub fn lookup_target(&self, address: &Address) -> Result<(ZoneLookupRequest, String), ServiceError> {
        if !address.has_region() {
            return Err(ServiceError::ValidationError(
                "shipping.region is required before shipping methods can be listed".to_string(),
            ));
        }
        let region = address.region_code.trim().to_uppercase();

        if self.directory.is_metropolitan(&region) {
            let district = address.district_or_province.trim();
            if district.is_empty() {
                return Err(ServiceError::ValidationError(
                    "shipping.district is required for metropolitan regions".to_string(),
                ));
            }
            Ok((
                ZoneLookupRequest {
                    region,
                    district: Some(district.to_string()),
                },
                district.to_string(),
            ))
        } else {
            let province = self.directory.province_name(&region);
            Ok((
                ZoneLookupRequest {
                    region,
                    district: None,
                },
                province,
            ))
        }
    }

    /// Returns the enabled methods for the address' zone.
    ///
    /// Upstream failures degrade to an empty list and are never retried here.
    #[instrument(skip(self, address), fields(region = %address.region_code))]
    pub async fn resolve(&self, address: &Address) -> Result<ResolvedMethods, ServiceError> {
        let key = address.zone_key().ok_or_else(|| {
            ServiceError::ValidationError(
                "shipping address is not complete enough to resolve a zone".to_string(),
            )
        })?;

        if let Some(methods) = self.cached(&key) {
            debug!("Shipping zone cache hit for {}", key);
            return Ok(ResolvedMethods {
                key,
                methods,
                source: ResolutionSource::Cache,
            });
        }

        let (request, zone_name) = self.lookup_target(address)?;

        let zones = match self.source.lookup_zones(&request).await {
            Ok(zones) => zones,
            Err(err) => {
                warn!("Shipping zone lookup failed for {}: {}", key, err);
                return Ok(ResolvedMethods {
                    key,
                    methods: Vec::new(),
                    source: ResolutionSource::Unavailable,
                });
            }
        };

        let methods = zones
            .iter()
            .find(|zone| zone.name.trim() == zone_name)
            .map(|zone| zone.enabled_methods())
            .unwrap_or_default();

        if methods.is_empty() {
            info!("No shipping zone named '{}' for {}", zone_name, key);
        }

        self.cache.insert(
            key.clone(),
            CachedMethods {
                methods: methods.clone(),
                stored_at: Instant::now(),
            },
        );

        Ok(ResolvedMethods {
            key,
            methods,
            source: ResolutionSource::Upstream,
        })
    }

    /// Drops a cached entry so the next resolution goes upstream.
    pub fn invalidate(&self, key: &AddressKey) {
        self.cache.remove(key);
    }

    fn cached(&self, key: &AddressKey) -> Option<Vec<ShippingMethod>> {
        let entry = self.cache.get(key)?;
        if let Some(ttl) = self.ttl {
            if entry.stored_at.elapsed() > ttl {
                drop(entry);
                self.cache.remove(key);
                return None;
            }
        }
        Some(entry.methods.clone())
    }
}

/// Keeps a selection only if it is still offered.
pub fn reconcile_selection(resolved: &ResolvedMethods, selected: Option<&str>) -> Option<String> {
    selected
        .filter(|id| resolved.contains(id))
        .map(str::to_string)
}
