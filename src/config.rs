use std::collections::BTreeMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::models::{CallbackUrls, RegionDirectory};
use crate::services::checkout::free_shipping::FreeShippingPolicy;

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_COUNTRY: &str = "PE";
const DEFAULT_CURRENCY: &str = "PEN";
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 15;
const DEFAULT_SHIPPING_CACHE_TTL_SECS: u64 = 600;
const DEFAULT_COUPON_DEBOUNCE_MS: u64 = 400;
const DEFAULT_WEBHOOK_TOLERANCE_SECS: i64 = 300;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
const ORDER_ID_PLACEHOLDER: &str = "{order_id}";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
pub struct AppConfig {
    #[serde(default = "default_environment")]
    pub environment: String,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Emit JSON log lines instead of the human-readable format
    #[serde(default)]
    pub log_json: bool,

    /// ISO country every shipping address belongs to
    #[serde(default = "default_country_code")]
    #[validate(length(equal = 2))]
    pub country_code: String,

    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// Subtotal from which shipping is free. Absent disables the feature.
    #[serde(default)]
    #[validate(custom = "validate_threshold")]
    pub free_shipping_threshold: Option<Decimal>,

    /// Region codes whose shipping zones are matched by district
    #[serde(default)]
    pub metropolitan_regions: Vec<String>,

    /// Region code -> shipping zone name for every other region
    #[serde(default)]
    pub province_names: BTreeMap<String, String>,

    #[validate(url)]
    pub commerce_api_url: String,

    #[serde(default)]
    pub commerce_api_key: Option<String>,

    #[validate(url)]
    pub payment_api_url: String,

    #[serde(default)]
    pub payment_api_key: Option<String>,

    #[serde(default = "default_http_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub http_timeout_secs: u64,

    /// Zero disables expiry of cached shipping zones
    #[serde(default = "default_shipping_cache_ttl_secs")]
    pub shipping_cache_ttl_secs: u64,

    #[serde(default = "default_coupon_debounce_ms")]
    #[validate(range(max = 10000))]
    pub coupon_revalidation_debounce_ms: u64,

    #[validate(url)]
    pub payment_success_url: String,

    #[validate(url)]
    pub payment_failure_url: String,

    #[validate(url)]
    pub payment_cancel_url: String,

    /// Shared secret for payment confirmation signatures
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    #[serde(default = "default_webhook_tolerance_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub payment_webhook_tolerance_secs: i64,

    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            log_json: false,
            country_code: default_country_code(),
            currency: default_currency(),
            free_shipping_threshold: None,
            metropolitan_regions: Vec::new(),
            province_names: BTreeMap::new(),
            commerce_api_url: "http://localhost:8081".to_string(),
            commerce_api_key: None,
            payment_api_url: "http://localhost:8082".to_string(),
            payment_api_key: None,
            http_timeout_secs: default_http_timeout_secs(),
            shipping_cache_ttl_secs: default_shipping_cache_ttl_secs(),
            coupon_revalidation_debounce_ms: default_coupon_debounce_ms(),
            payment_success_url: "http://localhost:3000/checkout/{order_id}/success".to_string(),
            payment_failure_url: "http://localhost:3000/checkout/{order_id}/failure".to_string(),
            payment_cancel_url: "http://localhost:3000/checkout/{order_id}/cancel".to_string(),
            payment_webhook_secret: None,
            payment_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl AppConfig {
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
            || self.environment.eq_ignore_ascii_case("test")
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    pub fn shipping_cache_ttl(&self) -> Option<Duration> {
        match self.shipping_cache_ttl_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    pub fn coupon_debounce(&self) -> Duration {
        Duration::from_millis(self.coupon_revalidation_debounce_ms)
    }

    pub fn free_shipping_policy(&self) -> FreeShippingPolicy {
        FreeShippingPolicy::new(self.free_shipping_threshold)
    }

    pub fn region_directory(&self) -> RegionDirectory {
        RegionDirectory::new(&self.metropolitan_regions, self.province_names.clone())
    }

    pub fn callback_urls(&self) -> CallbackUrls {
        CallbackUrls {
            success: self.payment_success_url.clone(),
            failure: self.payment_failure_url.clone(),
            cancel: self.payment_cancel_url.clone(),
        }
    }

    /// The webhook secret, if one is configured and non-blank.
    pub fn webhook_secret(&self) -> Option<&str> {
        self.payment_webhook_secret
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.is_development() && self.webhook_secret().is_none() {
            let mut err = ValidationError::new("payment_webhook_secret_required");
            err.message = Some(
                "Set APP__PAYMENT_WEBHOOK_SECRET outside development so payment confirmations can be verified"
                    .into(),
            );
            errors.add("payment_webhook_secret", err);
        }

        for (field, template) in [
            ("payment_success_url", &self.payment_success_url),
            ("payment_failure_url", &self.payment_failure_url),
        ] {
            if !template.contains(ORDER_ID_PLACEHOLDER) {
                let mut err = ValidationError::new("order_id_placeholder");
                err.message = Some("Callback URL must contain the {order_id} placeholder".into());
                errors.add(field, err);
            }
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

fn default_environment() -> String {
    DEFAULT_ENV.to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_country_code() -> String {
    DEFAULT_COUNTRY.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_http_timeout_secs() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_shipping_cache_ttl_secs() -> u64 {
    DEFAULT_SHIPPING_CACHE_TTL_SECS
}

fn default_coupon_debounce_ms() -> u64 {
    DEFAULT_COUPON_DEBOUNCE_MS
}

fn default_webhook_tolerance_secs() -> i64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_event_channel_capacity() -> usize {
    DEFAULT_EVENT_CHANNEL_CAPACITY
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_threshold(threshold: &Decimal) -> Result<(), ValidationError> {
    if threshold.is_sign_negative() {
        let mut err = ValidationError::new("free_shipping_threshold");
        err.message = Some("free_shipping_threshold cannot be negative".into());
        return Err(err);
    }
    Ok(())
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::fmt;

    let default_directive = format!("storefront_checkout={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    load_config_from(Path::new(CONFIG_DIR), &run_env)
}

/// Same as [`load_config`] with an explicit config directory and profile.
pub fn load_config_from(config_dir: &Path, run_env: &str) -> Result<AppConfig, AppConfigError> {
    info!("Loading configuration for environment: {}", run_env);

    if !config_dir.exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            config_dir.display()
        );
    }

    let defaults = AppConfig::default();
    let config = Config::builder()
        .set_default("environment", run_env)?
        .set_default("commerce_api_url", defaults.commerce_api_url)?
        .set_default("payment_api_url", defaults.payment_api_url)?
        .set_default("payment_success_url", defaults.payment_success_url)?
        .set_default("payment_failure_url", defaults.payment_failure_url)?
        .set_default("payment_cancel_url", defaults.payment_cancel_url)?
        .add_source(File::from(config_dir.join("default")).required(false))
        .add_source(File::from(config_dir.join(run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn defaults_are_valid_for_development() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert!(cfg.validate_additional_constraints().is_ok());
        assert!(!cfg.free_shipping_policy().is_enabled());
        assert_eq!(cfg.shipping_cache_ttl(), Some(Duration::from_secs(600)));
    }

    #[test]
    fn production_requires_webhook_secret() {
        let mut cfg = AppConfig {
            environment: "production".into(),
            ..AppConfig::default()
        };
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.payment_webhook_secret = Some("   ".into());
        assert!(cfg.validate_additional_constraints().is_err());

        cfg.payment_webhook_secret = Some("whsec_123".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn callback_templates_need_the_order_placeholder() {
        let cfg = AppConfig {
            payment_success_url: "https://shop.example/ok".into(),
            ..AppConfig::default()
        };
        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("payment_success_url"));
    }

    #[test]
    fn negative_threshold_is_rejected() {
        let cfg = AppConfig {
            free_shipping_threshold: Some(dec!(-1)),
            ..AppConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn zero_ttl_disables_expiry() {
        let cfg = AppConfig {
            shipping_cache_ttl_secs: 0,
            ..AppConfig::default()
        };
        assert_eq!(cfg.shipping_cache_ttl(), None);
    }

    #[test]
    fn rejects_unknown_log_level() {
        assert!(validate_log_level("verbose").is_err());
        assert!(validate_log_level("DEBUG").is_ok());
    }
}
