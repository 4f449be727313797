use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_STRIPE_API_BASE: &str = "https://api.stripe.com";
const DEFAULT_WEBHOOK_TOLERANCE_SECS: u64 = 300;
const DEFAULT_SUCCESS_URL: &str =
    "http://localhost:3000/payment/success?session_id={CHECKOUT_SESSION_ID}";
const DEFAULT_CANCEL_URL: &str = "http://localhost:3000/payment/cancel";
const DEFAULT_CURRENCY: &str = "usd";
/// Provider checkout sessions expire after 24 hours.
const DEFAULT_SESSION_TTL_SECS: u64 = 86_400;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;
const DEV_DEFAULT_JWT_SECRET: &str =
    "this_is_a_development_secret_key_that_is_at_least_64_characters_long_for_testing";

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Secret used to verify caller bearer tokens (HS256)
    #[validate(length(min = 64), custom = "validate_jwt_secret")]
    pub jwt_secret: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// Per-request timeout applied by the HTTP stack
    #[serde(default = "default_request_timeout_secs")]
    #[validate(range(min = 1, max = 600))]
    pub request_timeout_secs: u64,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    #[validate(range(min = 1))]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB pool: connect timeout (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,

    /// DB pool: idle timeout (seconds)
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,

    /// DB pool: acquire timeout (seconds)
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Stripe API secret key (`sk_...`)
    #[serde(default)]
    pub stripe_secret_key: String,

    /// Stripe webhook endpoint signing secret (`whsec_...`)
    #[serde(default)]
    pub stripe_webhook_secret: String,

    /// Base URL of the Stripe REST API
    #[serde(default = "default_stripe_api_base")]
    #[validate(custom = "validate_http_url")]
    pub stripe_api_base: String,

    /// Maximum accepted age of a webhook signature timestamp
    #[serde(default = "default_webhook_tolerance_secs")]
    #[validate(range(min = 1, max = 3600))]
    pub payment_webhook_tolerance_secs: u64,

    /// Where the provider redirects after a successful payment
    #[serde(default = "default_success_url")]
    #[validate(custom = "validate_http_url")]
    pub checkout_success_url: String,

    /// Where the provider redirects when the buyer abandons checkout
    #[serde(default = "default_cancel_url")]
    #[validate(custom = "validate_http_url")]
    pub checkout_cancel_url: String,

    /// ISO 4217 currency code sent with every checkout session
    #[serde(default = "default_currency")]
    #[validate(custom = "validate_currency")]
    pub default_currency: String,

    /// Age after which a pending payment is considered abandoned
    #[serde(default = "default_session_ttl_secs")]
    #[validate(range(min = 60))]
    pub payment_session_ttl_secs: u64,

    /// Interval of the abandoned-payment sweep; 0 disables it
    #[serde(default = "default_sweep_interval_secs")]
    pub payment_expiry_sweep_interval_secs: u64,

    /// Capacity of the in-process domain event channel
    #[serde(default = "default_event_channel_capacity")]
    #[validate(range(min = 1))]
    pub event_channel_capacity: usize,
}

impl AppConfig {
    /// Builds a configuration with defaults for everything but the essentials.
    pub fn new(
        database_url: String,
        jwt_secret: String,
        host: String,
        port: u16,
        environment: String,
    ) -> Self {
        Self {
            database_url,
            jwt_secret,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            request_timeout_secs: default_request_timeout_secs(),
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            stripe_secret_key: String::new(),
            stripe_webhook_secret: String::new(),
            stripe_api_base: default_stripe_api_base(),
            payment_webhook_tolerance_secs: default_webhook_tolerance_secs(),
            checkout_success_url: default_success_url(),
            checkout_cancel_url: default_cancel_url(),
            default_currency: default_currency(),
            payment_session_ttl_secs: default_session_ttl_secs(),
            payment_expiry_sweep_interval_secs: default_sweep_interval_secs(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    pub fn is_test(&self) -> bool {
        self.environment.eq_ignore_ascii_case("test")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.is_test() || self.cors_allow_any_origin
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }

    pub fn webhook_tolerance(&self) -> Duration {
        Duration::from_secs(self.payment_webhook_tolerance_secs)
    }

    pub fn payment_session_ttl(&self) -> Duration {
        Duration::from_secs(self.payment_session_ttl_secs)
    }

    /// `None` when the expiry sweep is disabled.
    pub fn expiry_sweep_interval(&self) -> Option<Duration> {
        match self.payment_expiry_sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Runs field validation followed by the cross-field checks.
    pub fn validate_all(&self) -> Result<(), ValidationErrors> {
        self.validate()?;
        self.validate_additional_constraints()
    }

    fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        let relaxed = self.is_development() || self.is_test();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if !relaxed && self.jwt_secret.trim() == DEV_DEFAULT_JWT_SECRET {
            let mut err = ValidationError::new("jwt_secret_default_dev");
            err.message = Some(
                "The bundled development JWT secret must not be used outside development. Set APP__JWT_SECRET to a unique, secure value."
                    .into(),
            );
            errors.add("jwt_secret", err);
        }

        if !relaxed && self.stripe_secret_key.trim().is_empty() {
            let mut err = ValidationError::new("stripe_secret_key_required");
            err.message = Some("Set APP__STRIPE_SECRET_KEY".into());
            errors.add("stripe_secret_key", err);
        }

        if !relaxed && self.stripe_webhook_secret.trim().is_empty() {
            let mut err = ValidationError::new("stripe_webhook_secret_required");
            err.message = Some("Set APP__STRIPE_WEBHOOK_SECRET".into());
            errors.add("stripe_webhook_secret", err);
        }

        if self.db_min_connections > self.db_max_connections {
            let mut err = ValidationError::new("db_min_connections");
            err.message = Some("db_min_connections must not exceed db_max_connections".into());
            errors.add("db_min_connections", err);
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

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_stripe_api_base() -> String {
    DEFAULT_STRIPE_API_BASE.to_string()
}

fn default_webhook_tolerance_secs() -> u64 {
    DEFAULT_WEBHOOK_TOLERANCE_SECS
}

fn default_success_url() -> String {
    DEFAULT_SUCCESS_URL.to_string()
}

fn default_cancel_url() -> String {
    DEFAULT_CANCEL_URL.to_string()
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_session_ttl_secs() -> u64 {
    DEFAULT_SESSION_TTL_SECS
}

fn default_sweep_interval_secs() -> u64 {
    DEFAULT_SWEEP_INTERVAL_SECS
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

fn validate_jwt_secret(secret: &str) -> Result<(), ValidationError> {
    let lowered = secret.trim().to_ascii_lowercase();
    if ["changeme", "secret", "your_jwt_secret"]
        .iter()
        .any(|placeholder| lowered.starts_with(placeholder))
    {
        let mut err = ValidationError::new("jwt_secret");
        err.message = Some("JWT secret looks like a placeholder".into());
        return Err(err);
    }
    Ok(())
}

fn validate_http_url(url: &str) -> Result<(), ValidationError> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"));
    match rest {
        Some(host) if !host.is_empty() && !host.starts_with('/') => Ok(()),
        _ => {
            let mut err = ValidationError::new("url");
            err.message = Some("Must be an absolute http(s) URL".into());
            Err(err)
        }
    }
}

fn validate_currency(code: &str) -> Result<(), ValidationError> {
    if code.len() == 3 && code.bytes().all(|b| b.is_ascii_lowercase()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("currency");
        err.message = Some("Must be a lowercase three-letter ISO 4217 code".into());
        Err(err)
    }
}

/// Initializes the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `level` when set.
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("storefront_core={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .json()
            .try_init();
    } else {
        let _ = fmt()
            .with_env_filter(EnvFilter::new(filter_directive))
            .try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables prefixed with `APP__`
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let mut builder = Config::builder()
        .set_default("database_url", "sqlite://storefront.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", run_env.as_str())?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false));

    if run_env.eq_ignore_ascii_case(DEFAULT_ENV) {
        builder = builder.set_default("jwt_secret", DEV_DEFAULT_JWT_SECRET)?;
    }

    let config = builder
        .add_source(
            Environment::with_prefix("APP")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    if config.get_string("jwt_secret").is_err() {
        error!("JWT secret is not configured. Set APP__JWT_SECRET (minimum 64 characters).");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "jwt_secret is required but not configured. Set APP__JWT_SECRET environment variable."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate_all().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str =
        "a_perfectly_random_looking_signing_key_for_unit_tests_0123456789abcdef";

    fn base_config(environment: &str) -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            SECRET.into(),
            "127.0.0.1".into(),
            8080,
            environment.into(),
        )
    }

    #[test]
    fn development_defaults_are_valid() {
        let cfg = base_config("development");
        assert!(cfg.validate_all().is_ok());
        assert_eq!(cfg.default_currency, "usd");
        assert_eq!(cfg.payment_webhook_tolerance_secs, 300);
        assert!(cfg.checkout_success_url.contains("{CHECKOUT_SESSION_ID}"));
    }

    #[test]
    fn production_requires_gateway_secrets_and_cors() {
        let cfg = base_config("production");
        let errors = cfg.validate_all().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("stripe_secret_key"));
        assert!(fields.contains_key("stripe_webhook_secret"));
        assert!(fields.contains_key("cors_allowed_origins"));
    }

    #[test]
    fn production_with_secrets_is_valid() {
        let mut cfg = base_config("production");
        cfg.stripe_secret_key = "sk_live_123".into();
        cfg.stripe_webhook_secret = "whsec_123".into();
        cfg.cors_allowed_origins = Some("https://shop.example.com".into());
        assert!(cfg.validate_all().is_ok());
    }

    #[test]
    fn dev_jwt_secret_is_rejected_in_production() {
        let mut cfg = base_config("production");
        cfg.jwt_secret = DEV_DEFAULT_JWT_SECRET.into();
        let errors = cfg.validate_all().unwrap_err();
        assert!(errors.field_errors().contains_key("jwt_secret"));
    }

    #[test]
    fn rejects_short_jwt_secret() {
        let mut cfg = base_config("development");
        cfg.jwt_secret = "short".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_bad_currency_and_urls() {
        let mut cfg = base_config("development");
        cfg.default_currency = "USD".into();
        cfg.checkout_cancel_url = "/payment/cancel".into();
        let errors = cfg.validate().unwrap_err();
        let fields = errors.field_errors();
        assert!(fields.contains_key("default_currency"));
        assert!(fields.contains_key("checkout_cancel_url"));
    }

    #[test]
    fn zero_sweep_interval_disables_expiry() {
        let mut cfg = base_config("development");
        cfg.payment_expiry_sweep_interval_secs = 0;
        assert!(cfg.expiry_sweep_interval().is_none());
    }
}
