//! Configuration module for environment variable parsing.
//!
//! Secrets and destination identifiers are required; everything else has a
//! default. Missing secrets are a startup error, never a per-request one.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::ConfigError;
use crate::store::DEFAULT_MAX_LOG_RECORDS;

pub const DEFAULT_CAPI_BASE_URL: &str = "https://graph.facebook.com/v18.0";
pub const DEFAULT_GA4_ENDPOINT: &str = "https://www.google-analytics.com/mp/collect";
pub const DEFAULT_SIGNATURE_HEADER: &str = "x-signature";
pub const DEFAULT_FALLBACK_CLIENT_ID: &str = "anonymous";

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port for the web server to listen on
    pub port: u16,

    /// HMAC-SHA256 key used to verify inbound webhook bodies
    pub webhook_secret: String,

    /// Header carrying the hex-encoded inbound signature
    pub signature_header: String,

    // =========================================================================
    // Destination A: conversions API
    // =========================================================================
    pub capi_pixel_id: String,
    pub capi_access_token: String,
    pub capi_base_url: String,

    // =========================================================================
    // Destination B: measurement protocol
    // =========================================================================
    pub ga4_measurement_id: String,
    pub ga4_api_secret: String,
    pub ga4_endpoint: String,

    /// Client id sent to the measurement endpoint when the CRM supplied none
    pub ga4_fallback_client_id: String,

    /// Per outbound call timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Location of the JSON blob holding the enabled flag and log records
    pub store_path: PathBuf,

    /// When set, admin routes require a matching `X-Admin-Token` header
    pub admin_token: Option<String>,

    /// Default number of log records returned by the admin view
    pub recent_log_limit: usize,

    /// Log records retained by the store; older ones are dropped
    pub max_log_records: usize,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Config {
            port: parse_or("PORT", 8080),

            webhook_secret: required("WEBHOOK_SECRET")?,

            signature_header: optional("WEBHOOK_SIGNATURE_HEADER")
                .map(|h| h.to_ascii_lowercase())
                .unwrap_or_else(|| DEFAULT_SIGNATURE_HEADER.to_string()),

            capi_pixel_id: required("CAPI_PIXEL_ID")?,
            capi_access_token: required("CAPI_ACCESS_TOKEN")?,
            capi_base_url: optional("CAPI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_CAPI_BASE_URL.to_string()),

            ga4_measurement_id: required("GA4_MEASUREMENT_ID")?,
            ga4_api_secret: required("GA4_API_SECRET")?,
            ga4_endpoint: optional("GA4_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_GA4_ENDPOINT.to_string()),

            ga4_fallback_client_id: optional("GA4_FALLBACK_CLIENT_ID")
                .unwrap_or_else(|| DEFAULT_FALLBACK_CLIENT_ID.to_string()),

            request_timeout_ms: parse_or("REQUEST_TIMEOUT_MS", 8000),

            store_path: optional("STORE_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("relay-store.json")),

            admin_token: optional("ADMIN_TOKEN"),

            recent_log_limit: parse_or("RECENT_LOG_LIMIT", 50),

            max_log_records: parse_or("MAX_LOG_RECORDS", DEFAULT_MAX_LOG_RECORDS),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Read a variable, treating empty or whitespace-only values as unset.
fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

/// Parse a numeric variable, falling back to `default` when unset or invalid.
fn parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    let Some(raw) = optional(name) else {
        return default;
    };

    match raw.parse() {
        Ok(v) => v,
        Err(_) => {
            warn!(env_var = name, value = %raw, "Invalid numeric value, using default");
            default
        }
    }
}
