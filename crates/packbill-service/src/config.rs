//! Service configuration.

use serde::Deserialize;
use std::path::Path;

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/packbill").
    pub data_dir: String,

    /// HS256 secret used to validate bearer tokens.
    pub jwt_secret: String,

    /// Admin API key for privileged endpoints (optional).
    pub admin_api_key: Option<String>,

    /// Payment gateway API base URL.
    pub gateway_base_url: String,

    /// Payment gateway key id (optional; payments are disabled without it).
    pub gateway_key_id: Option<String>,

    /// Payment gateway key secret. Also signs `order|payment` verification pairs.
    pub gateway_key_secret: Option<String>,

    /// Secret the gateway signs webhook bodies with.
    pub gateway_webhook_secret: Option<String>,

    /// Timeout for gateway calls in seconds.
    pub gateway_timeout_seconds: u64,

    /// ISO currency code for orders (default: "INR").
    pub currency: String,

    /// Length of the free trial in days (default: 14).
    pub trial_days: i64,

    /// Whether a captured-payment webhook may activate the subscription.
    pub activate_on_capture: bool,

    /// Packer executable (default: "python3").
    pub packer_program: String,

    /// Packer arguments (default: "packer.py").
    pub packer_args: Vec<String>,

    /// Packer time limit in seconds.
    pub packer_timeout_seconds: u64,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,
}

/// Gateway secrets file structure.
#[derive(Debug, Deserialize)]
struct GatewaySecrets {
    key_id: String,
    key_secret: String,
    #[serde(default)]
    webhook_secret: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and secrets files.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();

        // Try to load gateway secrets from file first, then fall back to env vars
        let (gateway_key_id, gateway_key_secret, gateway_webhook_secret) = load_gateway_secrets();

        Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            data_dir: std::env::var("DATA_DIR").unwrap_or(defaults.data_dir),
            jwt_secret: std::env::var("JWT_SECRET").unwrap_or_else(|_| {
                tracing::warn!("JWT_SECRET not set - using an insecure development secret");
                defaults.jwt_secret
            }),
            admin_api_key: std::env::var("ADMIN_API_KEY").ok(),
            gateway_base_url: std::env::var("GATEWAY_BASE_URL")
                .unwrap_or(defaults.gateway_base_url),
            gateway_key_id,
            gateway_key_secret,
            gateway_webhook_secret,
            gateway_timeout_seconds: env_parse("GATEWAY_TIMEOUT_SECONDS")
                .unwrap_or(defaults.gateway_timeout_seconds),
            currency: std::env::var("CURRENCY").unwrap_or(defaults.currency),
            trial_days: env_parse("TRIAL_DAYS").unwrap_or(defaults.trial_days),
            activate_on_capture: env_parse("ACTIVATE_ON_CAPTURE")
                .unwrap_or(defaults.activate_on_capture),
            packer_program: std::env::var("PACKER_PROGRAM").unwrap_or(defaults.packer_program),
            packer_args: std::env::var("PACKER_ARGS")
                .map(|s| s.split_whitespace().map(str::to_string).collect())
                .unwrap_or(defaults.packer_args),
            packer_timeout_seconds: env_parse("PACKER_TIMEOUT_SECONDS")
                .unwrap_or(defaults.packer_timeout_seconds),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: env_parse("MAX_BODY_BYTES").unwrap_or(defaults.max_body_bytes),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS")
                .unwrap_or(defaults.request_timeout_seconds),
        }
    }

    /// Whether orders can be created and refunds issued.
    #[must_use]
    pub fn gateway_configured(&self) -> bool {
        self.gateway_key_id.is_some() && self.gateway_key_secret.is_some()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

/// Load gateway secrets from file or environment.
fn load_gateway_secrets() -> (Option<String>, Option<String>, Option<String>) {
    // Try multiple paths for the secrets file
    let secret_paths = [
        ".secrets/gateway.json",
        "packbill/.secrets/gateway.json",
        "../.secrets/gateway.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<GatewaySecrets>(path) {
            tracing::info!(path = %path, "Loaded gateway secrets from file");
            return (
                Some(secrets.key_id),
                Some(secrets.key_secret),
                secrets.webhook_secret,
            );
        }
    }

    // Fall back to environment variables
    tracing::debug!("Gateway secrets file not found, using environment variables");
    (
        std::env::var("GATEWAY_KEY_ID").ok(),
        std::env::var("GATEWAY_KEY_SECRET").ok(),
        std::env::var("GATEWAY_WEBHOOK_SECRET").ok(),
    )
}

/// Load secrets from a JSON file.
fn load_secrets_file<T: serde::de::DeserializeOwned>(path: &str) -> Result<T, std::io::Error> {
    let path = Path::new(path);
    if !path.exists() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "Secrets file not found",
        ));
    }
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".into(),
            data_dir: "/data/packbill".into(),
            jwt_secret: "packbill-dev-secret".into(),
            admin_api_key: None,
            gateway_base_url: "https://api.razorpay.com/v1".into(),
            gateway_key_id: None,
            gateway_key_secret: None,
            gateway_webhook_secret: None,
            gateway_timeout_seconds: 15,
            currency: "INR".into(),
            trial_days: 14,
            activate_on_capture: false,
            packer_program: "python3".into(),
            packer_args: vec!["packer.py".into()],
            packer_timeout_seconds: 30,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_file_parses() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gateway.json");
        std::fs::write(
            &path,
            r#"{"key_id":"rzp_test_1","key_secret":"s3cret","webhook_secret":"whk"}"#,
        )
        .unwrap();

        let secrets: GatewaySecrets = load_secrets_file(path.to_str().unwrap()).unwrap();
        assert_eq!(secrets.key_id, "rzp_test_1");
        assert_eq!(secrets.webhook_secret.as_deref(), Some("whk"));
    }

    #[test]
    fn missing_secrets_file_is_not_found() {
        let err = load_secrets_file::<GatewaySecrets>("/nonexistent/gateway.json").unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = ServiceConfig::default();
        assert_eq!(config.currency, "INR");
        assert_eq!(config.trial_days, 14);
        assert!(!config.activate_on_capture);
        assert!(!config.gateway_configured());
    }
}
