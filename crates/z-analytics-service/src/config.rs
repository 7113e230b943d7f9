//! Service configuration.

use serde::Deserialize;
use std::path::Path;
use std::str::FromStr;

use z_analytics_core::noise::MIN_SECRET_LEN;
use z_analytics_core::PrivacyConfig;

/// Default maximum number of increments in one ingest request.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 500;

/// Default period of the contribution limiter's pruning task.
pub const DEFAULT_LIMITER_PRUNE_INTERVAL_SECONDS: u64 = 300;

/// Configuration errors. Any of these aborts startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable is set but does not parse.
    #[error("invalid value for {0}")]
    InvalidValue(&'static str),

    /// A privacy parameter failed validation.
    #[error("invalid privacy configuration: {0}")]
    Privacy(#[from] z_analytics_core::PrivacyError),

    /// A referenced file could not be loaded.
    #[error("failed to load {path}: {reason}")]
    File {
        /// File path.
        path: String,
        /// Failure description.
        reason: String,
    },
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    pub listen_addr: String,

    /// Path to `RocksDB` data directory (default: "/data/z-analytics").
    pub data_dir: String,

    /// Service API key for ingest and query.
    pub service_api_key: Option<String>,

    /// Admin API key for materialization and ledger routes.
    pub admin_api_key: Option<String>,

    /// CORS allowed origins.
    pub cors_origins: Vec<String>,

    /// Maximum request body size in bytes.
    pub max_body_bytes: usize,

    /// Request timeout in seconds.
    pub request_timeout_seconds: u64,

    /// Maximum increments per ingest request.
    pub max_batch_size: usize,

    /// Privacy parameters.
    pub privacy: PrivacyConfig,

    /// Master secret for per-day noise keys. Without it, day keys are
    /// generated and stored.
    pub noise_secret: Option<String>,

    /// HMAC key for hashing client identifiers. Random per process if unset.
    pub client_hash_key: Option<String>,

    /// Path to the district → metro mapping JSON.
    pub metro_map_path: Option<String>,

    /// Pruning period of the contribution limiter.
    pub limiter_prune_interval_seconds: u64,
}

/// Analytics secrets file structure.
#[derive(Debug, Default, Deserialize)]
struct AnalyticsSecrets {
    #[serde(default)]
    service_api_key: Option<String>,
    #[serde(default)]
    admin_api_key: Option<String>,
    #[serde(default)]
    noise_secret: Option<String>,
    #[serde(default)]
    client_hash_key: Option<String>,
}

impl ServiceConfig {
    /// Load configuration from environment variables and the secrets file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a privacy parameter is set but unparseable, or
    /// the resulting configuration fails [`ServiceConfig::validate`].
    pub fn from_env() -> Result<Self, ConfigError> {
        let secrets = load_analytics_secrets();
        let defaults = PrivacyConfig::default();

        let privacy = PrivacyConfig {
            client_epsilon: env_parse("CLIENT_EPSILON", defaults.client_epsilon)?,
            server_epsilon: env_parse("SERVER_EPSILON", defaults.server_epsilon)?,
            sensitivity: env_parse("NOISE_SENSITIVITY", defaults.sensitivity)?,
            coarsen_threshold: env_parse("COARSEN_THRESHOLD", defaults.coarsen_threshold)?,
            max_query_days: env_parse("MAX_QUERY_DAYS", defaults.max_query_days)?,
            max_daily_contributions: env_parse(
                "MAX_DAILY_CONTRIBUTIONS",
                defaults.max_daily_contributions,
            )?,
            max_daily_epsilon: env_parse("MAX_DAILY_EPSILON", defaults.max_daily_epsilon)?,
        };

        let config = Self {
            listen_addr: std::env::var("LISTEN_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into()),
            data_dir: std::env::var("DATA_DIR").unwrap_or_else(|_| "/data/z-analytics".into()),
            service_api_key: secrets
                .service_api_key
                .or_else(|| std::env::var("SERVICE_API_KEY").ok()),
            admin_api_key: secrets
                .admin_api_key
                .or_else(|| std::env::var("ADMIN_API_KEY").ok()),
            cors_origins: std::env::var("CORS_ORIGINS")
                .unwrap_or_else(|_| "*".into())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_body_bytes: std::env::var("MAX_BODY_BYTES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(1024 * 1024), // 1MB
            request_timeout_seconds: std::env::var("REQUEST_TIMEOUT_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30),
            max_batch_size: env_parse("MAX_BATCH_SIZE", DEFAULT_MAX_BATCH_SIZE)?,
            privacy,
            noise_secret: secrets
                .noise_secret
                .or_else(|| std::env::var("NOISE_SECRET").ok()),
            client_hash_key: secrets
                .client_hash_key
                .or_else(|| std::env::var("CLIENT_HASH_KEY").ok()),
            metro_map_path: std::env::var("METRO_MAP_PATH").ok(),
            limiter_prune_interval_seconds: std::env::var("LIMITER_PRUNE_INTERVAL_SECONDS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_LIMITER_PRUNE_INTERVAL_SECONDS),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate privacy parameters and secret lengths.
    ///
    /// # Errors
    ///
    /// Returns the first invalid setting.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.privacy.validate()?;
        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidValue("MAX_BATCH_SIZE"));
        }
        if self.limiter_prune_interval_seconds == 0 {
            return Err(ConfigError::InvalidValue("LIMITER_PRUNE_INTERVAL_SECONDS"));
        }
        if self
            .noise_secret
            .as_ref()
            .is_some_and(|s| s.len() < MIN_SECRET_LEN)
        {
            return Err(ConfigError::InvalidValue("NOISE_SECRET"));
        }
        if self.client_hash_key.as_ref().is_some_and(String::is_empty) {
            return Err(ConfigError::InvalidValue("CLIENT_HASH_KEY"));
        }
        Ok(())
    }
}

/// Parse an optional environment variable. Unset means `default`; set but
/// unparseable is an error rather than a silent fallback.
fn env_parse<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue(name)),
        Err(_) => Ok(default),
    }
}

/// Load analytics secrets from the first secrets file found.
fn load_analytics_secrets() -> AnalyticsSecrets {
    let secret_paths = [
        ".secrets/analytics.json",
        "z-analytics/.secrets/analytics.json",
        "z-analytics/service/.secrets/analytics.json",
        "../.secrets/analytics.json",
    ];

    for path in &secret_paths {
        if let Ok(secrets) = load_secrets_file::<AnalyticsSecrets>(path) {
            tracing::info!(path = %path, "Loaded analytics secrets from file");
            return secrets;
        }
    }

    tracing::debug!("Analytics secrets file not found, using environment variables");
    AnalyticsSecrets::default()
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
            data_dir: "/data/z-analytics".into(),
            service_api_key: None,
            admin_api_key: None,
            cors_origins: vec!["*".into()],
            max_body_bytes: 1024 * 1024,
            request_timeout_seconds: 30,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            privacy: PrivacyConfig::default(),
            noise_secret: None,
            client_hash_key: None,
            metro_map_path: None,
            limiter_prune_interval_seconds: DEFAULT_LIMITER_PRUNE_INTERVAL_SECONDS,
        }
    }
}
