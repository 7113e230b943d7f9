//! Application state.

use std::sync::Arc;

use z_analytics_core::{GeoHierarchy, MetroMap, NoiseSecret};
use z_analytics_store::RocksStore;

use crate::config::{ConfigError, ServiceConfig};
use crate::crypto::ClientHasher;
use crate::limiter::ContributionLimiter;
use crate::materialize::{Materializer, NoiseKeys};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    /// The storage backend.
    pub store: Arc<RocksStore>,

    /// Service configuration.
    pub config: ServiceConfig,

    /// Server-side contribution limiter.
    pub limiter: Arc<ContributionLimiter>,

    /// Geographic hierarchy, including the metro table if configured.
    pub hierarchy: Arc<GeoHierarchy>,

    /// Keyed hasher for client identifiers.
    pub hasher: ClientHasher,

    /// Snapshot materializer.
    pub materializer: Materializer,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if the privacy parameters are invalid, the metro
    /// map cannot be loaded, or no client hash key can be generated.
    pub fn new(store: Arc<RocksStore>, config: ServiceConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let hierarchy = Arc::new(match config.metro_map_path.as_deref() {
            Some(path) => {
                let hierarchy = load_metro_map(path)?;
                tracing::info!(path = %path, "Metro mapping loaded");
                hierarchy
            }
            None => {
                tracing::warn!("Metro mapping not configured - districts roll up to states");
                GeoHierarchy::new()
            }
        });

        let hasher = match config.client_hash_key.as_deref() {
            Some(key) => ClientHasher::new(key.as_bytes().to_vec()),
            None => ClientHasher::random(&mut rand::rngs::OsRng)?,
        };

        let noise = match config.noise_secret.as_deref() {
            Some(secret) => NoiseKeys::Derived(NoiseSecret::new(secret.as_bytes().to_vec())?),
            None => {
                tracing::warn!("Noise secret not configured - day keys will be generated and stored");
                NoiseKeys::Generated
            }
        };

        let limiter = Arc::new(ContributionLimiter::new(
            config.privacy.max_daily_contributions,
        ));
        let materializer = Materializer::new(
            Arc::clone(&store),
            config.privacy,
            Arc::clone(&hierarchy),
            noise,
        );

        Ok(Self {
            store,
            config,
            limiter,
            hierarchy,
            hasher,
            materializer,
        })
    }
}

/// Load and validate the district → metro mapping.
fn load_metro_map(path: &str) -> Result<GeoHierarchy, ConfigError> {
    let file_error = |reason: String| ConfigError::File {
        path: path.to_string(),
        reason,
    };
    let contents = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
    let map: MetroMap = serde_json::from_str(&contents).map_err(|e| file_error(e.to_string()))?;
    GeoHierarchy::from_metro_map(&map).map_err(|e| file_error(e.to_string()))
}
