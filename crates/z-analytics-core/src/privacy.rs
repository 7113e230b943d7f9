//! Privacy parameters.
//!
//! Fixed for the life of a process and validated once at startup. There is
//! no switch that disables perturbation or noise.

use serde::{Deserialize, Serialize};

use crate::error::{PrivacyError, Result};
use crate::ldp::RrParams;
use crate::noise::LaplaceMechanism;

/// Default ε for client-side randomized response.
pub const DEFAULT_CLIENT_EPSILON: f64 = 2.0;

/// Default ε spent by each materialized tier.
pub const DEFAULT_SERVER_EPSILON: f64 = 0.5;

/// Default Laplace sensitivity.
pub const DEFAULT_SENSITIVITY: f64 = 1.0;

/// Default minimum noisy count before coarsening.
pub const DEFAULT_COARSEN_THRESHOLD: u64 = 5;

/// Default maximum inclusive query range in days.
pub const DEFAULT_MAX_QUERY_DAYS: u32 = 90;

/// Default per-client, per-(day, metric) contribution cap.
pub const DEFAULT_MAX_DAILY_CONTRIBUTIONS: u32 = 100;

/// Default daily epsilon ceiling.
pub const DEFAULT_MAX_DAILY_EPSILON: f64 = 2.5;

/// Tolerance for floating point budget comparisons.
pub const EPSILON_TOLERANCE: f64 = 1e-9;

/// Deploy-time privacy parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PrivacyConfig {
    /// ε for k-ary randomized response on the client.
    pub client_epsilon: f64,
    /// ε charged per materialized tier.
    pub server_epsilon: f64,
    /// Laplace sensitivity.
    pub sensitivity: f64,
    /// Minimum noisy count a group must reach to be reported at its own level.
    pub coarsen_threshold: u64,
    /// Maximum inclusive query range.
    pub max_query_days: u32,
    /// Contribution cap per client per (day, metric).
    pub max_daily_contributions: u32,
    /// Daily epsilon ceiling for the ledger.
    pub max_daily_epsilon: f64,
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            client_epsilon: DEFAULT_CLIENT_EPSILON,
            server_epsilon: DEFAULT_SERVER_EPSILON,
            sensitivity: DEFAULT_SENSITIVITY,
            coarsen_threshold: DEFAULT_COARSEN_THRESHOLD,
            max_query_days: DEFAULT_MAX_QUERY_DAYS,
            max_daily_contributions: DEFAULT_MAX_DAILY_CONTRIBUTIONS,
            max_daily_epsilon: DEFAULT_MAX_DAILY_EPSILON,
        }
    }
}

impl PrivacyConfig {
    /// Check every parameter.
    ///
    /// # Errors
    ///
    /// Returns the first invalid parameter.
    pub fn validate(&self) -> Result<()> {
        positive(self.client_epsilon).ok_or(PrivacyError::InvalidEpsilon("client"))?;
        positive(self.server_epsilon).ok_or(PrivacyError::InvalidEpsilon("server"))?;
        positive(self.max_daily_epsilon).ok_or(PrivacyError::InvalidEpsilon("daily limit"))?;
        positive(self.sensitivity).ok_or(PrivacyError::InvalidSensitivity)?;
        if self.coarsen_threshold < 1 {
            return Err(PrivacyError::Configuration(
                "coarsen threshold must be at least 1".into(),
            ));
        }
        if self.max_query_days < 1 {
            return Err(PrivacyError::Configuration(
                "max query days must be at least 1".into(),
            ));
        }
        if self.max_daily_contributions < 1 {
            return Err(PrivacyError::Configuration(
                "max daily contributions must be at least 1".into(),
            ));
        }
        if self.server_epsilon > self.max_daily_epsilon + EPSILON_TOLERANCE {
            return Err(PrivacyError::Configuration(
                "server epsilon exceeds the daily limit".into(),
            ));
        }
        Ok(())
    }

    /// Randomized response parameters over the metric domain.
    ///
    /// # Errors
    ///
    /// Returns an error if `client_epsilon` is invalid.
    pub fn rr_params(&self) -> Result<RrParams> {
        RrParams::for_metrics(self.client_epsilon)
    }

    /// Laplace mechanism for one tier.
    ///
    /// # Errors
    ///
    /// Returns an error if `server_epsilon` or `sensitivity` is invalid.
    pub fn mechanism(&self) -> Result<LaplaceMechanism> {
        LaplaceMechanism::new(self.sensitivity, self.server_epsilon)
    }
}

fn positive(value: f64) -> Option<f64> {
    (value.is_finite() && value > 0.0).then_some(value)
}
