use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

pub const DEFAULT_MAX_L1: u32 = 10;
pub const DEFAULT_MAX_L2: u32 = 6;
pub const DEFAULT_MIN_L1: u32 = 4;
pub const DEFAULT_MIN_L2: u32 = 2;
pub const DEFAULT_NOT_SURE_RATE: f64 = 0.1;
pub const DEFAULT_PROFILE: &str = "balanced";

/// Flow configuration for one session. Immutable once the runner is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Hard cap on L1 cards shown
    pub max_l1: u32,
    /// Hard cap on L2 cards shown. 0 skips the L2 phase entirely.
    pub max_l2: u32,
    /// L1 cards that must be answered before an early stop may fire
    pub min_l1: u32,
    /// L2 cards that must be answered before an early stop may fire
    pub min_l2: u32,
    /// End the session as soon as all gates are closed
    pub stop_on_gates: bool,
    /// Probability of a "not sure" answer in sampled answer policies
    pub not_sure_rate: f64,
    /// Answer-sampling behavior id used by harnesses
    pub profile: String,
    /// Let the L1 selector prefer cards covering gates that are still open
    pub coverage_first_enabled: bool,
    /// Feed baseline-derived tags through the evidence path on init
    pub baseline_injection_enabled: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_l1: DEFAULT_MAX_L1,
            max_l2: DEFAULT_MAX_L2,
            min_l1: DEFAULT_MIN_L1,
            min_l2: DEFAULT_MIN_L2,
            stop_on_gates: true,
            not_sure_rate: DEFAULT_NOT_SURE_RATE,
            profile: DEFAULT_PROFILE.to_string(),
            coverage_first_enabled: true,
            baseline_injection_enabled: true,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_l1 == 0 {
            return Err(ConfigError::new("max_l1", "must be greater than 0"));
        }
        if self.min_l1 > self.max_l1 {
            return Err(ConfigError::new("min_l1", "must not exceed max_l1"));
        }
        if self.min_l2 > self.max_l2 {
            return Err(ConfigError::new("min_l2", "must not exceed max_l2"));
        }
        if !self.not_sure_rate.is_finite() || !(0.0..=1.0).contains(&self.not_sure_rate) {
            return Err(ConfigError::new("not_sure_rate", "must be within [0, 1]"));
        }
        if self.profile.trim().is_empty() {
            return Err(ConfigError::new("profile", "must not be empty"));
        }
        Ok(())
    }

    /// Safety cap on total steps. A correctly configured run never reaches it.
    pub fn step_cap(&self) -> u32 {
        2 * (self.max_l1 + self.max_l2) + 4
    }

    /// Apply partial overrides and re-validate the result.
    pub fn with_overrides(&self, overrides: &SessionConfigOverrides) -> Result<Self, ConfigError> {
        let mut next = self.clone();
        if let Some(v) = overrides.max_l1 {
            next.max_l1 = v;
        }
        if let Some(v) = overrides.max_l2 {
            next.max_l2 = v;
        }
        if let Some(v) = overrides.min_l1 {
            next.min_l1 = v;
        }
        if let Some(v) = overrides.min_l2 {
            next.min_l2 = v;
        }
        if let Some(v) = overrides.stop_on_gates {
            next.stop_on_gates = v;
        }
        if let Some(v) = overrides.not_sure_rate {
            next.not_sure_rate = v;
        }
        if let Some(v) = &overrides.profile {
            next.profile = v.clone();
        }
        if let Some(v) = overrides.coverage_first_enabled {
            next.coverage_first_enabled = v;
        }
        if let Some(v) = overrides.baseline_injection_enabled {
            next.baseline_injection_enabled = v;
        }
        next.validate()?;
        Ok(next)
    }
}

/// Partial config as found in fixtures. Absent fields keep the base value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SessionConfigOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_l1: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_l2: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_l1: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_l2: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_on_gates: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub not_sure_rate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coverage_first_enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_injection_enabled: Option<bool>,
}
