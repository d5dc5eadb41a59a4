//! Scheduler configuration.
//!
//! All fields have safe defaults. Configuration is validated before use.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tree::{TokenId, MAX_BEAM_DEPTH, MAX_BEAM_WIDTH};

/// How the draft model for a speculative round is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SsmSelection {
    /// Cycle through every registered draft model, one per round.
    #[default]
    RoundRobin,
    /// Always use the given draft model.
    Fixed(usize),
}

impl fmt::Display for SsmSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RoundRobin => f.write_str("round-robin"),
            Self::Fixed(id) => write!(f, "fixed:{id}"),
        }
    }
}

impl FromStr for SsmSelection {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("round-robin") {
            return Ok(Self::RoundRobin);
        }
        s.strip_prefix("fixed:")
            .and_then(|id| id.parse().ok())
            .map(Self::Fixed)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "ssm_selection",
                reason: format!("expected `round-robin` or `fixed:<id>`, got `{s}`"),
            })
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Limits and policies for the request manager.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Slot capacity of every batch descriptor.
    pub max_requests: usize,
    /// Token capacity the compute engine declares per batch.
    pub max_tokens_per_batch: usize,
    /// Beam width every request starts a round with.
    pub beam_width: usize,
    /// Layers grown below the root per round.
    pub beam_depth: usize,
    /// Terminal marker. `None` means only length ends a request.
    pub eos_token: Option<TokenId>,
    /// Commit the verify model's own prediction after the accepted path.
    pub commit_bonus_token: bool,
    pub ssm_selection: SsmSelection,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_requests: 8,
            max_tokens_per_batch: 64,
            beam_width: MAX_BEAM_WIDTH,
            beam_depth: MAX_BEAM_DEPTH,
            eos_token: None,
            commit_bonus_token: true,
            ssm_selection: SsmSelection::RoundRobin,
        }
    }
}

impl SchedulerConfig {
    /// Validate configuration values. Returns error on invalid values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(invalid("max_requests", "must be > 0".into()));
        }
        if self.max_tokens_per_batch < self.max_requests {
            return Err(invalid(
                "max_tokens_per_batch",
                format!(
                    "{} cannot give each of {} slots one token",
                    self.max_tokens_per_batch, self.max_requests
                ),
            ));
        }
        if !(1..=MAX_BEAM_WIDTH).contains(&self.beam_width) {
            return Err(invalid(
                "beam_width",
                format!("must be in 1..={MAX_BEAM_WIDTH}, got {}", self.beam_width),
            ));
        }
        if !(1..=MAX_BEAM_DEPTH).contains(&self.beam_depth) {
            return Err(invalid(
                "beam_depth",
                format!("must be in 1..={MAX_BEAM_DEPTH}, got {}", self.beam_depth),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::InvalidValue { field, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(SchedulerConfig::default().validate().is_ok());
    }

    #[test]
    fn zero_slots_rejected() {
        let config = SchedulerConfig { max_requests: 0, ..Default::default() };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "max_requests", .. })
        ));
    }

    #[test]
    fn beam_bounds_enforced() {
        let wide = SchedulerConfig { beam_width: MAX_BEAM_WIDTH + 1, ..Default::default() };
        assert!(wide.validate().is_err());
        let deep = SchedulerConfig { beam_depth: 0, ..Default::default() };
        assert!(deep.validate().is_err());
    }

    #[test]
    fn token_capacity_covers_slots() {
        let config = SchedulerConfig {
            max_requests: 8,
            max_tokens_per_batch: 4,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn ssm_selection_parses() {
        assert_eq!("round-robin".parse::<SsmSelection>().unwrap(), SsmSelection::RoundRobin);
        assert_eq!("fixed:2".parse::<SsmSelection>().unwrap(), SsmSelection::Fixed(2));
        assert!("fixed:x".parse::<SsmSelection>().is_err());
        assert_eq!(SsmSelection::Fixed(3).to_string(), "fixed:3");
    }
}
