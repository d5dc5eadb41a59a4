//! Runtime configuration loading.
//!
//! Values come from `SPECFLOW_*` environment variables or from a TOML file.
//! Missing or invalid environment values fall back to defaults without
//! crashing; out-of-range values are clamped into the tree grid.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |---|---|---|
//! | `SPECFLOW_MAX_REQUESTS` | 8 | Slots per batch (max in-flight requests) |
//! | `SPECFLOW_MAX_TOKENS_PER_BATCH` | 64 | Engine token capacity per batch |
//! | `SPECFLOW_BEAM_WIDTH` | 3 | Beam width per round (1..=3) |
//! | `SPECFLOW_BEAM_DEPTH` | 8 | Speculative depth per round (1..=8) |
//! | `SPECFLOW_EOS_TOKEN` | unset | Terminal marker token id |
//! | `SPECFLOW_COMMIT_BONUS_TOKEN` | true | Commit the verify model's own next token |
//! | `SPECFLOW_SSM_SELECTION` | round-robin | `round-robin` or `fixed:<id>` |
//! | `SPECFLOW_LOG_FORMAT` | json | `json` or `pretty` |
//! | `SPECFLOW_LOG_LEVEL` | info | `EnvFilter` directive |
//! | `SPECFLOW_LOG_FILE` | unset | Write logs to this file instead of stderr |

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::scheduler::{ConfigError, SchedulerConfig, SsmSelection};
use crate::telemetry::{LogConfig, LogFormat};
use crate::tree::{TokenId, MAX_BEAM_DEPTH, MAX_BEAM_WIDTH};

/// Effective configuration summary (serializable).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EffectiveConfig {
    pub max_requests: usize,
    pub max_tokens_per_batch: usize,
    pub beam_width: usize,
    pub beam_depth: usize,
    pub eos_token: Option<TokenId>,
    pub commit_bonus_token: bool,
    pub ssm_selection: String,
    pub log_format: String,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
}

/// Everything the binary needs to start.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub scheduler: SchedulerConfig,
    pub log: LogConfig,
}

/// On-disk layout. Absent keys keep their defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    scheduler: SchedulerConfig,
    log: FileLogConfig,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileLogConfig {
    format: Option<String>,
    level: Option<String>,
    file: Option<PathBuf>,
}

/// Parse a `usize` env var, returning `default` on missing or invalid.
fn parse_usize(key: &str, default: usize) -> usize {
    match std::env::var(key) {
        Ok(val) => val.trim().parse::<usize>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Parse a `bool` env var (`true/false/1/0/yes/no`).
fn parse_bool(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(val) => match val.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => default,
        },
        Err(_) => default,
    }
}

fn parse_token(key: &str) -> Option<TokenId> {
    std::env::var(key).ok()?.trim().parse().ok()
}

/// Bring a scheduler configuration into range instead of rejecting it.
fn clamp_scheduler(mut config: SchedulerConfig) -> SchedulerConfig {
    config.max_requests = config.max_requests.max(1);
    config.max_tokens_per_batch = config.max_tokens_per_batch.max(config.max_requests);
    config.beam_width = config.beam_width.clamp(1, MAX_BEAM_WIDTH);
    config.beam_depth = config.beam_depth.clamp(1, MAX_BEAM_DEPTH);
    config
}

fn load_scheduler_config() -> SchedulerConfig {
    let defaults = SchedulerConfig::default();
    let ssm_selection = std::env::var("SPECFLOW_SSM_SELECTION")
        .ok()
        .and_then(|v| v.parse::<SsmSelection>().ok())
        .unwrap_or(defaults.ssm_selection);
    clamp_scheduler(SchedulerConfig {
        max_requests: parse_usize("SPECFLOW_MAX_REQUESTS", defaults.max_requests),
        max_tokens_per_batch: parse_usize(
            "SPECFLOW_MAX_TOKENS_PER_BATCH",
            defaults.max_tokens_per_batch,
        ),
        beam_width: parse_usize("SPECFLOW_BEAM_WIDTH", defaults.beam_width),
        beam_depth: parse_usize("SPECFLOW_BEAM_DEPTH", defaults.beam_depth),
        eos_token: parse_token("SPECFLOW_EOS_TOKEN"),
        commit_bonus_token: parse_bool("SPECFLOW_COMMIT_BONUS_TOKEN", defaults.commit_bonus_token),
        ssm_selection,
    })
}

fn load_log_config() -> LogConfig {
    let defaults = LogConfig::default();
    LogConfig {
        format: std::env::var("SPECFLOW_LOG_FORMAT")
            .ok()
            .and_then(|v| v.parse::<LogFormat>().ok())
            .unwrap_or(defaults.format),
        level: std::env::var("SPECFLOW_LOG_LEVEL").unwrap_or(defaults.level),
        output_path: std::env::var_os("SPECFLOW_LOG_FILE").map(PathBuf::from),
    }
}

/// Load all configuration from environment variables.
///
/// Missing or invalid values fall back to safe defaults without panicking.
pub fn load() -> EnvConfig {
    EnvConfig {
        scheduler: load_scheduler_config(),
        log: load_log_config(),
    }
}

/// Load configuration from a TOML file.
///
/// Unlike the environment loader, a file with out-of-range values is
/// rejected so typos do not silently change behaviour.
pub fn load_file(path: &Path) -> Result<EnvConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_toml(&text)
}

fn parse_toml(text: &str) -> Result<EnvConfig, ConfigError> {
    let file: FileConfig = toml::from_str(text)?;
    file.scheduler.validate()?;

    let defaults = LogConfig::default();
    let format = match file.log.format.as_deref() {
        Some(f) => f.parse::<LogFormat>().map_err(|e| ConfigError::InvalidValue {
            field: "log.format",
            reason: e.to_string(),
        })?,
        None => defaults.format,
    };
    Ok(EnvConfig {
        scheduler: file.scheduler,
        log: LogConfig {
            format,
            level: file.log.level.unwrap_or(defaults.level),
            output_path: file.log.file,
        },
    })
}

impl EnvConfig {
    /// Return a serializable summary of all effective values.
    pub fn effective_config(&self) -> EffectiveConfig {
        let s = &self.scheduler;
        EffectiveConfig {
            max_requests: s.max_requests,
            max_tokens_per_batch: s.max_tokens_per_batch,
            beam_width: s.beam_width,
            beam_depth: s.beam_depth,
            eos_token: s.eos_token,
            commit_bonus_token: s.commit_bonus_token,
            ssm_selection: s.ssm_selection.to_string(),
            log_format: match self.log.format {
                LogFormat::Json => "json".to_string(),
                LogFormat::Pretty => "pretty".to_string(),
            },
            log_level: self.log.level.clone(),
            log_file: self.log.output_path.clone(),
        }
    }
}

/// Serializes tests that mutate `SPECFLOW_*` variables.
#[cfg(test)]
pub(crate) static ENV_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());
