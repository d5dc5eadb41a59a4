//! Config CLI subcommands: show, defaults, validate.
//!
//! These read configuration from `SPECFLOW_*` environment variables, or
//! from a TOML file when one is given.

use std::path::Path;

use crate::config::{self, EffectiveConfig, EnvConfig};
use crate::scheduler::SchedulerConfig;
use crate::telemetry::LogConfig;

fn load(path: Option<&Path>) -> Result<EnvConfig, String> {
    match path {
        Some(p) => config::load_file(p).map_err(|e| format!("{}: {e}", p.display())),
        None => Ok(config::load()),
    }
}

/// Print effective config as key-value pairs, or JSON, to stdout.
pub fn run_show(path: Option<&Path>, json: bool) -> i32 {
    let cfg = match load(path) {
        Ok(env) => env.effective_config(),
        Err(e) => {
            eprintln!("ERROR: {e}");
            return 2;
        }
    };
    if json {
        match serde_json::to_string_pretty(&cfg) {
            Ok(text) => println!("{text}"),
            Err(e) => {
                eprintln!("ERROR: {e}");
                return 1;
            }
        }
    } else {
        print_config(&cfg);
    }
    0
}

/// Print default config values (no env overrides) to stdout.
pub fn run_defaults() {
    let env = EnvConfig {
        scheduler: SchedulerConfig::default(),
        log: LogConfig::default(),
    };
    print_config(&env.effective_config());
}

/// Validate configuration. Returns 0 if valid, 1 on warnings, 2 on errors.
pub fn run_validate(path: Option<&Path>) -> i32 {
    let env = match load(path) {
        Ok(env) => env,
        Err(e) => {
            eprintln!("ERROR: {e}");
            return 2;
        }
    };
    if let Err(e) = env.scheduler.validate() {
        eprintln!("ERROR: {e}");
        return 2;
    }

    let cfg = env.effective_config();
    let mut warnings = 0;
    if cfg.max_tokens_per_batch < cfg.max_requests * cfg.beam_width {
        eprintln!(
            "WARNING: SPECFLOW_MAX_TOKENS_PER_BATCH ({}) cannot hold a full frontier for \
             every slot ({} x {})",
            cfg.max_tokens_per_batch, cfg.max_requests, cfg.beam_width
        );
        warnings += 1;
    }
    if !cfg.commit_bonus_token {
        eprintln!(
            "WARNING: SPECFLOW_COMMIT_BONUS_TOKEN is off; a fully rejected tree makes no progress"
        );
        warnings += 1;
    }

    if warnings == 0 {
        println!("Configuration is valid.");
        0
    } else {
        1
    }
}

fn print_config(cfg: &EffectiveConfig) {
    println!("SPECFLOW_MAX_REQUESTS={}", cfg.max_requests);
    println!("SPECFLOW_MAX_TOKENS_PER_BATCH={}", cfg.max_tokens_per_batch);
    println!("SPECFLOW_BEAM_WIDTH={}", cfg.beam_width);
    println!("SPECFLOW_BEAM_DEPTH={}", cfg.beam_depth);
    match cfg.eos_token {
        Some(t) => println!("SPECFLOW_EOS_TOKEN={t}"),
        None => println!("SPECFLOW_EOS_TOKEN="),
    }
    println!("SPECFLOW_COMMIT_BONUS_TOKEN={}", cfg.commit_bonus_token);
    println!("SPECFLOW_SSM_SELECTION={}", cfg.ssm_selection);
    println!("SPECFLOW_LOG_FORMAT={}", cfg.log_format);
    println!("SPECFLOW_LOG_LEVEL={}", cfg.log_level);
    match &cfg.log_file {
        Some(p) => println!("SPECFLOW_LOG_FILE={}", p.display()),
        None => println!("SPECFLOW_LOG_FILE="),
    }
}
