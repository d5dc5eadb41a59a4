//! Operator subcommands for `specflow-cli`.
//!
//! ## Usage
//!
//! ```bash
//! specflow-cli simulate --requests 8 --mode spec   # JSON profiling report
//! specflow-cli config show --json                  # Effective configuration
//! specflow-cli config validate --file specflow.toml
//! ```

pub mod config_cmd;
pub mod simulate;

pub use simulate::{run_simulate, simulate, SimMode, SimulateArgs, SimulationReport};

use std::path::PathBuf;

/// Value following `--file` in `args`, if any.
pub fn config_path(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == "--file" || a == "-f")
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}
