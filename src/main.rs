//! specflow-cli entry point.
//!
//! ## Subcommands
//!
//! - `specflow-cli simulate` - Run the scheduler against the counting model
//! - `specflow-cli config show|defaults|validate` - Inspect configuration
//! - `specflow-cli version` / `help`

use std::process::ExitCode;

use specflow_core::cli::{config_cmd, config_path, run_simulate};
use specflow_core::config as specflow_config;
use specflow_core::telemetry;

#[tokio::main]
async fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    let command = args.get(1).map(|s| s.as_str()).unwrap_or("help");

    match command {
        "simulate" | "sim" => {
            let log = specflow_config::load().log;
            if let Err(e) = telemetry::init_logging(&log) {
                eprintln!("Logging disabled: {}", e);
            }
            telemetry::init_metrics();
            let code = run_simulate(&args[2..]).await;
            ExitCode::from(code as u8)
        }
        "config" => {
            let subcommand = args.get(2).map(|s| s.as_str()).unwrap_or("show");
            let rest = args.get(3..).unwrap_or_default();
            let path = config_path(rest);
            match subcommand {
                "show" => {
                    let json = rest.iter().any(|a| a == "--json");
                    let code = config_cmd::run_show(path.as_deref(), json);
                    ExitCode::from(code as u8)
                }
                "defaults" => {
                    config_cmd::run_defaults();
                    ExitCode::SUCCESS
                }
                "validate" => {
                    let code = config_cmd::run_validate(path.as_deref());
                    ExitCode::from(code as u8)
                }
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    ExitCode::FAILURE
                }
            }
        }
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(2) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            ExitCode::SUCCESS
        }
        "version" | "--version" | "-V" => {
            println!("specflow-cli {}", env!("CARGO_PKG_VERSION"));
            ExitCode::SUCCESS
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            ExitCode::FAILURE
        }
    }
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "specflow-cli - tree-based speculative inference scheduler v{}

USAGE:
    specflow-cli [COMMAND] [OPTIONS]

COMMANDS:
    simulate     Drive synthetic requests through the counting model
    config       Manage configuration (show, defaults, validate)
    version      Show version information
    help         Show this help message

EXAMPLES:
    specflow-cli simulate --requests 16 --mode spec
    specflow-cli simulate --mode incremental --max-len 64
    specflow-cli config show --json
    specflow-cli config validate --file specflow.toml

ENVIRONMENT:
    SPECFLOW_*           Scheduler and logging settings (see `config defaults`)

EXIT CODES:
    0  Success
    1  Failure / warnings
    2  Configuration or usage error",
        version
    );
}

fn print_command_help(command: &str) {
    match command {
        "simulate" | "sim" => eprintln!(
            "specflow-cli simulate [OPTIONS]

OPTIONS:
    --requests N      Number of synthetic requests (default 4)
    --prompt-len N    Prompt length in tokens (default 8)
    --max-len N       max_sequence_length per request (default 32)
    --mode MODE       spec | incremental (default spec)
    --miss-every N    Make the draft model guess wrong every N positions"
        ),
        "config" => eprintln!(
            "specflow-cli config <show|defaults|validate> [OPTIONS]

OPTIONS:
    --file PATH       Read a TOML file instead of SPECFLOW_* variables
    --json            (show) Print JSON instead of KEY=VALUE lines"
        ),
        other => {
            eprintln!("No help for `{}`", other);
            print_usage();
        }
    }
}
