//! `simulate`: run the driver against the counting model and print a
//! profiling report as JSON.

use std::str::FromStr;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config;
use crate::engine::{run_incremental, run_speculative, CountingModel, DriverOptions, DriverStats};
use crate::scheduler::{FinishReason, RequestManager, SchedulerConfig};
use crate::tree::TokenId;

const VOCAB: TokenId = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SimMode {
    Spec,
    Incremental,
}

impl FromStr for SimMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "spec" | "speculative" => Ok(Self::Spec),
            "incremental" | "decode" => Ok(Self::Incremental),
            other => Err(format!("unknown mode `{other}` (expected spec or incremental)")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulateArgs {
    pub requests: usize,
    pub prompt_len: usize,
    pub max_len: usize,
    pub mode: SimMode,
    /// Make the draft model miss at every n-th position.
    pub miss_every: Option<usize>,
}

impl Default for SimulateArgs {
    fn default() -> Self {
        Self {
            requests: 4,
            prompt_len: 8,
            max_len: 32,
            mode: SimMode::Spec,
            miss_every: None,
        }
    }
}

impl SimulateArgs {
    /// Parse the arguments following `simulate`.
    pub fn parse(args: &[String]) -> Result<Self, String> {
        let mut out = Self::default();
        let mut iter = args.iter();
        while let Some(flag) = iter.next() {
            let mut value = || {
                iter.next()
                    .map(String::as_str)
                    .ok_or_else(|| format!("{flag} needs a value"))
            };
            match flag.as_str() {
                "--requests" => out.requests = parse_num(flag, value()?)?,
                "--prompt-len" => out.prompt_len = parse_num(flag, value()?)?,
                "--max-len" => out.max_len = parse_num(flag, value()?)?,
                "--miss-every" => out.miss_every = Some(parse_num(flag, value()?)?),
                "--mode" => out.mode = value()?.parse()?,
                other => return Err(format!("unknown option `{other}`")),
            }
        }
        if out.prompt_len == 0 {
            return Err("--prompt-len must be > 0".into());
        }
        if out.max_len <= out.prompt_len {
            return Err("--max-len must exceed --prompt-len".into());
        }
        Ok(out)
    }
}

fn parse_num(flag: &str, value: &str) -> Result<usize, String> {
    value
        .parse()
        .map_err(|_| format!("{flag} expects a number, got `{value}`"))
}

#[derive(Debug, Serialize)]
pub struct RequestSummary {
    pub guid: u64,
    pub prompt_len: usize,
    pub generated: usize,
    pub finish_reason: FinishReason,
    pub decoding_steps: u32,
    pub run_time_us: u128,
}

#[derive(Debug, Serialize)]
pub struct SimulationReport {
    pub mode: SimMode,
    pub processed: usize,
    pub total_run_time_us: u128,
    pub stats: DriverStats,
    pub requests: Vec<RequestSummary>,
}

/// Register the synthetic prompts and drive them to completion.
pub async fn simulate(
    scheduler: SchedulerConfig,
    args: &SimulateArgs,
) -> Result<SimulationReport, String> {
    let mut manager = RequestManager::new(scheduler).map_err(|e| e.to_string())?;
    let capacity = manager.config().max_tokens_per_batch;
    let mut model = CountingModel::new(VOCAB, capacity);
    if let Some(n) = args.miss_every {
        model = model.with_miss_every(n);
    }

    for i in 0..args.requests {
        let prompt: Vec<TokenId> = (0..args.prompt_len)
            .map(|j| ((i * 31 + j) as TokenId) % VOCAB)
            .collect();
        manager
            .register(prompt, args.max_len)
            .map_err(|e| e.to_string())?;
    }

    let options = DriverOptions { stop_when_idle: true };
    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("shutdown signal received, stopping simulation");
            on_signal.cancel();
        }
    });
    let stats = match args.mode {
        SimMode::Spec => {
            run_speculative(&mut manager, std::slice::from_ref(&model), &model, options, shutdown)
                .await
        }
        SimMode::Incremental => run_incremental(&mut manager, &model, options, shutdown).await,
    };
    signal_task.abort();
    let stats = stats.map_err(|e| e.to_string())?;

    let requests = manager
        .take_completed()
        .into_iter()
        .map(|out| RequestSummary {
            guid: out.guid.0,
            prompt_len: out.prompt_len,
            generated: out.generated().len(),
            finish_reason: out.finish_reason,
            decoding_steps: out.profile.decoding_steps,
            run_time_us: out.profile.run_time.as_micros(),
        })
        .collect();
    Ok(SimulationReport {
        mode: args.mode,
        processed: manager.num_processed_requests(),
        total_run_time_us: manager.total_request_run_time().as_micros(),
        stats,
        requests,
    })
}

/// Entry point for `specflow-cli simulate`. Returns the exit code.
pub async fn run_simulate(args: &[String]) -> i32 {
    let args = match SimulateArgs::parse(args) {
        Ok(a) => a,
        Err(e) => {
            eprintln!("simulate: {e}");
            return 2;
        }
    };
    let scheduler = config::load().scheduler;
    match simulate(scheduler, &args).await {
        Ok(report) => match serde_json::to_string_pretty(&report) {
            Ok(json) => {
                println!("{json}");
                0
            }
            Err(e) => {
                eprintln!("simulate: {e}");
                1
            }
        },
        Err(e) => {
            eprintln!("simulate: {e}");
            1
        }
    }
}
