//! Closed-loop drivers: prepare a batch, run it on the engine, hand the
//! result back, repeat.
//!
//! Both loops sleep on the registry when nothing is running and exit when
//! the shutdown token is cancelled. In-flight engine calls are abandoned on
//! shutdown; the requests they carried stay in the manager.

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use super::{DecodeEngine, DraftEngine, EngineError, VerifyEngine};
use crate::batch::{DecodeResult, VerifyBatch, VerifyResult};
use crate::scheduler::{RequestManager, SchedulerError};

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("engine: {0}")]
    Engine(#[from] EngineError),

    #[error("scheduler: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("no draft engine supplied")]
    NoDraftEngine,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DriverOptions {
    /// Return once nothing is running or pending instead of waiting for
    /// new registrations.
    pub stop_when_idle: bool,
}

/// Counters for one driver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DriverStats {
    /// Engine calls of any kind.
    pub engine_calls: u64,
    /// Decode steps (incremental) or verify passes (speculative).
    pub steps: u64,
    /// Expand steps, speculative mode only.
    pub expand_steps: u64,
}

/// Sleep until work arrives. Returns false on shutdown.
async fn wait_for_work(manager: &RequestManager, shutdown: &CancellationToken) -> bool {
    tracing::trace!("driver idle");
    tokio::select! {
        biased;
        () = shutdown.cancelled() => false,
        () = manager.registry().wait_for_work() => true,
    }
}

/// Run incremental decoding until shutdown (or idle, if asked).
pub async fn run_incremental<E>(
    manager: &mut RequestManager,
    engine: &E,
    options: DriverOptions,
    shutdown: CancellationToken,
) -> Result<DriverStats, DriverError>
where
    E: DecodeEngine + ?Sized,
{
    let mut stats = DriverStats::default();
    let capacity = manager.config().max_requests;
    let mut batch = manager.empty_decode_batch();
    let mut result = DecodeResult::new(capacity);

    while !shutdown.is_cancelled() {
        batch = manager.prepare_next_batch(&batch, &result)?;
        if batch.slots.is_empty() {
            result = DecodeResult::new(capacity);
            if options.stop_when_idle && manager.is_idle() {
                break;
            }
            if !wait_for_work(manager, &shutdown).await {
                break;
            }
            continue;
        }
        result = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            r = engine.decode(&batch) => r?,
        };
        stats.engine_calls += 1;
        stats.steps += 1;
    }
    tracing::info!(steps = stats.steps, "incremental driver stopped");
    Ok(stats)
}

/// Run speculative rounds until shutdown (or idle, if asked).
///
/// `drafts[i]` serves draft model id `i`. The registry is told about every
/// supplied draft so round-robin selection covers all of them.
pub async fn run_speculative<D, V>(
    manager: &mut RequestManager,
    drafts: &[D],
    verifier: &V,
    options: DriverOptions,
    shutdown: CancellationToken,
) -> Result<DriverStats, DriverError>
where
    D: DraftEngine,
    V: VerifyEngine + ?Sized,
{
    if drafts.is_empty() {
        return Err(DriverError::NoDraftEngine);
    }
    while manager.num_ssms() < drafts.len() {
        manager.add_ssm();
    }

    let mut stats = DriverStats::default();
    let capacity = manager.config().max_requests;
    let mut verify = VerifyBatch::new(capacity);
    let mut result = VerifyResult::new(capacity);

    while !shutdown.is_cancelled() {
        let mut expand = manager.prepare_next_batch_init(&verify, &result)?;
        if expand.slots.is_empty() {
            verify = VerifyBatch::new(capacity);
            result = VerifyResult::new(capacity);
            if options.stop_when_idle && manager.is_idle() {
                break;
            }
            if !wait_for_work(manager, &shutdown).await {
                break;
            }
            continue;
        }

        let draft = drafts
            .get(expand.ssm_id)
            .ok_or(EngineError::DraftNotLoaded(expand.ssm_id))?;
        // The first step always runs: it carries the prefix the draft model
        // has not seen yet, even when no tree will grow this round.
        loop {
            let beams = tokio::select! {
                biased;
                () = shutdown.cancelled() => return Ok(stats),
                r = draft.expand(&expand) => r?,
            };
            stats.engine_calls += 1;
            stats.expand_steps += 1;
            expand = manager.prepare_next_batch_beam(&expand, &beams)?;
            if expand.is_complete() {
                break;
            }
        }

        verify = manager.prepare_next_batch_verify(&expand)?;
        result = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            r = verifier.verify(&verify) => r?,
        };
        stats.engine_calls += 1;
        stats.steps += 1;
    }
    tracing::info!(
        rounds = stats.steps,
        expand_steps = stats.expand_steps,
        "speculative driver stopped"
    );
    Ok(stats)
}
