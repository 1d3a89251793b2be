//! Monte-Carlo SALSA with restart.
//!
//! Each of `walks` independent trials starts at the origin and alternates sides for up to
//! `walk_length` hops. Landing on the origin's side (on any node other than the origin)
//! records a hit. After every hop the trial teleports back to the origin with probability
//! `reset_probability`; the hop budget is shared across restarts. A node with no neighbors
//! ends the trial.
//!
//! Public invariants:
//! - **Determinism**: trial `i` draws from its own RNG seeded by `(seed, i)`, so output is
//!   identical for any worker count, with or without the `parallel` feature.
//! - **Self-exclusion**: the origin is never counted.
//! - **Cold start**: an unknown or isolated origin yields `Ok` with no hits.

use crate::cancel::{CancelReason, Cancellation};
use crate::graph::{BipartiteGraph, NodeId, Side};
use crate::topk::{Hit, HitCounter};
use crate::{Error, Result};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use std::ops::Range;
use tracing::debug;

/// Hops between cancellation polls inside a single trial.
const CANCEL_POLL_STEPS: u64 = 4096;

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SalsaConfig {
    /// Maximum number of ranked nodes returned.
    pub limit: usize,
    /// Number of independent trials.
    pub walks: usize,
    /// Hop budget per trial.
    pub walk_length: usize,
    /// Per-hop probability of teleporting back to the origin, in `[0, 1)`.
    pub reset_probability: f64,
    pub seed: u64,
}

impl Default for SalsaConfig {
    fn default() -> Self {
        Self { limit: 10, walks: 1000, walk_length: 100, reset_probability: 0.1, seed: 42 }
    }
}

impl SalsaConfig {
    pub fn validate(&self) -> Result<()> {
        if self.limit == 0 {
            return Err(Error::InvalidParameter("limit must be >= 1".to_string()));
        }
        if self.walks == 0 {
            return Err(Error::InvalidParameter("walks must be >= 1".to_string()));
        }
        if self.walk_length == 0 {
            return Err(Error::InvalidParameter("walk_length must be >= 1".to_string()));
        }
        let p = self.reset_probability;
        if !p.is_finite() || !(0.0..1.0).contains(&p) {
            return Err(Error::InvalidParameter(format!(
                "reset_probability must be in [0, 1) (got {p})"
            )));
        }
        Ok(())
    }
}

/// Counters describing how the trials went.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub trials: u64,
    pub steps: u64,
    pub restarts: u64,
    /// Trials that stopped early on a node with no neighbors.
    pub dead_ends: u64,
}

impl WalkStats {
    fn merge(self, other: WalkStats) -> WalkStats {
        WalkStats {
            trials: self.trials + other.trials,
            steps: self.steps + other.steps,
            restarts: self.restarts + other.restarts,
            dead_ends: self.dead_ends + other.dead_ends,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SalsaRun {
    pub hits: Vec<Hit>,
    /// Distinct nodes hit before truncation to `limit`.
    pub distinct: usize,
    pub total_hits: u64,
    pub stats: WalkStats,
}

impl SalsaRun {
    pub fn is_cold_start(&self) -> bool {
        self.hits.is_empty()
    }
}

/// One hop of a trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkStep {
    pub from: NodeId,
    pub from_side: Side,
    pub to: NodeId,
    pub to_side: Side,
    /// `to` was counted.
    pub hit: bool,
    /// The trial teleported to the origin after this hop.
    pub reset: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct TrialOutcome {
    steps: u64,
    restarts: u64,
    dead_end: bool,
}

/// Rank nodes on `side` co-reachable from `origin`.
pub fn rank<G>(graph: &G, origin: NodeId, side: Side, config: &SalsaConfig) -> Result<Vec<Hit>>
where
    G: BipartiteGraph + Sync + ?Sized,
{
    rank_run(graph, origin, side, config).map(|run| run.hits)
}

pub fn rank_run<G>(graph: &G, origin: NodeId, side: Side, config: &SalsaConfig) -> Result<SalsaRun>
where
    G: BipartiteGraph + Sync + ?Sized,
{
    rank_cancellable(graph, origin, side, config, &Cancellation::none())
}

/// [`rank_run`] that stops with [`Error::Cancelled`] once `cancel` fires.
///
/// Validation and an already-fired `cancel` are reported before any trial runs. A
/// cancelled call never returns partial counts.
pub fn rank_cancellable<G>(
    graph: &G,
    origin: NodeId,
    side: Side,
    config: &SalsaConfig,
    cancel: &Cancellation,
) -> Result<SalsaRun>
where
    G: BipartiteGraph + Sync + ?Sized,
{
    config.validate()?;
    cancel.check().map_err(Error::Cancelled)?;

    let (counter, stats) = if graph.neighbors(origin, side).is_empty() {
        // Cold start: no trial can take a single hop.
        let stats = WalkStats {
            trials: config.walks as u64,
            dead_ends: config.walks as u64,
            ..WalkStats::default()
        };
        (HitCounter::new(), stats)
    } else {
        run_trials(graph, origin, side, config, cancel).map_err(Error::Cancelled)?
    };

    let hits = counter.top(config.limit);
    debug!(
        origin,
        side = %side,
        trials = stats.trials,
        steps = stats.steps,
        restarts = stats.restarts,
        dead_ends = stats.dead_ends,
        distinct = counter.len(),
        total_hits = counter.total(),
        "salsa rank finished"
    );
    Ok(SalsaRun { hits, distinct: counter.len(), total_hits: counter.total(), stats })
}

/// Replay trial `trial` of a [`rank`] call with the same config, returning every hop.
pub fn sample_walk<G>(
    graph: &G,
    origin: NodeId,
    side: Side,
    config: &SalsaConfig,
    trial: u64,
) -> Result<Vec<WalkStep>>
where
    G: BipartiteGraph + ?Sized,
{
    config.validate()?;
    let mut path = Vec::new();
    run_trial(graph, origin, side, config, trial, &Cancellation::none(), |step| path.push(*step))
        .map_err(Error::Cancelled)?;
    Ok(path)
}

/// Per-worker counts, reduced by summation.
type Partial = (HitCounter, WalkStats);

fn run_trials<G>(
    graph: &G,
    origin: NodeId,
    side: Side,
    config: &SalsaConfig,
    cancel: &Cancellation,
) -> std::result::Result<Partial, CancelReason>
where
    G: BipartiteGraph + Sync + ?Sized,
{
    let chunks = trial_chunks(config.walks as u64, worker_count());
    let run = |range: Range<u64>| run_chunk(graph, origin, side, config, range, cancel);
    let merge = |a: Partial, b: Partial| -> std::result::Result<Partial, CancelReason> {
        Ok((a.0.merge(b.0), a.1.merge(b.1)))
    };
    let identity = || (HitCounter::new(), WalkStats::default());

    #[cfg(feature = "parallel")]
    let reduced = {
        use rayon::prelude::*;
        chunks.into_par_iter().map(run).try_reduce(identity, merge)
    };
    #[cfg(not(feature = "parallel"))]
    let reduced = chunks.into_iter().map(run).try_fold(identity(), |acc, part| merge(acc, part?));

    reduced
}

#[cfg(feature = "parallel")]
fn worker_count() -> usize {
    rayon::current_num_threads()
}

#[cfg(not(feature = "parallel"))]
fn worker_count() -> usize {
    1
}

/// Split `0..trials` into contiguous ranges, a few per worker for load balance.
fn trial_chunks(trials: u64, workers: usize) -> Vec<Range<u64>> {
    let target = (workers.max(1) as u64 * 4).min(trials).max(1);
    let size = trials.div_ceil(target);
    (0..trials).step_by(size as usize).map(|start| start..(start + size).min(trials)).collect()
}

fn run_chunk<G>(
    graph: &G,
    origin: NodeId,
    side: Side,
    config: &SalsaConfig,
    trials: Range<u64>,
    cancel: &Cancellation,
) -> std::result::Result<Partial, CancelReason>
where
    G: BipartiteGraph + ?Sized,
{
    let mut counter = HitCounter::new();
    let mut stats = WalkStats::default();
    for trial in trials {
        cancel.check()?;
        let mut step_index = 0u64;
        let outcome = run_trial(graph, origin, side, config, trial, cancel, |step| {
            step_index += 1;
            if step.hit {
                counter.record(step.to, (trial, step_index));
            }
        })?;
        stats.trials += 1;
        stats.steps += outcome.steps;
        stats.restarts += outcome.restarts;
        stats.dead_ends += u64::from(outcome.dead_end);
    }
    Ok((counter, stats))
}

fn run_trial<G, F>(
    graph: &G,
    origin: NodeId,
    origin_side: Side,
    config: &SalsaConfig,
    trial: u64,
    cancel: &Cancellation,
    mut visit: F,
) -> std::result::Result<TrialOutcome, CancelReason>
where
    G: BipartiteGraph + ?Sized,
    F: FnMut(&WalkStep),
{
    let mut rng = ChaCha8Rng::seed_from_u64(trial_seed(config.seed, trial));
    let mut outcome = TrialOutcome::default();
    let mut current = origin;
    let mut side = origin_side;
    let budget = config.walk_length as u64;

    while outcome.steps < budget {
        if outcome.steps > 0 && outcome.steps % CANCEL_POLL_STEPS == 0 {
            cancel.check()?;
        }
        let candidates = graph.neighbors(current, side);
        if candidates.is_empty() {
            outcome.dead_end = true;
            break;
        }
        let Some(next) = candidates.get(rng.random_range(0..candidates.len())) else {
            outcome.dead_end = true;
            break;
        };

        let from = current;
        let from_side = side;
        side = side.opposite();
        current = next;
        outcome.steps += 1;

        let hit = side == origin_side && current != origin;
        let reset = rng.random_bool(config.reset_probability);
        visit(&WalkStep { from, from_side, to: current, to_side: side, hit, reset });

        if reset {
            current = origin;
            side = origin_side;
            outcome.restarts += 1;
        }
    }
    Ok(outcome)
}

fn trial_seed(seed: u64, trial: u64) -> u64 {
    mix64(seed ^ trial.wrapping_mul(0x9e37_79b9_7f4a_7c15))
}

/// SplitMix64 finalizer.
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^= x >> 31;
    x
}
