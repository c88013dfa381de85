//! Per-worker execution loop for a mix.

use super::queries::{self, COUNT_WINDOW_US, ERROR_RATE_WINDOW_US};
use super::{
    Mix, OperationKind, INSERT_BATCH, INSERT_SMALL_BATCH, MAX_PAGE_OFFSET, QUERY_LIMIT,
};
use crate::loader::{self, Loader};
use opsbench_core::prefix;
use rand::rngs::StdRng;
use rand::Rng;
use rusqlite::Connection;
use std::time::{Duration, Instant};

/// Errors logged per worker before the rest are only counted.
pub const SURFACED_ERRORS: u64 = 5;

/// Result of a single loop iteration.
#[derive(Debug)]
pub enum IterationOutcome {
    Sample {
        kind: OperationKind,
        latency: Duration,
    },
    Failed {
        kind: OperationKind,
        error: anyhow::Error,
    },
}

/// Worker-local totals, merged by the orchestrator after join.
#[derive(Debug, Clone, Default)]
pub struct WorkerMetrics {
    pub ops: u64,
    pub errors: u64,
    pub samples: Vec<(OperationKind, Duration)>,
}

impl WorkerMetrics {
    /// Fold one outcome into the totals. Returns the error if it is among
    /// the first [`SURFACED_ERRORS`] of this worker.
    pub fn record(&mut self, outcome: IterationOutcome) -> Option<(OperationKind, anyhow::Error)> {
        match outcome {
            IterationOutcome::Sample { kind, latency } => {
                self.ops += 1;
                self.samples.push((kind, latency));
                None
            }
            IterationOutcome::Failed { kind, error } => {
                self.errors += 1;
                (self.errors <= SURFACED_ERRORS).then_some((kind, error))
            }
        }
    }

    pub fn merge(&mut self, other: WorkerMetrics) {
        self.ops += other.ops;
        self.errors += other.errors;
        self.samples.extend(other.samples);
    }
}

/// Drives one worker's timed loop over a mix.
pub struct MixRunner<R: Rng = StdRng> {
    worker: usize,
    mix: Mix,
    loader: Loader<R>,
}

impl<R: Rng> MixRunner<R> {
    pub fn new(worker: usize, mix: Mix, loader: Loader<R>) -> Self {
        Self {
            worker,
            mix,
            loader,
        }
    }

    /// Run iterations until `duration` has elapsed. The bound is checked
    /// between iterations only.
    pub fn run(&mut self, conn: &mut Connection, duration: Duration) -> WorkerMetrics {
        let start = Instant::now();
        let mut metrics = WorkerMetrics::default();
        while start.elapsed() < duration {
            let outcome = self.run_iteration(conn);
            if let Some((kind, error)) = metrics.record(outcome) {
                log::warn!(
                    "Worker {} mix {} {kind} failed: {error:#}",
                    self.worker,
                    self.mix.name()
                );
            }
        }
        log::debug!(
            "Worker {} finished: {} ops, {} errors",
            self.worker,
            metrics.ops,
            metrics.errors
        );
        metrics
    }

    /// Draw a kind from the mix and execute it.
    pub fn run_iteration(&mut self, conn: &mut Connection) -> IterationOutcome {
        let r: f64 = self.loader.generator().rng().gen();
        let kind = self.mix.select(r);
        self.execute(conn, kind)
    }

    /// Execute one store interaction of `kind`. Inputs are prepared before
    /// the clock starts; only the store call is timed.
    pub fn execute(&mut self, conn: &mut Connection, kind: OperationKind) -> IterationOutcome {
        match self.dispatch(conn, kind) {
            Ok(latency) => IterationOutcome::Sample { kind, latency },
            Err(error) => IterationOutcome::Failed { kind, error },
        }
    }

    fn dispatch(&mut self, conn: &mut Connection, kind: OperationKind) -> anyhow::Result<Duration> {
        let error_rate = self.loader.error_rate();
        let latency = match kind {
            OperationKind::ExactLookup => {
                let path = self.loader.generator().heavy_path();
                timed(|| queries::exact_lookup(conn, &path, QUERY_LIMIT))?
            }
            OperationKind::Insert | OperationKind::Insert500 => {
                let size = if kind == OperationKind::Insert {
                    INSERT_BATCH
                } else {
                    INSERT_SMALL_BATCH
                };
                let ops = self.loader.generator().generate(size, error_rate);
                timed(|| loader::insert_batch(conn, &ops))?
            }
            OperationKind::InsertSingle => {
                let ops = self.loader.generator().generate(1, error_rate);
                let op = ops
                    .first()
                    .ok_or_else(|| anyhow::anyhow!("generator returned no record"))?;
                timed(|| loader::insert_single(conn, op))?
            }
            OperationKind::PrefixL1
            | OperationKind::PrefixL2
            | OperationKind::PrefixL3
            | OperationKind::PrefixL4
            | OperationKind::PrefixCold => {
                let prefix = self.sample_prefix(kind);
                timed(|| queries::latest_by_prefix(conn, &prefix, QUERY_LIMIT, 0))?
            }
            OperationKind::PrefixOffset => {
                let prefix = self.sample_prefix(kind);
                let offset = self.loader.generator().rng().gen_range(0..=MAX_PAGE_OFFSET);
                timed(|| queries::latest_by_prefix(conn, &prefix, QUERY_LIMIT, offset))?
            }
            OperationKind::CountWindow => {
                let prefix = self.sample_prefix(kind);
                let since = queries::window_start(COUNT_WINDOW_US);
                timed(|| queries::count_window(conn, &prefix, since))?
            }
            OperationKind::ErrorRate => {
                let prefix = self.sample_prefix(kind);
                let since = queries::window_start(ERROR_RATE_WINDOW_US);
                timed(|| queries::error_rate(conn, &prefix, since))?
            }
        };
        Ok(latency)
    }

    /// Leading segments of a sampled path at the kind's depth. Paths that
    /// are too shallow are replaced by a fresh path that is deep enough.
    fn sample_prefix(&mut self, kind: OperationKind) -> String {
        let generator = self.loader.generator();
        let Some(depth) = kind.prefix_depth() else {
            return generator.heavy_path();
        };
        let path = if kind == OperationKind::PrefixCold {
            generator.random_path()
        } else {
            generator.heavy_path()
        };
        if let Some(leading) = prefix::leading(&path, depth) {
            return leading.to_string();
        }
        let deep = generator.deep_path(depth);
        match prefix::leading(&deep, depth) {
            Some(leading) => leading.to_string(),
            None => deep,
        }
    }
}

fn timed<T, E>(call: impl FnOnce() -> Result<T, E>) -> Result<Duration, E> {
    let start = Instant::now();
    call()?;
    Ok(start.elapsed())
}
