//! Seeding and timed-run orchestration over worker threads.
//!
//! Every worker checks its connection out of the pool before any thread is
//! started, so an unreachable store fails the whole command up front. Once
//! workers are running, a failure in one of them (load error or panic) is
//! reported as a failed worker and the summary is still produced.

use crate::loader::Loader;
use crate::report::{LatencySummary, RunReport, SeedReport};
use crate::store::{PooledConn, StorePool};
use crate::workload::runner::{MixRunner, WorkerMetrics};
use crate::workload::{MixName, OperationKind};
use anyhow::{ensure, Context, Result};
use opsbench_core::generator::{Generator, GeneratorConfig, HeavyPaths};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// How often seeding progress is logged.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

const POLL_TICK: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
//  Worker lifecycle
// ---------------------------------------------------------------------------

/// Lifecycle of one worker thread: `Idle -> Running -> Succeeded | Failed`.
/// The final state travels in [`Joined`] once the thread has been joined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Succeeded,
    Failed,
}

/// A joined worker's result. `value` is `None` when the thread panicked.
#[derive(Debug)]
pub struct Joined<T> {
    pub worker: usize,
    pub state: WorkerState,
    pub value: Option<T>,
}

struct WorkerSlot<T> {
    worker: usize,
    state: WorkerState,
    handle: Option<JoinHandle<(bool, T)>>,
}

/// Threads spawned for one seed or run pass.
///
/// Each body returns `(succeeded, value)`; the value is kept either way so
/// partial work of a failed worker still reaches the report.
struct WorkerSet<T> {
    label: &'static str,
    slots: Vec<WorkerSlot<T>>,
}

impl<T: Send + 'static> WorkerSet<T> {
    fn new(label: &'static str) -> Self {
        Self {
            label,
            slots: Vec::new(),
        }
    }

    fn spawn<F>(&mut self, body: F) -> Result<()>
    where
        F: FnOnce() -> (bool, T) + Send + 'static,
    {
        let worker = self.slots.len();
        let mut slot = WorkerSlot {
            worker,
            state: WorkerState::Idle,
            handle: None,
        };
        let handle = thread::Builder::new()
            .name(format!("{}-{worker}", self.label))
            .spawn(body)
            .with_context(|| format!("spawning {} worker {worker}", self.label))?;
        slot.handle = Some(handle);
        slot.state = WorkerState::Running;
        self.slots.push(slot);
        Ok(())
    }

    fn len(&self) -> usize {
        self.slots.len()
    }

    fn all_finished(&self) -> bool {
        self.slots
            .iter()
            .all(|s| s.handle.as_ref().map_or(true, JoinHandle::is_finished))
    }

    fn join(self) -> Vec<Joined<T>> {
        let label = self.label;
        self.slots
            .into_iter()
            .map(|mut slot| {
                let (state, value) = match slot.handle.take().map(JoinHandle::join) {
                    Some(Ok((true, value))) => (WorkerState::Succeeded, Some(value)),
                    Some(Ok((false, value))) => (WorkerState::Failed, Some(value)),
                    Some(Err(_)) => {
                        log::error!("{label} worker {} panicked", slot.worker);
                        (WorkerState::Failed, None)
                    }
                    None => (slot.state, None),
                };
                log::debug!("{label} worker {} joined as {state:?}", slot.worker);
                Joined {
                    worker: slot.worker,
                    state,
                    value,
                }
            })
            .collect()
    }
}

fn checkout(pool: &StorePool, workers: usize) -> Result<Vec<PooledConn>> {
    pool.ensure_fits(workers)?;
    (0..workers).map(|_| pool.get()).collect()
}

fn shared_heavy_paths(config: &GeneratorConfig) -> Result<HeavyPaths> {
    let heavy = HeavyPaths::build(config, &mut StdRng::from_entropy())?;
    log::debug!("Heavy paths: {:?}", heavy.as_slice());
    Ok(heavy)
}

// ---------------------------------------------------------------------------
//  Seeding
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct SeedOptions {
    pub amount: usize,
    pub batch_size: usize,
    pub workers: usize,
    pub error_rate: f64,
    pub generator: GeneratorConfig,
    pub progress_interval: Duration,
}

/// Work assigned to each seeding worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedPlan {
    pub batch_size: usize,
    /// Full batches per worker; the last worker also takes the remainder of
    /// the batch division.
    pub batches_per_worker: Vec<usize>,
    /// Records left over after `amount / batch_size` full batches, written
    /// as one short batch by the last worker.
    pub leftover: usize,
}

impl SeedPlan {
    pub fn new(amount: usize, batch_size: usize, workers: usize) -> Result<Self> {
        ensure!(batch_size > 0, "batch size must be positive");
        ensure!(workers > 0, "worker count must be positive");
        let total_batches = amount / batch_size;
        let per_worker = total_batches / workers;
        let mut batches_per_worker = vec![per_worker; workers];
        if let Some(last) = batches_per_worker.last_mut() {
            *last += total_batches % workers;
        }
        Ok(Self {
            batch_size,
            batches_per_worker,
            leftover: amount % batch_size,
        })
    }

    /// Batches written in total, counting the short leftover batch.
    pub fn total_batches(&self) -> usize {
        self.batches_per_worker.iter().sum::<usize>() + usize::from(self.leftover > 0)
    }

    /// Batch sizes worker `worker` writes, in order.
    pub fn worker_batches(&self, worker: usize) -> Vec<usize> {
        let mut sizes = vec![self.batch_size; self.batches_per_worker[worker]];
        if worker + 1 == self.batches_per_worker.len() && self.leftover > 0 {
            sizes.push(self.leftover);
        }
        sizes
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct SeedTotals {
    batches: usize,
    operations: usize,
    prefixes: usize,
}

/// Write `options.amount` generated operations in parallel batches.
///
/// # Arguments
///
/// * `pool` - Store connections; one is held by each worker.
/// * `options` - Target size, batch size, worker count and generator shape.
///
/// # Returns
///
/// * A [`SeedReport`] with committed totals. Workers that hit a load error
///   stop early and are counted in `failed_workers`.
pub fn seed(pool: &StorePool, options: &SeedOptions) -> Result<SeedReport> {
    let plan = SeedPlan::new(options.amount, options.batch_size, options.workers)?;
    options.generator.validate()?;
    let heavy = shared_heavy_paths(&options.generator)?;
    let conns = checkout(pool, options.workers)?;

    log::info!(
        "Seeding {} operations: {} batches of {} across {} workers",
        options.amount,
        plan.total_batches(),
        options.batch_size,
        options.workers
    );

    let progress = Arc::new(AtomicU64::new(0));
    let start = Instant::now();
    let mut workers = WorkerSet::new("seed");
    for (worker, conn) in conns.into_iter().enumerate() {
        let batches = plan.worker_batches(worker);
        let generator = Generator::sharing(&options.generator, heavy.clone())?;
        let loader = Loader::new(generator, options.error_rate);
        let progress = Arc::clone(&progress);
        workers.spawn(move || seed_worker(worker, conn, loader, &batches, &progress))?;
    }

    wait_with_progress(&workers, &progress, options.amount, start, options.progress_interval);

    let mut totals = SeedTotals::default();
    let mut failed_workers = 0;
    for joined in workers.join() {
        if joined.state == WorkerState::Failed {
            failed_workers += 1;
        }
        if let Some(t) = joined.value {
            totals.batches += t.batches;
            totals.operations += t.operations;
            totals.prefixes += t.prefixes;
        }
    }
    let elapsed = start.elapsed();
    log::info!(
        "Seeding finished in {:.2?}: {} operations, {} prefix rows",
        elapsed,
        totals.operations,
        totals.prefixes
    );

    Ok(SeedReport {
        requested: options.amount,
        batch_size: options.batch_size,
        workers: options.workers,
        batches: totals.batches,
        operations: totals.operations,
        prefixes: totals.prefixes,
        elapsed,
        failed_workers,
    })
}

fn seed_worker(
    worker: usize,
    mut conn: PooledConn,
    mut loader: Loader,
    batches: &[usize],
    progress: &AtomicU64,
) -> (bool, SeedTotals) {
    let mut totals = SeedTotals::default();
    for &size in batches {
        let started = Instant::now();
        match loader.insert_batch(&mut conn, size) {
            Ok(inserted) => {
                totals.batches += 1;
                totals.operations += inserted.operations;
                totals.prefixes += inserted.prefixes;
                // Advisory only: read for display, never for control flow.
                progress.fetch_add(inserted.operations as u64, Ordering::Relaxed);
                log::debug!(
                    "Seed worker {worker}: batch of {size} ({} prefixes) in {:.2?}",
                    inserted.prefixes,
                    started.elapsed()
                );
            }
            Err(e) => {
                log::error!(
                    "Seed worker {worker} stopped after {} batches: {e}",
                    totals.batches
                );
                return (false, totals);
            }
        }
    }
    (true, totals)
}

fn wait_with_progress<T: Send + 'static>(
    workers: &WorkerSet<T>,
    progress: &AtomicU64,
    target: usize,
    start: Instant,
    interval: Duration,
) {
    let mut last_report = Instant::now();
    while !workers.all_finished() {
        thread::sleep(POLL_TICK);
        if last_report.elapsed() < interval {
            continue;
        }
        last_report = Instant::now();
        let done = progress.load(Ordering::Relaxed);
        let secs = start.elapsed().as_secs_f64();
        let rate = if secs > 0.0 { done as f64 / secs } else { 0.0 };
        let remaining = (target as u64).saturating_sub(done);
        let eta = if rate > 0.0 {
            format!("{:.0}s", remaining as f64 / rate)
        } else {
            "?".to_string()
        };
        log::info!("Progress: {done}/{target} ops ({rate:.0} ops/s, ETA {eta})");
    }
}

// ---------------------------------------------------------------------------
//  Timed mix runs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub mix: MixName,
    pub duration: Duration,
    pub workers: usize,
    pub warmup: Duration,
    pub error_rate: f64,
    pub generator: GeneratorConfig,
}

/// Warm up, then run `options.mix` on `options.workers` threads for
/// `options.duration` and merge their metrics.
pub fn run(pool: &StorePool, options: &RunOptions) -> Result<RunReport> {
    ensure!(options.workers > 0, "worker count must be positive");
    options.generator.validate()?;
    let mix = options.mix.mix();
    let heavy = shared_heavy_paths(&options.generator)?;
    let mut conns = checkout(pool, options.workers)?;

    if !options.warmup.is_zero() {
        if let Some(conn) = conns.first_mut() {
            log::info!(
                "Warming up mix {} for {:.1?}",
                options.mix,
                options.warmup
            );
            let generator = Generator::sharing(&options.generator, heavy.clone())?;
            let mut runner = MixRunner::new(0, mix, Loader::new(generator, options.error_rate));
            let discarded = runner.run(conn, options.warmup);
            log::debug!(
                "Warmup done: {} ops, {} errors (discarded)",
                discarded.ops,
                discarded.errors
            );
        }
    }

    log::info!(
        "Running mix {} ({}) for {:.1?} on {} workers",
        options.mix,
        options.mix.description(),
        options.duration,
        options.workers
    );

    let start = Instant::now();
    let mut workers = WorkerSet::new("mix");
    for (worker, mut conn) in conns.into_iter().enumerate() {
        let generator = Generator::sharing(&options.generator, heavy.clone())?;
        let mut runner = MixRunner::new(worker, mix, Loader::new(generator, options.error_rate));
        let duration = options.duration;
        workers.spawn(move || (true, runner.run(&mut conn, duration)))?;
    }
    let worker_count = workers.len();

    let mut merged = WorkerMetrics::default();
    let mut failed_workers = 0;
    for joined in workers.join() {
        match joined.value {
            Some(metrics) if joined.state == WorkerState::Succeeded => merged.merge(metrics),
            _ => failed_workers += 1,
        }
    }
    let elapsed = start.elapsed();

    Ok(RunReport {
        mix: options.mix,
        workers: worker_count,
        duration: options.duration,
        elapsed,
        ops: merged.ops,
        errors: merged.errors,
        failed_workers,
        latencies: summarize(&merged.samples),
    })
}

/// Per-kind latency summaries of the merged samples.
pub fn summarize(samples: &[(OperationKind, Duration)]) -> BTreeMap<OperationKind, LatencySummary> {
    let mut by_kind: BTreeMap<OperationKind, Vec<f64>> = BTreeMap::new();
    for (kind, latency) in samples {
        by_kind
            .entry(*kind)
            .or_default()
            .push(latency.as_secs_f64() * 1000.0);
    }
    by_kind
        .into_iter()
        .map(|(kind, mut ms)| (kind, LatencySummary::from_millis(&mut ms)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_divides_batches_evenly() {
        let plan = SeedPlan::new(2000, 500, 2).unwrap();
        assert_eq!(plan.batches_per_worker, vec![2, 2]);
        assert_eq!(plan.leftover, 0);
        assert_eq!(plan.total_batches(), 4);
    }

    #[test]
    fn plan_gives_remainders_to_last_worker() {
        let plan = SeedPlan::new(10_250, 1000, 3).unwrap();
        assert_eq!(plan.batches_per_worker, vec![3, 3, 4]);
        assert_eq!(plan.leftover, 250);
        assert_eq!(plan.total_batches(), 11);
        assert_eq!(plan.worker_batches(0), vec![1000; 3]);
        let last = plan.worker_batches(2);
        assert_eq!(last.len(), 5);
        assert_eq!(last[4], 250);
        let planned: usize = (0..3).flat_map(|w| plan.worker_batches(w)).sum();
        assert_eq!(planned, 10_250);
    }

    #[test]
    fn plan_with_more_workers_than_batches() {
        let plan = SeedPlan::new(1500, 1000, 4).unwrap();
        assert_eq!(plan.batches_per_worker, vec![0, 0, 0, 1]);
        assert_eq!(plan.worker_batches(3), vec![1000, 500]);
        assert!(plan.worker_batches(0).is_empty());
    }

    #[test]
    fn plan_rejects_zero_sizes() {
        assert!(SeedPlan::new(100, 0, 1).is_err());
        assert!(SeedPlan::new(100, 10, 0).is_err());
    }

    #[test]
    fn worker_set_reports_panics_as_failed() {
        let mut workers: WorkerSet<u32> = WorkerSet::new("test");
        workers.spawn(|| (true, 7)).unwrap();
        workers.spawn(|| (false, 3)).unwrap();
        workers.spawn(|| panic!("worker blew up")).unwrap();
        while !workers.all_finished() {
            thread::sleep(Duration::from_millis(5));
        }
        let joined = workers.join();
        assert_eq!(joined[0].state, WorkerState::Succeeded);
        assert_eq!(joined[0].value, Some(7));
        assert_eq!(joined[1].state, WorkerState::Failed);
        assert_eq!(joined[1].value, Some(3));
        assert_eq!(joined[2].state, WorkerState::Failed);
        assert_eq!(joined[2].value, None);
    }

    #[test]
    fn summarize_groups_by_kind() {
        let samples = vec![
            (OperationKind::PrefixL2, Duration::from_millis(1)),
            (OperationKind::PrefixL2, Duration::from_millis(3)),
            (OperationKind::ExactLookup, Duration::from_millis(2)),
        ];
        let summary = summarize(&samples);
        assert_eq!(summary.len(), 2);
        assert_eq!(summary[&OperationKind::PrefixL2].count, 2);
        assert!((summary[&OperationKind::PrefixL2].p50_ms - 2.0).abs() < 1e-9);
        assert_eq!(summary[&OperationKind::ExactLookup].count, 1);
    }
}
