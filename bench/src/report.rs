//! Report module: latency summaries and the human-readable seed/run reports.

use crate::workload::{MixName, OperationKind};
use std::collections::BTreeMap;
use std::time::Duration;

/// Linear-interpolation percentile of already sorted values.
///
/// `pct` is in `[0, 100]`; the rank is `pct / 100 * (n - 1)` and the result
/// interpolates between the two neighbouring samples. Empty input gives 0.
pub fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = (pct.clamp(0.0, 100.0) / 100.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        return sorted[lower];
    }
    let weight = rank - lower as f64;
    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}

/// Latency statistics for one operation kind, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencySummary {
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
}

impl LatencySummary {
    /// Sorts `ms` in place.
    pub fn from_millis(ms: &mut [f64]) -> Self {
        ms.sort_by(f64::total_cmp);
        let mean_ms = if ms.is_empty() {
            0.0
        } else {
            ms.iter().sum::<f64>() / ms.len() as f64
        };
        Self {
            count: ms.len(),
            mean_ms,
            p50_ms: percentile(ms, 50.0),
            p95_ms: percentile(ms, 95.0),
            p99_ms: percentile(ms, 99.0),
        }
    }
}

/// Totals of a finished seeding pass.
#[derive(Debug, Clone, PartialEq)]
pub struct SeedReport {
    pub requested: usize,
    pub batch_size: usize,
    pub workers: usize,
    pub batches: usize,
    pub operations: usize,
    pub prefixes: usize,
    pub elapsed: Duration,
    pub failed_workers: usize,
}

impl SeedReport {
    pub fn amplification(&self) -> f64 {
        if self.operations == 0 {
            0.0
        } else {
            self.prefixes as f64 / self.operations as f64
        }
    }

    pub fn ops_per_sec(&self) -> f64 {
        per_second(self.operations as u64, self.elapsed)
    }
}

/// Merged result of a timed mix run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub mix: MixName,
    pub workers: usize,
    pub duration: Duration,
    pub elapsed: Duration,
    pub ops: u64,
    pub errors: u64,
    pub failed_workers: usize,
    pub latencies: BTreeMap<OperationKind, LatencySummary>,
}

impl RunReport {
    pub fn qps(&self) -> f64 {
        per_second(self.ops, self.elapsed)
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= 0.0 {
        0.0
    } else {
        count as f64 / secs
    }
}

pub fn print_seed_report(report: &SeedReport) {
    println!("\n{}", "=".repeat(80));
    println!("  Seed Report");
    println!(
        "  Requested: {} ops | Batch size: {} | Workers: {}",
        report.requested, report.batch_size, report.workers
    );
    println!("{}", "=".repeat(80));
    println!("  Batches:         {:>12}", report.batches);
    println!("  Operations:      {:>12}", report.operations);
    println!("  Prefix rows:     {:>12}", report.prefixes);
    println!("  Amplification:   {:>12.2}x", report.amplification());
    println!(
        "  Elapsed:         {:>12.2}s",
        report.elapsed.as_secs_f64()
    );
    println!("  Throughput:      {:>12.0} ops/s", report.ops_per_sec());
    if report.failed_workers > 0 {
        println!("  Failed workers:  {:>12}", report.failed_workers);
    }
    println!("{}\n", "=".repeat(80));
}

pub fn print_run_report(report: &RunReport) {
    println!("\n{}", "=".repeat(80));
    println!(
        "  Mix {} ({}) | Workers: {} | Duration: {:.1}s",
        report.mix,
        report.mix.description(),
        report.workers,
        report.duration.as_secs_f64()
    );
    println!("{}", "=".repeat(80));
    println!("  Total ops:       {:>12}", report.ops);
    println!("  Errors:          {:>12}", report.errors);
    println!("  QPS:             {:>12.1}", report.qps());
    if report.failed_workers > 0 {
        println!("  Failed workers:  {:>12}", report.failed_workers);
    }

    println!(
        "\n  {:16} {:>8} {:>10} {:>10} {:>10} {:>10}",
        "Operation", "Count", "Mean (ms)", "p50 (ms)", "p95 (ms)", "p99 (ms)"
    );
    println!("  {}", "-".repeat(68));
    for (kind, summary) in &report.latencies {
        println!(
            "  {:16} {:>8} {:>10.2} {:>10.2} {:>10.2} {:>10.2}",
            kind.name(),
            summary.count,
            summary.mean_ms,
            summary.p50_ms,
            summary.p95_ms,
            summary.p99_ms,
        );
    }
    println!("\n{}\n", "=".repeat(80));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn percentiles_of_one_to_hundred() {
        let samples: Vec<f64> = (1..=100).map(f64::from).collect();
        assert!(close(percentile(&samples, 50.0), 50.5));
        assert!(close(percentile(&samples, 95.0), 95.05));
        assert!(close(percentile(&samples, 99.0), 99.01));
        assert!(close(percentile(&samples, 0.0), 1.0));
        assert!(close(percentile(&samples, 100.0), 100.0));
    }

    #[test]
    fn percentile_edge_cases() {
        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[7.0], 99.0), 7.0);
    }

    #[test]
    fn summary_sorts_and_orders_percentiles() {
        let mut ms: Vec<f64> = (1..=100).rev().map(f64::from).collect();
        let summary = LatencySummary::from_millis(&mut ms);
        assert_eq!(summary.count, 100);
        assert!(close(summary.mean_ms, 50.5));
        assert!(close(summary.p50_ms, 50.5));
        assert!(summary.p50_ms <= summary.p95_ms && summary.p95_ms <= summary.p99_ms);
    }

    #[test]
    fn rates_handle_zero_elapsed() {
        let report = SeedReport {
            requested: 10,
            batch_size: 5,
            workers: 1,
            batches: 2,
            operations: 10,
            prefixes: 25,
            elapsed: Duration::ZERO,
            failed_workers: 0,
        };
        assert_eq!(report.ops_per_sec(), 0.0);
        assert!(close(report.amplification(), 2.5));
    }
}
