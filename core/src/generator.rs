//! Synthetic workload generator.
//!
//! Produces hierarchical type paths with a skewed shape and full
//! [`Operation`] records with bursty timestamps:
//!
//! | Draw        | Distribution                                              |
//! |-------------|-----------------------------------------------------------|
//! | Path source | 60% heavy pool, 40% freshly built path                    |
//! | Depth       | Zipf over `1..=max_depth`                                 |
//! | Segments    | vocabulary conditioned on the parent for levels 1-3       |
//! | Timestamp   | 20% uniform in the last 48h, otherwise in the last 30 days |
//! | Status      | `Error` with probability `error_rate`                     |
//!
//! The random source is a type parameter. Production code uses an
//! entropy-seeded [`StdRng`]; tests inject a seeded one.

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Zipf};
use std::sync::Arc;

use crate::constants::*;
use crate::operation::{Operation, Status};

/// Knobs for the generator. Defaults match the benchmark's stock workload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeneratorConfig {
    pub heavy_path_count: usize,
    /// Depth cap for heavy paths.
    pub depth_mean: usize,
    pub max_depth: usize,
    pub zipf_exponent: f64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            heavy_path_count: DEFAULT_HEAVY_PATH_COUNT,
            depth_mean: DEFAULT_DEPTH_MEAN,
            max_depth: DEFAULT_MAX_DEPTH,
            zipf_exponent: DEFAULT_ZIPF_EXPONENT,
        }
    }
}

impl GeneratorConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_depth >= 1, "max_depth must be at least 1");
        ensure!(self.depth_mean >= 1, "depth_mean must be at least 1");
        ensure!(
            self.zipf_exponent > 1.0,
            "zipf_exponent must be > 1, got {}",
            self.zipf_exponent
        );
        Ok(())
    }

    fn depth_distribution(&self) -> Result<Zipf<f64>> {
        self.validate()?;
        Zipf::new(self.max_depth as u64, self.zipf_exponent)
            .map_err(|e| anyhow::anyhow!("{e:?}"))
            .context("building depth distribution")
    }
}

/// The pool of hot paths over-sampled to model concentrated traffic.
///
/// Cheap to clone; every worker of a run shares the same pool.
#[derive(Debug, Clone)]
pub struct HeavyPaths(Arc<[String]>);

impl HeavyPaths {
    /// Canonical paths first, then random paths capped at `depth_mean`
    /// segments until `heavy_path_count` entries exist.
    pub fn build<R: Rng>(config: &GeneratorConfig, rng: &mut R) -> Result<Self> {
        let depth = config.depth_distribution()?;
        let mut paths: Vec<String> = CANONICAL_HEAVY_PATHS
            .iter()
            .map(|p| p.to_string())
            .collect();
        while paths.len() < config.heavy_path_count {
            let d = draw_depth(&depth, rng).min(config.depth_mean);
            paths.push(build_path(rng, d));
        }
        Ok(Self(paths.into()))
    }

    pub fn from_paths(paths: Vec<String>) -> Self {
        Self(paths.into())
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Uniform pick from the pool.
    pub fn choose<R: Rng>(&self, rng: &mut R) -> &str {
        &self.0[rng.gen_range(0..self.0.len())]
    }
}

/// Generates paths and operation records from an injectable random source.
pub struct Generator<R: Rng = StdRng> {
    rng: R,
    depth: Zipf<f64>,
    heavy: HeavyPaths,
}

impl Generator<StdRng> {
    /// Entropy-seeded generator with its own heavy pool.
    pub fn new(config: &GeneratorConfig) -> Result<Self> {
        Self::with_rng(config, StdRng::from_entropy())
    }

    /// Entropy-seeded generator sharing an existing heavy pool.
    pub fn sharing(config: &GeneratorConfig, heavy: HeavyPaths) -> Result<Self> {
        Self::with_heavy_paths(config, heavy, StdRng::from_entropy())
    }
}

impl<R: Rng> Generator<R> {
    pub fn with_rng(config: &GeneratorConfig, mut rng: R) -> Result<Self> {
        let heavy = HeavyPaths::build(config, &mut rng)?;
        Self::with_heavy_paths(config, heavy, rng)
    }

    pub fn with_heavy_paths(config: &GeneratorConfig, heavy: HeavyPaths, rng: R) -> Result<Self> {
        ensure!(!heavy.is_empty(), "heavy path pool is empty");
        Ok(Self {
            rng,
            depth: config.depth_distribution()?,
            heavy,
        })
    }

    pub fn heavy_paths(&self) -> &HeavyPaths {
        &self.heavy
    }

    /// The underlying random source, for callers that draw alongside the
    /// generator (mix dispatch, pagination offsets).
    pub fn rng(&mut self) -> &mut R {
        &mut self.rng
    }

    pub fn heavy_path(&mut self) -> String {
        self.heavy.choose(&mut self.rng).to_string()
    }

    /// A freshly built path with Zipf-distributed depth.
    pub fn random_path(&mut self) -> String {
        let depth = draw_depth(&self.depth, &mut self.rng);
        build_path(&mut self.rng, depth)
    }

    /// A freshly built path with at least `min_depth` segments.
    ///
    /// The depth is still drawn from the Zipf distribution and then raised
    /// to `min_depth`, so deeper requests stay as skewed as possible.
    pub fn deep_path(&mut self, min_depth: usize) -> String {
        let depth = draw_depth(&self.depth, &mut self.rng).max(min_depth);
        build_path(&mut self.rng, depth)
    }

    /// `count` records stamped relative to the current time.
    pub fn generate(&mut self, count: usize, error_rate: f64) -> Vec<Operation> {
        self.generate_at(Utc::now(), count, error_rate)
    }

    /// `count` records stamped relative to `now`.
    pub fn generate_at(
        &mut self,
        now: DateTime<Utc>,
        count: usize,
        error_rate: f64,
    ) -> Vec<Operation> {
        let error_rate = error_rate.clamp(0.0, 1.0);
        (0..count).map(|_| self.generate_one(now, error_rate)).collect()
    }

    fn generate_one(&mut self, now: DateTime<Utc>, error_rate: f64) -> Operation {
        let type_path = if self.rng.gen_bool(HEAVY_PATH_PROBABILITY) {
            self.heavy_path()
        } else {
            self.random_path()
        };

        let window = if self.rng.gen_bool(BURST_PROBABILITY) {
            BURST_WINDOW_US
        } else {
            HISTORY_WINDOW_US
        };
        let created_at = now - Duration::microseconds(self.rng.gen_range(0..=window));

        let status = if self.rng.gen_bool(error_rate) {
            Status::Error
        } else {
            Status::Ok
        };

        Operation {
            type_path,
            created_at,
            status,
            payload: PLACEHOLDER_PAYLOAD.to_vec(),
        }
    }
}

fn draw_depth<R: Rng>(depth: &Zipf<f64>, rng: &mut R) -> usize {
    (depth.sample(rng) as usize).max(1)
}

fn pick<'a, R: Rng>(rng: &mut R, words: &[&'a str]) -> &'a str {
    words[rng.gen_range(0..words.len())]
}

/// Build a path of exactly `depth` segments.
fn build_path<R: Rng>(rng: &mut R, depth: usize) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(depth);

    let top = pick(rng, &TOP_LEVEL);
    parts.push(top.to_string());

    if depth > 1 {
        let second = if top == "labs" {
            pick(rng, &LABS_L2).to_string()
        } else {
            format!("sub_{}", rng.gen_range(1..=GENERIC_L2_COUNT))
        };
        parts.push(second);
    }

    if depth > 2 {
        let third = if parts[0] == "labs" && parts[1] == "result_webhooks" {
            pick(rng, &RESULT_WEBHOOK_VENDORS).to_string()
        } else {
            format!("comp_{}", rng.gen_range(1..=GENERIC_L3_COUNT))
        };
        parts.push(third);
    }

    while parts.len() < depth {
        parts.push(format!("node_{}", rng.gen_range(1..=GENERIC_NODE_COUNT)));
    }

    parts.join(".")
}
