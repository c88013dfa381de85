//! Process configuration, read once from the environment (and an optional
//! `.env` file) at startup.
//!
//! | Variable               | Default         |
//! |------------------------|-----------------|
//! | `OPS_BENCH_DB`         | `ops_bench.db`  |
//! | `TOTAL_OPS`            | 10 000 000      |
//! | `BATCH_SIZE`           | 1000            |
//! | `CONCURRENCY`          | 10              |
//! | `DEPTH_MEAN`           | 3               |
//! | `MAX_DEPTH`            | 5               |
//! | `HEAVY_PREFIXES_COUNT` | 20              |
//! | `ERROR_RATE`           | 0.05            |
//! | `DB_BUSY_TIMEOUT_MS`   | 5000            |
//! | `WARMUP_SECS`          | 10              |
//! | `LOG_LEVEL`            | `info`          |
//! | `LOG_FILE`             | unset           |

use anyhow::{ensure, Context, Result};
use log::LevelFilter;
use opsbench_core::constants::{
    DEFAULT_DEPTH_MEAN, DEFAULT_ERROR_RATE, DEFAULT_HEAVY_PATH_COUNT, DEFAULT_MAX_DEPTH,
    DEFAULT_ZIPF_EXPONENT,
};
use opsbench_core::generator::GeneratorConfig;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_DB_PATH: &str = "ops_bench.db";

#[derive(Debug, Clone)]
pub struct Config {
    pub db_path: String,
    pub total_ops: usize,
    pub batch_size: usize,
    pub concurrency: usize,
    pub depth_mean: usize,
    pub max_depth: usize,
    pub heavy_path_count: usize,
    pub error_rate: f64,
    pub busy_timeout: Duration,
    pub warmup: Duration,
    pub log_level: LevelFilter,
    pub log_file: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            total_ops: 10_000_000,
            batch_size: 1000,
            concurrency: 10,
            depth_mean: DEFAULT_DEPTH_MEAN,
            max_depth: DEFAULT_MAX_DEPTH,
            heavy_path_count: DEFAULT_HEAVY_PATH_COUNT,
            error_rate: DEFAULT_ERROR_RATE,
            busy_timeout: Duration::from_millis(5000),
            warmup: Duration::from_secs(10),
            log_level: LevelFilter::Info,
            log_file: None,
        }
    }
}

impl Config {
    /// Load `.env` if present, then read the process environment.
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                return Err(e).context("reading .env");
            }
        }
        Self::from_vars(&env::vars().collect())
    }

    /// Build a config from an explicit variable map. Missing keys fall back
    /// to defaults; malformed values are an error naming the key.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self> {
        let defaults = Self::default();
        let warmup_secs: f64 = parse_or(vars, "WARMUP_SECS", defaults.warmup.as_secs_f64())?;
        let warmup = Duration::try_from_secs_f64(warmup_secs)
            .with_context(|| format!("WARMUP_SECS {warmup_secs} is not a usable duration"))?;
        let config = Self {
            db_path: vars
                .get("OPS_BENCH_DB")
                .cloned()
                .unwrap_or(defaults.db_path),
            total_ops: parse_or(vars, "TOTAL_OPS", defaults.total_ops)?,
            batch_size: parse_or(vars, "BATCH_SIZE", defaults.batch_size)?,
            concurrency: parse_or(vars, "CONCURRENCY", defaults.concurrency)?,
            depth_mean: parse_or(vars, "DEPTH_MEAN", defaults.depth_mean)?,
            max_depth: parse_or(vars, "MAX_DEPTH", defaults.max_depth)?,
            heavy_path_count: parse_or(vars, "HEAVY_PREFIXES_COUNT", defaults.heavy_path_count)?,
            error_rate: parse_or(vars, "ERROR_RATE", defaults.error_rate)?,
            busy_timeout: Duration::from_millis(parse_or(
                vars,
                "DB_BUSY_TIMEOUT_MS",
                defaults.busy_timeout.as_millis() as u64,
            )?),
            warmup,
            log_level: parse_or(vars, "LOG_LEVEL", defaults.log_level)?,
            log_file: vars.get("LOG_FILE").cloned().filter(|s| !s.is_empty()),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.batch_size > 0, "BATCH_SIZE must be positive");
        ensure!(self.concurrency > 0, "CONCURRENCY must be positive");
        ensure!(
            (0.0..=1.0).contains(&self.error_rate),
            "ERROR_RATE must be within [0, 1], got {}",
            self.error_rate
        );
        self.generator().validate()
    }

    pub fn generator(&self) -> GeneratorConfig {
        GeneratorConfig {
            heavy_path_count: self.heavy_path_count,
            depth_mean: self.depth_mean,
            max_depth: self.max_depth,
            zipf_exponent: DEFAULT_ZIPF_EXPONENT,
        }
    }
}

fn parse_or<T>(vars: &HashMap<String, String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
    }
}
