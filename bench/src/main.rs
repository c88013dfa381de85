//! Command-line entry point.
//!
//! Usage:
//!   opsbench init
//!   opsbench seed --amount 100000 --batch-size 1000 --concurrency 8
//!   opsbench run --mix A --time 60 --concurrency 10
//!   opsbench validate
//!
//! Defaults for omitted flags come from the environment (see `config`).

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use opsbench::config::Config;
use opsbench::orchestrator::{self, RunOptions, SeedOptions, PROGRESS_INTERVAL};
use opsbench::report::{print_run_report, print_seed_report};
use opsbench::store::{pool_capacity_for, StorePool};
use opsbench::workload::MixName;
use opsbench::{schema, validate};
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "opsbench", version, about = "Prefix-table schema benchmark")]
struct Cli {
    /// Database file; overrides OPS_BENCH_DB.
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables, indexes and the insert routine.
    Init {
        /// Drop and recreate the insert routine.
        #[arg(long)]
        reinstall_routine: bool,
    },
    /// Bulk-load generated operations.
    Seed {
        #[arg(long)]
        amount: Option<usize>,
        #[arg(long)]
        batch_size: Option<usize>,
        #[arg(long)]
        concurrency: Option<usize>,
    },
    /// Show query plans, row counts and prefix integrity.
    Validate,
    /// Run a workload mix and report latencies.
    Run {
        #[arg(long, value_enum, ignore_case = true)]
        mix: MixName,
        /// Measured duration in seconds.
        #[arg(long, default_value_t = 60)]
        time: u64,
        #[arg(long)]
        concurrency: Option<usize>,
        /// Warmup in seconds; overrides WARMUP_SECS.
        #[arg(long)]
        warmup: Option<f64>,
    },
    /// Time exact and level 1-4 prefix lookups for one deep path.
    Levels,
    /// Show the newest operations with their prefix rows.
    Recent {
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e:#}");
            return ExitCode::FAILURE;
        }
    };
    if let Some(db) = cli.db.clone() {
        config.db_path = db;
    }
    if let Err(e) = opsbench_core::initialize_logger(config.log_level, config.log_file.as_deref()) {
        eprintln!("Failed to initialize logger: {e:#}");
        return ExitCode::FAILURE;
    }

    match execute(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn execute(command: Command, config: &Config) -> Result<()> {
    let workers = match &command {
        Command::Seed { concurrency, .. } | Command::Run { concurrency, .. } => {
            concurrency.unwrap_or(config.concurrency)
        }
        _ => 1,
    };
    let pool = StorePool::open(&config.db_path, pool_capacity_for(workers), config.busy_timeout)?;
    {
        let conn = pool.get()?;
        schema::install(&conn).context("installing schema")?;
    }

    match command {
        Command::Init { reinstall_routine } => {
            if reinstall_routine {
                let conn = pool.get()?;
                schema::reinstall_routine(&conn)?;
            }
            log::info!("Schema ready in {}", config.db_path);
        }
        Command::Seed {
            amount,
            batch_size,
            concurrency,
        } => {
            let options = SeedOptions {
                amount: amount.unwrap_or(config.total_ops),
                batch_size: batch_size.unwrap_or(config.batch_size),
                workers: concurrency.unwrap_or(config.concurrency),
                error_rate: config.error_rate,
                generator: config.generator(),
                progress_interval: PROGRESS_INTERVAL,
            };
            let report = orchestrator::seed(&pool, &options)?;
            print_seed_report(&report);
        }
        Command::Validate => {
            let conn = pool.get()?;
            let report = validate::validate(&conn)?;
            validate::print_validation(&report);
        }
        Command::Run {
            mix,
            time,
            concurrency,
            warmup,
        } => {
            let warmup = match warmup {
                Some(secs) => Duration::try_from_secs_f64(secs)
                    .with_context(|| format!("invalid --warmup {secs}"))?,
                None => config.warmup,
            };
            let options = RunOptions {
                mix,
                duration: Duration::from_secs(time),
                workers: concurrency.unwrap_or(config.concurrency),
                warmup,
                error_rate: config.error_rate,
                generator: config.generator(),
            };
            let report = orchestrator::run(&pool, &options)?;
            print_run_report(&report);
        }
        Command::Levels => {
            let conn = pool.get()?;
            let report = validate::check_levels(&conn)?;
            validate::print_levels(&report);
        }
        Command::Recent { limit } => {
            let conn = pool.get()?;
            let ops = validate::recent(&conn, limit)?;
            validate::print_recent(&ops);
        }
    }
    Ok(())
}
