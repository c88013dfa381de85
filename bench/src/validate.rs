//! Store inspection: query plans, cardinality, prefix integrity, plus the
//! level checker and the recent-operations view.
//!
//! Nothing here aborts on a failed plan query; the failure is recorded and
//! the pass continues.

use crate::workload::queries::{
    self, OperationRow, COUNT_WINDOW, ERROR_RATE, EXACT_LOOKUP, LATEST_BY_PREFIX,
};
use anyhow::{Context, Result};
use opsbench_core::constants::FALLBACK_DEEP_PATH;
use opsbench_core::prefix;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection, OptionalExtension};
use std::time::{Duration, Instant};

/// Rows shown per query by the level checker.
pub const LEVEL_ROWS: usize = 5;

const SAMPLE_PREFIX: &str = "labs.result_webhooks";
const SAMPLE_PATH: &str = "labs.result_webhooks.quest";

/// How a plan was obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSource {
    QueryPlan,
    /// `EXPLAIN QUERY PLAN` failed; this is the bytecode listing.
    Bytecode { reason: String },
    Unavailable { reason: String },
}

#[derive(Debug, Clone)]
pub struct PlanReport {
    pub query: &'static str,
    pub source: PlanSource,
    pub lines: Vec<String>,
}

impl PlanReport {
    /// True if the plan reads the table through one of its indexes.
    pub fn uses_index(&self) -> bool {
        self.lines.iter().any(|l| l.contains("USING INDEX") || l.contains("USING COVERING INDEX"))
    }
}

#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub plans: Vec<PlanReport>,
    pub operations: i64,
    pub prefixes: i64,
    /// Operations whose prefix-row count differs from their segment count.
    pub mismatched_operations: i64,
}

impl ValidationReport {
    pub fn amplification(&self) -> f64 {
        if self.operations == 0 {
            0.0
        } else {
            self.prefixes as f64 / self.operations as f64
        }
    }
}

/// Inspect plans of every workload read, then count rows and check that
/// each operation owns exactly one prefix row per segment.
pub fn validate(conn: &Connection) -> Result<ValidationReport> {
    let since = Value::Integer(queries::window_start(queries::COUNT_WINDOW_US));
    let plans = vec![
        inspect_plan(
            conn,
            "latest_by_prefix",
            LATEST_BY_PREFIX,
            vec![text(SAMPLE_PREFIX), Value::Integer(100), Value::Integer(0)],
        ),
        inspect_plan(
            conn,
            "exact_lookup",
            EXACT_LOOKUP,
            vec![text(SAMPLE_PATH), Value::Integer(100)],
        ),
        inspect_plan(
            conn,
            "count_window",
            COUNT_WINDOW,
            vec![text(SAMPLE_PREFIX), since.clone()],
        ),
        inspect_plan(
            conn,
            "error_rate",
            ERROR_RATE,
            vec![text(SAMPLE_PREFIX), since],
        ),
    ];

    let operations: i64 = conn
        .query_row("SELECT COUNT(*) FROM operations", [], |r| r.get(0))
        .context("counting operations")?;
    let prefixes: i64 = conn
        .query_row("SELECT COUNT(*) FROM operation_prefixes", [], |r| r.get(0))
        .context("counting prefix rows")?;
    let mismatched_operations: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM (
                 SELECT o.id
                 FROM operations o
                 LEFT JOIN operation_prefixes p ON p.operation_id = o.id
                 GROUP BY o.id
                 HAVING COUNT(p.operation_id)
                        != length(o.type_path) - length(replace(o.type_path, '.', '')) + 1
             )",
            [],
            |r| r.get(0),
        )
        .context("checking prefix integrity")?;

    Ok(ValidationReport {
        plans,
        operations,
        prefixes,
        mismatched_operations,
    })
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

/// Plan for `sql`, falling back from `EXPLAIN QUERY PLAN` to `EXPLAIN`.
pub fn inspect_plan(
    conn: &Connection,
    query: &'static str,
    sql: &str,
    args: Vec<Value>,
) -> PlanReport {
    plan_with_fallback(
        query,
        || explain_query_plan(conn, sql, &args),
        || explain_bytecode(conn, sql, &args),
    )
}

fn plan_with_fallback(
    query: &'static str,
    primary: impl FnOnce() -> rusqlite::Result<Vec<String>>,
    fallback: impl FnOnce() -> rusqlite::Result<Vec<String>>,
) -> PlanReport {
    let e = match primary() {
        Ok(lines) => {
            return PlanReport {
                query,
                source: PlanSource::QueryPlan,
                lines,
            }
        }
        Err(e) => e,
    };
    log::warn!("EXPLAIN QUERY PLAN failed for {query}: {e}; falling back to EXPLAIN");
    match fallback() {
        Ok(lines) => PlanReport {
            query,
            source: PlanSource::Bytecode {
                reason: e.to_string(),
            },
            lines,
        },
        Err(e2) => {
            log::error!("EXPLAIN failed for {query}: {e2}");
            PlanReport {
                query,
                source: PlanSource::Unavailable {
                    reason: e2.to_string(),
                },
                lines: Vec::new(),
            }
        }
    }
}

fn explain_query_plan(conn: &Connection, sql: &str, args: &[Value]) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {sql}"))?;
    let rows = stmt.query_map(params_from_iter(args), |r| r.get::<_, String>(3))?;
    rows.collect()
}

fn explain_bytecode(conn: &Connection, sql: &str, args: &[Value]) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(&format!("EXPLAIN {sql}"))?;
    let rows = stmt.query_map(params_from_iter(args), |r| {
        let addr: i64 = r.get(0)?;
        let opcode: String = r.get(1)?;
        let p1: i64 = r.get(2)?;
        let p2: i64 = r.get(3)?;
        let p3: i64 = r.get(4)?;
        Ok(format!("{addr:>4} {opcode:<16} {p1:>4} {p2:>4} {p3:>4}"))
    })?;
    rows.collect()
}

pub fn print_validation(report: &ValidationReport) {
    println!("\n{}", "=".repeat(80));
    println!("  Validation");
    println!("{}", "=".repeat(80));
    for plan in &report.plans {
        println!("\n  Plan: {}", plan.query);
        println!("  {}", "-".repeat(60));
        match &plan.source {
            PlanSource::QueryPlan => {}
            PlanSource::Bytecode { reason } => {
                println!("  (query plan unavailable: {reason}; showing bytecode)")
            }
            PlanSource::Unavailable { reason } => println!("  (no plan: {reason})"),
        }
        for line in &plan.lines {
            println!("    {line}");
        }
    }

    println!("\n  Cardinality");
    println!("  {}", "-".repeat(60));
    println!("  Operations:      {:>12}", report.operations);
    println!("  Prefix rows:     {:>12}", report.prefixes);
    println!("  Amplification:   {:>12.2}x", report.amplification());
    let verdict = if report.mismatched_operations == 0 {
        "OK"
    } else {
        "MISMATCH"
    };
    println!(
        "  Prefix integrity:{:>12}  ({} operations mismatched)",
        verdict, report.mismatched_operations
    );
    println!("\n{}\n", "=".repeat(80));
}

// ---------------------------------------------------------------------------
//  Level checker
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct LevelQuery {
    /// `"exact"` or the prefix level.
    pub label: String,
    pub key: String,
    pub elapsed: Duration,
    pub rows: Vec<OperationRow>,
}

#[derive(Debug, Clone)]
pub struct LevelsReport {
    pub path: String,
    pub queries: Vec<LevelQuery>,
}

/// Time the exact lookup and the prefix lookups at levels 1 to 4 for one
/// stored path with at least four segments.
pub fn check_levels(conn: &Connection) -> Result<LevelsReport> {
    let stored: Option<String> = conn
        .query_row(
            "SELECT type_path FROM operations
             WHERE length(type_path) - length(replace(type_path, '.', '')) >= 3
             LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()
        .context("looking up a deep path")?;
    let path = stored.unwrap_or_else(|| {
        log::info!("No stored path with four segments, using {FALLBACK_DEEP_PATH}");
        FALLBACK_DEEP_PATH.to_string()
    });

    let mut queries = Vec::with_capacity(5);
    let start = Instant::now();
    let rows = queries::exact_lookup(conn, &path, LEVEL_ROWS).context("exact lookup")?;
    queries.push(LevelQuery {
        label: "exact".to_string(),
        key: path.clone(),
        elapsed: start.elapsed(),
        rows,
    });

    for level in 1..=4 {
        let Some(key) = prefix::leading(&path, level) else {
            log::info!("Skipping level {level}: {path} is not deep enough");
            continue;
        };
        let start = Instant::now();
        let rows = queries::latest_by_prefix(conn, key, LEVEL_ROWS, 0)
            .with_context(|| format!("level {level} lookup"))?;
        queries.push(LevelQuery {
            label: format!("level {level}"),
            key: key.to_string(),
            elapsed: start.elapsed(),
            rows,
        });
    }

    Ok(LevelsReport { path, queries })
}

pub fn print_levels(report: &LevelsReport) {
    println!("\n  Target path: {}", report.path);
    for q in &report.queries {
        println!("\n{}", "=".repeat(80));
        println!("  {} | {}", q.label, q.key);
        println!("{}", "-".repeat(80));
        println!(
            "  {} rows in {:.2}ms",
            q.rows.len(),
            q.elapsed.as_secs_f64() * 1000.0
        );
        if q.rows.is_empty() {
            println!("  (no results)");
        }
        for (i, row) in q.rows.iter().enumerate() {
            println!(
                "  Row {}: #{} {} {} {}",
                i + 1,
                row.id,
                row.created_at.format("%Y-%m-%d %H:%M:%S%.6f"),
                row.status,
                row.type_path
            );
        }
    }
    println!("{}\n", "=".repeat(80));
}

// ---------------------------------------------------------------------------
//  Recent operations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RecentOperation {
    pub operation: OperationRow,
    /// Prefix rows, shortest first.
    pub prefixes: Vec<String>,
}

/// The `limit` newest operations with their prefix rows.
pub fn recent(conn: &Connection, limit: usize) -> Result<Vec<RecentOperation>> {
    let newest: Vec<i64> = {
        let mut stmt = conn.prepare(
            "SELECT id FROM operations ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let ids = stmt.query_map([limit as i64], |r| r.get(0))?;
        ids.collect::<rusqlite::Result<_>>()?
    };

    let mut op_stmt = conn.prepare(
        "SELECT id, type_path, created_at, status FROM operations WHERE id = ?1",
    )?;
    let mut prefix_stmt = conn.prepare(
        "SELECT prefix FROM operation_prefixes WHERE operation_id = ?1
         ORDER BY length(prefix) ASC",
    )?;

    let mut out = Vec::with_capacity(newest.len());
    for id in newest {
        let operation = op_stmt.query_row([id], OperationRow::from_row)?;
        let prefixes = prefix_stmt
            .query_map([id], |r| r.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        out.push(RecentOperation {
            operation,
            prefixes,
        });
    }
    Ok(out)
}

pub fn print_recent(ops: &[RecentOperation]) {
    println!("\n=== {} Recent Operations ===\n", ops.len());
    for op in ops {
        let row = &op.operation;
        println!("OP #{}", row.id);
        println!("  Path:    {}", row.type_path);
        println!("  Time:    {}", row.created_at.format("%Y-%m-%d %H:%M:%S%.6f"));
        println!("  Status:  {}", row.status);
        println!("  Prefixes ({}):", op.prefixes.len());
        for p in &op.prefixes {
            println!("    - {p}");
        }
        println!("{}", "-".repeat(60));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::insert_batch;
    use crate::schema;
    use chrono::{Duration as ChronoDuration, TimeZone, Utc};
    use opsbench_core::operation::{Operation, Status};

    fn store_with(paths: &[&str]) -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::install(&conn).unwrap();
        let base = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        let ops: Vec<Operation> = paths
            .iter()
            .enumerate()
            .map(|(i, p)| Operation {
                type_path: p.to_string(),
                created_at: base + ChronoDuration::minutes(i as i64),
                status: Status::Ok,
                payload: b"{}".to_vec(),
            })
            .collect();
        insert_batch(&mut conn, &ops).unwrap();
        conn
    }

    #[test]
    fn validation_counts_and_plans() {
        let conn = store_with(&["labs.result_webhooks.quest", "auth", "etl.sub_1"]);
        let report = validate(&conn).unwrap();
        assert_eq!(report.operations, 3);
        assert_eq!(report.prefixes, 6);
        assert!((report.amplification() - 2.0).abs() < 1e-9);
        assert_eq!(report.mismatched_operations, 0);
        assert_eq!(report.plans.len(), 4);
        for plan in &report.plans {
            assert_eq!(plan.source, PlanSource::QueryPlan, "{}", plan.query);
            assert!(!plan.lines.is_empty());
        }
        let latest = &report.plans[0];
        assert!(latest.uses_index(), "{:?}", latest.lines);
    }

    #[test]
    fn integrity_check_finds_missing_prefix_rows() {
        let conn = store_with(&["labs.orders", "billing.sub_2.comp_3"]);
        conn.execute(
            "DELETE FROM operation_prefixes WHERE prefix = 'billing'",
            [],
        )
        .unwrap();
        let report = validate(&conn).unwrap();
        assert_eq!(report.mismatched_operations, 1);
    }

    #[test]
    fn failed_plan_is_recorded_not_raised() {
        let conn = store_with(&["labs"]);
        let report = inspect_plan(&conn, "plain", "SELECT 1", Vec::new());
        assert_eq!(report.source, PlanSource::QueryPlan);

        let broken = inspect_plan(&conn, "broken", "SELECT * FROM missing_table", Vec::new());
        assert!(matches!(broken.source, PlanSource::Unavailable { .. }));
        assert!(broken.lines.is_empty());
    }

    #[test]
    fn bytecode_listing_replaces_a_failed_query_plan() {
        let conn = store_with(&["labs"]);
        let args = vec![text("labs"), Value::Integer(1)];
        let report = plan_with_fallback(
            "exact_lookup",
            || Err(rusqlite::Error::InvalidQuery),
            || explain_bytecode(&conn, EXACT_LOOKUP, &args),
        );
        match &report.source {
            PlanSource::Bytecode { reason } => assert!(!reason.is_empty()),
            other => panic!("unexpected source {other:?}"),
        }
        assert!(report.lines[0].contains("Init"), "{:?}", report.lines);
        assert!(!report.uses_index());
    }

    #[test]
    fn levels_fall_back_to_default_path() {
        let conn = store_with(&["auth.sub_1"]);
        let report = check_levels(&conn).unwrap();
        assert_eq!(report.path, FALLBACK_DEEP_PATH);
        assert_eq!(report.queries.len(), 5);
        assert!(report.queries.iter().all(|q| q.rows.is_empty()));
    }

    #[test]
    fn levels_use_stored_deep_path() {
        let conn = store_with(&["labs.result_webhooks.quest.node_7", "labs.orders"]);
        let report = check_levels(&conn).unwrap();
        assert_eq!(report.path, "labs.result_webhooks.quest.node_7");
        let keys: Vec<&str> = report.queries.iter().map(|q| q.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "labs.result_webhooks.quest.node_7",
                "labs",
                "labs.result_webhooks",
                "labs.result_webhooks.quest",
                "labs.result_webhooks.quest.node_7",
            ]
        );
        assert_eq!(report.queries[1].rows.len(), 2);
        assert_eq!(report.queries[4].rows.len(), 1);
    }

    #[test]
    fn recent_lists_newest_first_with_prefixes() {
        let conn = store_with(&["a.b", "c", "d.e.f"]);
        let ops = recent(&conn, 2).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].operation.type_path, "d.e.f");
        assert_eq!(ops[0].prefixes, vec!["d", "d.e", "d.e.f"]);
        assert_eq!(ops[1].operation.type_path, "c");
        assert_eq!(ops[1].prefixes, vec!["c"]);
    }
}
