//! Read queries issued by the workload kinds and the diagnostic commands.
//!
//! Timestamps are compared as microseconds since the Unix epoch; callers
//! compute the window's lower bound before timing the call.

use chrono::{DateTime, Utc};
use opsbench_core::operation::Status;
use rusqlite::types::Type;
use rusqlite::{params, Connection, Row};

const MICROS_PER_DAY: i64 = 24 * 3_600 * 1_000_000;

/// Trailing window of the `count_window` kind: one day.
pub const COUNT_WINDOW_US: i64 = MICROS_PER_DAY;
/// Trailing window of the `error_rate` kind: seven days.
pub const ERROR_RATE_WINDOW_US: i64 = 7 * MICROS_PER_DAY;

pub(crate) const LATEST_BY_PREFIX: &str = "
    SELECT o.id, o.type_path, o.created_at, o.status
    FROM operation_prefixes p
    JOIN operations o ON o.id = p.operation_id
    WHERE p.prefix = ?1
    ORDER BY p.created_at DESC
    LIMIT ?2 OFFSET ?3";

pub(crate) const EXACT_LOOKUP: &str = "
    SELECT id, type_path, created_at, status
    FROM operations
    WHERE type_path = ?1
    ORDER BY created_at DESC
    LIMIT ?2";

pub(crate) const COUNT_WINDOW: &str = "
    SELECT COUNT(*)
    FROM operation_prefixes
    WHERE prefix = ?1 AND created_at >= ?2";

pub(crate) const ERROR_RATE: &str = "
    SELECT COALESCE(SUM(o.status = 1), 0), COUNT(*)
    FROM operation_prefixes p
    JOIN operations o ON o.id = p.operation_id
    WHERE p.prefix = ?1 AND p.created_at >= ?2";

/// An operation as read back from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationRow {
    pub id: i64,
    pub type_path: String,
    pub created_at: DateTime<Utc>,
    pub status: Status,
}

impl OperationRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let micros: i64 = row.get(2)?;
        let created_at = DateTime::from_timestamp_micros(micros).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Integer,
                format!("timestamp {micros} out of range").into(),
            )
        })?;
        let code: u8 = row.get(3)?;
        let status = Status::from_code(code).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                3,
                Type::Integer,
                format!("unknown status code {code}").into(),
            )
        })?;
        Ok(Self {
            id: row.get(0)?,
            type_path: row.get(1)?,
            created_at,
            status,
        })
    }
}

/// Error counts for one prefix over a window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ErrorRate {
    pub errors: i64,
    pub total: i64,
}

impl ErrorRate {
    pub fn ratio(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            self.errors as f64 / self.total as f64
        }
    }
}

/// Newest operations under `prefix`, ordered by the prefix row's timestamp.
pub fn latest_by_prefix(
    conn: &Connection,
    prefix: &str,
    limit: usize,
    offset: usize,
) -> rusqlite::Result<Vec<OperationRow>> {
    let mut stmt = conn.prepare_cached(LATEST_BY_PREFIX)?;
    let rows = stmt.query_map(
        params![prefix, limit as i64, offset as i64],
        OperationRow::from_row,
    )?;
    rows.collect()
}

/// Newest operations whose full path is `type_path`.
pub fn exact_lookup(
    conn: &Connection,
    type_path: &str,
    limit: usize,
) -> rusqlite::Result<Vec<OperationRow>> {
    let mut stmt = conn.prepare_cached(EXACT_LOOKUP)?;
    let rows = stmt.query_map(params![type_path, limit as i64], OperationRow::from_row)?;
    rows.collect()
}

/// Prefix rows matching `prefix` created at or after `since_micros`.
pub fn count_window(conn: &Connection, prefix: &str, since_micros: i64) -> rusqlite::Result<i64> {
    conn.prepare_cached(COUNT_WINDOW)?
        .query_row(params![prefix, since_micros], |r| r.get(0))
}

pub fn error_rate(
    conn: &Connection,
    prefix: &str,
    since_micros: i64,
) -> rusqlite::Result<ErrorRate> {
    conn.prepare_cached(ERROR_RATE)?
        .query_row(params![prefix, since_micros], |r| {
            Ok(ErrorRate {
                errors: r.get(0)?,
                total: r.get(1)?,
            })
        })
}

/// Lower bound of a trailing window ending now.
pub fn window_start(window_us: i64) -> i64 {
    Utc::now().timestamp_micros() - window_us
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::insert_batch;
    use crate::schema;
    use chrono::{Duration, TimeZone};
    use opsbench_core::operation::Operation;

    fn at(hours_ago: i64, path: &str, status: Status) -> Operation {
        let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        Operation {
            type_path: path.to_string(),
            created_at: now - Duration::hours(hours_ago),
            status,
            payload: b"{}".to_vec(),
        }
    }

    fn seeded() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::install(&conn).unwrap();
        let ops = vec![
            at(1, "labs.result_webhooks.quest", Status::Ok),
            at(2, "labs.result_webhooks.labcorp", Status::Error),
            at(30, "labs.orders", Status::Ok),
            at(100, "labs.result_webhooks.quest", Status::Error),
            at(1, "auth.sub_1", Status::Ok),
        ];
        insert_batch(&mut conn, &ops).unwrap();
        conn
    }

    fn reference_micros(hours_ago: i64) -> i64 {
        (Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() - Duration::hours(hours_ago))
            .timestamp_micros()
    }

    #[test]
    fn latest_by_prefix_is_newest_first() {
        let conn = seeded();
        let rows = latest_by_prefix(&conn, "labs", 100, 0).unwrap();
        assert_eq!(rows.len(), 4);
        for pair in rows.windows(2) {
            assert!(pair[0].created_at >= pair[1].created_at);
        }
        assert!(rows.iter().all(|r| r.type_path.starts_with("labs")));
    }

    #[test]
    fn latest_by_prefix_respects_limit_and_offset() {
        let conn = seeded();
        let all = latest_by_prefix(&conn, "labs.result_webhooks", 100, 0).unwrap();
        assert_eq!(all.len(), 3);
        let page = latest_by_prefix(&conn, "labs.result_webhooks", 1, 1).unwrap();
        assert_eq!(page, vec![all[1].clone()]);
        assert!(latest_by_prefix(&conn, "labs.result_webhooks", 100, 5000)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn exact_lookup_matches_full_path_only() {
        let conn = seeded();
        let rows = exact_lookup(&conn, "labs.result_webhooks.quest", 100).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, Status::Ok);
        assert_eq!(rows[1].status, Status::Error);
        assert!(exact_lookup(&conn, "labs.result_webhooks", 100)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn count_window_excludes_older_rows() {
        let conn = seeded();
        assert_eq!(count_window(&conn, "labs", reference_micros(24)).unwrap(), 2);
        assert_eq!(count_window(&conn, "labs", reference_micros(200)).unwrap(), 4);
        assert_eq!(count_window(&conn, "billing", reference_micros(200)).unwrap(), 0);
    }

    #[test]
    fn error_rate_counts_failures() {
        let conn = seeded();
        let rate = error_rate(&conn, "labs.result_webhooks", reference_micros(168)).unwrap();
        assert_eq!(rate, ErrorRate { errors: 2, total: 3 });
        assert!((rate.ratio() - 2.0 / 3.0).abs() < 1e-9);

        let empty = error_rate(&conn, "pharmacy", reference_micros(168)).unwrap();
        assert_eq!(empty.total, 0);
        assert_eq!(empty.ratio(), 0.0);
    }
}
