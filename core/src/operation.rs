//! Operation records and their derived prefix rows.

use chrono::{DateTime, Utc};
use std::fmt;

use crate::prefix;

/// Outcome code stored in `operations.status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Status {
    #[default]
    Ok,
    Error,
}

impl Status {
    pub fn code(self) -> u8 {
        match self {
            Status::Ok => 0,
            Status::Error => 1,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Status::Ok),
            1 => Some(Status::Error),
            _ => None,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => f.write_str("OK"),
            Status::Error => f.write_str("ERROR"),
        }
    }
}

/// One logged event, not yet persisted.
///
/// The store assigns the identifier at insert time, so there is no `id`
/// field here; rows read back from the store carry it separately.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    pub type_path: String,
    pub created_at: DateTime<Utc>,
    pub status: Status,
    pub payload: Vec<u8>,
}

impl Operation {
    /// `created_at` as microseconds since the Unix epoch, the store's
    /// timestamp representation.
    pub fn created_at_micros(&self) -> i64 {
        self.created_at.timestamp_micros()
    }

    /// Number of dot-separated segments in `type_path`.
    pub fn segment_count(&self) -> usize {
        prefix::segment_count(&self.type_path)
    }

    /// Ancestor prefixes of `type_path`, shortest first.
    pub fn prefixes(&self) -> Vec<String> {
        prefix::expand(&self.type_path)
    }

    /// The prefix rows owned by this operation once it has been assigned
    /// `operation_id`.
    pub fn prefix_rows(&self, operation_id: i64) -> Vec<OperationPrefix> {
        self.prefixes()
            .into_iter()
            .map(|prefix| OperationPrefix {
                operation_id,
                prefix,
                created_at: self.created_at,
            })
            .collect()
    }
}

/// Denormalised ancestor row: one per prefix of the owning operation's path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationPrefix {
    pub operation_id: i64,
    pub prefix: String,
    /// Always a copy of the owning operation's `created_at`.
    pub created_at: DateTime<Utc>,
}

impl OperationPrefix {
    pub fn created_at_micros(&self) -> i64 {
        self.created_at.timestamp_micros()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample(path: &str) -> Operation {
        Operation {
            type_path: path.to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
            status: Status::Ok,
            payload: b"{}".to_vec(),
        }
    }

    #[test]
    fn status_codes_round_trip() {
        assert_eq!(Status::from_code(Status::Ok.code()), Some(Status::Ok));
        assert_eq!(Status::from_code(Status::Error.code()), Some(Status::Error));
        assert_eq!(Status::from_code(7), None);
    }

    #[test]
    fn status_display() {
        assert_eq!(Status::Ok.to_string(), "OK");
        assert_eq!(Status::Error.to_string(), "ERROR");
    }

    #[test]
    fn prefix_rows_copy_owner_timestamp_and_id() {
        let op = sample("labs.orders.comp_3");
        let rows = op.prefix_rows(41);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.operation_id == 41));
        assert!(rows.iter().all(|r| r.created_at == op.created_at));
        assert_eq!(rows[2].prefix, op.type_path);
        assert_eq!(rows[0].created_at_micros(), op.created_at_micros());
    }

    #[test]
    fn created_at_micros_matches_chrono() {
        let op = sample("auth");
        assert_eq!(op.created_at_micros(), op.created_at.timestamp_micros());
        assert_eq!(op.segment_count(), 1);
    }
}
