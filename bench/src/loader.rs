//! Transactional writers for operations and their prefix rows.
//!
//! Two paths, both all-or-nothing:
//!
//! - [`insert_batch`]: one multi-row `INSERT` for the operations, then one
//!   multi-row `INSERT` for every derived prefix row, inside a single
//!   `IMMEDIATE` transaction. Prefix rows reference `first_id + i`, so the
//!   identifier range handed out by the first insert is checked before it is
//!   used.
//! - [`insert_single`]: hands one operation and its pre-computed prefix list
//!   to the store routine (see [`crate::schema`]), which writes both tables
//!   in one statement.
//!
//! Any failure rolls the transaction back and is returned to the caller.

use opsbench_core::generator::Generator;
use opsbench_core::operation::{Operation, OperationPrefix};
use rand::rngs::StdRng;
use rand::Rng;
use rusqlite::{params, params_from_iter, Connection, ToSql, Transaction, TransactionBehavior};
use thiserror::Error;

/// SQLite's default limit on bound parameters per statement.
pub const MAX_BIND_PARAMS: usize = 32_766;

const OPERATION_COLUMNS: usize = 4;
const PREFIX_COLUMNS: usize = 3;

const INSERT_OPERATIONS: &str = "INSERT INTO operations (type_path, created_at, status, payload) VALUES ";
const INSERT_PREFIXES: &str = "INSERT INTO operation_prefixes (operation_id, prefix, created_at) VALUES ";
const INSERT_VIA_ROUTINE: &str = "INSERT INTO insert_operation_with_prefixes
     (type_path, created_at, status, payload, prefixes)
     VALUES (?1, ?2, ?3, ?4, ?5)";

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("store error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store reported no identifier for the first row of the batch")]
    MissingFirstId,
    #[error(
        "identifiers {first}..={last} are not contiguous: expected {expected} rows, found {found}"
    )]
    NonContiguousIds {
        first: i64,
        last: i64,
        expected: usize,
        found: usize,
    },
    #[error("statement assigned identifiers from {found}, expected {expected}")]
    IdGap { expected: i64, found: i64 },
    #[error("cannot encode prefix list: {0}")]
    EncodePrefixes(#[from] serde_json::Error),
}

/// Rows written by one committed batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BatchInserted {
    pub operations: usize,
    pub prefixes: usize,
    /// Identifier of the first operation; the batch owns
    /// `first_id..first_id + operations`.
    pub first_id: i64,
}

impl BatchInserted {
    pub fn last_id(&self) -> i64 {
        self.first_id + self.operations as i64 - 1
    }
}

/// Insert `ops` and all of their prefix rows atomically.
pub fn insert_batch(conn: &mut Connection, ops: &[Operation]) -> Result<BatchInserted, LoadError> {
    if ops.is_empty() {
        return Ok(BatchInserted::default());
    }
    write_batch(conn, ops).map_err(|e| {
        log::debug!("Batch of {} operations rolled back: {e}", ops.len());
        e
    })
}

fn write_batch(conn: &mut Connection, ops: &[Operation]) -> Result<BatchInserted, LoadError> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let first_id = insert_operations(&tx, ops)?;
    let prefixes = insert_prefixes(&tx, ops, first_id)?;
    tx.commit()?;
    Ok(BatchInserted {
        operations: ops.len(),
        prefixes,
        first_id,
    })
}

/// Insert the operation rows and return the first assigned identifier.
///
/// SQLite reports the rowid of the *last* row of a multi-row insert; rows of
/// one `VALUES` list are assigned ascending ids, so the first is
/// `last - (n - 1)`. The resulting range is then counted back to confirm no
/// id inside it belongs to anything else.
fn insert_operations(tx: &Transaction, ops: &[Operation]) -> Result<i64, LoadError> {
    let created: Vec<i64> = ops.iter().map(Operation::created_at_micros).collect();
    let status: Vec<u8> = ops.iter().map(|op| op.status.code()).collect();
    let rows_per_statement = MAX_BIND_PARAMS / OPERATION_COLUMNS;

    let mut first_id: Option<i64> = None;
    let mut next_expected = 0;
    for (chunk_index, chunk) in ops.chunks(rows_per_statement).enumerate() {
        let base = chunk_index * rows_per_statement;
        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * OPERATION_COLUMNS);
        for (i, op) in chunk.iter().enumerate() {
            values.push(&op.type_path);
            values.push(&created[base + i]);
            values.push(&status[base + i]);
            values.push(&op.payload);
        }

        let sql = multi_row_insert(INSERT_OPERATIONS, OPERATION_COLUMNS, chunk.len());
        tx.prepare_cached(&sql)?.execute(params_from_iter(values))?;

        let last = tx.last_insert_rowid();
        if last <= 0 {
            return Err(LoadError::MissingFirstId);
        }
        let chunk_first = last - (chunk.len() as i64 - 1);
        match first_id {
            None => first_id = Some(chunk_first),
            Some(_) if chunk_first != next_expected => {
                return Err(LoadError::IdGap {
                    expected: next_expected,
                    found: chunk_first,
                });
            }
            Some(_) => {}
        }
        next_expected = last + 1;
    }

    let first = first_id.ok_or(LoadError::MissingFirstId)?;
    let last = first + ops.len() as i64 - 1;
    let found: i64 = tx.query_row(
        "SELECT COUNT(*) FROM operations WHERE id BETWEEN ?1 AND ?2",
        [first, last],
        |r| r.get(0),
    )?;
    if found as usize != ops.len() {
        return Err(LoadError::NonContiguousIds {
            first,
            last,
            expected: ops.len(),
            found: found as usize,
        });
    }
    Ok(first)
}

fn insert_prefixes(tx: &Transaction, ops: &[Operation], first_id: i64) -> Result<usize, LoadError> {
    let rows: Vec<OperationPrefix> = ops
        .iter()
        .enumerate()
        .flat_map(|(i, op)| op.prefix_rows(first_id + i as i64))
        .collect();
    let created: Vec<i64> = rows.iter().map(OperationPrefix::created_at_micros).collect();
    let rows_per_statement = MAX_BIND_PARAMS / PREFIX_COLUMNS;

    for (chunk_index, chunk) in rows.chunks(rows_per_statement).enumerate() {
        let base = chunk_index * rows_per_statement;
        let mut values: Vec<&dyn ToSql> = Vec::with_capacity(chunk.len() * PREFIX_COLUMNS);
        for (i, row) in chunk.iter().enumerate() {
            values.push(&row.operation_id);
            values.push(&row.prefix);
            values.push(&created[base + i]);
        }
        let sql = multi_row_insert(INSERT_PREFIXES, PREFIX_COLUMNS, chunk.len());
        tx.prepare_cached(&sql)?.execute(params_from_iter(values))?;
    }
    Ok(rows.len())
}

/// `head` followed by `rows` placeholder tuples of `columns` parameters.
fn multi_row_insert(head: &str, columns: usize, rows: usize) -> String {
    let tuple = format!("({})", vec!["?"; columns].join(", "));
    let mut sql = String::with_capacity(head.len() + rows * (tuple.len() + 2));
    sql.push_str(head);
    for i in 0..rows {
        if i > 0 {
            sql.push_str(", ");
        }
        sql.push_str(&tuple);
    }
    sql
}

/// Insert one operation through the store routine. Returns the number of
/// prefix rows written.
pub fn insert_single(conn: &mut Connection, op: &Operation) -> Result<usize, LoadError> {
    write_single(conn, op).map_err(|e| {
        log::debug!("Single insert of {} rolled back: {e}", op.type_path);
        e
    })
}

fn write_single(conn: &mut Connection, op: &Operation) -> Result<usize, LoadError> {
    let prefixes = op.prefixes();
    let encoded = serde_json::to_string(&prefixes)?;
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.prepare_cached(INSERT_VIA_ROUTINE)?.execute(params![
        op.type_path,
        op.created_at_micros(),
        op.status.code(),
        op.payload,
        encoded,
    ])?;
    tx.commit()?;
    Ok(prefixes.len())
}

/// Generates records and writes them through one of the two paths.
pub struct Loader<R: Rng = StdRng> {
    generator: Generator<R>,
    error_rate: f64,
}

impl<R: Rng> Loader<R> {
    pub fn new(generator: Generator<R>, error_rate: f64) -> Self {
        Self {
            generator,
            error_rate,
        }
    }

    pub fn generator(&mut self) -> &mut Generator<R> {
        &mut self.generator
    }

    pub fn error_rate(&self) -> f64 {
        self.error_rate
    }

    /// Generate `batch_size` records and insert them with [`insert_batch`].
    pub fn insert_batch(
        &mut self,
        conn: &mut Connection,
        batch_size: usize,
    ) -> Result<BatchInserted, LoadError> {
        let ops = self.generator.generate(batch_size, self.error_rate);
        insert_batch(conn, &ops)
    }
}
