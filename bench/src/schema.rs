//! Table, index and routine definitions for the prefix-table design.
//!
//! `operations` holds one row per logged event. `operation_prefixes` holds
//! one row per ancestor prefix of each event's path, carrying a copy of the
//! event's `created_at` so "latest N under prefix P" is a range scan on
//! `(prefix, created_at)`.
//!
//! `insert_operation_with_prefixes` is the store-side routine used by the
//! single-row write path: a view whose `INSTEAD OF INSERT` trigger writes the
//! operation and its prefix rows in one statement.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Name of the single-row insert routine.
pub const INSERT_ROUTINE: &str = "insert_operation_with_prefixes";

const TABLES: &str = "
    CREATE TABLE IF NOT EXISTS operations (
        id          INTEGER PRIMARY KEY AUTOINCREMENT,
        type_path   TEXT    NOT NULL,
        created_at  INTEGER NOT NULL,
        status      INTEGER NOT NULL CHECK (status IN (0, 1)),
        payload     BLOB    NOT NULL
    );

    CREATE TABLE IF NOT EXISTS operation_prefixes (
        operation_id  INTEGER NOT NULL REFERENCES operations(id),
        prefix        TEXT    NOT NULL,
        created_at    INTEGER NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_operations_path_created
        ON operations (type_path, created_at);
    CREATE INDEX IF NOT EXISTS idx_prefixes_prefix_created
        ON operation_prefixes (prefix, created_at);
    CREATE INDEX IF NOT EXISTS idx_prefixes_operation
        ON operation_prefixes (operation_id);
";

// The prefix rows are attached to MAX(id): the trigger runs inside the
// writer's transaction, so the row just inserted is the newest one.
const ROUTINE: &str = "
    CREATE VIEW insert_operation_with_prefixes AS
        SELECT type_path, created_at, status, payload, NULL AS prefixes
        FROM operations
        WHERE 0;

    CREATE TRIGGER insert_operation_with_prefixes_insert
    INSTEAD OF INSERT ON insert_operation_with_prefixes
    BEGIN
        SELECT RAISE(ABORT, 'prefix list does not match type_path')
        WHERE json_array_length(NEW.prefixes)
                  != length(NEW.type_path) - length(replace(NEW.type_path, '.', '')) + 1
           OR json_extract(NEW.prefixes, '$[#-1]') IS NOT NEW.type_path;

        INSERT INTO operations (type_path, created_at, status, payload)
        VALUES (NEW.type_path, NEW.created_at, NEW.status, NEW.payload);

        INSERT INTO operation_prefixes (operation_id, prefix, created_at)
        SELECT (SELECT MAX(id) FROM operations), j.value, NEW.created_at
        FROM json_each(NEW.prefixes) AS j
        ORDER BY j.key;
    END;
";

const DROP_ROUTINE: &str = "
    DROP TRIGGER IF EXISTS insert_operation_with_prefixes_insert;
    DROP VIEW IF EXISTS insert_operation_with_prefixes;
";

/// Create tables, indexes and the insert routine if they are missing.
pub fn install(conn: &Connection) -> Result<()> {
    conn.execute_batch(TABLES).context("creating tables")?;
    if !routine_exists(conn)? {
        conn.execute_batch(ROUTINE)
            .context("creating insert routine")?;
    }
    Ok(())
}

/// Drop and recreate the insert routine.
pub fn reinstall_routine(conn: &Connection) -> Result<()> {
    conn.execute_batch(DROP_ROUTINE)
        .context("dropping insert routine")?;
    conn.execute_batch(ROUTINE)
        .context("creating insert routine")?;
    log::info!("Installed routine {INSERT_ROUTINE}");
    Ok(())
}

pub fn routine_exists(conn: &Connection) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'trigger' AND name = ?1",
        [format!("{INSERT_ROUTINE}_insert")],
        |r| r.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_names(conn: &Connection) -> Vec<String> {
        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type IN ('table', 'view') ORDER BY name")
            .unwrap();
        let names = stmt
            .query_map([], |r| r.get::<_, String>(0))
            .unwrap()
            .collect::<rusqlite::Result<Vec<_>>>()
            .unwrap();
        names
    }

    #[test]
    fn install_creates_tables_and_routine() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        let names = table_names(&conn);
        assert!(names.contains(&"operations".to_string()));
        assert!(names.contains(&"operation_prefixes".to_string()));
        assert!(names.contains(&INSERT_ROUTINE.to_string()));
        assert!(routine_exists(&conn).unwrap());
    }

    #[test]
    fn install_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        install(&conn).unwrap();
        reinstall_routine(&conn).unwrap();
        assert!(routine_exists(&conn).unwrap());
    }

    #[test]
    fn routine_writes_operation_and_prefixes() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        conn.execute(
            "INSERT INTO insert_operation_with_prefixes
                 (type_path, created_at, status, payload, prefixes)
             VALUES ('a.b.c', 42, 0, x'7b7d', '[\"a\",\"a.b\",\"a.b.c\"]')",
            [],
        )
        .unwrap();

        let mut stmt = conn
            .prepare(
                "SELECT p.operation_id, p.prefix, p.created_at
                 FROM operation_prefixes p ORDER BY length(p.prefix)",
            )
            .unwrap();
        let rows: Vec<(i64, String, i64)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)))
            .unwrap()
            .collect::<rusqlite::Result<_>>()
            .unwrap();
        let id: i64 = conn
            .query_row("SELECT id FROM operations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(
            rows,
            vec![
                (id, "a".to_string(), 42),
                (id, "a.b".to_string(), 42),
                (id, "a.b.c".to_string(), 42),
            ]
        );
    }

    #[test]
    fn routine_rejects_mismatched_prefix_list() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        for bad in ["[\"a\",\"a.b\"]", "[\"a\",\"a.b\",\"a.x\"]", "[]"] {
            let result = conn.execute(
                "INSERT INTO insert_operation_with_prefixes
                     (type_path, created_at, status, payload, prefixes)
                 VALUES ('a.b.c', 1, 0, x'', ?1)",
                [bad],
            );
            assert!(result.is_err(), "accepted {bad}");
        }
        let ops: i64 = conn
            .query_row("SELECT COUNT(*) FROM operations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(ops, 0);
    }

    #[test]
    fn status_outside_enum_is_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        install(&conn).unwrap();
        let result = conn.execute(
            "INSERT INTO operations (type_path, created_at, status, payload)
             VALUES ('a', 1, 9, x'')",
            [],
        );
        assert!(result.is_err());
    }
}
