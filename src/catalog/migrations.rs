//! Forward-only, idempotent schema migrations, detected by introspecting
//! the schema rather than tracking an integer version.

use rusqlite::Connection;

use crate::error::Result;

/// `true` if `table.column` already exists.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let sql = format!("SELECT 1 FROM pragma_table_info('{table}') WHERE name = ?1");
    Ok(conn.prepare(&sql)?.exists([column])?)
}

/// `true` if a table with this name exists.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    Ok(conn
        .prepare("SELECT 1 FROM sqlite_master WHERE type='table' AND name = ?1")?
        .exists([table])?)
}

const BASE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    id TEXT PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS connections (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    host TEXT NOT NULL,
    port INTEGER NOT NULL,
    user TEXT NOT NULL,
    password_ciphertext TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS databases (
    id TEXT PRIMARY KEY,
    connection_id TEXT NOT NULL REFERENCES connections(id) ON DELETE CASCADE,
    real_name TEXT NOT NULL,
    alias TEXT NOT NULL UNIQUE,
    enabled INTEGER NOT NULL DEFAULT 1,
    last_accessed TEXT,
    permissions INTEGER NOT NULL DEFAULT 1,
    UNIQUE (connection_id, real_name)
);

CREATE INDEX IF NOT EXISTS idx_databases_connection ON databases(connection_id);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    password_hash TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_login TEXT,
    active INTEGER NOT NULL DEFAULT 1,
    must_change_password INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS api_keys (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    token_hash TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    last_used_at TEXT,
    active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS request_log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    api_key_id TEXT,
    user_id TEXT,
    endpoint TEXT NOT NULL,
    method TEXT NOT NULL,
    request TEXT NOT NULL,
    response TEXT NOT NULL,
    status INTEGER NOT NULL,
    duration_ms INTEGER NOT NULL,
    timestamp TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_request_log_timestamp ON request_log(timestamp);

CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

type Migration = fn(&Connection) -> Result<()>;

/// Migrations beyond the base schema, applied in order, each guarded by its
/// own introspection check so re-running is a no-op. Every migration is
/// safe against any prior schema state and never drops or narrows a column.
const MIGRATIONS: &[(&str, Migration)] = &[
    ("2024_request_log_add_index_endpoint", add_request_log_endpoint_index),
];

fn add_request_log_endpoint_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_request_log_endpoint ON request_log(endpoint);",
    )?;
    Ok(())
}

/// Create the schema if absent, then apply every migration whose id has not
/// already been recorded.
pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(BASE_SCHEMA)?;

    for (id, apply) in MIGRATIONS {
        let already_applied = conn
            .prepare("SELECT 1 FROM schema_migrations WHERE id = ?1")?
            .exists([id])?;
        if already_applied {
            continue;
        }
        apply(conn)?;
        conn.execute(
            "INSERT INTO schema_migrations (id) VALUES (?1)",
            [id],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.pragma_update(None, "foreign_keys", "ON").unwrap();
        conn
    }

    #[test]
    fn run_creates_core_tables() {
        let conn = test_conn();
        run(&conn).unwrap();
        for table in ["connections", "databases", "users", "api_keys", "request_log", "settings"] {
            assert!(table_exists(&conn, table).unwrap(), "missing table {table}");
        }
    }

    #[test]
    fn run_is_idempotent() {
        let conn = test_conn();
        run(&conn).unwrap();
        run(&conn).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as i64);
    }

    #[test]
    fn column_exists_detects_columns() {
        let conn = test_conn();
        run(&conn).unwrap();
        assert!(column_exists(&conn, "databases", "alias").unwrap());
        assert!(!column_exists(&conn, "databases", "nonexistent").unwrap());
    }

    #[test]
    fn migration_adds_endpoint_index() {
        let conn = test_conn();
        run(&conn).unwrap();
        let idx_exists: bool = conn
            .prepare("SELECT 1 FROM sqlite_master WHERE type='index' AND name='idx_request_log_endpoint'")
            .unwrap()
            .exists([])
            .unwrap();
        assert!(idx_exists);
    }
}
