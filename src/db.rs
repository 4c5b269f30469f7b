//! Catalog store file handle: WAL mode, busy timeout, retry-on-contention.

use std::path::Path;
use std::time::Duration;

use rusqlite::Connection;
use tracing::{info, warn};

use crate::catalog::migrations;
use crate::error::Result;

/// Open (creating if absent) the catalog store file and bring its schema
/// up to date.
pub fn open(path: &Path) -> Result<Connection> {
    info!("opening catalog store at {}", path.display());
    let conn = Connection::open(path)?;

    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.busy_timeout(Duration::from_secs(5))?;

    migrations::run(&conn)?;

    Ok(conn)
}

/// Retry a catalog write on `SQLITE_BUSY`/`SQLITE_LOCKED` with exponential
/// backoff starting at 10ms, up to 5 attempts.
pub fn with_retry<T>(mut f: impl FnMut() -> rusqlite::Result<T>) -> rusqlite::Result<T> {
    let mut attempt = 0;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(rusqlite::Error::SqliteFailure(e, msg))
                if attempt < 4
                    && matches!(
                        e.code,
                        rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                    ) =>
            {
                warn!(attempt, ?e.code, "catalog write contention, retrying");
                std::thread::sleep(Duration::from_millis(10 * (1 << attempt)));
                attempt += 1;
                let _ = msg;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_file_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("catalog.db");
        let conn = open(&path).unwrap();
        assert!(path.exists());
        assert!(migrations::table_exists(&conn, "connections").unwrap());
    }

    #[test]
    fn with_retry_succeeds_first_try() {
        let mut calls = 0;
        let result = with_retry(|| {
            calls += 1;
            Ok::<_, rusqlite::Error>(42)
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 1);
    }
}
