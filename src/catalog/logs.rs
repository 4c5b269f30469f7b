use rusqlite::params;

use crate::db::with_retry;
use crate::error::Result;

use super::model::RequestLogEntry;
use super::CatalogStore;

/// Filters accepted by `query_logs`; every field is optional.
#[derive(Debug, Default, Clone)]
pub struct LogFilter {
    pub api_key_id: Option<String>,
    pub user_id: Option<String>,
    pub endpoint: Option<String>,
    pub status: Option<i64>,
}

impl CatalogStore {
    /// Appends an audit entry. `entry.id` is ignored; the row id is
    /// assigned by the `AUTOINCREMENT` column.
    pub async fn append_log(&self, entry: &RequestLogEntry) -> Result<i64> {
        let db = self.db.lock().await;
        with_retry(|| {
            db.execute(
                "INSERT INTO request_log (api_key_id, user_id, endpoint, method, request, response, status, duration_ms) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    entry.api_key_id,
                    entry.user_id,
                    entry.endpoint,
                    entry.method,
                    entry.request,
                    entry.response,
                    entry.status,
                    entry.duration_ms,
                ],
            )
        })?;
        Ok(db.last_insert_rowid())
    }

    /// Returns a page of matching log entries (most recent first) plus the
    /// total count of rows matching `filter` ignoring `limit`/`offset`.
    pub async fn query_logs(&self, filter: &LogFilter, limit: i64, offset: i64) -> Result<(Vec<RequestLogEntry>, i64)> {
        let db = self.db.lock().await;

        let mut clauses = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(v) = &filter.api_key_id {
            clauses.push("api_key_id = ?");
            args.push(Box::new(v.clone()));
        }
        if let Some(v) = &filter.user_id {
            clauses.push("user_id = ?");
            args.push(Box::new(v.clone()));
        }
        if let Some(v) = &filter.endpoint {
            clauses.push("endpoint = ?");
            args.push(Box::new(v.clone()));
        }
        if let Some(v) = filter.status {
            clauses.push("status = ?");
            args.push(Box::new(v));
        }
        let where_clause = if clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", clauses.join(" AND "))
        };

        let count_sql = format!("SELECT COUNT(*) FROM request_log {where_clause}");
        let total: i64 = db.query_row(
            &count_sql,
            rusqlite::params_from_iter(args.iter().map(|b| b.as_ref())),
            |r| r.get(0),
        )?;

        let page_sql = format!(
            "SELECT id, api_key_id, user_id, endpoint, method, request, response, status, duration_ms, timestamp \
             FROM request_log {where_clause} ORDER BY id DESC LIMIT ? OFFSET ?"
        );
        let mut page_args: Vec<&dyn rusqlite::ToSql> = args.iter().map(|b| b.as_ref()).collect();
        page_args.push(&limit);
        page_args.push(&offset);

        let mut stmt = db.prepare(&page_sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(page_args), row_to_log_entry)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok((rows, total))
    }

    pub async fn purge_logs_older_than(&self, days: i64) -> Result<u64> {
        let db = self.db.lock().await;
        let affected = with_retry(|| {
            db.execute(
                "DELETE FROM request_log WHERE timestamp < datetime('now', ?1)",
                [format!("-{days} days")],
            )
        })?;
        Ok(affected as u64)
    }
}

fn row_to_log_entry(row: &rusqlite::Row) -> rusqlite::Result<RequestLogEntry> {
    Ok(RequestLogEntry {
        id: row.get(0)?,
        api_key_id: row.get(1)?,
        user_id: row.get(2)?,
        endpoint: row.get(3)?,
        method: row.get(4)?,
        request: row.get(5)?,
        response: row.get(6)?,
        status: row.get(7)?,
        duration_ms: row.get(8)?,
        timestamp: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::test_store;
    use super::*;

    fn sample_entry(endpoint: &str, status: i64) -> RequestLogEntry {
        RequestLogEntry {
            id: 0,
            api_key_id: None,
            user_id: Some("u1".into()),
            endpoint: endpoint.into(),
            method: "POST".into(),
            request: "{}".into(),
            response: "{}".into(),
            status,
            duration_ms: 12,
            timestamp: String::new(),
        }
    }

    #[tokio::test]
    async fn append_and_query_logs() {
        let store = test_store();
        store.append_log(&sample_entry("mysql_query", 200)).await.unwrap();
        store.append_log(&sample_entry("list_databases", 200)).await.unwrap();

        let (rows, total) = store.query_logs(&LogFilter::default(), 10, 0).await.unwrap();
        assert_eq!(total, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].endpoint, "list_databases");
    }

    #[tokio::test]
    async fn query_logs_filters_by_endpoint() {
        let store = test_store();
        store.append_log(&sample_entry("mysql_query", 200)).await.unwrap();
        store.append_log(&sample_entry("list_databases", 200)).await.unwrap();

        let filter = LogFilter { endpoint: Some("mysql_query".into()), ..Default::default() };
        let (rows, total) = store.query_logs(&filter, 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(rows[0].endpoint, "mysql_query");
    }

    #[tokio::test]
    async fn query_logs_respects_limit_and_offset() {
        let store = test_store();
        for i in 0..5 {
            store.append_log(&sample_entry(&format!("ep{i}"), 200)).await.unwrap();
        }
        let (rows, total) = store.query_logs(&LogFilter::default(), 2, 1).await.unwrap();
        assert_eq!(total, 5);
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn purge_removes_only_old_entries() {
        let store = test_store();
        store.append_log(&sample_entry("fresh", 200)).await.unwrap();
        let affected = store.purge_logs_older_than(30).await.unwrap();
        assert_eq!(affected, 0);
        let (_, total) = store.query_logs(&LogFilter::default(), 10, 0).await.unwrap();
        assert_eq!(total, 1);
    }
}
