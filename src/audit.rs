//! Audit logger: one entry per authenticated call, with recursive
//! `password` redaction and truncation of oversized read results.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::error;

use crate::auth::CallerIdentity;
use crate::catalog::model::RequestLogEntry;
use crate::catalog::CatalogStore;

const TRUNCATION_CAP: usize = 64 * 1024;

/// Redact any `password` field, recursively, before logging a request
/// payload. Adapted from the same substring-matching approach used
/// elsewhere in this codebase for secret-shaped fields, narrowed to the
/// one field this system's request log entry cares about.
pub fn redact_password_fields(json: &str) -> String {
    let Ok(mut value) = serde_json::from_str::<serde_json::Value>(json) else {
        return json.to_string();
    };
    redact_value(&mut value);
    serde_json::to_string(&value).unwrap_or_else(|_| json.to_string())
}

fn is_password_key(key: &str) -> bool {
    key.to_lowercase().contains("password")
}

fn redact_value(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if is_password_key(key) && val.is_string() {
                    *val = serde_json::Value::String("[REDACTED]".to_string());
                } else {
                    redact_value(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for item in arr.iter_mut() {
                redact_value(item);
            }
        }
        _ => {}
    }
}

/// Truncates `json` to `cap` bytes if larger, appending a truncation
/// marker. Returns the (possibly truncated) string and whether it was cut.
pub fn truncate_if_large(json: &str, cap: usize) -> (String, bool) {
    if json.len() <= cap {
        return (json.to_string(), false);
    }
    let mut truncated = json.as_bytes()[..cap].to_vec();
    while std::str::from_utf8(&truncated).is_err() {
        truncated.pop();
    }
    let mut out = String::from_utf8(truncated).unwrap();
    out.push_str(&format!("...[truncated, {} bytes total]", json.len()));
    (out, true)
}

fn identity_ids(identity: &CallerIdentity) -> (Option<String>, Option<String>) {
    match identity {
        CallerIdentity::User { id, .. } => (None, Some(id.clone())),
        CallerIdentity::ApiKey { id } => (Some(id.clone()), None),
    }
}

pub struct AuditLogger {
    catalog: Arc<CatalogStore>,
    dropped: AtomicU64,
}

impl AuditLogger {
    pub fn new(catalog: Arc<CatalogStore>) -> Self {
        Self { catalog, dropped: AtomicU64::new(0) }
    }

    /// Records one call. Never blocks the caller on persistence failure —
    /// failures are counted via `dropped_count`, not surfaced.
    pub async fn log(
        &self,
        identity: &CallerIdentity,
        endpoint: &str,
        method: &str,
        request: &serde_json::Value,
        response: &serde_json::Value,
        status: i64,
        duration_ms: i64,
    ) {
        let (api_key_id, user_id) = identity_ids(identity);

        let request_json = serde_json::to_string(request).unwrap_or_default();
        let redacted_request = redact_password_fields(&request_json);

        let response_json = serde_json::to_string(response).unwrap_or_default();
        let (response_json, _truncated) = if endpoint == "mysql_query" {
            truncate_if_large(&response_json, TRUNCATION_CAP)
        } else {
            (response_json, false)
        };

        let entry = RequestLogEntry {
            id: 0,
            api_key_id,
            user_id,
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            request: redacted_request,
            response: response_json,
            status,
            duration_ms,
            timestamp: String::new(),
        };

        if let Err(e) = self.catalog.append_log(&entry).await {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            error!(err = %e, "failed to persist audit log entry");
        }
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::test_support::test_store;
    use crate::catalog::logs::LogFilter;

    #[test]
    fn redact_password_at_any_depth() {
        let input = r#"{"password":"hunter2","nested":{"password":"abc","other":"ok"}}"#;
        let result = redact_password_fields(input);
        let v: serde_json::Value = serde_json::from_str(&result).unwrap();
        assert_eq!(v["password"], "[REDACTED]");
        assert_eq!(v["nested"]["password"], "[REDACTED]");
        assert_eq!(v["nested"]["other"], "ok");
    }

    #[test]
    fn non_password_fields_pass_through() {
        let input = r#"{"sql":"SELECT 1","database":"app"}"#;
        assert_eq!(redact_password_fields(input), input);
    }

    #[test]
    fn truncate_leaves_small_payload_untouched() {
        let (out, truncated) = truncate_if_large("small", TRUNCATION_CAP);
        assert_eq!(out, "small");
        assert!(!truncated);
    }

    #[test]
    fn truncate_marks_oversized_payload() {
        let big = "x".repeat(TRUNCATION_CAP + 100);
        let (out, truncated) = truncate_if_large(&big, TRUNCATION_CAP);
        assert!(truncated);
        assert!(out.len() < big.len());
        assert!(out.contains("truncated"));
    }

    #[tokio::test]
    async fn log_persists_redacted_entry() {
        let catalog = Arc::new(test_store());
        let logger = AuditLogger::new(catalog.clone());
        let identity = CallerIdentity::User { id: "u1".into(), username: "alice".into() };

        logger
            .log(
                &identity,
                "mysql_query",
                "POST",
                &serde_json::json!({"sql": "SELECT 1", "password": "s3cret"}),
                &serde_json::json!({"rows": []}),
                200,
                5,
            )
            .await;

        let (rows, total) = catalog.query_logs(&LogFilter::default(), 10, 0).await.unwrap();
        assert_eq!(total, 1);
        assert!(rows[0].request.contains("REDACTED"));
        assert!(!rows[0].request.contains("s3cret"));
        assert_eq!(logger.dropped_count(), 0);
    }

    #[tokio::test]
    async fn list_databases_response_is_logged_whole() {
        let catalog = Arc::new(test_store());
        let logger = AuditLogger::new(catalog.clone());
        let identity = CallerIdentity::ApiKey { id: "k1".into() };
        let big_response = serde_json::json!({"databases": vec!["x"; 10_000]});

        logger.log(&identity, "list_databases", "POST", &serde_json::json!({}), &big_response, 200, 1).await;

        let (rows, _) = catalog.query_logs(&LogFilter::default(), 10, 0).await.unwrap();
        assert!(!rows[0].response.contains("truncated"));
    }
}
