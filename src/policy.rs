//! Policy evaluator: classify SQL into an operation kind and check
//! it against a database's permission bitmap. Purely functional, no state.

use crate::catalog::model::{OperationKind, Permissions};

/// Classify a SQL statement by its first significant keyword. The real
/// grammar parser is out of scope; this heuristic is the implementation,
/// not a degraded fallback.
pub fn classify(sql: &str) -> OperationKind {
    let trimmed = sql.trim();
    let upper = trimmed.to_uppercase();
    let first_word = upper.split_whitespace().next().unwrap_or("");

    match first_word {
        "SELECT" => OperationKind::Select,
        "INSERT" => OperationKind::Insert,
        "UPDATE" => OperationKind::Update,
        "DELETE" => OperationKind::Delete,
        "CREATE" => OperationKind::Create,
        "ALTER" => OperationKind::Alter,
        "DROP" => OperationKind::Drop,
        "TRUNCATE" => OperationKind::Truncate,
        _ => OperationKind::Unknown,
    }
}

/// Check `kind` against `permissions`. `Unknown` is always denied.
/// Denial carries a human-readable reason naming the operation and the
/// database alias.
pub fn allow(kind: OperationKind, permissions: Permissions, database_alias: &str) -> (bool, Option<String>) {
    let allowed = match kind {
        OperationKind::Select => permissions.select,
        OperationKind::Insert => permissions.insert,
        OperationKind::Update => permissions.update,
        OperationKind::Delete => permissions.delete,
        OperationKind::Create => permissions.create,
        OperationKind::Alter => permissions.alter,
        OperationKind::Drop => permissions.drop,
        OperationKind::Truncate => permissions.truncate,
        OperationKind::Unknown => false,
    };

    if allowed {
        (true, None)
    } else {
        (false, Some(format!("{kind:?} is not permitted on database {database_alias}")))
    }
}
