//! Catalog data model.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password_ciphertext: String,
    pub created_at: String,
}

/// Eight permission bits, packed into a single INTEGER column. Default on
/// first discovery is `select` only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
    pub select: bool,
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
    pub create: bool,
    pub alter: bool,
    pub drop: bool,
    pub truncate: bool,
}

impl Permissions {
    pub const SELECT_ONLY: Permissions = Permissions {
        select: true,
        insert: false,
        update: false,
        delete: false,
        create: false,
        alter: false,
        drop: false,
        truncate: false,
    };

    pub fn to_bits(self) -> i64 {
        let mut bits = 0i64;
        if self.select {
            bits |= 1 << 0;
        }
        if self.insert {
            bits |= 1 << 1;
        }
        if self.update {
            bits |= 1 << 2;
        }
        if self.delete {
            bits |= 1 << 3;
        }
        if self.create {
            bits |= 1 << 4;
        }
        if self.alter {
            bits |= 1 << 5;
        }
        if self.drop {
            bits |= 1 << 6;
        }
        if self.truncate {
            bits |= 1 << 7;
        }
        bits
    }

    pub fn from_bits(bits: i64) -> Self {
        Permissions {
            select: bits & (1 << 0) != 0,
            insert: bits & (1 << 1) != 0,
            update: bits & (1 << 2) != 0,
            delete: bits & (1 << 3) != 0,
            create: bits & (1 << 4) != 0,
            alter: bits & (1 << 5) != 0,
            drop: bits & (1 << 6) != 0,
            truncate: bits & (1 << 7) != 0,
        }
    }

    /// `true` if `self` permits every operation `other` permits — used to
    /// test the permission-monotonicity invariant.
    pub fn contains(self, other: Permissions) -> bool {
        self.to_bits() & other.to_bits() == other.to_bits()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    pub id: String,
    pub connection_id: String,
    pub real_name: String,
    pub alias: String,
    pub enabled: bool,
    pub last_accessed: Option<String>,
    pub permissions: Permissions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: String,
    pub last_login: Option<String>,
    pub active: bool,
    pub must_change_password: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    pub created_at: String,
    pub last_used_at: Option<String>,
    pub active: bool,
}

/// Returned once, at creation time, alongside the [`ApiKey`] record.
#[derive(Debug, Clone, Serialize)]
pub struct NewApiKey {
    pub id: String,
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestLogEntry {
    pub id: i64,
    pub api_key_id: Option<String>,
    pub user_id: Option<String>,
    pub endpoint: String,
    pub method: String,
    pub request: String,
    pub response: String,
    pub status: i64,
    pub duration_ms: i64,
    pub timestamp: String,
}

/// Operation kind classified by the policy evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Alter,
    Drop,
    Truncate,
    Unknown,
}
