use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// JSON-serializable summary returned by `authenticateUser`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcUser {
    pub id: i64,
    pub username: Option<String>,
    pub balance: i64,
    pub trial_used: bool,
    pub banned: bool,
    pub is_admin: bool,
    pub created: bool,
}

/// JSON-serializable key summary returned by `createTestKey`, `prolongKey`
/// and `listUserKeys`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcKey {
    pub id: i64,
    pub user_id: i64,
    pub server_id: i64,
    pub device: String,
    pub name: String,
    pub uri: String,
    pub is_test: bool,
    pub active: bool,
    pub finish: DateTime<Utc>,
}

/// JSON-serializable payment summary returned by `createPaidPayment`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcPayment {
    pub id: i64,
    pub label: String,
    pub amount: i64,
    pub url: String,
    pub status: String,
}
