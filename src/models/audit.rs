use serde::{Deserialize, Serialize};

/// One state-changing action, written once and never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Acting subject; `None` for anonymous actions
    pub user_id: Option<i64>,
    /// e.g. "LOGIN", "CREATE_LINK", "DELETE_LINK"
    pub action: String,
    /// Affected entity (short code, user id, ...)
    pub entity_id: String,
    /// Free-form payload, usually JSON text
    pub details: String,
    pub ip_address: String,
    /// Unix timestamp (seconds)
    pub timestamp: i64,
}
