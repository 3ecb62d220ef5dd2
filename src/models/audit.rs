use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only record of an admin acting on another user's account.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub id: i64,
    pub admin_user_id: Uuid,
    pub action: String,
    pub target_user_id: Uuid,
    pub details: JsonValue,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAuditEntry {
    pub admin_user_id: Uuid,
    pub action: String,
    pub target_user_id: Uuid,
    pub details: JsonValue,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Audit entry joined with display names for the back-office listing.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditLogEntryView {
    pub id: i64,
    pub admin_user_id: Uuid,
    pub admin_name: Option<String>,
    pub action: String,
    pub target_user_id: Uuid,
    pub target_name: Option<String>,
    pub details: JsonValue,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}
