//! Admin audit log DTOs.

use serde::Serialize;
use ts_rs::TS;

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AuditLogEntry {
    #[ts(type = "number")]
    pub id: i64,
    #[ts(type = "number")]
    pub actor_id: i64,
    pub actor_phone: Option<String>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    #[ts(type = "Record<string, unknown>")]
    pub details: serde_json::Value,
    pub timestamp: String,
}

use crate::data::models::AuditRow;

impl From<AuditRow> for AuditLogEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            id: row.id,
            actor_id: row.actor_id,
            actor_phone: row.actor_phone,
            action: row.action,
            target_type: row.target_type,
            target_id: row.target_id,
            details: row.details,
            timestamp: row.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AuditLogResponse {
    pub entries: Vec<AuditLogEntry>,
}
