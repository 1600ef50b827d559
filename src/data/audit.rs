//! Database query functions for the admin audit log.

use anyhow::Result;
use serde_json::Value;
use sqlx::{PgConnection, PgPool};

use crate::data::models::AuditRow;

const AUDIT_SELECT: &str = "SELECT a.id, a.actor_id, u.phone AS actor_phone, a.action, \
            a.target_type, a.target_id, a.details, a.created_at \
     FROM admin_audit a \
     LEFT JOIN users u ON u.id = a.actor_id";

/// An admin mutation worth recording.
#[derive(Debug, Clone)]
pub struct AuditEvent<'a> {
    pub actor_id: i64,
    pub action: &'a str,
    pub target_type: &'a str,
    pub target_id: String,
    pub details: Value,
}

/// Append an audit row on the mutation's own connection, so both commit together.
pub async fn record(conn: &mut PgConnection, event: AuditEvent<'_>) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO admin_audit (actor_id, action, target_type, target_id, details)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(event.actor_id)
    .bind(event.action)
    .bind(event.target_type)
    .bind(event.target_id)
    .bind(event.details)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

/// Fetch the most recent audit log entries, newest first.
pub async fn list_recent(pool: &PgPool, limit: i64) -> Result<Vec<AuditRow>> {
    let rows = sqlx::query_as::<_, AuditRow>(&format!(
        "{AUDIT_SELECT} ORDER BY a.created_at DESC, a.id DESC LIMIT $1"
    ))
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}
