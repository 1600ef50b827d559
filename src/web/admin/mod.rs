//! Admin API handlers.
//!
//! All endpoints require the `AdminUser` extractor, returning 401/403 as needed.

pub mod orders;
pub mod products;
pub mod users;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Json, Response};
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgConnection, Postgres, Transaction};
use tracing::{instrument, trace};
use ts_rs::TS;

use crate::data;
use crate::data::audit::AuditEvent;
use crate::state::{AppState, ServiceStatus};
use crate::web::audit::{AuditLogEntry, AuditLogResponse};
use crate::web::auth::extractors::AdminUser;
use crate::web::error::{ApiError, db_error};

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AdminServiceInfo {
    name: String,
    status: ServiceStatus,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AdminStatusResponse {
    #[ts(type = "number")]
    user_count: i64,
    #[ts(type = "number")]
    active_product_count: i64,
    #[ts(type = "number")]
    order_count: i64,
    #[ts(type = "number")]
    pending_order_count: i64,
    #[ts(type = "number")]
    tokens_in_circulation: i64,
    services: Vec<AdminServiceInfo>,
}

/// Open the transaction an admin mutation and its audit row share.
pub(crate) async fn begin(state: &AppState) -> Result<Transaction<'static, Postgres>, ApiError> {
    state
        .db_pool
        .begin()
        .await
        .map_err(|e| db_error("Begin admin transaction", e.into()))
}

/// Record an admin mutation on its transaction. A failed insert aborts the
/// whole mutation.
pub(crate) async fn audit(conn: &mut PgConnection, event: AuditEvent<'_>) -> Result<(), ApiError> {
    let action = event.action;
    data::audit::record(conn, event)
        .await
        .map_err(|e| db_error(&format!("Audit {action}"), e))
}

pub(crate) async fn commit(tx: Transaction<'static, Postgres>) -> Result<(), ApiError> {
    tx.commit()
        .await
        .map_err(|e| db_error("Commit admin transaction", e.into()))
}

/// `GET /api/admin/status` -- Store-wide counters for the dashboard.
#[instrument(skip_all)]
pub async fn admin_status(
    AdminUser(_user): AdminUser,
    State(state): State<AppState>,
) -> Result<Json<AdminStatusResponse>, ApiError> {
    let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(&state.db_pool)
        .await
        .map_err(|e| db_error("Count users", e.into()))?;

    let active_product_count = data::products::count_active(&state.db_pool)
        .await
        .map_err(|e| db_error("Count products", e))?;

    let (order_count, pending_order_count) = data::orders::counts(&state.db_pool)
        .await
        .map_err(|e| db_error("Count orders", e))?;

    let tokens_in_circulation = data::tokens::tokens_in_circulation(&state.db_pool)
        .await
        .map_err(|e| db_error("Sum balances", e))?;

    let services: Vec<AdminServiceInfo> = state
        .service_statuses
        .all()
        .into_iter()
        .map(|(name, status)| AdminServiceInfo { name, status })
        .collect();

    trace!(
        user_count,
        order_count,
        pending_order_count,
        service_count = services.len(),
        "Fetched admin status"
    );

    Ok(Json(AdminStatusResponse {
        user_count,
        active_product_count,
        order_count,
        pending_order_count,
        tokens_in_circulation,
        services,
    }))
}

/// Format a `DateTime<Utc>` as an HTTP-date for Last-Modified headers.
fn to_http_date(dt: &DateTime<Utc>) -> String {
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

/// Parse an `If-Modified-Since` header value into a `DateTime<Utc>`.
fn parse_if_modified_since(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    let val = headers.get(header::IF_MODIFIED_SINCE)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(val)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// `GET /api/admin/audit-log` -- List recent admin actions.
///
/// Supports `If-Modified-Since`: returns 304 when the newest entry hasn't changed.
#[instrument(skip_all)]
pub async fn list_audit_log(
    AdminUser(_user): AdminUser,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Response, ApiError> {
    let rows = data::audit::list_recent(&state.db_pool, 200)
        .await
        .map_err(|e| db_error("List audit log", e))?;

    let latest = rows.first().map(|r| r.created_at);

    if let (Some(since), Some(latest_ts)) = (parse_if_modified_since(&headers), latest) {
        // HTTP dates have second precision.
        if latest_ts.timestamp() <= since.timestamp() {
            trace!("Audit log not modified, returning 304");
            let mut resp = StatusCode::NOT_MODIFIED.into_response();
            if let Ok(val) = to_http_date(&latest_ts).parse() {
                resp.headers_mut().insert(header::LAST_MODIFIED, val);
            }
            return Ok(resp);
        }
    }

    let entries: Vec<AuditLogEntry> = rows.into_iter().map(AuditLogEntry::from).collect();

    trace!(count = entries.len(), "Listed audit log entries");

    let mut resp = Json(AuditLogResponse { entries }).into_response();
    if let Some(latest_ts) = latest
        && let Ok(val) = to_http_date(&latest_ts).parse()
    {
        resp.headers_mut().insert(header::LAST_MODIFIED, val);
    }
    Ok(resp)
}
