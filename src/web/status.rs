//! Health and status handlers.

use axum::extract::State;
use axum::response::Json;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{trace, warn};
use ts_rs::TS;

use crate::data;
use crate::state::{AppState, ServiceStatus};

const DB_PING_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Serialize, TS)]
#[ts(export)]
pub struct ServiceInfo {
    name: String,
    status: ServiceStatus,
}

#[derive(Serialize, TS)]
#[ts(export)]
pub struct StatusResponse {
    status: ServiceStatus,
    version: String,
    commit: String,
    services: BTreeMap<String, ServiceInfo>,
}

/// Liveness probe. Never touches the database.
pub(super) async fn health() -> Json<Value> {
    trace!("health check requested");
    Json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Fold per-service statuses into one overall status.
fn overall(services: &BTreeMap<String, ServiceInfo>) -> ServiceStatus {
    if services.is_empty() {
        ServiceStatus::Disabled
    } else if services
        .values()
        .any(|s| matches!(s.status, ServiceStatus::Error))
    {
        ServiceStatus::Error
    } else if services
        .values()
        .any(|s| matches!(s.status, ServiceStatus::Starting))
    {
        ServiceStatus::Starting
    } else {
        ServiceStatus::Active
    }
}

/// Readiness: version, database reachability and background services.
pub(super) async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    let mut services = BTreeMap::new();

    let database = match tokio::time::timeout(DB_PING_TIMEOUT, data::health::ping(&state.db_pool)).await {
        Ok(Ok(())) => ServiceStatus::Connected,
        Ok(Err(e)) => {
            warn!(error = ?e, "Database ping failed");
            ServiceStatus::Error
        }
        Err(_) => {
            warn!("Database ping timed out");
            ServiceStatus::Error
        }
    };
    services.insert(
        "database".to_string(),
        ServiceInfo {
            name: "database".to_string(),
            status: database,
        },
    );

    for (name, svc_status) in state.service_statuses.all() {
        services.insert(
            name.clone(),
            ServiceInfo {
                name,
                status: svc_status,
            },
        );
    }

    Json(StatusResponse {
        status: overall(&services),
        version: env!("CARGO_PKG_VERSION").to_string(),
        commit: env!("GIT_COMMIT_SHORT").to_string(),
        services,
    })
}
