//! Admin order queue and fulfilment status changes.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, instrument};
use ts_rs::TS;

use crate::data;
use crate::data::audit::AuditEvent;
use crate::data::enums::OrderStatus;
use crate::data::orders::Actor;
use crate::state::AppState;
use crate::web::admin::{audit, begin, commit};
use crate::web::auth::extractors::AdminUser;
use crate::web::error::{ApiError, db_error, domain_error};
use crate::web::orders::OrderResponse;

#[derive(Debug, Deserialize)]
pub struct OrderListParams {
    pub status: Option<OrderStatus>,
}

/// `GET /api/admin/orders?status=`
pub async fn list_orders(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Query(params): Query<OrderListParams>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = data::orders::list_all(&state.db_pool, params.status)
        .await
        .map_err(|e| db_error("List orders", e))?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct SetOrderStatusBody {
    pub status: OrderStatus,
}

/// `PUT /api/admin/orders/{id}/status`
///
/// Cancelling refunds the order total and restocks its items.
#[instrument(skip_all)]
pub async fn set_order_status(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(order_id): Path<i64>,
    Json(body): Json<SetOrderStatusBody>,
) -> Result<Json<OrderResponse>, ApiError> {
    let mut tx = begin(&state).await?;
    let updated =
        data::orders::apply_transition(&mut *tx, order_id, body.status, Actor::Admin(admin.id))
            .await
            .map_err(|e| domain_error("Update order status", e))?;

    audit(
        &mut *tx,
        AuditEvent {
            actor_id: admin.id,
            action: "order.set_status",
            target_type: "order",
            target_id: order_id.to_string(),
            details: json!({
                "orderNumber": updated.order.order_number,
                "status": body.status,
            }),
        },
    )
    .await?;
    commit(tx).await?;
    info!(order_id, status = %body.status, "Admin updated order");

    Ok(Json(OrderResponse::from(updated)))
}
