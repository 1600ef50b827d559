//! Checkout and order history handlers for subscribers.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use tracing::instrument;
use ts_rs::TS;

use crate::data;
use crate::data::enums::OrderStatus;
use crate::data::orders::{Actor, CartLine, CheckoutError, CheckoutRequest, OrderWithItems};
use crate::state::AppState;
use crate::web::auth::extractors::AuthUser;
use crate::web::error::{ApiError, OptionNotFoundExt, db_error, domain_error};

pub const MAX_NOTE_LEN: usize = 500;

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OrderItemResponse {
    #[ts(type = "number")]
    pub product_id: i64,
    pub product_name: String,
    #[ts(type = "number")]
    pub unit_price_tokens: i64,
    pub quantity: i32,
    #[ts(type = "number")]
    pub line_total_tokens: i64,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct OrderResponse {
    #[ts(type = "number")]
    pub id: i64,
    pub order_number: String,
    #[ts(type = "number")]
    pub user_id: i64,
    pub status: OrderStatus,
    #[ts(type = "number")]
    pub total_tokens: i64,
    pub delivery_address: String,
    pub note: Option<String>,
    pub items: Vec<OrderItemResponse>,
    pub created_at: String,
    pub updated_at: String,
}

impl From<OrderWithItems> for OrderResponse {
    fn from(OrderWithItems { order, items }: OrderWithItems) -> Self {
        Self {
            id: order.id,
            order_number: order.order_number,
            user_id: order.user_id,
            status: order.status,
            total_tokens: order.total_tokens,
            delivery_address: order.delivery_address,
            note: order.note,
            items: items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id,
                    line_total_tokens: item.unit_price_tokens * i64::from(item.quantity),
                    product_name: item.product_name,
                    unit_price_tokens: item.unit_price_tokens,
                    quantity: item.quantity,
                })
                .collect(),
            created_at: order.created_at.to_rfc3339(),
            updated_at: order.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CheckoutItem {
    #[ts(type = "number")]
    pub product_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CheckoutBody {
    pub items: Vec<CheckoutItem>,
    #[ts(optional)]
    pub delivery_address: Option<String>,
    #[ts(optional)]
    pub note: Option<String>,
}

/// `POST /api/orders` -- Place an order paid from the token balance.
#[instrument(skip_all)]
pub async fn checkout(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<CheckoutBody>,
) -> Result<(StatusCode, Json<OrderResponse>), ApiError> {
    let lines: Vec<CartLine> = body
        .items
        .iter()
        .map(|item| CartLine {
            product_id: item.product_id,
            quantity: item.quantity,
        })
        .collect();
    // Reject bad carts before taking any locks.
    data::orders::merge_lines(&lines)?;

    let delivery_address = body
        .delivery_address
        .as_deref()
        .and_then(crate::utils::non_empty)
        .or_else(|| user.delivery_address.clone())
        .ok_or(CheckoutError::MissingAddress)?;
    if delivery_address.chars().count() > crate::web::account::MAX_ADDRESS_LEN {
        return Err(ApiError::validation("delivery address is too long"));
    }

    let note = body.note.as_deref().and_then(crate::utils::non_empty);
    if note.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTE_LEN) {
        return Err(ApiError::validation(format!(
            "note must be at most {MAX_NOTE_LEN} characters"
        )));
    }

    let placed = data::orders::checkout(
        &state.db_pool,
        CheckoutRequest {
            user_id: user.id,
            lines,
            delivery_address,
            note,
        },
    )
    .await
    .map_err(|e| domain_error("Checkout", e))?;

    Ok((StatusCode::CREATED, Json(OrderResponse::from(placed))))
}

/// `GET /api/orders`
pub async fn list_orders(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<OrderResponse>>, ApiError> {
    let orders = data::orders::list_for_user(&state.db_pool, user.id)
        .await
        .map_err(|e| db_error("List orders", e))?;
    Ok(Json(orders.into_iter().map(OrderResponse::from).collect()))
}

/// `GET /api/orders/{order_number}`
pub async fn get_order(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order = data::orders::get_for_user(&state.db_pool, user.id, &order_number)
        .await
        .map_err(|e| db_error("Get order", e))?
        .or_not_found("Order", &order_number)?;
    Ok(Json(OrderResponse::from(order)))
}

/// `POST /api/orders/{order_number}/cancel` -- Cancel a pending order and refund it.
#[instrument(skip_all)]
pub async fn cancel_order(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Path(order_number): Path<String>,
) -> Result<Json<OrderResponse>, ApiError> {
    let order_id = data::orders::id_for_number(&state.db_pool, user.id, &order_number)
        .await
        .map_err(|e| db_error("Find order", e))?
        .or_not_found("Order", &order_number)?;

    let order = data::orders::transition(
        &state.db_pool,
        order_id,
        OrderStatus::Cancelled,
        Actor::Owner(user.id),
    )
    .await
    .map_err(|e| domain_error("Cancel order", e))?;

    Ok(Json(OrderResponse::from(order)))
}
