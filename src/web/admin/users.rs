//! Admin user management: roles, activation and token adjustments.

use axum::extract::{Path, Query, State};
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use ts_rs::TS;

use crate::data;
use crate::data::audit::AuditEvent;
use crate::data::enums::{Role, TransactionKind};
use crate::data::tokens::{LedgerEntry, MAX_NOTE_LEN};
use crate::state::AppState;
use crate::web::account::{
    TransactionResponse, TransactionsParams, TransactionsResponse, UserResponse,
    transactions_page,
};
use crate::web::admin::{audit, begin, commit};
use crate::web::auth::extractors::AdminUser;
use crate::web::error::{ApiError, OptionNotFoundExt, db_error, domain_error};

#[derive(Debug, Deserialize)]
pub struct UserSearchParams {
    pub q: Option<String>,
}

/// `GET /api/admin/users?q=` -- Search users by phone or name.
#[instrument(skip_all)]
pub async fn list_users(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Query(params): Query<UserSearchParams>,
) -> Result<Json<Vec<UserResponse>>, ApiError> {
    let query = params.q.as_deref().map(str::trim).filter(|q| !q.is_empty());
    let users = data::users::search_users(&state.db_pool, query, 100)
        .await
        .map_err(|e| db_error("List users", e))?;
    Ok(Json(users.iter().map(UserResponse::from).collect()))
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct SetRoleBody {
    pub role: Role,
}

/// `PUT /api/admin/users/{id}/role`
#[instrument(skip_all)]
pub async fn set_user_role(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(body): Json<SetRoleBody>,
) -> Result<Json<UserResponse>, ApiError> {
    if user_id == admin.id && body.role != Role::Admin {
        return Err(ApiError::conflict("admins cannot demote themselves"));
    }

    let mut tx = begin(&state).await?;
    let user = data::users::set_role(&mut *tx, user_id, body.role)
        .await
        .map_err(|e| db_error("Set role", e))?
        .or_not_found("User", user_id)?;

    audit(
        &mut *tx,
        AuditEvent {
            actor_id: admin.id,
            action: "user.set_role",
            target_type: "user",
            target_id: user_id.to_string(),
            details: json!({ "role": body.role }),
        },
    )
    .await?;
    commit(tx).await?;
    info!(user_id, role = %body.role, "Updated user role");

    Ok(Json(UserResponse::from(&user)))
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct SetActiveBody {
    pub active: bool,
}

/// `PUT /api/admin/users/{id}/active`
#[instrument(skip_all)]
pub async fn set_user_active(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(body): Json<SetActiveBody>,
) -> Result<Json<UserResponse>, ApiError> {
    if user_id == admin.id && !body.active {
        return Err(ApiError::conflict("admins cannot deactivate themselves"));
    }

    let mut tx = begin(&state).await?;
    let user = data::users::set_active(&mut *tx, user_id, body.active)
        .await
        .map_err(|e| db_error("Set active", e))?
        .or_not_found("User", user_id)?;

    audit(
        &mut *tx,
        AuditEvent {
            actor_id: admin.id,
            action: if body.active { "user.activate" } else { "user.deactivate" },
            target_type: "user",
            target_id: user_id.to_string(),
            details: json!({}),
        },
    )
    .await?;
    commit(tx).await?;
    info!(user_id, active = body.active, "Updated user activation");

    Ok(Json(UserResponse::from(&user)))
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct AdjustTokensBody {
    #[ts(type = "number")]
    pub amount: i64,
    pub kind: TransactionKind,
    #[ts(optional)]
    pub note: Option<String>,
}

#[derive(Debug, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AdjustTokensResponse {
    pub transaction: TransactionResponse,
    #[ts(type = "number")]
    pub balance: i64,
}

/// `POST /api/admin/users/{id}/tokens` -- Credit or correct a user's balance.
#[instrument(skip_all)]
pub async fn adjust_tokens(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Json(body): Json<AdjustTokensBody>,
) -> Result<Json<AdjustTokensResponse>, ApiError> {
    if !matches!(body.kind, TransactionKind::Credit | TransactionKind::Adjustment) {
        return Err(ApiError::validation(
            "admins may only record credit or adjustment entries",
        ));
    }
    let note = body.note.as_deref().and_then(crate::utils::non_empty);
    if note.as_ref().is_some_and(|n| n.chars().count() > MAX_NOTE_LEN) {
        return Err(ApiError::validation(format!(
            "note must be at most {MAX_NOTE_LEN} characters"
        )));
    }

    let mut tx = begin(&state).await?;
    let row = data::tokens::apply(
        &mut *tx,
        LedgerEntry {
            user_id,
            amount: body.amount,
            kind: body.kind,
            order_id: None,
            actor_id: Some(admin.id),
            note: note.as_deref(),
        },
    )
    .await
    .map_err(|e| domain_error("Adjust tokens", e))?;

    audit(
        &mut *tx,
        AuditEvent {
            actor_id: admin.id,
            action: "tokens.adjust",
            target_type: "user",
            target_id: user_id.to_string(),
            details: json!({
                "amount": body.amount,
                "kind": body.kind,
                "balanceAfter": row.balance_after,
                "transactionId": row.id,
            }),
        },
    )
    .await?;
    commit(tx).await?;
    info!(
        user_id,
        amount = body.amount,
        kind = %body.kind,
        balance = row.balance_after,
        "Adjusted token balance"
    );

    let balance = row.balance_after;
    Ok(Json(AdjustTokensResponse {
        transaction: TransactionResponse::from(row),
        balance,
    }))
}

/// `GET /api/admin/users/{id}/transactions`
pub async fn list_user_transactions(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
    Path(user_id): Path<i64>,
    Query(params): Query<TransactionsParams>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    data::users::get_user(&state.db_pool, user_id)
        .await
        .map_err(|e| db_error("Get user", e))?
        .or_not_found("User", user_id)?;
    transactions_page(&state, user_id, &params).await.map(Json)
}
