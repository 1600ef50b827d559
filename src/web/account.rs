//! Subscriber profile and token history handlers.

use axum::extract::{Query, State};
use axum::response::Json;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{info, instrument};
use ts_rs::TS;

use crate::data;
use crate::data::enums::{Role, TransactionKind};
use crate::data::models::{TokenTransaction, User};
use crate::data::users::ProfileUpdate;
use crate::state::AppState;
use crate::web::auth::extractors::AuthUser;
use crate::web::error::{ApiError, db_error};

pub const MAX_DISPLAY_NAME_LEN: usize = 64;
pub const MAX_ADDRESS_LEN: usize = 500;
pub const MAX_EMAIL_LEN: usize = 254;

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserResponse {
    #[ts(type = "number")]
    pub id: i64,
    pub phone: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub delivery_address: Option<String>,
    pub role: Role,
    pub is_active: bool,
    #[ts(type = "number")]
    pub token_balance: i64,
    pub created_at: String,
    pub last_login_at: Option<String>,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            phone: user.phone.clone(),
            display_name: user.display_name.clone(),
            email: user.email.clone(),
            delivery_address: user.delivery_address.clone(),
            role: user.role,
            is_active: user.is_active,
            token_balance: user.token_balance,
            created_at: user.created_at.to_rfc3339(),
            last_login_at: user.last_login_at.map(|t| t.to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TransactionResponse {
    #[ts(type = "number")]
    pub id: i64,
    #[ts(type = "number")]
    pub amount: i64,
    #[ts(type = "number")]
    pub balance_after: i64,
    pub kind: TransactionKind,
    #[ts(type = "number | null")]
    pub order_id: Option<i64>,
    pub note: Option<String>,
    pub created_at: String,
}

impl From<TokenTransaction> for TransactionResponse {
    fn from(row: TokenTransaction) -> Self {
        Self {
            id: row.id,
            amount: row.amount,
            balance_after: row.balance_after,
            kind: row.kind,
            order_id: row.order_id,
            note: row.note,
            created_at: row.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct TransactionsResponse {
    pub transactions: Vec<TransactionResponse>,
    /// Cursor for the next page, absent on the last page.
    #[ts(type = "number | null")]
    pub next_before: Option<i64>,
}

/// Distinguish an absent field from an explicit `null`.
fn double_option<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileBody {
    #[serde(default, deserialize_with = "double_option")]
    pub display_name: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub email: Option<Option<String>>,
    #[serde(default, deserialize_with = "double_option")]
    pub delivery_address: Option<Option<String>>,
}

/// Loose sanity check: exactly one `@` with something on both sides, no whitespace.
pub fn is_plausible_email(email: &str) -> bool {
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && !domain.contains('@')
        && !email.chars().any(char::is_whitespace)
}

/// Normalize one optional text field: trim, treat empty as clear, enforce a length cap.
fn clean_field(
    value: Option<Option<String>>,
    field: &str,
    max_len: usize,
) -> Result<Option<Option<String>>, ApiError> {
    let Some(inner) = value else {
        return Ok(None);
    };
    let cleaned = inner.as_deref().and_then(crate::utils::non_empty);
    if let Some(text) = &cleaned
        && text.chars().count() > max_len
    {
        return Err(ApiError::validation(format!(
            "{field} must be at most {max_len} characters"
        )));
    }
    Ok(Some(cleaned))
}

impl UpdateProfileBody {
    /// Validate and convert into a data-layer update.
    pub fn into_update(self) -> Result<ProfileUpdate, ApiError> {
        let display_name = clean_field(self.display_name, "displayName", MAX_DISPLAY_NAME_LEN)?;
        let email = clean_field(self.email, "email", MAX_EMAIL_LEN)?;
        let delivery_address =
            clean_field(self.delivery_address, "deliveryAddress", MAX_ADDRESS_LEN)?;

        if let Some(Some(email)) = &email
            && !is_plausible_email(email)
        {
            return Err(ApiError::validation("email address is not valid"));
        }

        Ok(ProfileUpdate {
            display_name,
            email,
            delivery_address,
        })
    }
}

/// `GET /api/account`
pub async fn get_account(AuthUser(user): AuthUser) -> Json<UserResponse> {
    Json(UserResponse::from(&user))
}

/// `PATCH /api/account`
#[instrument(skip_all)]
pub async fn update_account(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Json(body): Json<UpdateProfileBody>,
) -> Result<Json<UserResponse>, ApiError> {
    let update = body.into_update()?;
    let updated = data::users::update_profile(&state.db_pool, user.id, &update)
        .await
        .map_err(|e| db_error("Update profile", e))?;
    info!(user_id = user.id, "Profile updated");
    Ok(Json(UserResponse::from(&updated)))
}

fn default_limit() -> i64 {
    25
}

#[derive(Debug, Deserialize)]
pub struct TransactionsParams {
    #[serde(default = "default_limit")]
    pub limit: i64,
    pub before: Option<i64>,
}

/// Fetch one page of a user's ledger and compute the next cursor.
pub async fn transactions_page(
    state: &AppState,
    user_id: i64,
    params: &TransactionsParams,
) -> Result<TransactionsResponse, ApiError> {
    let limit = params.limit.clamp(1, 100);
    let rows = data::tokens::list_for_user(&state.db_pool, user_id, params.before, limit)
        .await
        .map_err(|e| db_error("List transactions", e))?;
    let next_before = (rows.len() as i64 == limit)
        .then(|| rows.last().map(|r| r.id))
        .flatten();
    Ok(TransactionsResponse {
        transactions: rows.into_iter().map(TransactionResponse::from).collect(),
        next_before,
    })
}

/// `GET /api/account/transactions?limit&before`
pub async fn list_transactions(
    AuthUser(user): AuthUser,
    State(state): State<AppState>,
    Query(params): Query<TransactionsParams>,
) -> Result<Json<TransactionsResponse>, ApiError> {
    transactions_page(&state, user.id, &params).await.map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_null_and_value_are_distinct() {
        let body: UpdateProfileBody =
            serde_json::from_str(r#"{"displayName": "Sam", "email": null}"#).unwrap();
        assert_eq!(body.display_name, Some(Some("Sam".into())));
        assert_eq!(body.email, Some(None));
        assert_eq!(body.delivery_address, None);
    }

    #[test]
    fn empty_strings_clear_fields() {
        let body: UpdateProfileBody =
            serde_json::from_str(r#"{"deliveryAddress": "   "}"#).unwrap();
        let update = body.into_update().unwrap();
        assert_eq!(update.delivery_address, Some(None));
        assert_eq!(update.display_name, None);
    }

    #[test]
    fn long_display_name_is_rejected() {
        let body = UpdateProfileBody {
            display_name: Some(Some("x".repeat(MAX_DISPLAY_NAME_LEN + 1))),
            ..Default::default()
        };
        assert!(body.into_update().is_err());
    }

    #[test]
    fn email_validation() {
        assert!(is_plausible_email("sam@example.com"));
        assert!(!is_plausible_email("sam@"));
        assert!(!is_plausible_email("@example.com"));
        assert!(!is_plausible_email("sam@@example.com"));
        assert!(is_plausible_email("sam@localhost"));
        assert!(!is_plausible_email("sam smith@example.com"));

        let body = UpdateProfileBody {
            email: Some(Some("not-an-email".into())),
            ..Default::default()
        };
        assert!(body.into_update().is_err());
    }
}
