//! Row types mapped from database tables.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::data::enums::{Category, OrderStatus, Role, Strain, TransactionKind};

#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: i64,
    pub phone: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub delivery_address: Option<String>,
    pub role: Role,
    pub is_active: bool,
    pub token_balance: i64,
    pub token_version: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OtpCode {
    pub id: i64,
    pub phone: String,
    pub code_hash: String,
    pub attempts: i32,
    pub expires_at: DateTime<Utc>,
    pub consumed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Product {
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub category: Category,
    pub strain: Option<Strain>,
    pub thc_percent: Option<f32>,
    pub cbd_percent: Option<f32>,
    pub price_tokens: i64,
    pub stock: i32,
    pub image_url: Option<String>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct Order {
    pub id: i64,
    pub order_number: String,
    pub user_id: i64,
    pub status: OrderStatus,
    pub total_tokens: i64,
    pub delivery_address: String,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub product_name: String,
    pub unit_price_tokens: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, FromRow)]
pub struct TokenTransaction {
    pub id: i64,
    pub user_id: i64,
    pub amount: i64,
    pub balance_after: i64,
    pub kind: TransactionKind,
    pub order_id: Option<i64>,
    pub actor_id: Option<i64>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// An admin audit row joined with the acting admin's phone.
#[derive(Debug, Clone, FromRow)]
pub struct AuditRow {
    pub id: i64,
    pub actor_id: i64,
    pub actor_phone: Option<String>,
    pub action: String,
    pub target_type: String,
    pub target_id: String,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}
