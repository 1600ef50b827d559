//! Fixtures shared by the database-backed integration tests.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{Method, Request, StatusCode, header};
use serde_json::Value;
use sqlx::PgPool;
use tower::ServiceExt;

use storefront::config::{Config, SmsProvider};
use storefront::data;
use storefront::data::enums::{Category, TransactionKind};
use storefront::data::models::{Product, User};
use storefront::data::products::ProductInput;
use storefront::data::tokens::LedgerEntry;
use storefront::sms::{SmsError, SmsSender};
use storefront::state::AppState;
use storefront::web::auth::otp::CODE_LEN;
use storefront::web::create_router;

pub const SECRET: &str = "integration-secret-long-enough-for-hs256";

pub fn test_config() -> Config {
    Config {
        database_url: "postgres://unused".into(),
        port: 0,
        log_level: "debug".into(),
        shutdown_timeout: 1,
        jwt_secret: SECRET.into(),
        jwt_ttl: 3600,
        otp_ttl: 300,
        otp_resend_cooldown: 60,
        otp_hourly_limit: 5,
        otp_max_attempts: 5,
        default_country_code: "1".into(),
        sms_provider: SmsProvider::Log,
        sms_api_url: None,
        sms_api_key: None,
        sms_sender: None,
        admin_phone: None,
        public_origin: None,
        trust_proxy: false,
    }
}

/// Remembers every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingSms {
    pub sent: Mutex<Vec<(String, String)>>,
}

impl RecordingSms {
    /// The code in the most recent message.
    pub fn last_code(&self) -> Option<String> {
        let sent = self.sent.lock().unwrap();
        let (_, body) = sent.last()?;
        body.split_whitespace()
            .map(|word| word.trim_end_matches('.'))
            .find(|word| word.len() == CODE_LEN && word.bytes().all(|b| b.is_ascii_digit()))
            .map(str::to_owned)
    }
}

#[async_trait]
impl SmsSender for RecordingSms {
    async fn send(&self, to: &str, body: &str) -> Result<(), SmsError> {
        self.sent.lock().unwrap().push((to.to_owned(), body.to_owned()));
        Ok(())
    }
}

/// A gateway that rejects everything.
#[derive(Debug, Default)]
pub struct FailingSms;

#[async_trait]
impl SmsSender for FailingSms {
    async fn send(&self, _to: &str, _body: &str) -> Result<(), SmsError> {
        Err(SmsError::Rejected {
            status: 503,
            body: "gateway down".into(),
        })
    }
}

pub fn state_with(pool: &PgPool, sms: Arc<dyn SmsSender>) -> AppState {
    AppState::new(&test_config(), pool.clone(), sms)
}

pub fn router_with(pool: &PgPool, sms: Arc<dyn SmsSender>) -> (Router, AppState) {
    let state = state_with(pool, sms);
    (create_router(state.clone()), state)
}

/// Send one request and decode the JSON body (`Null` when empty).
pub async fn call(
    router: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

/// A subscriber with `balance` tokens credited through the ledger.
pub async fn subscriber(pool: &PgPool, phone: &str, balance: i64) -> User {
    let user = data::users::upsert_on_login(pool, phone).await.unwrap();
    if balance > 0 {
        let mut conn = pool.acquire().await.unwrap();
        data::tokens::apply(
            &mut *conn,
            LedgerEntry {
                user_id: user.id,
                amount: balance,
                kind: TransactionKind::Credit,
                order_id: None,
                actor_id: None,
                note: Some("test credit"),
            },
        )
        .await
        .unwrap();
    }
    data::users::get_user(pool, user.id).await.unwrap().unwrap()
}

pub async fn admin(pool: &PgPool, phone: &str) -> User {
    data::users::ensure_seed_admin(pool, phone).await.unwrap()
}

pub fn token_for(state: &AppState, user: &User) -> String {
    state.jwt.issue(user).unwrap().token
}

pub async fn product(pool: &PgPool, slug: &str, price_tokens: i64, stock: i32) -> Product {
    let mut conn = pool.acquire().await.unwrap();
    data::products::create(
        &mut *conn,
        &ProductInput {
            slug: slug.to_owned(),
            name: slug.replace('-', " "),
            description: String::new(),
            category: Category::Flower,
            strain: None,
            thc_percent: Some(20.0),
            cbd_percent: None,
            price_tokens,
            stock,
            image_url: None,
            is_active: true,
        },
    )
    .await
    .unwrap()
}

pub async fn balance(pool: &PgPool, user_id: i64) -> i64 {
    sqlx::query_scalar("SELECT token_balance FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

/// Cached balance must equal the sum of the user's ledger rows.
pub async fn assert_ledger_matches(pool: &PgPool, user_id: i64) {
    let (cached, summed): (i64, i64) = sqlx::query_as(
        r#"
        SELECT u.token_balance,
               COALESCE((SELECT SUM(amount) FROM token_transactions WHERE user_id = u.id), 0)::BIGINT
        FROM users u WHERE u.id = $1
        "#,
    )
    .bind(user_id)
    .fetch_one(pool)
    .await
    .unwrap();
    assert_eq!(cached, summed, "balance drifted from ledger for user {user_id}");
}

pub async fn stock(pool: &PgPool, product_id: i64) -> i32 {
    sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
        .bind(product_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

pub async fn count(pool: &PgPool, sql: &str) -> i64 {
    sqlx::query_scalar(sql).fetch_one(pool).await.unwrap()
}
