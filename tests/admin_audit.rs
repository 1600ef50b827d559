//! Admin mutations and their audit trail against a real database.

mod helpers;

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use serde_json::json;
use sqlx::PgPool;

use helpers::{
    admin, assert_ledger_matches, balance, call, count, product, router_with, stock, subscriber,
    token_for,
};
use storefront::data::orders::{CartLine, CheckoutRequest, checkout};
use storefront::sms::LogSmsSender;

async fn audit_actions(pool: &PgPool) -> Vec<String> {
    sqlx::query_scalar("SELECT action FROM admin_audit ORDER BY id")
        .fetch_all(pool)
        .await
        .unwrap()
}

#[sqlx::test]
async fn product_writes_are_audited_and_duplicates_conflict(pool: PgPool) {
    let boss = admin(&pool, "+15552000001").await;
    let (router, state) = router_with(&pool, Arc::new(LogSmsSender));
    let token = token_for(&state, &boss);
    let body = json!({
        "name": "Blue Dream 3.5g",
        "category": "flower",
        "priceTokens": 45,
        "stock": 12,
    });

    let (status, created) = call(
        &router,
        Method::POST,
        "/api/admin/products",
        Some(&token),
        Some(body.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["slug"], "blue-dream-3-5g");

    let (status, err) = call(
        &router,
        Method::POST,
        "/api/admin/products",
        Some(&token),
        Some(body),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(err["code"], "CONFLICT");

    assert_eq!(count(&pool, "SELECT COUNT(*) FROM products").await, 1);
    assert_eq!(audit_actions(&pool).await, ["product.create"]);
}

#[sqlx::test]
async fn mutation_is_rolled_back_when_audit_insert_fails(pool: PgPool) {
    let boss = admin(&pool, "+15552000002").await;
    let item = product(&pool, "pineapple-express", 30, 8).await;
    let (router, state) = router_with(&pool, Arc::new(LogSmsSender));
    let token = token_for(&state, &boss);

    sqlx::query("ALTER TABLE admin_audit RENAME TO admin_audit_offline")
        .execute(&pool)
        .await
        .unwrap();

    let (status, body) = call(
        &router,
        Method::PUT,
        &format!("/api/admin/products/{}/stock", item.id),
        Some(&token),
        Some(json!({ "stock": 99 })),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "INTERNAL");
    assert_eq!(stock(&pool, item.id).await, 8);
}

#[sqlx::test]
async fn token_credit_updates_ledger_and_audit(pool: PgPool) {
    let boss = admin(&pool, "+15552000003").await;
    let member = subscriber(&pool, "+15552000004", 0).await;
    let (router, state) = router_with(&pool, Arc::new(LogSmsSender));
    let token = token_for(&state, &boss);
    let uri = format!("/api/admin/users/{}/tokens", member.id);

    let (status, body) = call(
        &router,
        Method::POST,
        &uri,
        Some(&token),
        Some(json!({ "amount": 200, "kind": "credit", "note": "welcome bonus" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["balance"], 200);
    assert_eq!(balance(&pool, member.id).await, 200);
    assert_ledger_matches(&pool, member.id).await;

    // Purchases only come from checkout.
    let (status, _) = call(
        &router,
        Method::POST,
        &uri,
        Some(&token),
        Some(json!({ "amount": -20, "kind": "purchase" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // An overdrawing correction is refused and leaves no trace.
    let (status, body) = call(
        &router,
        Method::POST,
        &uri,
        Some(&token),
        Some(json!({ "amount": -500, "kind": "adjustment" })),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["code"], "INSUFFICIENT_BALANCE");

    assert_eq!(audit_actions(&pool).await, ["tokens.adjust"]);
    assert_eq!(balance(&pool, member.id).await, 200);
}

#[sqlx::test]
async fn admin_cancel_refunds_and_audits_once(pool: PgPool) {
    let boss = admin(&pool, "+15552000005").await;
    let member = subscriber(&pool, "+15552000006", 400).await;
    let item = product(&pool, "girl-scout-cookies", 100, 3).await;
    let placed = checkout(
        &pool,
        CheckoutRequest {
            user_id: member.id,
            lines: vec![CartLine {
                product_id: item.id,
                quantity: 2,
            }],
            delivery_address: "7 Oak Ave".into(),
            note: None,
        },
    )
    .await
    .unwrap();
    let (router, state) = router_with(&pool, Arc::new(LogSmsSender));
    let token = token_for(&state, &boss);
    let uri = format!("/api/admin/orders/{}/status", placed.order.id);

    let (status, body) = call(
        &router,
        Method::PUT,
        &uri,
        Some(&token),
        Some(json!({ "status": "cancelled" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");
    assert_eq!(balance(&pool, member.id).await, 400);
    assert_eq!(stock(&pool, item.id).await, 3);
    assert_ledger_matches(&pool, member.id).await;

    let (status, _) = call(
        &router,
        Method::PUT,
        &uri,
        Some(&token),
        Some(json!({ "status": "delivered" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    assert_eq!(audit_actions(&pool).await, ["order.set_status"]);
}

#[sqlx::test]
async fn subscribers_cannot_reach_admin_endpoints(pool: PgPool) {
    let member = subscriber(&pool, "+15552000007", 0).await;
    let (router, state) = router_with(&pool, Arc::new(LogSmsSender));
    let token = token_for(&state, &member);

    let (status, body) = call(&router, Method::GET, "/api/admin/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
}
