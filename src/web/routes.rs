//! Web API router construction and shared response utilities.

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    response::{IntoResponse, Json, Response},
    routing::{get, post, put},
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{
    compression::CompressionLayer,
    cors::{AllowOrigin, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::warn;

use crate::state::AppState;
use crate::web::error::ApiError;
use crate::web::middleware::rate_limit::{RateLimitLayer, RateLimitState};
use crate::web::middleware::request_id::RequestIdLayer;
use crate::web::middleware::security_headers::SecurityHeadersLayer;
use crate::web::{account, admin, auth, orders, products, status};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Cache-Control presets.
pub mod cache {
    /// Public catalog reads.
    pub const CATALOG: &str = "public, max-age=30, stale-while-revalidate=60";
    /// Anything tied to a session or the admin panel.
    pub const PRIVATE: &str = "private, no-store, must-revalidate";
}

/// Wraps a JSON response with a `Cache-Control` header.
pub fn with_cache_control<T: serde::Serialize>(value: T, header: &'static str) -> Response {
    let mut response = Json(value).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static(header));
    response
}

async fn no_store(mut resp: Response) -> Response {
    resp.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static(cache::PRIVATE),
    );
    resp
}

fn cors_layer(origin: Option<&str>) -> Option<CorsLayer> {
    let origin = origin?;
    let value = match HeaderValue::from_str(origin.trim_end_matches('/')) {
        Ok(value) => value,
        Err(e) => {
            warn!(origin, error = %e, "Ignoring unusable PUBLIC_ORIGIN for CORS");
            return None;
        }
    };
    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::exact(value))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
            .max_age(Duration::from_secs(60 * 60)),
    )
}

/// Creates the web server router.
pub fn create_router(app_state: AppState) -> Router {
    let public_router = Router::new()
        .route("/health", get(status::health))
        .route("/status", get(status::status))
        .route("/products", get(products::list_products))
        .route("/products/{slug}", get(products::get_product))
        .route("/categories", get(products::list_categories));

    let auth_router = Router::new()
        .route("/auth/otp/request", post(auth::request_code))
        .route("/auth/otp/verify", post(auth::verify_code))
        .route("/auth/me", get(auth::me))
        .route("/auth/logout", post(auth::logout))
        .layer(axum::middleware::map_response(no_store));

    let account_router = Router::new()
        .route(
            "/account",
            get(account::get_account).patch(account::update_account),
        )
        .route("/account/transactions", get(account::list_transactions))
        .route("/orders", get(orders::list_orders).post(orders::checkout))
        .route("/orders/{order_number}", get(orders::get_order))
        .route("/orders/{order_number}/cancel", post(orders::cancel_order))
        .layer(axum::middleware::map_response(no_store));

    let admin_router = Router::new()
        .route("/admin/status", get(admin::admin_status))
        .route("/admin/audit-log", get(admin::list_audit_log))
        .route("/admin/users", get(admin::users::list_users))
        .route("/admin/users/{id}/role", put(admin::users::set_user_role))
        .route("/admin/users/{id}/active", put(admin::users::set_user_active))
        .route("/admin/users/{id}/tokens", post(admin::users::adjust_tokens))
        .route(
            "/admin/users/{id}/transactions",
            get(admin::users::list_user_transactions),
        )
        .route(
            "/admin/products",
            get(admin::products::list_products).post(admin::products::create_product),
        )
        .route(
            "/admin/products/{id}",
            put(admin::products::update_product).delete(admin::products::deactivate_product),
        )
        .route(
            "/admin/products/{id}/stock",
            put(admin::products::set_product_stock),
        )
        .route("/admin/orders", get(admin::orders::list_orders))
        .route(
            "/admin/orders/{id}/status",
            put(admin::orders::set_order_status),
        )
        .layer(axum::middleware::map_response(no_store));

    let cors = cors_layer(app_state.public_origin.as_deref());
    let trust_proxy = app_state.trust_proxy;

    let api_router = Router::new()
        .merge(public_router)
        .merge(auth_router)
        .merge(account_router)
        .merge(admin_router);

    let router = Router::new()
        .nest("/api", api_router)
        .fallback(not_found)
        .with_state(app_state);

    let router = match cors {
        Some(cors) => router.layer(cors),
        None => router,
    };

    router.layer((
        // Outermost: per-request ID span + severity-proportional response logging.
        RequestIdLayer,
        SecurityHeadersLayer,
        CompressionLayer::new()
            .br(true)
            .gzip(true)
            .quality(tower_http::CompressionLevel::Fastest),
        TimeoutLayer::new(REQUEST_TIMEOUT),
        // Innermost, so rejections are built against the router's own body type.
        RateLimitLayer::new(Arc::new(RateLimitState::new()), trust_proxy),
    ))
}

async fn not_found() -> ApiError {
    ApiError::not_found("No such endpoint")
}
