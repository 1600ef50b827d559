//! Public catalog handlers.

use axum::extract::{Path, Query, State};
use axum::response::Response;
use serde::Serialize;
use ts_rs::TS;

use crate::data;
use crate::data::enums::{Category, Strain};
use crate::data::models::Product;
use crate::data::products::ProductFilter;
use crate::state::AppState;
use crate::web::error::{ApiError, OptionNotFoundExt, db_error};
use crate::web::routes::{cache, with_cache_control};

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProductResponse {
    #[ts(type = "number")]
    pub id: i64,
    pub slug: String,
    pub name: String,
    pub description: String,
    pub category: Category,
    pub strain: Option<Strain>,
    pub thc_percent: Option<f32>,
    pub cbd_percent: Option<f32>,
    #[ts(type = "number")]
    pub price_tokens: i64,
    pub stock: i32,
    pub in_stock: bool,
    pub image_url: Option<String>,
}

impl From<Product> for ProductResponse {
    fn from(p: Product) -> Self {
        Self {
            id: p.id,
            slug: p.slug,
            name: p.name,
            description: p.description,
            category: p.category,
            strain: p.strain,
            thc_percent: p.thc_percent,
            cbd_percent: p.cbd_percent,
            price_tokens: p.price_tokens,
            stock: p.stock,
            in_stock: p.stock > 0,
            image_url: p.image_url,
        }
    }
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProductListResponse {
    pub products: Vec<ProductResponse>,
    #[ts(type = "number")]
    pub total: i64,
    #[ts(type = "number")]
    pub page: i64,
    #[ts(type = "number")]
    pub per_page: i64,
}

#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct CategoryCount {
    pub category: Category,
    #[ts(type = "number")]
    pub count: i64,
}

/// `GET /api/products`
pub async fn list_products(
    State(state): State<AppState>,
    Query(filter): Query<ProductFilter>,
) -> Result<Response, ApiError> {
    let (page, per_page) = filter.paging();
    let (products, total) = data::products::list_active(&state.db_pool, &filter)
        .await
        .map_err(|e| db_error("List products", e))?;

    Ok(with_cache_control(
        ProductListResponse {
            products: products.into_iter().map(ProductResponse::from).collect(),
            total,
            page,
            per_page,
        },
        cache::CATALOG,
    ))
}

/// `GET /api/products/{slug}`
pub async fn get_product(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let product = data::products::get_active_by_slug(&state.db_pool, &slug)
        .await
        .map_err(|e| db_error("Get product", e))?
        .or_not_found("Product", &slug)?;
    Ok(with_cache_control(
        ProductResponse::from(product),
        cache::CATALOG,
    ))
}

/// `GET /api/categories`
pub async fn list_categories(State(state): State<AppState>) -> Result<Response, ApiError> {
    let counts = data::products::category_counts(&state.db_pool)
        .await
        .map_err(|e| db_error("Category counts", e))?;
    let body: Vec<CategoryCount> = counts
        .into_iter()
        .map(|(category, count)| CategoryCount { category, count })
        .collect();
    Ok(with_cache_control(body, cache::CATALOG))
}
