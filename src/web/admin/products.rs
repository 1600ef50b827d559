//! Admin catalog management.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, instrument};
use ts_rs::TS;

use crate::data;
use crate::data::audit::AuditEvent;
use crate::data::enums::{Category, Strain};
use crate::data::models::Product;
use crate::data::products::ProductInput;
use crate::state::AppState;
use crate::utils::{non_empty, slugify};
use crate::web::admin::{audit, begin, commit};
use crate::web::auth::extractors::AdminUser;
use crate::web::error::{ApiError, db_error, domain_error};

const MAX_NAME_LEN: usize = 120;
const MAX_DESCRIPTION_LEN: usize = 4000;

/// Admin view of a product, including inactive rows.
#[derive(Debug, Clone, Serialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct AdminProductResponse {
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
    pub image_url: Option<String>,
    pub is_active: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Product> for AdminProductResponse {
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
            image_url: p.image_url,
            is_active: p.is_active,
            created_at: p.created_at.to_rfc3339(),
            updated_at: p.updated_at.to_rfc3339(),
        }
    }
}

/// Create/replace payload. `slug` is derived from `name` when omitted.
#[derive(Debug, Clone, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct ProductBody {
    #[ts(optional)]
    pub slug: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub category: Category,
    #[ts(optional)]
    pub strain: Option<Strain>,
    #[ts(optional)]
    pub thc_percent: Option<f32>,
    #[ts(optional)]
    pub cbd_percent: Option<f32>,
    #[ts(type = "number")]
    pub price_tokens: i64,
    #[serde(default)]
    pub stock: i32,
    #[ts(optional)]
    pub image_url: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

fn check_percent(field: &str, value: Option<f32>) -> Result<(), ApiError> {
    match value {
        Some(v) if !(0.0..=100.0).contains(&v) => Err(ApiError::validation(format!(
            "{field} must be between 0 and 100"
        ))),
        _ => Ok(()),
    }
}

impl ProductBody {
    /// Validate and normalize into a `ProductInput`.
    pub fn into_input(self) -> Result<ProductInput, ApiError> {
        let name = non_empty(&self.name).ok_or_else(|| ApiError::validation("name is required"))?;
        if name.chars().count() > MAX_NAME_LEN {
            return Err(ApiError::validation(format!(
                "name must be at most {MAX_NAME_LEN} characters"
            )));
        }
        let description = self.description.trim().to_string();
        if description.chars().count() > MAX_DESCRIPTION_LEN {
            return Err(ApiError::validation(format!(
                "description must be at most {MAX_DESCRIPTION_LEN} characters"
            )));
        }

        let slug = match self.slug.as_deref().and_then(non_empty) {
            Some(raw) => slugify(&raw),
            None => slugify(&name),
        }
        .ok_or_else(|| ApiError::validation("slug must contain letters or digits"))?;

        if self.price_tokens <= 0 {
            return Err(ApiError::validation("priceTokens must be positive"));
        }
        if self.stock < 0 {
            return Err(ApiError::validation("stock cannot be negative"));
        }
        check_percent("thcPercent", self.thc_percent)?;
        check_percent("cbdPercent", self.cbd_percent)?;

        let image_url = self.image_url.as_deref().and_then(non_empty);
        if let Some(ref url) = image_url
            && url::Url::parse(url).is_err()
            && !url.starts_with('/')
        {
            return Err(ApiError::validation("imageUrl must be an absolute URL or path"));
        }

        Ok(ProductInput {
            slug,
            name,
            description,
            category: self.category,
            strain: self.strain,
            thc_percent: self.thc_percent,
            cbd_percent: self.cbd_percent,
            price_tokens: self.price_tokens,
            stock: self.stock,
            image_url,
            is_active: self.is_active,
        })
    }
}

/// `GET /api/admin/products`
pub async fn list_products(
    AdminUser(_admin): AdminUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<AdminProductResponse>>, ApiError> {
    let products = data::products::list_all(&state.db_pool)
        .await
        .map_err(|e| db_error("List products", e))?;
    Ok(Json(products.into_iter().map(Into::into).collect()))
}

/// `POST /api/admin/products`
#[instrument(skip_all)]
pub async fn create_product(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Json(body): Json<ProductBody>,
) -> Result<(StatusCode, Json<AdminProductResponse>), ApiError> {
    let input = body.into_input()?;
    let mut tx = begin(&state).await?;
    let product = data::products::create(&mut *tx, &input)
        .await
        .map_err(|e| domain_error("Create product", e))?;

    audit(
        &mut *tx,
        AuditEvent {
            actor_id: admin.id,
            action: "product.create",
            target_type: "product",
            target_id: product.id.to_string(),
            details: json!({ "slug": product.slug, "priceTokens": product.price_tokens }),
        },
    )
    .await?;
    commit(tx).await?;
    info!(product_id = product.id, slug = %product.slug, "Created product");

    Ok((StatusCode::CREATED, Json(product.into())))
}

/// `PUT /api/admin/products/{id}`
#[instrument(skip_all)]
pub async fn update_product(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
    Json(body): Json<ProductBody>,
) -> Result<Json<AdminProductResponse>, ApiError> {
    let input = body.into_input()?;
    let mut tx = begin(&state).await?;
    let product = data::products::update(&mut *tx, product_id, &input)
        .await
        .map_err(|e| domain_error("Update product", e))?;

    audit(
        &mut *tx,
        AuditEvent {
            actor_id: admin.id,
            action: "product.update",
            target_type: "product",
            target_id: product_id.to_string(),
            details: json!({
                "slug": product.slug,
                "priceTokens": product.price_tokens,
                "stock": product.stock,
                "isActive": product.is_active,
            }),
        },
    )
    .await?;
    commit(tx).await?;

    Ok(Json(product.into()))
}

#[derive(Debug, Deserialize, TS)]
#[ts(export)]
pub struct SetStockBody {
    pub stock: i32,
}

/// `PUT /api/admin/products/{id}/stock`
#[instrument(skip_all)]
pub async fn set_product_stock(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
    Json(body): Json<SetStockBody>,
) -> Result<Json<AdminProductResponse>, ApiError> {
    if body.stock < 0 {
        return Err(ApiError::validation("stock cannot be negative"));
    }
    let mut tx = begin(&state).await?;
    let product = data::products::set_stock(&mut *tx, product_id, body.stock)
        .await
        .map_err(|e| domain_error("Set stock", e))?;

    audit(
        &mut *tx,
        AuditEvent {
            actor_id: admin.id,
            action: "product.set_stock",
            target_type: "product",
            target_id: product_id.to_string(),
            details: json!({ "stock": body.stock }),
        },
    )
    .await?;
    commit(tx).await?;

    Ok(Json(product.into()))
}

/// `DELETE /api/admin/products/{id}` -- Soft delete; the row stays for order history.
#[instrument(skip_all)]
pub async fn deactivate_product(
    AdminUser(admin): AdminUser,
    State(state): State<AppState>,
    Path(product_id): Path<i64>,
) -> Result<Json<AdminProductResponse>, ApiError> {
    let mut tx = begin(&state).await?;
    let product = data::products::deactivate(&mut *tx, product_id)
        .await
        .map_err(|e| domain_error("Deactivate product", e))?;

    audit(
        &mut *tx,
        AuditEvent {
            actor_id: admin.id,
            action: "product.deactivate",
            target_type: "product",
            target_id: product_id.to_string(),
            details: json!({ "slug": product.slug }),
        },
    )
    .await?;
    commit(tx).await?;
    info!(product_id, "Deactivated product");

    Ok(Json(product.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body() -> ProductBody {
        serde_json::from_value(json!({
            "name": "  Blue Dream 3.5g ",
            "category": "flower",
            "strain": "hybrid",
            "thcPercent": 21.5,
            "priceTokens": 45,
            "stock": 10
        }))
        .unwrap()
    }

    #[test]
    fn slug_derived_from_name() {
        let input = body().into_input().unwrap();
        assert_eq!(input.slug, "blue-dream-3-5g");
        assert_eq!(input.name, "Blue Dream 3.5g");
        assert!(input.is_active);
    }

    #[test]
    fn explicit_slug_is_normalized() {
        let mut b = body();
        b.slug = Some("Custom SLUG!".into());
        assert_eq!(b.into_input().unwrap().slug, "custom-slug");
    }

    #[test]
    fn rejects_bad_numbers() {
        let mut b = body();
        b.price_tokens = 0;
        assert!(b.into_input().is_err());

        let mut b = body();
        b.stock = -1;
        assert!(b.into_input().is_err());

        let mut b = body();
        b.thc_percent = Some(101.0);
        assert!(b.into_input().is_err());
    }

    #[test]
    fn rejects_blank_name_and_bad_image() {
        let mut b = body();
        b.name = "   ".into();
        assert!(b.into_input().is_err());

        let mut b = body();
        b.image_url = Some("not a url".into());
        assert!(b.into_input().is_err());

        let mut b = body();
        b.image_url = Some("/img/blue.png".into());
        assert!(b.into_input().is_ok());
    }
}
