//! Catalog queries and admin product management.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::{PgConnection, PgPool};

use crate::data::enums::{Category, Strain};
use crate::data::models::Product;
use crate::data::users::escape_like;

pub const DEFAULT_PER_PAGE: i64 = 24;
pub const MAX_PER_PAGE: i64 = 100;
/// Pages past this are clamped; the offset stays far below `i64::MAX`.
pub const MAX_PAGE: i64 = 10_000;

/// Domain errors for product management.
#[derive(Debug, thiserror::Error)]
pub enum ProductError {
    #[error("product not found")]
    NoSuchProduct,
    #[error("a product with slug {0:?} already exists")]
    DuplicateSlug(String),
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ProductSort {
    #[default]
    Newest,
    PriceAsc,
    PriceDesc,
    Name,
}

impl ProductSort {
    fn order_by(self) -> &'static str {
        match self {
            ProductSort::Newest => "created_at DESC, id DESC",
            ProductSort::PriceAsc => "price_tokens ASC, id ASC",
            ProductSort::PriceDesc => "price_tokens DESC, id ASC",
            ProductSort::Name => "lower(name) ASC, id ASC",
        }
    }
}

/// Storefront listing filters. Only active products are ever returned.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductFilter {
    pub category: Option<Category>,
    pub strain: Option<Strain>,
    pub q: Option<String>,
    #[serde(default)]
    pub in_stock: bool,
    #[serde(default)]
    pub sort: ProductSort,
    pub page: Option<i64>,
    pub per_page: Option<i64>,
}

impl ProductFilter {
    /// Page number (1-based) and page size after clamping.
    pub fn paging(&self) -> (i64, i64) {
        let page = self.page.unwrap_or(1).clamp(1, MAX_PAGE);
        let per_page = self
            .per_page
            .unwrap_or(DEFAULT_PER_PAGE)
            .clamp(1, MAX_PER_PAGE);
        (page, per_page)
    }

    /// Row offset of the first product on the requested page.
    pub fn offset(&self) -> i64 {
        let (page, per_page) = self.paging();
        (page - 1).saturating_mul(per_page)
    }

    fn pattern(&self) -> Option<String> {
        self.q
            .as_deref()
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .map(|q| format!("%{}%", escape_like(q)))
    }
}

/// Fields for creating or replacing a product.
#[derive(Debug, Clone)]
pub struct ProductInput {
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
}

const FILTER_WHERE: &str = "is_active \
       AND ($1::text IS NULL OR category = $1) \
       AND ($2::text IS NULL OR strain = $2) \
       AND ($3::text IS NULL OR name ILIKE $3 OR description ILIKE $3) \
       AND (NOT $4 OR stock > 0)";

/// One page of active products plus the total match count.
pub async fn list_active(pool: &PgPool, filter: &ProductFilter) -> Result<(Vec<Product>, i64)> {
    let (_, per_page) = filter.paging();
    let pattern = filter.pattern();

    let total: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM products WHERE {FILTER_WHERE}"))
        .bind(filter.category)
        .bind(filter.strain)
        .bind(pattern.as_deref())
        .bind(filter.in_stock)
        .fetch_one(pool)
        .await
        .context("failed to count products")?;

    let products = sqlx::query_as::<_, Product>(&format!(
        "SELECT * FROM products WHERE {FILTER_WHERE} ORDER BY {} LIMIT $5 OFFSET $6",
        filter.sort.order_by()
    ))
    .bind(filter.category)
    .bind(filter.strain)
    .bind(pattern.as_deref())
    .bind(filter.in_stock)
    .bind(per_page)
    .bind(filter.offset())
    .fetch_all(pool)
    .await
    .context("failed to list products")?;

    Ok((products, total))
}

pub async fn get_active_by_slug(pool: &PgPool, slug: &str) -> Result<Option<Product>> {
    let product =
        sqlx::query_as::<_, Product>("SELECT * FROM products WHERE slug = $1 AND is_active")
            .bind(slug)
            .fetch_optional(pool)
            .await?;
    Ok(product)
}

/// Active product counts per category, including empty categories.
pub async fn category_counts(pool: &PgPool) -> Result<Vec<(Category, i64)>> {
    let rows: Vec<(Category, i64)> = sqlx::query_as(
        "SELECT category, COUNT(*) FROM products WHERE is_active GROUP BY category",
    )
    .fetch_all(pool)
    .await?;

    Ok(Category::ALL
        .iter()
        .map(|category| {
            let count = rows
                .iter()
                .find(|(c, _)| c == category)
                .map_or(0, |(_, n)| *n);
            (*category, count)
        })
        .collect())
}

/// Every product, active or not, for the admin panel.
pub async fn list_all(pool: &PgPool) -> Result<Vec<Product>> {
    let products = sqlx::query_as::<_, Product>("SELECT * FROM products ORDER BY created_at DESC")
        .fetch_all(pool)
        .await?;
    Ok(products)
}

fn map_unique_violation(e: sqlx::Error, slug: &str) -> anyhow::Error {
    if let sqlx::Error::Database(ref db) = e
        && db.is_unique_violation()
    {
        return ProductError::DuplicateSlug(slug.to_owned()).into();
    }
    anyhow::Error::from(e).context("failed to write product")
}

pub async fn create(conn: &mut PgConnection, input: &ProductInput) -> Result<Product> {
    sqlx::query_as::<_, Product>(
        r#"
        INSERT INTO products
            (slug, name, description, category, strain, thc_percent, cbd_percent,
             price_tokens, stock, image_url, is_active)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        RETURNING *
        "#,
    )
    .bind(&input.slug)
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.category)
    .bind(input.strain)
    .bind(input.thc_percent)
    .bind(input.cbd_percent)
    .bind(input.price_tokens)
    .bind(input.stock)
    .bind(&input.image_url)
    .bind(input.is_active)
    .fetch_one(&mut *conn)
    .await
    .map_err(|e| map_unique_violation(e, &input.slug))
}

pub async fn update(conn: &mut PgConnection, id: i64, input: &ProductInput) -> Result<Product> {
    sqlx::query_as::<_, Product>(
        r#"
        UPDATE products SET
            slug = $2, name = $3, description = $4, category = $5, strain = $6,
            thc_percent = $7, cbd_percent = $8, price_tokens = $9, stock = $10,
            image_url = $11, is_active = $12, updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(&input.slug)
    .bind(&input.name)
    .bind(&input.description)
    .bind(input.category)
    .bind(input.strain)
    .bind(input.thc_percent)
    .bind(input.cbd_percent)
    .bind(input.price_tokens)
    .bind(input.stock)
    .bind(&input.image_url)
    .bind(input.is_active)
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_unique_violation(e, &input.slug))?
    .ok_or_else(|| ProductError::NoSuchProduct.into())
}

pub async fn set_stock(conn: &mut PgConnection, id: i64, stock: i32) -> Result<Product> {
    sqlx::query_as::<_, Product>(
        "UPDATE products SET stock = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .bind(stock)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ProductError::NoSuchProduct.into())
}

/// Hide a product from the storefront. Rows are kept for order history.
pub async fn deactivate(conn: &mut PgConnection, id: i64) -> Result<Product> {
    sqlx::query_as::<_, Product>(
        "UPDATE products SET is_active = FALSE, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?
    .ok_or_else(|| ProductError::NoSuchProduct.into())
}

pub async fn count_active(pool: &PgPool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products WHERE is_active")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paging_defaults_and_clamps() {
        let filter = ProductFilter::default();
        assert_eq!(filter.paging(), (1, DEFAULT_PER_PAGE));

        let filter = ProductFilter {
            page: Some(0),
            per_page: Some(1000),
            ..Default::default()
        };
        assert_eq!(filter.paging(), (1, MAX_PER_PAGE));
    }

    #[test]
    fn huge_page_number_is_clamped() {
        let filter = ProductFilter {
            page: Some(i64::MAX),
            per_page: Some(i64::MAX),
            ..Default::default()
        };
        assert_eq!(filter.paging(), (MAX_PAGE, MAX_PER_PAGE));
        assert_eq!(filter.offset(), (MAX_PAGE - 1) * MAX_PER_PAGE);

        let filter = ProductFilter {
            page: Some(3),
            per_page: Some(10),
            ..Default::default()
        };
        assert_eq!(filter.offset(), 20);
    }

    #[test]
    fn blank_query_is_ignored() {
        let filter = ProductFilter {
            q: Some("   ".into()),
            ..Default::default()
        };
        assert_eq!(filter.pattern(), None);

        let filter = ProductFilter {
            q: Some(" 100% ".into()),
            ..Default::default()
        };
        assert_eq!(filter.pattern().as_deref(), Some("%100\\%%"));
    }

    #[test]
    fn sort_parses_snake_case() {
        let sort: ProductSort = serde_json::from_str("\"price_desc\"").unwrap();
        assert_eq!(sort, ProductSort::PriceDesc);
    }
}
