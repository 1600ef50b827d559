//! Checkout and order lifecycle.
//!
//! Checkout runs in a single transaction: product rows are locked, stock and
//! balance are checked, the order and its line snapshots are written, stock is
//! decremented and the purchase is debited from the ledger. Any failure rolls
//! the whole thing back.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};
use tracing::info;

use crate::data::enums::{OrderStatus, TransactionKind};
use crate::data::models::{Order, OrderItem, Product};
use crate::data::tokens::{self, LedgerEntry};
use crate::utils::log_if_slow;

/// Most distinct products allowed in one order.
pub const MAX_LINES: usize = 50;
/// Most units of a single product allowed in one order.
pub const MAX_QUANTITY: i32 = 99;

const SLOW_CHECKOUT: Duration = Duration::from_millis(750);

const ORDER_ALPHABET: [char; 32] = [
    '2', '3', '4', '5', '6', '7', '8', '9', 'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'J', 'K',
    'L', 'M', 'N', 'P', 'Q', 'R', 'S', 'T', 'U', 'V', 'W', 'X', 'Y', 'Z',
];

/// Domain errors raised while placing an order.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CheckoutError {
    #[error("cart is empty")]
    EmptyCart,
    #[error("too many distinct products (max 50)")]
    TooManyLines,
    #[error("quantity for product {product_id} must be between 1 and 99")]
    BadQuantity { product_id: i64 },
    #[error("product {0} not found")]
    UnknownProduct(i64),
    #[error("product {0} is not available")]
    ProductUnavailable(i64),
    #[error("only {available} of product {product_id} in stock")]
    InsufficientStock { product_id: i64, available: i32 },
    #[error("order total overflows")]
    TotalOverflow,
    #[error("a delivery address is required")]
    MissingAddress,
}

/// Domain errors for status changes on existing orders.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("order not found")]
    NoSuchOrder,
    #[error("cannot move order from {from} to {to}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },
}

/// One requested cart line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CartLine {
    pub product_id: i64,
    pub quantity: i32,
}

/// Everything needed to place an order.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: i64,
    pub lines: Vec<CartLine>,
    pub delivery_address: String,
    pub note: Option<String>,
}

/// An order with its lines.
#[derive(Debug, Clone)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// Merge duplicate products and validate line counts and quantities.
///
/// The result is ordered by product id so row locks are always taken in the
/// same order.
pub fn merge_lines(lines: &[CartLine]) -> Result<Vec<CartLine>, CheckoutError> {
    if lines.is_empty() {
        return Err(CheckoutError::EmptyCart);
    }

    let mut merged: BTreeMap<i64, i32> = BTreeMap::new();
    for line in lines {
        if line.quantity < 1 {
            return Err(CheckoutError::BadQuantity {
                product_id: line.product_id,
            });
        }
        let qty = merged.entry(line.product_id).or_insert(0);
        *qty = qty.saturating_add(line.quantity);
    }

    if merged.len() > MAX_LINES {
        return Err(CheckoutError::TooManyLines);
    }

    merged
        .into_iter()
        .map(|(product_id, quantity)| {
            if quantity > MAX_QUANTITY {
                Err(CheckoutError::BadQuantity { product_id })
            } else {
                Ok(CartLine {
                    product_id,
                    quantity,
                })
            }
        })
        .collect()
}

/// Check availability of every line against locked product rows and return
/// the order total.
pub fn price_lines(lines: &[CartLine], products: &[Product]) -> Result<i64, CheckoutError> {
    let mut total: i64 = 0;
    for line in lines {
        let product = products
            .iter()
            .find(|p| p.id == line.product_id)
            .ok_or(CheckoutError::UnknownProduct(line.product_id))?;
        if !product.is_active {
            return Err(CheckoutError::ProductUnavailable(product.id));
        }
        if product.stock < line.quantity {
            return Err(CheckoutError::InsufficientStock {
                product_id: product.id,
                available: product.stock,
            });
        }
        let line_total = product
            .price_tokens
            .checked_mul(i64::from(line.quantity))
            .ok_or(CheckoutError::TotalOverflow)?;
        total = total
            .checked_add(line_total)
            .ok_or(CheckoutError::TotalOverflow)?;
    }
    Ok(total)
}

/// A fresh human-friendly order number, e.g. `ORD-7KQ2M9XH4A`.
pub fn new_order_number() -> String {
    format!("ORD-{}", nanoid::nanoid!(10, &ORDER_ALPHABET))
}

/// Place an order for `req.user_id`. See the module docs for the guarantees.
pub async fn checkout(pool: &PgPool, req: CheckoutRequest) -> Result<OrderWithItems> {
    let lines = merge_lines(&req.lines)?;
    if req.delivery_address.trim().is_empty() {
        return Err(CheckoutError::MissingAddress.into());
    }

    let start = Instant::now();
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let ids: Vec<i64> = lines.iter().map(|l| l.product_id).collect();
    let products = sqlx::query_as::<_, Product>(
        "SELECT * FROM products WHERE id = ANY($1) ORDER BY id FOR UPDATE",
    )
    .bind(&ids)
    .fetch_all(&mut *tx)
    .await
    .context("failed to lock products")?;

    let total = price_lines(&lines, &products)?;

    let order = sqlx::query_as::<_, Order>(
        r#"
        INSERT INTO orders (order_number, user_id, status, total_tokens, delivery_address, note)
        VALUES ($1, $2, 'pending', $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(new_order_number())
    .bind(req.user_id)
    .bind(total)
    .bind(req.delivery_address.trim())
    .bind(req.note.as_deref())
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert order")?;

    let mut items = Vec::with_capacity(lines.len());
    for line in &lines {
        // Presence was checked by `price_lines`.
        let Some(product) = products.iter().find(|p| p.id == line.product_id) else {
            continue;
        };
        let item = sqlx::query_as::<_, OrderItem>(
            r#"
            INSERT INTO order_items (order_id, product_id, product_name, unit_price_tokens, quantity)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(order.id)
        .bind(product.id)
        .bind(&product.name)
        .bind(product.price_tokens)
        .bind(line.quantity)
        .fetch_one(&mut *tx)
        .await
        .context("failed to insert order item")?;
        items.push(item);

        sqlx::query("UPDATE products SET stock = stock - $2, updated_at = now() WHERE id = $1")
            .bind(product.id)
            .bind(line.quantity)
            .execute(&mut *tx)
            .await
            .context("failed to decrement stock")?;
    }

    tokens::apply(
        &mut *tx,
        LedgerEntry {
            user_id: req.user_id,
            amount: -total,
            kind: TransactionKind::Purchase,
            order_id: Some(order.id),
            actor_id: None,
            note: None,
        },
    )
    .await?;

    tx.commit().await.context("failed to commit checkout")?;
    log_if_slow(start, SLOW_CHECKOUT, "checkout");

    info!(
        order_number = %order.order_number,
        user_id = req.user_id,
        total_tokens = total,
        lines = items.len(),
        "Order placed"
    );

    Ok(OrderWithItems { order, items })
}

async fn items_for(conn: &mut PgConnection, order_id: i64) -> Result<Vec<OrderItem>> {
    let items = sqlx::query_as::<_, OrderItem>(
        "SELECT * FROM order_items WHERE order_id = $1 ORDER BY id",
    )
    .bind(order_id)
    .fetch_all(conn)
    .await?;
    Ok(items)
}

/// Attach line items to a batch of orders with one query.
async fn with_items(pool: &PgPool, orders: Vec<Order>) -> Result<Vec<OrderWithItems>> {
    let ids: Vec<i64> = orders.iter().map(|o| o.id).collect();
    let all_items = sqlx::query_as::<_, OrderItem>(
        "SELECT * FROM order_items WHERE order_id = ANY($1) ORDER BY id",
    )
    .bind(&ids)
    .fetch_all(pool)
    .await?;

    let mut by_order: BTreeMap<i64, Vec<OrderItem>> = BTreeMap::new();
    for item in all_items {
        by_order.entry(item.order_id).or_default().push(item);
    }

    Ok(orders
        .into_iter()
        .map(|order| {
            let items = by_order.remove(&order.id).unwrap_or_default();
            OrderWithItems { order, items }
        })
        .collect())
}

pub async fn list_for_user(pool: &PgPool, user_id: i64) -> Result<Vec<OrderWithItems>> {
    let orders = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE user_id = $1 ORDER BY created_at DESC LIMIT 100",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    with_items(pool, orders).await
}

/// Fetch an order by number, scoped to its owner.
pub async fn get_for_user(
    pool: &PgPool,
    user_id: i64,
    order_number: &str,
) -> Result<Option<OrderWithItems>> {
    let order = sqlx::query_as::<_, Order>(
        "SELECT * FROM orders WHERE order_number = $1 AND user_id = $2",
    )
    .bind(order_number)
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    match order {
        Some(order) => {
            let mut conn = pool.acquire().await?;
            let items = items_for(&mut *conn, order.id).await?;
            Ok(Some(OrderWithItems { order, items }))
        }
        None => Ok(None),
    }
}

/// All orders, optionally filtered by status, for the admin panel.
pub async fn list_all(pool: &PgPool, status: Option<OrderStatus>) -> Result<Vec<OrderWithItems>> {
    let orders = sqlx::query_as::<_, Order>(
        r#"
        SELECT * FROM orders
        WHERE $1::text IS NULL OR status = $1
        ORDER BY created_at DESC
        LIMIT 200
        "#,
    )
    .bind(status)
    .fetch_all(pool)
    .await?;
    with_items(pool, orders).await
}

/// Who is asking for a status change.
#[derive(Debug, Clone, Copy)]
pub enum Actor {
    /// The order's owner, who may only cancel pending orders.
    Owner(i64),
    Admin(i64),
}

/// Move an order to `next` in its own transaction.
pub async fn transition(
    pool: &PgPool,
    order_id: i64,
    next: OrderStatus,
    actor: Actor,
) -> Result<OrderWithItems> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;
    let updated = apply_transition(&mut *tx, order_id, next, actor).await?;
    tx.commit().await.context("failed to commit status change")?;
    Ok(updated)
}

/// Move an order to `next` on the caller's transaction, restocking and
/// refunding on cancellation. Nothing is visible until the caller commits.
pub async fn apply_transition(
    conn: &mut PgConnection,
    order_id: i64,
    next: OrderStatus,
    actor: Actor,
) -> Result<OrderWithItems> {
    let order = sqlx::query_as::<_, Order>("SELECT * FROM orders WHERE id = $1 FOR UPDATE")
        .bind(order_id)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(OrderError::NoSuchOrder)?;

    let allowed = match actor {
        Actor::Owner(user_id) => {
            if order.user_id != user_id {
                return Err(OrderError::NoSuchOrder.into());
            }
            order.status == OrderStatus::Pending && next == OrderStatus::Cancelled
        }
        Actor::Admin(_) => order.status.can_transition_to(next),
    };
    if !allowed {
        return Err(OrderError::InvalidTransition {
            from: order.status,
            to: next,
        }
        .into());
    }

    let updated = sqlx::query_as::<_, Order>(
        "UPDATE orders SET status = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(order.id)
    .bind(next)
    .fetch_one(&mut *conn)
    .await
    .context("failed to update order status")?;

    let items = items_for(&mut *conn, order.id).await?;

    if next == OrderStatus::Cancelled {
        for item in &items {
            sqlx::query(
                "UPDATE products SET stock = stock + $2, updated_at = now() WHERE id = $1",
            )
            .bind(item.product_id)
            .bind(item.quantity)
            .execute(&mut *conn)
            .await
            .context("failed to restock product")?;
        }

        let actor_id = match actor {
            Actor::Admin(id) => Some(id),
            Actor::Owner(_) => None,
        };
        tokens::apply(
            &mut *conn,
            LedgerEntry {
                user_id: order.user_id,
                amount: order.total_tokens,
                kind: TransactionKind::Refund,
                order_id: Some(order.id),
                actor_id,
                note: None,
            },
        )
        .await?;
    }

    info!(
        order_number = %updated.order_number,
        from = %order.status,
        to = %next,
        "Order status changed"
    );

    Ok(OrderWithItems {
        order: updated,
        items,
    })
}

/// Resolve an owner's order number to its id.
pub async fn id_for_number(pool: &PgPool, user_id: i64, order_number: &str) -> Result<Option<i64>> {
    let id: Option<i64> =
        sqlx::query_scalar("SELECT id FROM orders WHERE order_number = $1 AND user_id = $2")
            .bind(order_number)
            .bind(user_id)
            .fetch_optional(pool)
            .await?;
    Ok(id)
}

/// `(total, pending)` order counts.
pub async fn counts(pool: &PgPool) -> Result<(i64, i64)> {
    let row: (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), COUNT(*) FILTER (WHERE status = 'pending') FROM orders",
    )
    .fetch_one(pool)
    .await?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::data::enums::Category;

    fn line(product_id: i64, quantity: i32) -> CartLine {
        CartLine {
            product_id,
            quantity,
        }
    }

    fn product(id: i64, price: i64, stock: i32) -> Product {
        Product {
            id,
            slug: format!("product-{id}"),
            name: format!("Product {id}"),
            description: String::new(),
            category: Category::Flower,
            strain: None,
            thc_percent: None,
            cbd_percent: None,
            price_tokens: price,
            stock,
            image_url: None,
            is_active: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn merge_combines_duplicates_in_id_order() {
        let merged = merge_lines(&[line(7, 1), line(3, 2), line(7, 4)]).unwrap();
        assert_eq!(merged, vec![line(3, 2), line(7, 5)]);
    }

    #[test]
    fn merge_rejects_empty_and_non_positive() {
        assert_eq!(merge_lines(&[]), Err(CheckoutError::EmptyCart));
        assert_eq!(
            merge_lines(&[line(1, 0)]),
            Err(CheckoutError::BadQuantity { product_id: 1 })
        );
        assert_eq!(
            merge_lines(&[line(1, -3)]),
            Err(CheckoutError::BadQuantity { product_id: 1 })
        );
    }

    #[test]
    fn merge_checks_quantity_after_combining() {
        assert_eq!(
            merge_lines(&[line(1, 60), line(1, 40)]),
            Err(CheckoutError::BadQuantity { product_id: 1 })
        );
        assert!(merge_lines(&[line(1, 60), line(1, 39)]).is_ok());
    }

    #[test]
    fn merge_caps_distinct_products() {
        let lines: Vec<CartLine> = (1..=(MAX_LINES as i64 + 1)).map(|id| line(id, 1)).collect();
        assert_eq!(merge_lines(&lines), Err(CheckoutError::TooManyLines));
    }

    #[test]
    fn price_sums_lines() {
        let products = vec![product(1, 250, 10), product(2, 40, 3)];
        let total = price_lines(&[line(1, 2), line(2, 3)], &products).unwrap();
        assert_eq!(total, 620);
    }

    #[test]
    fn price_reports_missing_and_inactive() {
        let mut inactive = product(2, 40, 3);
        inactive.is_active = false;
        let products = vec![product(1, 250, 10), inactive];

        assert_eq!(
            price_lines(&[line(9, 1)], &products),
            Err(CheckoutError::UnknownProduct(9))
        );
        assert_eq!(
            price_lines(&[line(2, 1)], &products),
            Err(CheckoutError::ProductUnavailable(2))
        );
    }

    #[test]
    fn price_reports_short_stock() {
        let products = vec![product(1, 250, 1)];
        assert_eq!(
            price_lines(&[line(1, 2)], &products),
            Err(CheckoutError::InsufficientStock {
                product_id: 1,
                available: 1
            })
        );
    }

    #[test]
    fn price_detects_overflow() {
        let products = vec![product(1, i64::MAX / 2, 10)];
        assert_eq!(
            price_lines(&[line(1, 3)], &products),
            Err(CheckoutError::TotalOverflow)
        );
    }

    #[test]
    fn order_numbers_use_unambiguous_alphabet() {
        let number = new_order_number();
        assert!(number.starts_with("ORD-"));
        let suffix = &number[4..];
        assert_eq!(suffix.len(), 10);
        assert!(suffix.chars().all(|c| ORDER_ALPHABET.contains(&c)));
        assert!(!suffix.contains(['0', 'O', '1', 'I']));
    }
}
