//! Database operations for subscriber and admin accounts.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};

use crate::data::enums::Role;
use crate::data::models::User;

/// Profile fields a subscriber may change. `None` leaves a field untouched;
/// `Some(None)` clears an optional field.
#[derive(Debug, Default, Clone)]
pub struct ProfileUpdate {
    pub display_name: Option<Option<String>>,
    pub email: Option<Option<String>>,
    pub delivery_address: Option<Option<String>>,
}

pub async fn get_user(pool: &PgPool, user_id: i64) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
    Ok(user)
}

/// Fetch the account for `phone`, creating a subscriber on first login,
/// and stamp `last_login_at`.
pub async fn upsert_on_login(pool: &PgPool, phone: &str) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (phone, last_login_at)
        VALUES ($1, now())
        ON CONFLICT (phone)
        DO UPDATE SET last_login_at = now()
        RETURNING *
        "#,
    )
    .bind(phone)
    .fetch_one(pool)
    .await
    .context("failed to upsert user on login")?;
    Ok(user)
}

/// Ensure the configured phone exists and holds the admin role.
pub async fn ensure_seed_admin(pool: &PgPool, phone: &str) -> Result<User> {
    let user = sqlx::query_as::<_, User>(
        r#"
        INSERT INTO users (phone, role)
        VALUES ($1, 'admin')
        ON CONFLICT (phone)
        DO UPDATE SET role = 'admin', is_active = TRUE, updated_at = now()
        RETURNING *
        "#,
    )
    .bind(phone)
    .fetch_one(pool)
    .await?;
    Ok(user)
}

pub async fn update_profile(pool: &PgPool, user_id: i64, update: &ProfileUpdate) -> Result<User> {
    // Each boolean parameter selects whether the value after it is written.
    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users SET
            display_name = CASE WHEN $2 THEN $3 ELSE display_name END,
            email = CASE WHEN $4 THEN $5 ELSE email END,
            delivery_address = CASE WHEN $6 THEN $7 ELSE delivery_address END,
            updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(update.display_name.is_some())
    .bind(update.display_name.clone().flatten())
    .bind(update.email.is_some())
    .bind(update.email.clone().flatten())
    .bind(update.delivery_address.is_some())
    .bind(update.delivery_address.clone().flatten())
    .fetch_one(pool)
    .await?;
    Ok(user)
}

/// Invalidate every session token issued to the user so far.
pub async fn bump_token_version(pool: &PgPool, user_id: i64) -> Result<()> {
    sqlx::query(
        "UPDATE users SET token_version = token_version + 1, updated_at = now() WHERE id = $1",
    )
    .bind(user_id)
    .execute(pool)
    .await?;
    Ok(())
}

/// Search users by phone or display name (case-insensitive), newest first.
pub async fn search_users(pool: &PgPool, query: Option<&str>, limit: i64) -> Result<Vec<User>> {
    let pattern = query.map(|q| format!("%{}%", escape_like(q)));
    let users = sqlx::query_as::<_, User>(
        r#"
        SELECT * FROM users
        WHERE $1::text IS NULL OR phone ILIKE $1 OR display_name ILIKE $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(pattern)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(users)
}

pub async fn set_role(conn: &mut PgConnection, user_id: i64, role: Role) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET role = $2, updated_at = now() WHERE id = $1 RETURNING *",
    )
    .bind(user_id)
    .bind(role)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(user)
}

/// Activate or deactivate an account. Deactivation also revokes its tokens.
pub async fn set_active(conn: &mut PgConnection, user_id: i64, active: bool) -> Result<Option<User>> {
    let user = sqlx::query_as::<_, User>(
        r#"
        UPDATE users SET
            is_active = $2,
            token_version = CASE WHEN $2 THEN token_version ELSE token_version + 1 END,
            updated_at = now()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(user_id)
    .bind(active)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(user)
}

/// Escape `%`, `_` and `\` so user input matches literally inside `ILIKE`.
pub fn escape_like(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}
