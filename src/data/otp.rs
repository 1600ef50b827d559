//! Storage for one-time login codes.
//!
//! Only HMAC digests of codes are stored; see `web::auth::otp` for hashing.

use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::data::models::OtpCode;

/// Request history used to enforce resend cooldown and the hourly cap.
#[derive(Debug, Clone, Copy)]
pub struct RequestHistory {
    pub latest: Option<DateTime<Utc>>,
    pub last_hour: i64,
}

pub async fn request_history(pool: &PgPool, phone: &str) -> Result<RequestHistory> {
    let (latest, last_hour): (Option<DateTime<Utc>>, i64) = sqlx::query_as(
        r#"
        SELECT MAX(created_at),
               COUNT(*) FILTER (WHERE created_at > now() - interval '1 hour')
        FROM otp_codes
        WHERE phone = $1
        "#,
    )
    .bind(phone)
    .fetch_one(pool)
    .await?;
    Ok(RequestHistory { latest, last_hour })
}

/// Store a new code for `phone`. Older codes stay redeemable until
/// [`retire_older_codes`] runs after the new one is delivered.
pub async fn insert_code(
    pool: &PgPool,
    phone: &str,
    code_hash: &str,
    expires_at: DateTime<Utc>,
) -> Result<i64> {
    let id: i64 = sqlx::query_scalar(
        "INSERT INTO otp_codes (phone, code_hash, expires_at) VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(phone)
    .bind(code_hash)
    .bind(expires_at)
    .fetch_one(pool)
    .await?;
    Ok(id)
}

/// Close every open code for `phone` except `keep_id`, so only the newest
/// delivered code can be redeemed.
pub async fn retire_older_codes(pool: &PgPool, phone: &str, keep_id: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE otp_codes SET consumed_at = now()
        WHERE phone = $1 AND id <> $2 AND consumed_at IS NULL
        "#,
    )
    .bind(phone)
    .bind(keep_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Remove a code that was never delivered.
pub async fn delete_code(pool: &PgPool, id: i64) -> Result<()> {
    sqlx::query("DELETE FROM otp_codes WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// The newest unconsumed code for `phone`, expired or not.
pub async fn latest_open_code(pool: &PgPool, phone: &str) -> Result<Option<OtpCode>> {
    let code = sqlx::query_as::<_, OtpCode>(
        r#"
        SELECT * FROM otp_codes
        WHERE phone = $1 AND consumed_at IS NULL
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(phone)
    .fetch_optional(pool)
    .await?;
    Ok(code)
}

/// Spend one attempt on a code before the guess is checked.
///
/// Returns the attempt total including this one, or `None` when the code is
/// already locked or consumed. The guard runs in the `UPDATE`, so concurrent
/// guesses cannot exceed `max_attempts` between them.
pub async fn reserve_attempt(pool: &PgPool, id: i64, max_attempts: i32) -> Result<Option<i32>> {
    let attempts = sqlx::query_scalar(
        r#"
        UPDATE otp_codes SET attempts = attempts + 1
        WHERE id = $1 AND attempts < $2 AND consumed_at IS NULL
        RETURNING attempts
        "#,
    )
    .bind(id)
    .bind(max_attempts)
    .fetch_optional(pool)
    .await?;
    Ok(attempts)
}

/// Mark a code as redeemed. Returns `false` if another request got there first.
pub async fn consume_code(pool: &PgPool, id: i64) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE otp_codes SET consumed_at = now() WHERE id = $1 AND consumed_at IS NULL",
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Delete codes that expired or were consumed more than a day ago.
pub async fn purge_stale(pool: &PgPool) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM otp_codes
        WHERE expires_at < now() - interval '1 day'
           OR consumed_at < now() - interval '1 day'
        "#,
    )
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
