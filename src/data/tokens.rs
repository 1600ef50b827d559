//! Token balance ledger.
//!
//! `users.token_balance` is a cached sum of `token_transactions.amount` for
//! the user. Both are only ever changed together through [`apply`], inside the
//! caller's transaction, so the two never drift apart.

use anyhow::{Context, Result};
use sqlx::{PgConnection, PgPool};

use crate::data::enums::TransactionKind;
use crate::data::models::TokenTransaction;

/// Longest note stored on a ledger entry.
pub const MAX_NOTE_LEN: usize = 200;

/// Domain errors for balance changes.
///
/// The web layer downcasts `anyhow::Error` to this type to pick HTTP statuses.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("insufficient token balance: have {balance}, need {required}")]
    InsufficientBalance { balance: i64, required: i64 },
    #[error("user not found")]
    NoSuchUser,
    #[error("amount must be non-zero")]
    ZeroAmount,
    #[error("{kind} entries must have a {expected} amount")]
    WrongSign {
        kind: TransactionKind,
        expected: &'static str,
    },
}

/// A balance change to record.
#[derive(Debug, Clone)]
pub struct LedgerEntry<'a> {
    pub user_id: i64,
    pub amount: i64,
    pub kind: TransactionKind,
    pub order_id: Option<i64>,
    pub actor_id: Option<i64>,
    pub note: Option<&'a str>,
}

/// Check that `amount` has the sign its kind requires.
pub fn validate_amount(kind: TransactionKind, amount: i64) -> Result<(), LedgerError> {
    if amount == 0 {
        return Err(LedgerError::ZeroAmount);
    }
    let expected = match kind {
        TransactionKind::Credit | TransactionKind::Refund if amount < 0 => "positive",
        TransactionKind::Purchase if amount > 0 => "negative",
        _ => return Ok(()),
    };
    Err(LedgerError::WrongSign { kind, expected })
}

/// Apply a balance change and append it to the ledger.
///
/// Debits that would take the balance below zero fail with
/// [`LedgerError::InsufficientBalance`] and change nothing.
pub async fn apply(conn: &mut PgConnection, entry: LedgerEntry<'_>) -> Result<TokenTransaction> {
    validate_amount(entry.kind, entry.amount)?;

    let new_balance: Option<i64> = sqlx::query_scalar(
        r#"
        UPDATE users
        SET token_balance = token_balance + $2, updated_at = now()
        WHERE id = $1 AND token_balance + $2 >= 0
        RETURNING token_balance
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.amount)
    .fetch_optional(&mut *conn)
    .await
    .context("failed to update token balance")?;

    let Some(balance_after) = new_balance else {
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT token_balance FROM users WHERE id = $1")
                .bind(entry.user_id)
                .fetch_optional(&mut *conn)
                .await?;
        return Err(match balance {
            Some(balance) => LedgerError::InsufficientBalance {
                balance,
                required: -entry.amount,
            },
            None => LedgerError::NoSuchUser,
        }
        .into());
    };

    let row = sqlx::query_as::<_, TokenTransaction>(
        r#"
        INSERT INTO token_transactions (user_id, amount, balance_after, kind, order_id, actor_id, note)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(entry.user_id)
    .bind(entry.amount)
    .bind(balance_after)
    .bind(entry.kind)
    .bind(entry.order_id)
    .bind(entry.actor_id)
    .bind(entry.note)
    .fetch_one(&mut *conn)
    .await
    .context("failed to insert token transaction")?;

    Ok(row)
}

/// A user's ledger, newest first. `before` is an exclusive id cursor.
pub async fn list_for_user(
    pool: &PgPool,
    user_id: i64,
    before: Option<i64>,
    limit: i64,
) -> Result<Vec<TokenTransaction>> {
    let rows = sqlx::query_as::<_, TokenTransaction>(
        r#"
        SELECT * FROM token_transactions
        WHERE user_id = $1 AND ($2::bigint IS NULL OR id < $2)
        ORDER BY id DESC
        LIMIT $3
        "#,
    )
    .bind(user_id)
    .bind(before)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// Sum of all balances.
pub async fn tokens_in_circulation(pool: &PgPool) -> Result<i64> {
    let total: Option<i64> = sqlx::query_scalar("SELECT SUM(token_balance)::bigint FROM users")
        .fetch_one(pool)
        .await?;
    Ok(total.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_never_valid() {
        for kind in TransactionKind::ALL {
            assert_eq!(validate_amount(*kind, 0), Err(LedgerError::ZeroAmount));
        }
    }

    #[test]
    fn credits_and_refunds_must_be_positive() {
        assert!(validate_amount(TransactionKind::Credit, 50).is_ok());
        assert!(validate_amount(TransactionKind::Refund, 50).is_ok());
        assert_eq!(
            validate_amount(TransactionKind::Credit, -5),
            Err(LedgerError::WrongSign {
                kind: TransactionKind::Credit,
                expected: "positive"
            })
        );
    }

    #[test]
    fn purchases_must_be_negative() {
        assert!(validate_amount(TransactionKind::Purchase, -120).is_ok());
        assert!(validate_amount(TransactionKind::Purchase, 120).is_err());
    }

    #[test]
    fn adjustments_take_either_sign() {
        assert!(validate_amount(TransactionKind::Adjustment, 10).is_ok());
        assert!(validate_amount(TransactionKind::Adjustment, -10).is_ok());
    }
}
