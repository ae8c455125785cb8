//! SQLite user store and balance ledger.
//!
//! The balance gate only applies to externally provisioned accounts
//! (non-null `auth_subject`). Deduction is a single atomic
//! `balance = balance - ?` decrement; the application never does a
//! read-modify-write on balances.

use chrono::Utc;
use mailloom_core::repository::balance::BalanceLedger;
use mailloom_types::error::BalanceError;
use mailloom_types::user::UserAccount;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed user store implementing [`BalanceLedger`].
pub struct SqliteUserStore {
    pool: DatabasePool,
}

impl SqliteUserStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Upsert a user account row.
    pub async fn upsert(&self, user: &UserAccount) -> Result<(), BalanceError> {
        sqlx::query(
            r#"INSERT INTO users (uuid, email, auth_subject, balance, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT(uuid) DO UPDATE SET
                 email = excluded.email,
                 auth_subject = excluded.auth_subject,
                 balance = excluded.balance,
                 updated_at = excluded.updated_at"#,
        )
        .bind(user.uuid.to_string())
        .bind(&user.email)
        .bind(&user.auth_subject)
        .bind(user.balance)
        .bind(user.created_at.to_rfc3339())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| BalanceError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Load an account by UUID.
    pub async fn get(&self, uuid: &Uuid) -> Result<Option<UserAccount>, BalanceError> {
        let row = sqlx::query(
            "SELECT uuid, email, auth_subject, balance, created_at, updated_at FROM users WHERE uuid = ?",
        )
        .bind(uuid.to_string())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(|e| BalanceError::Storage(e.to_string()))?;

        row.map(|r| {
            let uuid_str: String = r
                .try_get("uuid")
                .map_err(|e| BalanceError::Storage(e.to_string()))?;
            let created: String = r
                .try_get("created_at")
                .map_err(|e| BalanceError::Storage(e.to_string()))?;
            let updated: String = r
                .try_get("updated_at")
                .map_err(|e| BalanceError::Storage(e.to_string()))?;
            Ok(UserAccount {
                uuid: uuid_str
                    .parse()
                    .map_err(|e| BalanceError::Storage(format!("invalid UUID: {e}")))?,
                email: r
                    .try_get("email")
                    .map_err(|e| BalanceError::Storage(e.to_string()))?,
                auth_subject: r
                    .try_get("auth_subject")
                    .map_err(|e| BalanceError::Storage(e.to_string()))?,
                balance: r
                    .try_get("balance")
                    .map_err(|e| BalanceError::Storage(e.to_string()))?,
                created_at: parse_datetime(&created)?,
                updated_at: parse_datetime(&updated)?,
            })
        })
        .transpose()
    }
}

fn parse_datetime(s: &str) -> Result<chrono::DateTime<Utc>, BalanceError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| BalanceError::Storage(format!("invalid datetime: {e}")))
}

impl BalanceLedger for SqliteUserStore {
    async fn check(&self, user_id: &Uuid) -> Result<(), BalanceError> {
        // Eligibility is read fresh on every call.
        let user = self.get(user_id).await?.ok_or(BalanceError::UserNotFound)?;
        if user.is_balance_enforced() && user.balance <= 0.0 {
            return Err(BalanceError::InsufficientBalance);
        }
        Ok(())
    }

    async fn deduct(&self, user_id: &Uuid, amount_usd: f64) -> Result<(), BalanceError> {
        let result = sqlx::query(
            "UPDATE users SET balance = balance - ?, updated_at = ? WHERE uuid = ? AND auth_subject IS NOT NULL",
        )
        .bind(amount_usd)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| BalanceError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            // Either the user is gone or is not balance-enforced; only the
            // former is an error.
            if self.get(user_id).await?.is_none() {
                return Err(BalanceError::UserNotFound);
            }
        }
        Ok(())
    }
}
