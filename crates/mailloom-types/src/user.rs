//! User account type.
//!
//! Accounts provisioned through an external identity provider carry an
//! `auth_subject` and are subject to balance enforcement; locally
//! provisioned accounts are not.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserAccount {
    pub uuid: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Identity-provider subject; presence makes the account
    /// balance-enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_subject: Option<String>,
    /// Remaining balance in USD.
    #[serde(default)]
    pub balance: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserAccount {
    /// A locally provisioned account, exempt from balance enforcement.
    pub fn local(email: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::now_v7(),
            email,
            auth_subject: None,
            balance: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// An externally provisioned, balance-enforced account.
    pub fn external(auth_subject: impl Into<String>, email: Option<String>, balance: f64) -> Self {
        let now = Utc::now();
        Self {
            uuid: Uuid::now_v7(),
            email,
            auth_subject: Some(auth_subject.into()),
            balance,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_balance_enforced(&self) -> bool {
        self.auth_subject.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_accounts_are_not_enforced() {
        assert!(!UserAccount::local(None).is_balance_enforced());
    }

    #[test]
    fn external_accounts_are_enforced() {
        let account = UserAccount::external("auth0|abc", None, 5.0);
        assert!(account.is_balance_enforced());
        assert_eq!(account.balance, 5.0);
    }
}
