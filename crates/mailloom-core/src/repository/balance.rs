//! Balance gate trait.
//!
//! Users originating from an external identity provider are subject to
//! balance enforcement; locally provisioned users always pass. Enforcement
//! eligibility is evaluated per call, never cached.

use mailloom_types::error::BalanceError;
use uuid::Uuid;

/// Shared balance gate used by the LLM and agent step runners.
pub trait BalanceLedger: Send + Sync {
    /// Reject with [`BalanceError::InsufficientBalance`] if the user is
    /// balance-enforced and their balance is depleted.
    fn check(
        &self,
        user_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<(), BalanceError>> + Send;

    /// Atomically subtract `amount_usd` from the user's balance.
    ///
    /// No-op for non-enforced users. Callers only invoke this when the
    /// provider reported a non-zero cost.
    fn deduct(
        &self,
        user_id: &Uuid,
        amount_usd: f64,
    ) -> impl std::future::Future<Output = Result<(), BalanceError>> + Send;
}
