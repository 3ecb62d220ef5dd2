use std::future::Future;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::{
    errors::{AppError, Result},
    models::UsageAction,
    store::{Debit, LedgerStore, RegenerateOutcome},
};

/// How many times a single original may be re-enhanced.
pub const MAX_REGENERATE_COUNT: i32 = 3;

/// Content fingerprint of an original upload: SHA-256 over the raw bytes.
/// The same original always maps to the same ledger entry regardless of
/// filename or request metadata.
pub fn fingerprint(image_bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(image_bytes);
    format!("{:x}", hasher.finalize())
}

/// Decision point in front of every balance-consuming or count-limited
/// operation. The gate owns the ordering between the entitlement check, the
/// protected action and the ledger commit: a mutation is only left in place
/// when the protected action actually succeeded.
#[derive(Clone)]
pub struct EntitlementGate {
    store: Arc<dyn LedgerStore>,
}

impl EntitlementGate {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// First enhancement of a new original: free, tracked for analytics.
    /// Returns the caller's current balance for client display.
    pub async fn record_generate(&self, user_id: Uuid) -> Result<i64> {
        self.store.record_usage(user_id, UsageAction::Generate).await
    }

    /// Gated regeneration. Reserves a slot for the fingerprint, runs the
    /// protected action, and releases the reservation if the action fails,
    /// leaving the count at its pre-request value.
    pub async fn regenerate<F, Fut, T>(
        &self,
        user_id: Uuid,
        fingerprint: &str,
        action: F,
    ) -> Result<(T, RegenerateOutcome, i64)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let outcome = self
            .store
            .reserve_regeneration(fingerprint, MAX_REGENERATE_COUNT)
            .await?;
        if !outcome.allowed {
            tracing::info!(
                user_id = %user_id,
                fingerprint = %fingerprint,
                count = outcome.count,
                "regeneration denied: limit reached"
            );
            return Err(AppError::RegenerateLimitReached);
        }

        match action().await {
            Ok(value) => {
                let balance = self
                    .store
                    .record_usage(user_id, UsageAction::Process)
                    .await?;
                Ok((value, outcome, balance))
            }
            Err(e) => {
                if let Err(release_err) = self.store.release_regeneration(fingerprint).await {
                    tracing::error!(
                        fingerprint = %fingerprint,
                        error = %release_err,
                        "failed to release regeneration slot after provider failure"
                    );
                }
                Err(e)
            }
        }
    }

    /// Gated HD download. Denies up front when the balance is empty, runs
    /// the protected action (asset load), then commits the debit. The debit
    /// itself is conditional, so a request that loses a race for the last
    /// token is denied rather than served for free; an action failure
    /// leaves the balance untouched.
    pub async fn download<F, Fut, T>(&self, user_id: Uuid, action: F) -> Result<(T, Debit)>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let user = self
            .store
            .find_user_by_id(user_id)
            .await?
            .ok_or(AppError::UnknownUser)?;
        if user.balance <= 0 {
            tracing::info!(user_id = %user_id, "download denied: insufficient balance");
            return Err(AppError::InsufficientBalance);
        }

        let value = action().await?;
        let debit = self.store.debit(user_id, UsageAction::Download).await?;
        tracing::debug!(
            user_id = %user_id,
            balance_after = debit.balance_after,
            "download debited"
        );
        Ok((value, debit))
    }
}
