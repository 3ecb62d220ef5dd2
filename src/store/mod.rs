use async_trait::async_trait;
use chrono::NaiveDate;
use uuid::Uuid;

use crate::{
    errors::Result,
    models::{
        AuditLogEntryView, ListingImage, LoginInfo, NewAuditEntry, NewListingImage, NewUser,
        UsageAction, UsageResponse, User,
    },
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;

/// Outcome of a charging debit. `balance_after` is always
/// `balance_before - 1`; a debit that would go below zero is denied before
/// any mutation happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Debit {
    pub balance_before: i64,
    pub balance_after: i64,
}

/// Outcome of a regeneration reservation. A denied reservation mutates
/// nothing and reports `remaining = 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegenerateOutcome {
    pub allowed: bool,
    pub count: i32,
    pub remaining: i32,
}

/// Persistence boundary for users, balances, usage events, regeneration
/// counts and the audit log. All mutation goes through this trait; the two
/// implementations are [`PgLedgerStore`] (durable, row-locking) and
/// [`MemoryLedgerStore`] (process-local, for dev and tests).
///
/// Balance operations against an absent user return
/// [`crate::errors::AppError::UnknownUser`] rather than silently succeeding.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // users
    async fn create_user(&self, new: NewUser) -> Result<User>;
    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>>;
    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>>;
    async fn record_login(&self, id: Uuid, login: LoginInfo) -> Result<()>;
    async fn list_users(&self, limit: i64, offset: i64) -> Result<Vec<User>>;
    async fn delete_user(&self, id: Uuid) -> Result<()>;
    async fn set_admin(&self, id: Uuid, is_admin: bool) -> Result<()>;

    // balance
    /// Atomic conditional decrement: denies with `InsufficientBalance` when
    /// the balance is zero, otherwise takes one token and appends exactly
    /// one usage event, all under a single per-user critical section.
    async fn debit(&self, user_id: Uuid, action: UsageAction) -> Result<Debit>;
    /// Adds `amount` tokens. `amount` must be positive.
    async fn credit(&self, user_id: Uuid, amount: i64) -> Result<i64>;
    /// Hard overwrite (admin path only). `amount` must be non-negative.
    async fn set_balance(&self, user_id: Uuid, amount: i64) -> Result<i64>;
    /// Appends a no-charge usage event (`before == after`); returns the
    /// current balance.
    async fn record_usage(&self, user_id: Uuid, action: UsageAction) -> Result<i64>;

    // images & regeneration
    async fn create_image(&self, new: NewListingImage) -> Result<ListingImage>;
    async fn find_image(&self, id: Uuid) -> Result<Option<ListingImage>>;
    async fn find_image_by_fingerprint(&self, fingerprint: &str) -> Result<Option<ListingImage>>;
    async fn list_images(&self, owner_id: Uuid, limit: i64, offset: i64)
        -> Result<Vec<ListingImage>>;
    /// Atomic check-and-increment of the regeneration count, capped at
    /// `max`. Over the cap nothing is mutated.
    async fn reserve_regeneration(&self, fingerprint: &str, max: i32)
        -> Result<RegenerateOutcome>;
    /// Compensating decrement (floored at zero) for a reservation whose
    /// protected action failed.
    async fn release_regeneration(&self, fingerprint: &str) -> Result<()>;
    async fn regeneration_count(&self, fingerprint: &str) -> Result<i32>;

    // analytics
    async fn usage_stats(&self, from: NaiveDate, to: NaiveDate) -> Result<UsageResponse>;

    // audit
    async fn append_audit(&self, entry: NewAuditEntry) -> Result<()>;
    async fn audit_page(&self, limit: i64, offset: i64) -> Result<Vec<AuditLogEntryView>>;

    /// Connectivity check for readiness probes.
    async fn ping(&self) -> Result<()>;
}
