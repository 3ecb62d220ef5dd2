use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::{postgres::PgPoolOptions, PgPool, Row};
use uuid::Uuid;

use crate::{
    errors::{AppError, Result},
    models::{
        AuditLogEntryView, DailyUsage, ListingImage, LoginInfo, NewAuditEntry, NewListingImage,
        NewUser, UsageAction, UsageResponse, User,
    },
    store::{Debit, LedgerStore, RegenerateOutcome},
};

const USER_COLUMNS: &str = "id, name, email, password_hash, is_admin, balance, created_at, \
     last_login_at, last_login_ip, last_login_country, last_login_city";

const IMAGE_COLUMNS: &str = "id, owner_id, fingerprint, mime, size_bytes, width, height, \
     style, room_type, regenerate_count, created_at";

/// Durable ledger backend. Balance mutations run in row-locking transactions
/// and the regeneration reservation is a single conditional `UPDATE`, so no
/// two concurrent requests can spend the same token or the same slot.
pub struct PgLedgerStore {
    pool: PgPool,
}

impl PgLedgerStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::Internal(anyhow::anyhow!("Migration failed: {}", e)))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn create_user(&self, new: NewUser) -> Result<User> {
        let user = sqlx::query_as::<_, User>(&format!(
            "INSERT INTO users (name, email, password_hash, balance) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(&new.name)
        .bind(&new.email)
        .bind(&new.password_hash)
        .bind(new.starting_balance)
        .fetch_one(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE lower(email) = lower($1)",
            USER_COLUMNS
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(user)
    }

    async fn record_login(&self, id: Uuid, login: LoginInfo) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET last_login_at = NOW(), last_login_ip = $2, \
             last_login_country = $3, last_login_city = $4 WHERE id = $1",
        )
        .bind(id)
        .bind(&login.ip)
        .bind(&login.country)
        .bind(&login.city)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::UnknownUser);
        }
        Ok(())
    }

    async fn list_users(&self, limit: i64, offset: i64) -> Result<Vec<User>> {
        let users = sqlx::query_as::<_, User>(&format!(
            "SELECT {} FROM users ORDER BY created_at DESC LIMIT $1 OFFSET $2",
            USER_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(users)
    }

    async fn delete_user(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::UnknownUser);
        }
        Ok(())
    }

    async fn set_admin(&self, id: Uuid, is_admin: bool) -> Result<()> {
        let result = sqlx::query("UPDATE users SET is_admin = $2 WHERE id = $1")
            .bind(id)
            .bind(is_admin)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::UnknownUser);
        }
        Ok(())
    }

    async fn debit(&self, user_id: Uuid, action: UsageAction) -> Result<Debit> {
        let mut tx = self.pool.begin().await?;

        // Row lock serializes concurrent debits for the same user.
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let before = balance.ok_or(AppError::UnknownUser)?;
        if before <= 0 {
            return Err(AppError::InsufficientBalance);
        }
        let after = before - 1;

        sqlx::query("UPDATE users SET balance = $2 WHERE id = $1")
            .bind(user_id)
            .bind(after)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "INSERT INTO usage_events (user_id, action, balance_before, balance_after) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(user_id)
        .bind(action.as_str())
        .bind(before)
        .bind(after)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Debit {
            balance_before: before,
            balance_after: after,
        })
    }

    async fn credit(&self, user_id: Uuid, amount: i64) -> Result<i64> {
        if amount <= 0 {
            return Err(AppError::Validation(
                "Credit amount must be positive".to_string(),
            ));
        }
        let balance: Option<i64> = sqlx::query_scalar(
            "UPDATE users SET balance = balance + $2 WHERE id = $1 RETURNING balance",
        )
        .bind(user_id)
        .bind(amount)
        .fetch_optional(&self.pool)
        .await?;
        balance.ok_or(AppError::UnknownUser)
    }

    async fn set_balance(&self, user_id: Uuid, amount: i64) -> Result<i64> {
        if amount < 0 {
            return Err(AppError::Validation(
                "Balance cannot be negative".to_string(),
            ));
        }
        let balance: Option<i64> =
            sqlx::query_scalar("UPDATE users SET balance = $2 WHERE id = $1 RETURNING balance")
                .bind(user_id)
                .bind(amount)
                .fetch_optional(&self.pool)
                .await?;
        balance.ok_or(AppError::UnknownUser)
    }

    async fn record_usage(&self, user_id: Uuid, action: UsageAction) -> Result<i64> {
        let mut tx = self.pool.begin().await?;
        let balance: Option<i64> =
            sqlx::query_scalar("SELECT balance FROM users WHERE id = $1 FOR UPDATE")
                .bind(user_id)
                .fetch_optional(&mut *tx)
                .await?;
        let balance = balance.ok_or(AppError::UnknownUser)?;
        sqlx::query(
            "INSERT INTO usage_events (user_id, action, balance_before, balance_after) \
             VALUES ($1, $2, $3, $3)",
        )
        .bind(user_id)
        .bind(action.as_str())
        .bind(balance)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(balance)
    }

    async fn create_image(&self, new: NewListingImage) -> Result<ListingImage> {
        let image = sqlx::query_as::<_, ListingImage>(&format!(
            "INSERT INTO listing_images \
             (id, owner_id, fingerprint, mime, size_bytes, width, height, style, room_type) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {}",
            IMAGE_COLUMNS
        ))
        .bind(new.id)
        .bind(new.owner_id)
        .bind(&new.fingerprint)
        .bind(&new.mime)
        .bind(new.size_bytes)
        .bind(new.width)
        .bind(new.height)
        .bind(&new.style)
        .bind(&new.room_type)
        .fetch_one(&self.pool)
        .await?;
        Ok(image)
    }

    async fn find_image(&self, id: Uuid) -> Result<Option<ListingImage>> {
        let image = sqlx::query_as::<_, ListingImage>(&format!(
            "SELECT {} FROM listing_images WHERE id = $1",
            IMAGE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(image)
    }

    async fn find_image_by_fingerprint(&self, fingerprint: &str) -> Result<Option<ListingImage>> {
        let image = sqlx::query_as::<_, ListingImage>(&format!(
            "SELECT {} FROM listing_images WHERE fingerprint = $1",
            IMAGE_COLUMNS
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(image)
    }

    async fn list_images(
        &self,
        owner_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ListingImage>> {
        let images = sqlx::query_as::<_, ListingImage>(&format!(
            "SELECT {} FROM listing_images WHERE owner_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3",
            IMAGE_COLUMNS
        ))
        .bind(owner_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(images)
    }

    async fn reserve_regeneration(
        &self,
        fingerprint: &str,
        max: i32,
    ) -> Result<RegenerateOutcome> {
        // Single conditional UPDATE: the check and the increment cannot be
        // interleaved by a concurrent reservation.
        let count: Option<i32> = sqlx::query_scalar(
            "UPDATE listing_images SET regenerate_count = regenerate_count + 1 \
             WHERE fingerprint = $1 AND regenerate_count < $2 RETURNING regenerate_count",
        )
        .bind(fingerprint)
        .bind(max)
        .fetch_optional(&self.pool)
        .await?;

        match count {
            Some(count) => Ok(RegenerateOutcome {
                allowed: true,
                count,
                remaining: max - count,
            }),
            None => {
                let current: Option<i32> = sqlx::query_scalar(
                    "SELECT regenerate_count FROM listing_images WHERE fingerprint = $1",
                )
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await?;
                let count = current.ok_or(AppError::NotFound)?;
                Ok(RegenerateOutcome {
                    allowed: false,
                    count,
                    remaining: 0,
                })
            }
        }
    }

    async fn release_regeneration(&self, fingerprint: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE listing_images SET regenerate_count = GREATEST(regenerate_count - 1, 0) \
             WHERE fingerprint = $1",
        )
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn regeneration_count(&self, fingerprint: &str) -> Result<i32> {
        let count: Option<i32> = sqlx::query_scalar(
            "SELECT regenerate_count FROM listing_images WHERE fingerprint = $1",
        )
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    async fn usage_stats(&self, from: NaiveDate, to: NaiveDate) -> Result<UsageResponse> {
        let totals = sqlx::query(
            "SELECT COUNT(*) AS total_events, \
                    COUNT(DISTINCT user_id) AS unique_users, \
                    COUNT(*) FILTER (WHERE action = 'generate') AS generates, \
                    COUNT(*) FILTER (WHERE action = 'process') AS processes, \
                    COUNT(*) FILTER (WHERE action = 'download') AS downloads \
             FROM usage_events WHERE created_at::date BETWEEN $1 AND $2",
        )
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query(
            "SELECT created_at::date AS date, \
                    COUNT(*) FILTER (WHERE action = 'generate') AS generates, \
                    COUNT(*) FILTER (WHERE action = 'process') AS processes, \
                    COUNT(*) FILTER (WHERE action = 'download') AS downloads \
             FROM usage_events WHERE created_at::date BETWEEN $1 AND $2 \
             GROUP BY date ORDER BY date DESC",
        )
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let daily_breakdown = rows
            .into_iter()
            .map(|row| {
                Ok(DailyUsage {
                    date: row.try_get("date")?,
                    generates: row.try_get("generates")?,
                    processes: row.try_get("processes")?,
                    downloads: row.try_get("downloads")?,
                })
            })
            .collect::<std::result::Result<Vec<_>, sqlx::Error>>()?;

        Ok(UsageResponse {
            total_events: totals.try_get("total_events")?,
            unique_users: totals.try_get("unique_users")?,
            generates: totals.try_get("generates")?,
            processes: totals.try_get("processes")?,
            downloads: totals.try_get("downloads")?,
            daily_breakdown,
        })
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_log \
             (admin_user_id, action, target_user_id, details, ip_address, user_agent) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(entry.admin_user_id)
        .bind(&entry.action)
        .bind(entry.target_user_id)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn audit_page(&self, limit: i64, offset: i64) -> Result<Vec<AuditLogEntryView>> {
        let entries = sqlx::query_as::<_, AuditLogEntryView>(
            "SELECT a.id, a.admin_user_id, admin_user.name AS admin_name, a.action, \
                    a.target_user_id, target_user.name AS target_name, a.details, \
                    a.ip_address, a.user_agent, a.created_at \
             FROM audit_log a \
             LEFT JOIN users admin_user ON admin_user.id = a.admin_user_id \
             LEFT JOIN users target_user ON target_user.id = a.target_user_id \
             ORDER BY a.created_at DESC, a.id DESC LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await?;
        Ok(())
    }
}
