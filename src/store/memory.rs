use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    errors::{AppError, Result},
    models::{
        AuditLogEntry, AuditLogEntryView, DailyUsage, ListingImage, LoginInfo, NewAuditEntry,
        NewListingImage, NewUser, UsageAction, UsageEvent, UsageResponse, User,
    },
    store::{Debit, LedgerStore, RegenerateOutcome},
};

/// Process-local ledger backend. Every mutation runs inside one write-lock
/// section, which makes debits and regeneration reservations atomic with
/// respect to each other. State does not survive a restart; the durable
/// backend is [`crate::store::PgLedgerStore`].
pub struct MemoryLedgerStore {
    inner: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    users: HashMap<Uuid, User>,
    images: HashMap<Uuid, ListingImage>,
    fingerprints: HashMap<String, Uuid>,
    events: Vec<UsageEvent>,
    audit: Vec<AuditLogEntry>,
    next_event_id: i64,
    next_audit_id: i64,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryLedgerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryState {
    fn push_event(&mut self, user_id: Uuid, action: UsageAction, before: i64, after: i64) {
        self.next_event_id += 1;
        self.events.push(UsageEvent {
            id: self.next_event_id,
            user_id,
            action: action.as_str().to_string(),
            balance_before: before,
            balance_after: after,
            created_at: Utc::now(),
        });
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn create_user(&self, new: NewUser) -> Result<User> {
        let mut state = self.inner.write().await;
        if state
            .users
            .values()
            .any(|u| u.email.eq_ignore_ascii_case(&new.email))
        {
            return Err(AppError::Validation(
                "User with this email already exists".to_string(),
            ));
        }
        let user = User {
            id: Uuid::new_v4(),
            name: new.name,
            email: new.email,
            password_hash: new.password_hash,
            is_admin: false,
            balance: new.starting_balance,
            created_at: Utc::now(),
            last_login_at: None,
            last_login_ip: None,
            last_login_country: None,
            last_login_city: None,
        };
        state.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let state = self.inner.read().await;
        Ok(state
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let state = self.inner.read().await;
        Ok(state.users.get(&id).cloned())
    }

    async fn record_login(&self, id: Uuid, login: LoginInfo) -> Result<()> {
        let mut state = self.inner.write().await;
        let user = state.users.get_mut(&id).ok_or(AppError::UnknownUser)?;
        user.last_login_at = Some(Utc::now());
        user.last_login_ip = login.ip;
        user.last_login_country = login.country;
        user.last_login_city = login.city;
        Ok(())
    }

    async fn list_users(&self, limit: i64, offset: i64) -> Result<Vec<User>> {
        let state = self.inner.read().await;
        let mut users: Vec<User> = state.users.values().cloned().collect();
        users.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(users
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn delete_user(&self, id: Uuid) -> Result<()> {
        let mut state = self.inner.write().await;
        if state.users.remove(&id).is_none() {
            return Err(AppError::UnknownUser);
        }
        let owned: Vec<Uuid> = state
            .images
            .values()
            .filter(|img| img.owner_id == id)
            .map(|img| img.id)
            .collect();
        for image_id in owned {
            if let Some(img) = state.images.remove(&image_id) {
                state.fingerprints.remove(&img.fingerprint);
            }
        }
        Ok(())
    }

    async fn set_admin(&self, id: Uuid, is_admin: bool) -> Result<()> {
        let mut state = self.inner.write().await;
        let user = state.users.get_mut(&id).ok_or(AppError::UnknownUser)?;
        user.is_admin = is_admin;
        Ok(())
    }

    async fn debit(&self, user_id: Uuid, action: UsageAction) -> Result<Debit> {
        let mut state = self.inner.write().await;
        let user = state.users.get_mut(&user_id).ok_or(AppError::UnknownUser)?;
        if user.balance <= 0 {
            return Err(AppError::InsufficientBalance);
        }
        let before = user.balance;
        user.balance = before - 1;
        let after = user.balance;
        state.push_event(user_id, action, before, after);
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
        let mut state = self.inner.write().await;
        let user = state.users.get_mut(&user_id).ok_or(AppError::UnknownUser)?;
        user.balance += amount;
        Ok(user.balance)
    }

    async fn set_balance(&self, user_id: Uuid, amount: i64) -> Result<i64> {
        if amount < 0 {
            return Err(AppError::Validation(
                "Balance cannot be negative".to_string(),
            ));
        }
        let mut state = self.inner.write().await;
        let user = state.users.get_mut(&user_id).ok_or(AppError::UnknownUser)?;
        user.balance = amount;
        Ok(user.balance)
    }

    async fn record_usage(&self, user_id: Uuid, action: UsageAction) -> Result<i64> {
        let mut state = self.inner.write().await;
        let balance = state
            .users
            .get(&user_id)
            .ok_or(AppError::UnknownUser)?
            .balance;
        state.push_event(user_id, action, balance, balance);
        Ok(balance)
    }

    async fn create_image(&self, new: NewListingImage) -> Result<ListingImage> {
        let mut state = self.inner.write().await;
        if state.fingerprints.contains_key(&new.fingerprint) {
            return Err(AppError::Validation(
                "Image with this fingerprint already exists".to_string(),
            ));
        }
        let image = ListingImage {
            id: new.id,
            owner_id: new.owner_id,
            fingerprint: new.fingerprint.clone(),
            mime: new.mime,
            size_bytes: new.size_bytes,
            width: new.width,
            height: new.height,
            style: new.style,
            room_type: new.room_type,
            regenerate_count: 0,
            created_at: Utc::now(),
        };
        state.fingerprints.insert(new.fingerprint, image.id);
        state.images.insert(image.id, image.clone());
        Ok(image)
    }

    async fn find_image(&self, id: Uuid) -> Result<Option<ListingImage>> {
        let state = self.inner.read().await;
        Ok(state.images.get(&id).cloned())
    }

    async fn find_image_by_fingerprint(&self, fingerprint: &str) -> Result<Option<ListingImage>> {
        let state = self.inner.read().await;
        Ok(state
            .fingerprints
            .get(fingerprint)
            .and_then(|id| state.images.get(id))
            .cloned())
    }

    async fn list_images(
        &self,
        owner_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ListingImage>> {
        let state = self.inner.read().await;
        let mut images: Vec<ListingImage> = state
            .images
            .values()
            .filter(|img| img.owner_id == owner_id)
            .cloned()
            .collect();
        images.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(images
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn reserve_regeneration(
        &self,
        fingerprint: &str,
        max: i32,
    ) -> Result<RegenerateOutcome> {
        let mut state = self.inner.write().await;
        let image_id = *state
            .fingerprints
            .get(fingerprint)
            .ok_or(AppError::NotFound)?;
        let image = state.images.get_mut(&image_id).ok_or(AppError::NotFound)?;
        if image.regenerate_count >= max {
            return Ok(RegenerateOutcome {
                allowed: false,
                count: image.regenerate_count,
                remaining: 0,
            });
        }
        image.regenerate_count += 1;
        Ok(RegenerateOutcome {
            allowed: true,
            count: image.regenerate_count,
            remaining: max - image.regenerate_count,
        })
    }

    async fn release_regeneration(&self, fingerprint: &str) -> Result<()> {
        let mut state = self.inner.write().await;
        let image_id = *state
            .fingerprints
            .get(fingerprint)
            .ok_or(AppError::NotFound)?;
        let image = state.images.get_mut(&image_id).ok_or(AppError::NotFound)?;
        image.regenerate_count = (image.regenerate_count - 1).max(0);
        Ok(())
    }

    async fn regeneration_count(&self, fingerprint: &str) -> Result<i32> {
        let state = self.inner.read().await;
        Ok(state
            .fingerprints
            .get(fingerprint)
            .and_then(|id| state.images.get(id))
            .map(|img| img.regenerate_count)
            .unwrap_or(0))
    }

    async fn usage_stats(&self, from: NaiveDate, to: NaiveDate) -> Result<UsageResponse> {
        let state = self.inner.read().await;
        let mut total_events = 0i64;
        let mut users = HashSet::new();
        let mut generates = 0i64;
        let mut processes = 0i64;
        let mut downloads = 0i64;
        let mut daily: BTreeMap<NaiveDate, DailyUsage> = BTreeMap::new();

        for event in &state.events {
            let date = event.created_at.date_naive();
            if date < from || date > to {
                continue;
            }
            total_events += 1;
            users.insert(event.user_id);
            let day = daily.entry(date).or_insert_with(|| DailyUsage {
                date,
                generates: 0,
                processes: 0,
                downloads: 0,
            });
            match event.action.as_str() {
                "generate" => {
                    generates += 1;
                    day.generates += 1;
                }
                "process" => {
                    processes += 1;
                    day.processes += 1;
                }
                "download" => {
                    downloads += 1;
                    day.downloads += 1;
                }
                _ => {}
            }
        }

        Ok(UsageResponse {
            total_events,
            unique_users: users.len() as i64,
            generates,
            processes,
            downloads,
            daily_breakdown: daily.into_values().rev().collect(),
        })
    }

    async fn append_audit(&self, entry: NewAuditEntry) -> Result<()> {
        let mut state = self.inner.write().await;
        state.next_audit_id += 1;
        let record = AuditLogEntry {
            id: state.next_audit_id,
            admin_user_id: entry.admin_user_id,
            action: entry.action,
            target_user_id: entry.target_user_id,
            details: entry.details,
            ip_address: entry.ip_address,
            user_agent: entry.user_agent,
            created_at: Utc::now(),
        };
        state.audit.push(record);
        Ok(())
    }

    async fn audit_page(&self, limit: i64, offset: i64) -> Result<Vec<AuditLogEntryView>> {
        let state = self.inner.read().await;
        Ok(state
            .audit
            .iter()
            .rev()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .map(|entry| AuditLogEntryView {
                id: entry.id,
                admin_user_id: entry.admin_user_id,
                admin_name: state.users.get(&entry.admin_user_id).map(|u| u.name.clone()),
                action: entry.action.clone(),
                target_user_id: entry.target_user_id,
                target_name: state
                    .users
                    .get(&entry.target_user_id)
                    .map(|u| u.name.clone()),
                details: entry.details.clone(),
                ip_address: entry.ip_address.clone(),
                user_agent: entry.user_agent.clone(),
                created_at: entry.created_at,
            })
            .collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}
