use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::errors::AppError;

/// What a usage event was recorded for. `Generate` and `Process` are tracked
/// for analytics without a charge; `Download` debits one token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UsageAction {
    Generate,
    Process,
    Download,
}

impl UsageAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            UsageAction::Generate => "generate",
            UsageAction::Process => "process",
            UsageAction::Download => "download",
        }
    }
}

impl std::str::FromStr for UsageAction {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generate" => Ok(UsageAction::Generate),
            "process" => Ok(UsageAction::Process),
            "download" => Ok(UsageAction::Download),
            other => Err(AppError::Validation(format!("Unknown usage action: {}", other))),
        }
    }
}

/// Immutable usage record. Never mutated or deleted once appended.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: i64,
    pub user_id: Uuid,
    pub action: String,
    pub balance_before: i64,
    pub balance_after: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct UsageQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub total_events: i64,
    pub unique_users: i64,
    pub generates: i64,
    pub processes: i64,
    pub downloads: i64,
    pub daily_breakdown: Vec<DailyUsage>,
}

#[derive(Debug, Serialize)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub generates: i64,
    pub processes: i64,
    pub downloads: i64,
}
