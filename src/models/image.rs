use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A property photo and its enhanced rendition. `fingerprint` is the SHA-256
/// of the original upload bytes; `regenerate_count` tracks how many times
/// this original has been re-enhanced.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ListingImage {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub fingerprint: String,
    pub mime: String,
    pub size_bytes: i64,
    pub width: i32,
    pub height: i32,
    pub style: Option<String>,
    pub room_type: Option<String>,
    pub regenerate_count: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewListingImage {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub fingerprint: String,
    pub mime: String,
    pub size_bytes: i64,
    pub width: i32,
    pub height: i32,
    pub style: Option<String>,
    pub room_type: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ImageSummary {
    pub id: Uuid,
    pub url: String,
    pub hd_url: String,
    pub mime: String,
    pub width: i32,
    pub height: i32,
    pub style: Option<String>,
    pub room_type: Option<String>,
    pub regenerate_count: i32,
    pub regenerates_remaining: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct EnhanceResponse {
    pub image: ImageSummary,
    pub balance: i64,
}
