use anyhow::Result;
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    pub database_url: Option<String>,
    pub storage_backend: StorageBackend,
    pub vault_dir: String,
    pub jwt_secret: String,
    pub max_file_size: usize,
    pub allowed_mime_types: Vec<String>,
    pub max_image_dimension: u32,
    pub starting_balance: i64,
    pub enhancer_url: Option<String>,
    pub enhancer_api_key: Option<String>,
    pub enhancer_timeout_secs: u64,
    pub geo_lookup_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok();

        // Durable backend whenever a database is configured, unless overridden.
        let storage_backend = match env::var("STORAGE_BACKEND").ok().as_deref() {
            Some("memory") => StorageBackend::Memory,
            Some("postgres") => StorageBackend::Postgres,
            Some(other) => anyhow::bail!("Unknown STORAGE_BACKEND: {}", other),
            None if database_url.is_some() => StorageBackend::Postgres,
            None => StorageBackend::Memory,
        };

        Ok(Config {
            port: env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()?,
            database_url,
            storage_backend,
            vault_dir: env::var("VAULT_DIR").unwrap_or_else(|_| "./vault".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "your-secret-key".to_string()),
            max_file_size: env::var("MAX_FILE_SIZE")
                .unwrap_or_else(|_| "10485760".to_string()) // 10MB
                .parse()?,
            allowed_mime_types: env::var("ALLOWED_MIME_TYPES")
                .unwrap_or_else(|_| "image/jpeg,image/png,image/webp".to_string())
                .split(',')
                .map(|s| s.trim().to_string())
                .collect(),
            max_image_dimension: env::var("MAX_IMAGE_DIMENSION")
                .unwrap_or_else(|_| "8192".to_string())
                .parse()?,
            starting_balance: env::var("STARTING_BALANCE")
                .unwrap_or_else(|_| "5".to_string())
                .parse()?,
            enhancer_url: env::var("ENHANCER_URL").ok(),
            enhancer_api_key: env::var("ENHANCER_API_KEY").ok(),
            enhancer_timeout_secs: env::var("ENHANCER_TIMEOUT_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()?,
            geo_lookup_url: env::var("GEO_LOOKUP_URL").ok(),
        })
    }
}
