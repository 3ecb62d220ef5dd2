use std::sync::Arc;

use crate::{
    config::Config,
    services::{GeoLocator, ImageEnhancer},
    storage::ImageVault,
    store::LedgerStore,
};

pub mod admin;
pub mod auth;
pub mod health;
pub mod images;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn LedgerStore>,
    pub enhancer: Arc<dyn ImageEnhancer>,
    pub geo: Arc<dyn GeoLocator>,
    pub vault: Arc<ImageVault>,
    pub config: Config,
}
