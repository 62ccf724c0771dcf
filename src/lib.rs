pub mod api;
pub mod auth;
pub mod cache;
pub mod config;
pub mod credentials;
pub mod error;
pub mod market;
pub mod middleware;
pub mod models;
pub mod money;
pub mod scheduler;
pub mod state_machine;
pub mod store;
pub mod time_source;

use cache::PriceCache;
use config::Config;
use credentials::CredentialManager;
use market::MarketClient;
use std::sync::Arc;
use store::Store;
use time_source::Clock;

/// Shared handles wired once in `main` and passed to every IngestAPI
/// handler through axum's `State` extractor.
pub struct AppState {
    pub store: Store,
    pub price_cache: Arc<PriceCache>,
    pub market: Arc<dyn MarketClient>,
    pub credentials: Arc<CredentialManager>,
    pub clock: Arc<dyn Clock>,
    pub config: Config,
}
