//! Auction sniper backend: wires the scheduler, the marketplace client, and
//! the IngestAPI together and serves them on one process.

use anyhow::Context;
use auction_sniper_backend::api::routes::{
    add_auction, bulk_add, cancel, get_logs, get_status, health, list_auctions,
};
use auction_sniper_backend::auth::{api::authenticate, auth_middleware, AuthState, JwtHandler};
use auction_sniper_backend::cache::PriceCache;
use auction_sniper_backend::config::Config;
use auction_sniper_backend::credentials::CredentialManager;
use auction_sniper_backend::market::ebay::EbayMarketClient;
use auction_sniper_backend::market::MarketClient;
use auction_sniper_backend::middleware::rate_limit::rate_limit_middleware;
use auction_sniper_backend::middleware::{request_logging, RateLimitConfig, RateLimitLayer};
use auction_sniper_backend::scheduler::Scheduler;
use auction_sniper_backend::store::Store;
use auction_sniper_backend::time_source::{Clock, SystemClock};
use auction_sniper_backend::AppState;
use axum::{
    extract::DefaultBodyLimit,
    middleware as axum_mw,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = Config::from_env().context("loading configuration")?;

    let store = Store::new(config.database_path.clone());
    store.init().context("initializing database schema")?;

    let market: Arc<dyn MarketClient> =
        Arc::new(EbayMarketClient::new(&config).context("constructing marketplace client")?);

    let credentials = Arc::new(CredentialManager::new(market.clone(), &config));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let app_token = Arc::new(tokio::sync::RwLock::new(String::new()));
    let price_cache = Arc::new(PriceCache::new(
        store.clone(),
        market.clone(),
        clock.clone(),
        &config,
        app_token,
    ));

    let scheduler = Arc::new(Scheduler::new(
        store.clone(),
        market.clone(),
        credentials.clone(),
        price_cache.clone(),
        clock.clone(),
        config.clone(),
    ));
    tokio::spawn(scheduler.run());

    let jwt_handler = Arc::new(JwtHandler::new(
        config.jwt_secret.clone(),
        config.jwt_expiry_days,
    ));

    let app_state = Arc::new(AppState {
        store,
        price_cache,
        market,
        credentials,
        clock,
        config: config.clone(),
    });

    let auth_state = AuthState {
        jwt_handler: jwt_handler.clone(),
    };

    let rate_limiter = RateLimitLayer::new(RateLimitConfig::default());

    let protected_routes = Router::new()
        .route("/sniper/add", post(add_auction))
        .route("/sniper/bulk", post(bulk_add))
        .route("/sniper/list", get(list_auctions))
        .route("/sniper/:id/status", get(get_status))
        .route("/sniper/:id", delete(cancel))
        .route("/sniper/:id/logs", get(get_logs))
        .with_state(app_state)
        .layer(axum_mw::from_fn_with_state(jwt_handler, auth_middleware));

    let auth_routes = Router::new()
        .route("/auth", post(authenticate))
        .with_state(auth_state);

    let app = Router::new()
        .merge(protected_routes)
        .merge(auth_routes)
        .route("/health", get(health))
        .layer(axum_mw::from_fn_with_state(rate_limiter, rate_limit_middleware))
        .layer(axum_mw::from_fn(request_logging))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(1024 * 1024));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    info!(%addr, "starting auction sniper backend");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
