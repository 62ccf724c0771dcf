//! Application and user OAuth credential lifecycle.
//!
//! Two token kinds (app, user) each refreshed ahead of expiry by a fixed
//! margin, client-credentials for the app token and refresh-token grant for
//! the user token. Refresh is single-flight per token kind through the same
//! `Coalescer` the price cache uses for reads.

use crate::cache::coalescer::{Coalescer, ProducerError};
use crate::config::Config;
use crate::market::{MarketClient, MarketError};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

const REFRESH_MARGIN_SECONDS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TokenKind {
    App,
    User,
}

#[derive(Debug, Clone)]
struct TokenState {
    access_token: String,
    expires_at: DateTime<Utc>,
    /// A user-token grant may rotate the refresh token; carried alongside
    /// the access token so `refresh()` can store it once the coalescer
    /// hands back the winning result.
    rotated_refresh_token: Option<String>,
}

impl TokenState {
    fn expired() -> Self {
        Self {
            access_token: String::new(),
            expires_at: DateTime::<Utc>::MIN_UTC,
            rotated_refresh_token: None,
        }
    }

    fn needs_refresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now + Duration::seconds(REFRESH_MARGIN_SECONDS)
    }
}

pub struct CredentialManager {
    market: Arc<dyn MarketClient>,
    coalescer: Coalescer<TokenKind, TokenState>,
    app: RwLock<TokenState>,
    user: RwLock<TokenState>,
    user_refresh_token: RwLock<String>,
}

impl CredentialManager {
    pub fn new(market: Arc<dyn MarketClient>, config: &Config) -> Self {
        Self {
            market,
            coalescer: Coalescer::new(),
            app: RwLock::new(TokenState::expired()),
            user: RwLock::new(TokenState::expired()),
            user_refresh_token: RwLock::new(config.marketplace_user_refresh_token.clone()),
        }
    }

    pub async fn app_token(&self) -> Result<String, CredentialError> {
        self.ensure_fresh(TokenKind::App).await
    }

    pub async fn user_token(&self) -> Result<String, CredentialError> {
        self.ensure_fresh(TokenKind::User).await
    }

    /// Scheduler-side preemptive refresh: the user token must outlive the
    /// auction's close by the refresh margin, not just "now" by the margin.
    pub async fn ensure_user_token_covers(
        &self,
        end_time_utc: DateTime<Utc>,
    ) -> Result<String, CredentialError> {
        let expires_at = self.user.read().await.expires_at;
        if expires_at < end_time_utc - Duration::seconds(REFRESH_MARGIN_SECONDS) {
            return self.refresh(TokenKind::User).await;
        }
        Ok(self.user.read().await.access_token.clone())
    }

    async fn ensure_fresh(&self, kind: TokenKind) -> Result<String, CredentialError> {
        let now = Utc::now();
        let stale = match kind {
            TokenKind::App => self.app.read().await.needs_refresh(now),
            TokenKind::User => self.user.read().await.needs_refresh(now),
        };
        if stale {
            return self.refresh(kind).await;
        }
        Ok(match kind {
            TokenKind::App => self.app.read().await.access_token.clone(),
            TokenKind::User => self.user.read().await.access_token.clone(),
        })
    }

    async fn refresh(&self, kind: TokenKind) -> Result<String, CredentialError> {
        let market = self.market.clone();
        let refresh_token = self.user_refresh_token.read().await.clone();

        let result = self
            .coalescer
            .get_or_execute(kind, move || {
                let market = market.clone();
                let refresh_token = refresh_token.clone();
                async move {
                    let grant = match kind {
                        TokenKind::App => market.refresh_app_token().await,
                        TokenKind::User => market.refresh_user_token(&refresh_token).await,
                    };
                    grant
                        .map(|t| TokenState {
                            access_token: t.access_token,
                            expires_at: t.expires_at,
                            rotated_refresh_token: t.refresh_token,
                        })
                        .map_err(|e| ProducerError(Arc::from(e.to_string().as_str())))
                }
            })
            .await;

        match result {
            Ok(state) => {
                info!(?kind, expires_at = %state.expires_at, "credential refreshed");
                if kind == TokenKind::User {
                    if let Some(new_refresh_token) = state.rotated_refresh_token.clone() {
                        self.rotate_user_refresh_token(new_refresh_token).await;
                    }
                }
                match kind {
                    TokenKind::App => *self.app.write().await = state.clone(),
                    TokenKind::User => *self.user.write().await = state.clone(),
                }
                Ok(state.access_token)
            }
            Err(e) => {
                // invalid_grant/invalid_client are fatal: no automatic
                // re-auth loop, surfaced to operators.
                error!(?kind, error = %e, "credential refresh failed");
                Err(CredentialError::RefreshFailed(e.to_string()))
            }
        }
    }

    /// Replaces the stored refresh token, used when a refresh response
    /// rotates it.
    pub async fn rotate_user_refresh_token(&self, new_token: String) {
        *self.user_refresh_token.write().await = new_token;
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("credential refresh failed: {0}")]
    RefreshFailed(String),
}

impl From<MarketError> for CredentialError {
    fn from(err: MarketError) -> Self {
        CredentialError::RefreshFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::{BidError, BidOutcome, ItemDetails, TokenResponse};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    struct FakeMarket {
        app_calls: AtomicUsize,
    }

    #[async_trait]
    impl MarketClient for FakeMarket {
        async fn get_details(
            &self,
            _listing_id: &str,
            _app_token: &str,
        ) -> Result<ItemDetails, MarketError> {
            unimplemented!()
        }

        async fn place_bid(
            &self,
            _listing_id: &str,
            _amount: crate::money::Money,
            _user_token: &str,
        ) -> Result<(), BidError> {
            unimplemented!()
        }

        async fn get_bid_outcome(
            &self,
            _listing_id: &str,
            _app_token: &str,
        ) -> Result<Option<BidOutcome>, MarketError> {
            unimplemented!()
        }

        async fn refresh_app_token(&self) -> Result<TokenResponse, MarketError> {
            self.app_calls.fetch_add(1, Ordering::SeqCst);
            Ok(TokenResponse {
                access_token: "app-token-1".into(),
                expires_at: Utc::now() + Duration::hours(2),
                refresh_token: None,
            })
        }

        async fn refresh_user_token(&self, _refresh_token: &str) -> Result<TokenResponse, MarketError> {
            Ok(TokenResponse {
                access_token: "user-token-1".into(),
                expires_at: Utc::now() + Duration::hours(2),
                refresh_token: Some("rotated-refresh".into()),
            })
        }
    }

    fn config() -> Config {
        Config {
            database_path: String::new(),
            port: 0,
            marketplace_env: "sandbox".into(),
            marketplace_client_id: "id".into(),
            marketplace_client_secret: "secret".into(),
            marketplace_user_refresh_token: "seed-refresh".into(),
            jwt_secret: "s".into(),
            jwt_expiry_days: 30,
            bid_offset: StdDuration::from_secs(3),
            pre_bid_check_offset: StdDuration::from_secs(60),
            outcome_settle_delay: StdDuration::from_secs(30),
            tick_interval: StdDuration::from_millis(500),
            refresh_parallelism: 5,
            price_ttl: StdDuration::from_secs(60),
            market_read_timeout: StdDuration::from_secs(5),
            market_bid_timeout: StdDuration::from_millis(600),
            market_token_timeout: StdDuration::from_secs(10),
        }
    }

    #[tokio::test]
    async fn app_token_is_fetched_once_then_cached() {
        let market = Arc::new(FakeMarket {
            app_calls: AtomicUsize::new(0),
        });
        let manager = CredentialManager::new(market.clone(), &config());

        let t1 = manager.app_token().await.unwrap();
        let t2 = manager.app_token().await.unwrap();
        assert_eq!(t1, t2);
        assert_eq!(market.app_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn user_token_preemptive_refresh_covers_auction_end() {
        let market = Arc::new(FakeMarket {
            app_calls: AtomicUsize::new(0),
        });
        let manager = CredentialManager::new(market, &config());

        let far_future = Utc::now() + Duration::hours(3);
        let token = manager.ensure_user_token_covers(far_future).await.unwrap();
        assert_eq!(token, "user-token-1");
    }

    #[tokio::test]
    async fn user_refresh_rotates_the_stored_refresh_token() {
        let market = Arc::new(FakeMarket {
            app_calls: AtomicUsize::new(0),
        });
        let manager = CredentialManager::new(market, &config());

        assert_eq!(*manager.user_refresh_token.read().await, "seed-refresh");
        manager.user_token().await.unwrap();
        assert_eq!(*manager.user_refresh_token.read().await, "rotated-refresh");
    }
}
