//! Refresh-on-read price cache with bounded-parallel list refresh.
//!
//! A row's price is refreshed inline on read once it's past its TTL, and a
//! failed refresh (including a rate-limited one) leaves the stored price and
//! `last_refresh_utc` untouched rather than erroring the read. Listing all
//! auctions refreshes every stale row through a fixed-size pool of workers
//! bounded by a semaphore. Every refresh, whatever triggers it, is
//! deduplicated per `listing_id` through the shared `Coalescer`.

use crate::cache::coalescer::{Coalescer, ProducerError};
use crate::config::Config;
use crate::market::{MarketClient, MarketError};
use crate::models::Auction;
use crate::store::Store;
use crate::time_source::Clock;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct RefreshOutcome {
    rate_limited: bool,
}

pub struct PriceCache {
    store: Store,
    market: Arc<dyn MarketClient>,
    coalescer: Coalescer<String, RefreshOutcome>,
    clock: Arc<dyn Clock>,
    ttl: ChronoDuration,
    refresh_parallelism: usize,
    app_token: Arc<tokio::sync::RwLock<String>>,
}

impl PriceCache {
    pub fn new(
        store: Store,
        market: Arc<dyn MarketClient>,
        clock: Arc<dyn Clock>,
        config: &Config,
        app_token: Arc<tokio::sync::RwLock<String>>,
    ) -> Self {
        Self {
            store,
            market,
            coalescer: Coalescer::new(),
            clock,
            ttl: ChronoDuration::from_std(config.price_ttl).unwrap_or(ChronoDuration::seconds(60)),
            refresh_parallelism: config.refresh_parallelism,
            app_token,
        }
    }

    async fn refresh_one(&self, listing_id: &str, auction_id: i64) -> Result<(), ProducerError> {
        let token = self.app_token.read().await.clone();
        let outcome = self
            .coalescer
            .get_or_execute(listing_id.to_string(), || async {
                match self.market.get_details(listing_id, &token).await {
                    Ok(details) => {
                        if let Err(e) = self.store.update_price(
                            auction_id,
                            details.current_price,
                            &details.listing_url,
                            &details.item_title,
                            &details.seller,
                            self.clock.now(),
                        ) {
                            return Err(ProducerError(Arc::from(e.to_string().as_str())));
                        }
                        debug!(listing_id, price = %details.current_price, "refreshed price");
                        Ok(RefreshOutcome { rate_limited: false })
                    }
                    Err(MarketError::RateLimited) => {
                        warn!(listing_id, "rate limited on refresh, serving stale data");
                        Ok(RefreshOutcome { rate_limited: true })
                    }
                    Err(e) => {
                        warn!(listing_id, error = %e, "refresh failed, serving stale data");
                        Ok(RefreshOutcome { rate_limited: false })
                    }
                }
            })
            .await?;

        let _ = outcome;
        Ok(())
    }

    /// Single-auction read path: refresh inline if stale, then return the
    /// freshest row the store has.
    pub async fn get_one(&self, auction_id: i64) -> Result<Option<Auction>, ProducerError> {
        let auction = match self
            .store
            .get_auction(auction_id)
            .map_err(|e| ProducerError(Arc::from(e.to_string().as_str())))?
        {
            Some(a) => a,
            None => return Ok(None),
        };

        if auction.needs_refresh(self.clock.now(), self.ttl) {
            self.refresh_one(&auction.listing_id, auction.id).await?;
        }

        self.store
            .get_auction(auction_id)
            .map_err(|e| ProducerError(Arc::from(e.to_string().as_str())))
    }

    /// List read path: refresh every stale non-terminal row, bounded to
    /// `refresh_parallelism` concurrent workers, then re-read the full set.
    pub async fn list_all(&self) -> Result<Vec<Auction>, ProducerError> {
        let auctions = self
            .store
            .list_auctions()
            .map_err(|e| ProducerError(Arc::from(e.to_string().as_str())))?;

        let now = self.clock.now();
        let stale: Vec<(i64, String)> = auctions
            .iter()
            .filter(|a| a.needs_refresh(now, self.ttl))
            .map(|a| (a.id, a.listing_id.clone()))
            .collect();

        if !stale.is_empty() {
            let semaphore = Arc::new(Semaphore::new(self.refresh_parallelism.max(1)));
            let tasks = stale.into_iter().map(|(auction_id, listing_id)| {
                let semaphore = semaphore.clone();
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore not closed");
                    self.refresh_one(&listing_id, auction_id).await
                }
            });
            futures_util::future::join_all(tasks).await;
        }

        self.store
            .list_auctions()
            .map_err(|e| ProducerError(Arc::from(e.to_string().as_str())))
    }
}
