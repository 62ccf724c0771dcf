//! Deadline-driven scheduler/executor.
//!
//! A `tokio::time::interval` tick loop walks every active auction each
//! period, running a pre-bid price guard ahead of close and the bid
//! placement retry loop at the bid deadline. Each auction is processed
//! against its own freshly-opened connection via `Store`, so one auction's
//! work never blocks another's.

pub mod reconciler;

use crate::cache::PriceCache;
use crate::config::Config;
use crate::credentials::CredentialManager;
use crate::market::{BidError, MarketClient};
use crate::models::{Auction, AuctionStatus, BidResult};
use crate::store::Store;
use crate::time_source::Clock;
use chrono::Duration as ChronoDuration;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tracing::{debug, error, info, warn};

const RETRY_DELAYS_MS: [u64; 3] = [100, 250, 500];
const MAX_BID_ATTEMPTS: usize = 4;
const TIME_WINDOW_CUTOFF_MS: i64 = 300;

pub struct Scheduler {
    store: Store,
    market: Arc<dyn MarketClient>,
    credentials: Arc<CredentialManager>,
    price_cache: Arc<PriceCache>,
    clock: Arc<dyn Clock>,
    config: Config,
}

impl Scheduler {
    pub fn new(
        store: Store,
        market: Arc<dyn MarketClient>,
        credentials: Arc<CredentialManager>,
        price_cache: Arc<PriceCache>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Self {
        Self {
            store,
            market,
            credentials,
            price_cache,
            clock,
            config,
        }
    }

    pub async fn run(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.tick_interval);
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }

    pub async fn tick(&self) {
        match self.store.active_auctions() {
            Ok(auctions) => {
                for auction in auctions {
                    self.process_auction(auction).await;
                }
            }
            Err(e) => error!(error = %e, "failed to load active auctions for tick"),
        }

        if let Err(e) = reconciler::reconcile(
            &self.store,
            self.market.as_ref(),
            &self.credentials,
            self.clock.as_ref(),
            self.config.outcome_settle_delay,
        )
        .await
        {
            error!(error = %e, "outcome reconciliation pass failed");
        }
    }

    async fn process_auction(&self, auction: Auction) {
        let now = self.clock.now();

        if auction.status == AuctionStatus::Executing && now >= auction.end_time_utc {
            self.recover_crashed_execution(&auction);
            return;
        }

        if auction.status == AuctionStatus::Scheduled && now >= auction.end_time_utc {
            self.cleanup_expired_schedule(&auction);
            return;
        }

        let pre_check_at = auction.end_time_utc - chrono_duration(self.config.pre_bid_check_offset);
        let bid_at = auction.end_time_utc - chrono_duration(self.config.bid_offset);

        if in_one_second_window(pre_check_at, now) {
            self.pre_bid_guard(&auction).await;
        }

        if in_one_second_window(bid_at, now) {
            self.execute(&auction).await;
        }
    }

    /// Crash recovery: an executor died mid-bid. Invariant 2 requires a
    /// BidAttempt to exist for every Failed auction; fabricate one if the
    /// crashed attempt never recorded one. This is a denormalization for
    /// the one-to-one invariant, not a true bid record.
    fn recover_crashed_execution(&self, auction: &Auction) {
        warn!(auction_id = auction.id, "recovering crashed execution");
        self.ensure_failure_attempt(auction.id, "Worker crashed during execution, auction ended");
        if let Err(e) = self.store.set_failed(auction.id) {
            error!(auction_id = auction.id, error = %e, "failed to mark crashed auction Failed");
        }
    }

    fn cleanup_expired_schedule(&self, auction: &Auction) {
        info!(auction_id = auction.id, "auction ended before worker could process it");
        self.ensure_failure_attempt(auction.id, "Auction ended before worker could process it");
        if let Err(e) = self.store.set_failed(auction.id) {
            error!(auction_id = auction.id, error = %e, "failed to mark expired schedule Failed");
        }
    }

    fn ensure_failure_attempt(&self, auction_id: i64, message: &str) {
        match self.store.get_bid_attempt(auction_id) {
            Ok(Some(_)) => {}
            Ok(None) => {
                if let Err(e) =
                    self.store
                        .record_bid_attempt(auction_id, BidResult::Failed, Some(message))
                {
                    error!(auction_id, error = %e, "failed to record cleanup bid attempt");
                }
            }
            Err(e) => error!(auction_id, error = %e, "failed to check for existing bid attempt"),
        }
    }

    async fn pre_bid_guard(&self, auction: &Auction) {
        let app_token = match self.credentials.app_token().await {
            Ok(t) => t,
            Err(e) => {
                warn!(auction_id = auction.id, error = %e, "pre-bid guard: credential fetch failed");
                return;
            }
        };

        match self.market.get_details(&auction.listing_id, &app_token).await {
            Ok(details) => {
                let now = self.clock.now();
                if let Err(e) = self.store.update_price(
                    auction.id,
                    details.current_price,
                    &details.listing_url,
                    &details.item_title,
                    &details.seller,
                    now,
                ) {
                    error!(auction_id = auction.id, error = %e, "failed to write through price");
                }
                if details.current_price.cents() > auction.max_bid.cents() {
                    info!(
                        auction_id = auction.id,
                        "current price exceeded max bid at T-60s, skipping"
                    );
                    if let Err(e) = self
                        .store
                        .set_skipped(auction.id, "Current price exceeded max bid at T−60s")
                    {
                        error!(auction_id = auction.id, error = %e, "failed to mark Skipped");
                    }
                }
            }
            Err(e) => {
                // The bid attempt itself remains the authoritative check;
                // a failed pre-check is logged but does not block execution.
                warn!(auction_id = auction.id, error = %e, "pre-bid guard fetch failed");
            }
        }
    }

    async fn execute(&self, auction: &Auction) {
        let claimed = match self.store.claim_for_execution(auction.id) {
            Ok(claimed) => claimed,
            Err(e) => {
                error!(auction_id = auction.id, error = %e, "claim CAS failed");
                return;
            }
        };
        if !claimed {
            debug!(auction_id = auction.id, "claim lost, another worker or a prior transition won");
            return;
        }

        let now = self.clock.now();
        if now >= auction.end_time_utc {
            self.fail_with_message(auction.id, "Auction ended before bid could be placed");
            return;
        }

        let user_token = match self
            .credentials
            .ensure_user_token_covers(auction.end_time_utc)
            .await
        {
            Ok(t) => t,
            Err(e) => {
                self.fail_with_message(auction.id, &format!("credential refresh failed: {e}"));
                return;
            }
        };

        for attempt in 0..MAX_BID_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(StdDuration::from_millis(RETRY_DELAYS_MS[attempt - 1])).await;
            }

            let now = self.clock.now();
            if now >= auction.end_time_utc - ChronoDuration::milliseconds(TIME_WINDOW_CUTOFF_MS) {
                self.fail_with_message(auction.id, "Ran out of time window for bid placement");
                return;
            }

            match self
                .market
                .place_bid(&auction.listing_id, auction.max_bid, &user_token)
                .await
            {
                Ok(()) => {
                    if let Err(e) = self.store.record_bid_attempt(auction.id, BidResult::Success, None) {
                        error!(auction_id = auction.id, error = %e, "failed to record success bid attempt");
                    }
                    if let Err(e) = self.store.set_bid_placed(auction.id) {
                        error!(auction_id = auction.id, error = %e, "failed to mark BidPlaced");
                    }
                    info!(auction_id = auction.id, attempt, "bid placed");
                    return;
                }
                Err(e @ BidError::Timeout) => {
                    warn!(auction_id = auction.id, attempt, error = %e, "timeout, always retryable");
                    continue;
                }
                Err(e) if e.is_retryable() && attempt + 1 < MAX_BID_ATTEMPTS => {
                    warn!(auction_id = auction.id, attempt, error = %e, "retryable bid failure");
                    continue;
                }
                Err(e) => {
                    self.fail_with_message(auction.id, &e.to_string());
                    return;
                }
            }
        }

        self.fail_with_message(auction.id, "All retry attempts exhausted");
    }

    fn fail_with_message(&self, auction_id: i64, message: &str) {
        if let Err(e) = self
            .store
            .record_bid_attempt(auction_id, BidResult::Failed, Some(message))
        {
            error!(auction_id, error = %e, "failed to record failure bid attempt");
        }
        if let Err(e) = self.store.set_failed(auction_id) {
            error!(auction_id, error = %e, "failed to mark Failed");
        }
    }
}

fn chrono_duration(d: StdDuration) -> ChronoDuration {
    ChronoDuration::from_std(d).unwrap_or(ChronoDuration::zero())
}

/// True when `target` is between `now` and one second in the future of
/// `now`: `0 <= target - now < 1s`.
fn in_one_second_window(target: chrono::DateTime<chrono::Utc>, now: chrono::DateTime<chrono::Utc>) -> bool {
    let diff = target - now;
    diff >= ChronoDuration::zero() && diff < ChronoDuration::seconds(1)
}
