//! End-to-end scheduler scenarios driven against a scripted `MarketClient`
//! and a `FrozenClock`, mirroring the literal scenarios used to validate
//! the auction lifecycle (skip at T-60s, successful bid, timeout-then-retry,
//! concurrent-execute idempotency, rate-limited list refresh, and an
//! already-ended auction at schedule time).

use async_trait::async_trait;
use auction_sniper_backend::cache::PriceCache;
use auction_sniper_backend::config::Config;
use auction_sniper_backend::credentials::CredentialManager;
use auction_sniper_backend::market::{BidError, BidOutcome, ItemDetails, MarketClient, MarketError, TokenResponse};
use auction_sniper_backend::models::{AuctionStatus, BidResult};
use auction_sniper_backend::money::Money;
use auction_sniper_backend::scheduler::Scheduler;
use auction_sniper_backend::store::{NewAuction, Store};
use auction_sniper_backend::time_source::{Clock, FrozenClock};
use chrono::Utc;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

struct ScriptedMarket {
    get_details: Mutex<HashMap<String, VecDeque<Result<ItemDetails, MarketError>>>>,
    place_bid: Mutex<HashMap<String, VecDeque<Result<(), BidError>>>>,
    get_bid_outcome: Mutex<HashMap<String, VecDeque<Result<Option<BidOutcome>, MarketError>>>>,
    get_details_calls: AtomicUsize,
    place_bid_calls: AtomicUsize,
}

impl ScriptedMarket {
    fn new() -> Self {
        Self {
            get_details: Mutex::new(HashMap::new()),
            place_bid: Mutex::new(HashMap::new()),
            get_bid_outcome: Mutex::new(HashMap::new()),
            get_details_calls: AtomicUsize::new(0),
            place_bid_calls: AtomicUsize::new(0),
        }
    }

    fn push_get_details(&self, listing_id: &str, result: Result<ItemDetails, MarketError>) {
        self.get_details
            .lock()
            .unwrap()
            .entry(listing_id.to_string())
            .or_default()
            .push_back(result);
    }

    fn push_place_bid(&self, listing_id: &str, result: Result<(), BidError>) {
        self.place_bid
            .lock()
            .unwrap()
            .entry(listing_id.to_string())
            .or_default()
            .push_back(result);
    }

    fn push_get_bid_outcome(&self, listing_id: &str, result: Result<Option<BidOutcome>, MarketError>) {
        self.get_bid_outcome
            .lock()
            .unwrap()
            .entry(listing_id.to_string())
            .or_default()
            .push_back(result);
    }
}

#[async_trait]
impl MarketClient for ScriptedMarket {
    async fn get_details(&self, listing_id: &str, _app_token: &str) -> Result<ItemDetails, MarketError> {
        self.get_details_calls.fetch_add(1, Ordering::SeqCst);
        let mut map = self.get_details.lock().unwrap();
        match map.get_mut(listing_id).and_then(|q| q.pop_front()) {
            Some(r) => r,
            None => Err(MarketError::Other("no scripted response".into())),
        }
    }

    async fn place_bid(&self, listing_id: &str, _amount: Money, _user_token: &str) -> Result<(), BidError> {
        self.place_bid_calls.fetch_add(1, Ordering::SeqCst);
        let mut map = self.place_bid.lock().unwrap();
        match map.get_mut(listing_id).and_then(|q| q.pop_front()) {
            Some(r) => r,
            None => Err(BidError::Other {
                code: "0".into(),
                message: "no scripted response".into(),
            }),
        }
    }

    async fn get_bid_outcome(
        &self,
        listing_id: &str,
        _app_token: &str,
    ) -> Result<Option<BidOutcome>, MarketError> {
        let mut map = self.get_bid_outcome.lock().unwrap();
        match map.get_mut(listing_id).and_then(|q| q.pop_front()) {
            Some(r) => r,
            None => Ok(None),
        }
    }

    async fn refresh_app_token(&self) -> Result<TokenResponse, MarketError> {
        Ok(TokenResponse {
            access_token: "app-token".into(),
            expires_at: Utc::now() + chrono::Duration::hours(2),
            refresh_token: None,
        })
    }

    async fn refresh_user_token(&self, _refresh_token: &str) -> Result<TokenResponse, MarketError> {
        Ok(TokenResponse {
            access_token: "user-token".into(),
            expires_at: Utc::now() + chrono::Duration::hours(2),
            refresh_token: None,
        })
    }
}

fn test_config() -> Config {
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

fn temp_store() -> Store {
    let file = tempfile::NamedTempFile::new().unwrap();
    let store = Store::new(file.path().to_str().unwrap().to_string());
    std::mem::forget(file);
    store.init().unwrap();
    store
}

fn make_scheduler(
    store: Store,
    market: Arc<ScriptedMarket>,
    clock: Arc<FrozenClock>,
) -> Arc<Scheduler> {
    let config = test_config();
    let market: Arc<dyn MarketClient> = market;
    let clock_dyn: Arc<dyn Clock> = clock;
    let credentials = Arc::new(CredentialManager::new(market.clone(), &config));
    let app_token = Arc::new(tokio::sync::RwLock::new(String::new()));
    let price_cache = Arc::new(PriceCache::new(
        store.clone(),
        market.clone(),
        clock_dyn.clone(),
        &config,
        app_token,
    ));
    Arc::new(Scheduler::new(
        store,
        market,
        credentials,
        price_cache,
        clock_dyn,
        config,
    ))
}

#[tokio::test]
async fn skip_at_t_minus_60s() {
    let store = temp_store();
    let now = Utc::now();
    let end_time = now + chrono::Duration::seconds(65);
    let auction = store
        .create_auction(NewAuction {
            listing_id: "listing-skip".into(),
            listing_url: "u".into(),
            item_title: "t".into(),
            seller: "s".into(),
            current_price: Money::parse("90.00").unwrap(),
            currency: "USD".into(),
            max_bid: Money::parse("100.00").unwrap(),
            end_time_utc: end_time,
        })
        .unwrap();

    let market = Arc::new(ScriptedMarket::new());
    market.push_get_details(
        "listing-skip",
        Ok(ItemDetails {
            listing_url: "u".into(),
            item_title: "t".into(),
            seller: "s".into(),
            current_price: Money::parse("150.00").unwrap(),
            currency: "USD".into(),
            end_time_utc: end_time,
            listing_type: "AUCTION".into(),
        }),
    );

    let clock = Arc::new(FrozenClock::at(now + chrono::Duration::seconds(5)));
    let scheduler = make_scheduler(store.clone(), market, clock);

    scheduler.tick().await;

    let fetched = store.get_auction(auction.id).unwrap().unwrap();
    assert_eq!(fetched.status, AuctionStatus::Skipped);
    assert_eq!(
        fetched.skip_reason.as_deref(),
        Some("Current price exceeded max bid at T\u{2212}60s")
    );
    assert!(store.get_bid_attempt(auction.id).unwrap().is_none());
}

#[tokio::test]
async fn successful_bid_then_outcome_reconciled() {
    let store = temp_store();
    let now = Utc::now();
    let end_time = now + chrono::Duration::seconds(5);
    let auction = store
        .create_auction(NewAuction {
            listing_id: "listing-win".into(),
            listing_url: "u".into(),
            item_title: "t".into(),
            seller: "s".into(),
            current_price: Money::parse("90.00").unwrap(),
            currency: "USD".into(),
            max_bid: Money::parse("120.00").unwrap(),
            end_time_utc: end_time,
        })
        .unwrap();

    let market = Arc::new(ScriptedMarket::new());
    market.push_place_bid("listing-win", Ok(()));
    market.push_get_bid_outcome(
        "listing-win",
        Ok(Some(BidOutcome {
            auction_status: "ENDED".into(),
            high_bidder: true,
            current_price: Some(Money::parse("110.00").unwrap()),
        })),
    );

    let clock = Arc::new(FrozenClock::at(now + chrono::Duration::seconds(2)));
    let scheduler = make_scheduler(store.clone(), market, clock.clone());

    scheduler.tick().await;

    let fetched = store.get_auction(auction.id).unwrap().unwrap();
    assert_eq!(fetched.status, AuctionStatus::BidPlaced);
    let attempt = store.get_bid_attempt(auction.id).unwrap().unwrap();
    assert_eq!(attempt.result, BidResult::Success);

    clock.set(now + chrono::Duration::seconds(36));
    scheduler.tick().await;

    let settled = store.get_auction(auction.id).unwrap().unwrap();
    assert_eq!(settled.outcome, auction_sniper_backend::models::AuctionOutcome::Won);
    assert_eq!(settled.final_price.unwrap().to_string(), "110.00");
}

#[tokio::test]
async fn timeout_then_retry_succeeds() {
    let store = temp_store();
    let now = Utc::now();
    let end_time = now + chrono::Duration::seconds(5);
    let auction = store
        .create_auction(NewAuction {
            listing_id: "listing-retry".into(),
            listing_url: "u".into(),
            item_title: "t".into(),
            seller: "s".into(),
            current_price: Money::parse("90.00").unwrap(),
            currency: "USD".into(),
            max_bid: Money::parse("120.00").unwrap(),
            end_time_utc: end_time,
        })
        .unwrap();

    let market = Arc::new(ScriptedMarket::new());
    market.push_place_bid("listing-retry", Err(BidError::Timeout));
    market.push_place_bid("listing-retry", Ok(()));

    let clock = Arc::new(FrozenClock::at(now + chrono::Duration::seconds(2)));
    let scheduler = make_scheduler(store.clone(), market.clone(), clock);

    scheduler.tick().await;

    let fetched = store.get_auction(auction.id).unwrap().unwrap();
    assert_eq!(fetched.status, AuctionStatus::BidPlaced);
    let attempt = store.get_bid_attempt(auction.id).unwrap().unwrap();
    assert_eq!(attempt.result, BidResult::Success);
    assert_eq!(market.place_bid_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn concurrent_execute_produces_one_bid_attempt() {
    let store = temp_store();
    let now = Utc::now();
    let end_time = now + chrono::Duration::seconds(5);
    let auction = store
        .create_auction(NewAuction {
            listing_id: "listing-concurrent".into(),
            listing_url: "u".into(),
            item_title: "t".into(),
            seller: "s".into(),
            current_price: Money::parse("90.00").unwrap(),
            currency: "USD".into(),
            max_bid: Money::parse("120.00").unwrap(),
            end_time_utc: end_time,
        })
        .unwrap();

    let market = Arc::new(ScriptedMarket::new());
    market.push_place_bid("listing-concurrent", Ok(()));
    market.push_place_bid("listing-concurrent", Ok(()));

    let clock = Arc::new(FrozenClock::at(now + chrono::Duration::seconds(2)));
    let scheduler_a = make_scheduler(store.clone(), market.clone(), clock.clone());
    let scheduler_b = make_scheduler(store.clone(), market.clone(), clock);

    let (_, _) = tokio::join!(scheduler_a.tick(), scheduler_b.tick());

    let fetched = store.get_auction(auction.id).unwrap().unwrap();
    assert_eq!(fetched.status, AuctionStatus::BidPlaced);
    assert!(store.get_bid_attempt(auction.id).unwrap().is_some());
    assert_eq!(market.place_bid_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rate_limited_listings_keep_stale_prices_on_list() {
    let store = temp_store();
    let now = Utc::now();
    let market = Arc::new(ScriptedMarket::new());

    let mut ids = Vec::new();
    for i in 0..10 {
        let listing_id = format!("listing-bulk-{i}");
        let created = store
            .create_auction(NewAuction {
                listing_id: listing_id.clone(),
                listing_url: "u".into(),
                item_title: "t".into(),
                seller: "s".into(),
                current_price: Money::parse("50.00").unwrap(),
                currency: "USD".into(),
                max_bid: Money::parse("120.00").unwrap(),
                end_time_utc: now + chrono::Duration::seconds(300),
            })
            .unwrap();
        ids.push((created.id, listing_id.clone()));

        if i < 3 {
            market.push_get_details(&listing_id, Err(MarketError::RateLimited));
        } else {
            market.push_get_details(
                &listing_id,
                Ok(ItemDetails {
                    listing_url: "u".into(),
                    item_title: "t".into(),
                    seller: "s".into(),
                    current_price: Money::parse("55.00").unwrap(),
                    currency: "USD".into(),
                    end_time_utc: now + chrono::Duration::seconds(300),
                    listing_type: "AUCTION".into(),
                }),
            );
        }
    }

    let clock: Arc<dyn Clock> = Arc::new(FrozenClock::at(now + chrono::Duration::seconds(120)));
    let config = test_config();
    let market_dyn: Arc<dyn MarketClient> = market;
    let app_token = Arc::new(tokio::sync::RwLock::new(String::new()));
    let price_cache = PriceCache::new(store.clone(), market_dyn, clock, &config, app_token);

    let listed = price_cache.list_all().await.unwrap();
    assert_eq!(listed.len(), 10);

    for (id, listing_id) in &ids {
        let idx: usize = listing_id.trim_start_matches("listing-bulk-").parse().unwrap();
        let row = listed.iter().find(|a| a.id == *id).unwrap();
        if idx < 3 {
            assert!(row.last_refresh_utc.is_none());
            assert_eq!(row.current_price.to_string(), "50.00");
        } else {
            assert!(row.last_refresh_utc.is_some());
            assert_eq!(row.current_price.to_string(), "55.00");
        }
    }
}

#[tokio::test]
async fn auction_already_ended_at_schedule_time_fails_without_market_call() {
    let store = temp_store();
    let now = Utc::now();
    let end_time = now - chrono::Duration::seconds(10);
    let auction = store
        .create_auction(NewAuction {
            listing_id: "listing-expired".into(),
            listing_url: "u".into(),
            item_title: "t".into(),
            seller: "s".into(),
            current_price: Money::parse("90.00").unwrap(),
            currency: "USD".into(),
            max_bid: Money::parse("120.00").unwrap(),
            end_time_utc: end_time,
        })
        .unwrap();

    let market = Arc::new(ScriptedMarket::new());
    let clock = Arc::new(FrozenClock::at(now));
    let scheduler = make_scheduler(store.clone(), market.clone(), clock);

    scheduler.tick().await;

    let fetched = store.get_auction(auction.id).unwrap().unwrap();
    assert_eq!(fetched.status, AuctionStatus::Failed);
    let attempt = store.get_bid_attempt(auction.id).unwrap().unwrap();
    assert_eq!(attempt.result, BidResult::Failed);
    assert_eq!(
        attempt.error_message.as_deref(),
        Some("Auction ended before worker could process it")
    );
    assert_eq!(market.get_details_calls.load(Ordering::SeqCst), 0);
    assert_eq!(market.place_bid_calls.load(Ordering::SeqCst), 0);
}
