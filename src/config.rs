//! Application configuration, loaded from the environment.
//!
//! One env var per field, a parse-with-fallback default, `.env` loaded via
//! `dotenv` first.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,

    /// "sandbox" or "production" selector for the marketplace base URLs.
    pub marketplace_env: String,
    pub marketplace_client_id: String,
    pub marketplace_client_secret: String,
    /// Seed refresh token for the user (bidding) OAuth grant.
    pub marketplace_user_refresh_token: String,

    /// Shared secret used to sign bearer tokens issued by `/auth`.
    pub jwt_secret: String,
    pub jwt_expiry_days: i64,

    /// How long before an auction's close a bid is submitted.
    pub bid_offset: Duration,
    /// How long before close the pre-bid price guard runs.
    pub pre_bid_check_offset: Duration,
    /// Delay after an auction's end before outcome reconciliation begins.
    pub outcome_settle_delay: Duration,
    /// Scheduler tick period.
    pub tick_interval: Duration,
    /// Max concurrent workers refreshing stale prices on a list read.
    pub refresh_parallelism: usize,
    /// Refresh-on-read TTL.
    pub price_ttl: Duration,

    pub market_read_timeout: Duration,
    pub market_bid_timeout: Duration,
    pub market_token_timeout: Duration,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./auction_sniper.db".to_string());

        let port = std::env::var("PORT")
            .unwrap_or_else(|_| "8080".to_string())
            .parse()
            .unwrap_or(8080);

        let marketplace_env =
            std::env::var("MARKETPLACE_ENV").unwrap_or_else(|_| "sandbox".to_string());

        let marketplace_client_id = std::env::var("MARKETPLACE_CLIENT_ID").unwrap_or_default();
        let marketplace_client_secret =
            std::env::var("MARKETPLACE_CLIENT_SECRET").unwrap_or_default();
        let marketplace_user_refresh_token =
            std::env::var("MARKETPLACE_USER_REFRESH_TOKEN").unwrap_or_default();

        let jwt_secret = std::env::var("JWT_SECRET")
            .unwrap_or_else(|_| "change-me-in-production".to_string());

        let jwt_expiry_days = std::env::var("JWT_EXPIRY_DAYS")
            .unwrap_or_else(|_| "30".to_string())
            .parse()
            .unwrap_or(30);

        let bid_offset_secs: u64 = std::env::var("BID_OFFSET_SECONDS")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .unwrap_or(3);

        let refresh_parallelism = std::env::var("REFRESH_PARALLELISM")
            .unwrap_or_else(|_| "5".to_string())
            .parse()
            .unwrap_or(5);

        Ok(Self {
            database_path,
            port,
            marketplace_env,
            marketplace_client_id,
            marketplace_client_secret,
            marketplace_user_refresh_token,
            jwt_secret,
            jwt_expiry_days,
            bid_offset: Duration::from_secs(bid_offset_secs),
            pre_bid_check_offset: Duration::from_secs(60),
            outcome_settle_delay: Duration::from_secs(30),
            tick_interval: Duration::from_millis(500),
            refresh_parallelism,
            price_ttl: Duration::from_secs(60),
            market_read_timeout: Duration::from_secs(5),
            market_bid_timeout: Duration::from_millis(600),
            market_token_timeout: Duration::from_secs(10),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane_without_env() {
        // from_env reads real process env; just sanity check the constants
        // used when a var is absent.
        let c = Config {
            database_path: "x".into(),
            port: 8080,
            marketplace_env: "sandbox".into(),
            marketplace_client_id: String::new(),
            marketplace_client_secret: String::new(),
            marketplace_user_refresh_token: String::new(),
            jwt_secret: "s".into(),
            jwt_expiry_days: 30,
            bid_offset: Duration::from_secs(3),
            pre_bid_check_offset: Duration::from_secs(60),
            outcome_settle_delay: Duration::from_secs(30),
            tick_interval: Duration::from_millis(500),
            refresh_parallelism: 5,
            price_ttl: Duration::from_secs(60),
            market_read_timeout: Duration::from_secs(5),
            market_bid_timeout: Duration::from_millis(600),
            market_token_timeout: Duration::from_secs(10),
        };
        assert_eq!(c.refresh_parallelism, 5);
        assert_eq!(c.bid_offset, Duration::from_secs(3));
    }
}
