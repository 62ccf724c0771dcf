//! The marketplace boundary: item lookup, bid placement, outcome polling,
//! and OAuth token grants. `EbayMarketClient` (in `ebay`) is the only
//! implementation; `MockMarketClient` in the test suite drives the
//! scheduler deterministically.

pub mod ebay;
pub mod xml;

use crate::money::Money;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct ItemDetails {
    pub listing_url: String,
    pub item_title: String,
    pub seller: String,
    pub current_price: Money,
    pub currency: String,
    pub end_time_utc: DateTime<Utc>,
    pub listing_type: String,
}

#[derive(Debug, Clone)]
pub struct BidOutcome {
    pub auction_status: String,
    pub high_bidder: bool,
    pub current_price: Option<Money>,
}

#[derive(Debug, Clone)]
pub struct TokenResponse {
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
    /// Present for user-token grants; a refresh may rotate the refresh
    /// token, in which case the new one replaces the old.
    pub refresh_token: Option<String>,
}

/// Structured bid-placement error, replacing the original's substring-based
/// ("contains '5'", "contains 'Error'") dispatch with a tagged enum the
/// scheduler's retry loop can match on directly.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum BidError {
    #[error("item not found or already ended")]
    ItemEnded,
    #[error("bid below minimum increment")]
    BidTooLow,
    #[error("bid exceeds maximum allowed")]
    BidTooHigh,
    #[error("bid blocked: {0}")]
    Blocked(String),
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("server error: {0}")]
    ServerError(String),
    #[error("marketplace error {code}: {message}")]
    Other { code: String, message: String },
}

impl BidError {
    /// 429/5xx are retryable as long as attempts remain in the bid window;
    /// a timeout retries unconditionally and is matched separately by the
    /// scheduler's retry loop before this flag is consulted. Everything
    /// else (item ended, bid rejected, blocked) is terminal.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BidError::Timeout | BidError::RateLimited | BidError::ServerError(_)
        )
    }
}

/// Maps the Trading API's numeric error codes to the tagged `BidError`
/// variants documented in the external-interfaces error-code table.
pub fn map_bid_error_code(code: &str, message: &str) -> BidError {
    match code {
        "10729" | "10734" => BidError::ItemEnded,
        "10736" => BidError::BidTooLow,
        "10735" => BidError::BidTooHigh,
        "10730" => BidError::Blocked("retraction not allowed".to_string()),
        "10731" => BidError::Blocked("self-bid not allowed".to_string()),
        "10732" => BidError::Blocked("bidding on behalf of seller not allowed".to_string()),
        "10733" => BidError::Blocked("bidder is blocked by seller".to_string()),
        other => BidError::Other {
            code: other.to_string(),
            message: message.to_string(),
        },
    }
}

#[derive(Debug, Error)]
pub enum MarketError {
    #[error("request timed out")]
    Timeout,
    #[error("rate limited")]
    RateLimited,
    #[error("upstream http error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("listing is not an auction")]
    NotAnAuction,
    #[error("credential grant failed: {0}")]
    CredentialGrant(String),
    #[error("upstream error: {0}")]
    Other(String),
}

impl MarketError {
    pub fn is_retryable(&self) -> bool {
        match self {
            MarketError::Timeout | MarketError::RateLimited => true,
            MarketError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, MarketError::RateLimited)
    }
}

#[async_trait]
pub trait MarketClient: Send + Sync {
    async fn get_details(
        &self,
        listing_id: &str,
        app_token: &str,
    ) -> Result<ItemDetails, MarketError>;

    async fn place_bid(
        &self,
        listing_id: &str,
        amount: Money,
        user_token: &str,
    ) -> Result<(), BidError>;

    async fn get_bid_outcome(
        &self,
        listing_id: &str,
        app_token: &str,
    ) -> Result<Option<BidOutcome>, MarketError>;

    async fn refresh_app_token(&self) -> Result<TokenResponse, MarketError>;

    async fn refresh_user_token(&self, refresh_token: &str) -> Result<TokenResponse, MarketError>;
}
