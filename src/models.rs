//! Domain model: auctions and bid attempts.

use crate::money::Money;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionStatus {
    Scheduled,
    Executing,
    BidPlaced,
    Failed,
    Cancelled,
    Skipped,
}

impl AuctionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionStatus::Scheduled => "scheduled",
            AuctionStatus::Executing => "executing",
            AuctionStatus::BidPlaced => "bid_placed",
            AuctionStatus::Failed => "failed",
            AuctionStatus::Cancelled => "cancelled",
            AuctionStatus::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(AuctionStatus::Scheduled),
            "executing" => Some(AuctionStatus::Executing),
            "bid_placed" => Some(AuctionStatus::BidPlaced),
            "failed" => Some(AuctionStatus::Failed),
            "cancelled" => Some(AuctionStatus::Cancelled),
            "skipped" => Some(AuctionStatus::Skipped),
            _ => None,
        }
    }

    /// Terminal for the pre-outcome axis: no further status transition is
    /// legal once an auction reaches one of these.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            AuctionStatus::BidPlaced
                | AuctionStatus::Failed
                | AuctionStatus::Cancelled
                | AuctionStatus::Skipped
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuctionOutcome {
    Pending,
    Won,
    Lost,
}

impl AuctionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuctionOutcome::Pending => "pending",
            AuctionOutcome::Won => "won",
            AuctionOutcome::Lost => "lost",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(AuctionOutcome::Pending),
            "won" => Some(AuctionOutcome::Won),
            "lost" => Some(AuctionOutcome::Lost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BidResult {
    Success,
    Failed,
}

impl BidResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BidResult::Success => "success",
            BidResult::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" => Some(BidResult::Success),
            "failed" => Some(BidResult::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Auction {
    pub id: i64,
    pub listing_id: String,
    pub listing_url: String,
    pub item_title: String,
    pub seller: String,
    pub current_price: Money,
    pub currency: String,
    pub max_bid: Money,
    pub end_time_utc: DateTime<Utc>,
    pub last_refresh_utc: Option<DateTime<Utc>>,
    pub status: AuctionStatus,
    pub skip_reason: Option<String>,
    pub outcome: AuctionOutcome,
    pub final_price: Option<Money>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Auction {
    /// Terminal-for-refresh per the PriceCache policy: Cancelled/Failed/
    /// Skipped always, BidPlaced only once the auction has actually ended.
    pub fn is_terminal_for_refresh(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            AuctionStatus::Cancelled | AuctionStatus::Failed | AuctionStatus::Skipped => true,
            AuctionStatus::BidPlaced => now >= self.end_time_utc,
            _ => false,
        }
    }

    pub fn needs_refresh(&self, now: DateTime<Utc>, ttl: chrono::Duration) -> bool {
        if self.is_terminal_for_refresh(now) {
            return false;
        }
        match self.last_refresh_utc {
            None => true,
            Some(last) => now - last > ttl,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidAttempt {
    pub auction_id: i64,
    pub attempt_time_utc: DateTime<Utc>,
    pub result: BidResult,
    pub error_message: Option<String>,
}
