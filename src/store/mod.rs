//! Durable persistence for auctions and bid attempts.
//!
//! Each call opens its own `rusqlite::Connection` rather than holding a
//! shared/pooled handle. That gives every logical task — an API handler, one
//! scheduler pass over one auction, the reconciler pass — its own session,
//! without a connection-pool dependency. SQLite's own file locking (WAL
//! mode) serializes concurrent writers; the `status` CAS below is the one
//! place that correctness actually depends on that serialization.

use crate::money::Money;
use crate::models::{Auction, AuctionOutcome, AuctionStatus, BidAttempt, BidResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const SCHEMA_SQL: &str = "
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS auctions (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    listing_id      TEXT NOT NULL,
    listing_url     TEXT NOT NULL,
    item_title      TEXT NOT NULL,
    seller          TEXT NOT NULL,
    current_price   INTEGER NOT NULL,
    currency        TEXT NOT NULL,
    max_bid         INTEGER NOT NULL,
    end_time_utc    TEXT NOT NULL,
    last_refresh_utc TEXT,
    status          TEXT NOT NULL,
    skip_reason     TEXT,
    outcome         TEXT NOT NULL,
    final_price     INTEGER,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_auctions_listing_id ON auctions(listing_id);
CREATE INDEX IF NOT EXISTS idx_auctions_status ON auctions(status);
CREATE INDEX IF NOT EXISTS idx_auctions_end_time ON auctions(end_time_utc);
CREATE INDEX IF NOT EXISTS idx_auctions_last_refresh ON auctions(last_refresh_utc);
CREATE INDEX IF NOT EXISTS idx_auctions_outcome ON auctions(outcome);

CREATE TABLE IF NOT EXISTS bid_attempts (
    auction_id      INTEGER PRIMARY KEY REFERENCES auctions(id),
    attempt_time_utc TEXT NOT NULL,
    result          TEXT NOT NULL,
    error_message   TEXT
);
";

pub struct NewAuction {
    pub listing_id: String,
    pub listing_url: String,
    pub item_title: String,
    pub seller: String,
    pub current_price: Money,
    pub currency: String,
    pub max_bid: Money,
    pub end_time_utc: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Store {
    database_path: String,
}

impl Store {
    pub fn new(database_path: impl Into<String>) -> Self {
        Self {
            database_path: database_path.into(),
        }
    }

    fn open(&self) -> rusqlite::Result<Connection> {
        Connection::open(&self.database_path)
    }

    pub fn init(&self) -> rusqlite::Result<()> {
        let conn = self.open()?;
        conn.execute_batch(SCHEMA_SQL)
    }

    pub fn has_active_auction_for_listing(&self, listing_id: &str) -> rusqlite::Result<bool> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT 1 FROM auctions WHERE listing_id = ?1 AND status NOT IN \
             ('bid_placed','failed','cancelled','skipped') LIMIT 1",
        )?;
        Ok(stmt.exists(params![listing_id])?)
    }

    pub fn create_auction(&self, new: NewAuction) -> rusqlite::Result<Auction> {
        let conn = self.open()?;
        let now = Utc::now();
        conn.execute(
            "INSERT INTO auctions (listing_id, listing_url, item_title, seller, \
             current_price, currency, max_bid, end_time_utc, last_refresh_utc, \
             status, skip_reason, outcome, final_price, created_at, updated_at) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,NULL,?11,NULL,?12,?12)",
            params![
                new.listing_id,
                new.listing_url,
                new.item_title,
                new.seller,
                new.current_price.cents(),
                new.currency,
                new.max_bid.cents(),
                new.end_time_utc.to_rfc3339(),
                now.to_rfc3339(),
                AuctionStatus::Scheduled.as_str(),
                AuctionOutcome::Pending.as_str(),
                now.to_rfc3339(),
            ],
        )?;
        let id = conn.last_insert_rowid();
        self.get_auction_with(&conn, id)?
            .ok_or_else(|| rusqlite::Error::QueryReturnedNoRows)
    }

    pub fn get_auction(&self, id: i64) -> rusqlite::Result<Option<Auction>> {
        let conn = self.open()?;
        self.get_auction_with(&conn, id)
    }

    fn get_auction_with(&self, conn: &Connection, id: i64) -> rusqlite::Result<Option<Auction>> {
        conn.query_row(
            "SELECT id, listing_id, listing_url, item_title, seller, current_price, \
             currency, max_bid, end_time_utc, last_refresh_utc, status, skip_reason, \
             outcome, final_price, created_at, updated_at FROM auctions WHERE id = ?1",
            params![id],
            row_to_auction,
        )
        .optional()
    }

    pub fn list_auctions(&self) -> rusqlite::Result<Vec<Auction>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, listing_id, listing_url, item_title, seller, current_price, \
             currency, max_bid, end_time_utc, last_refresh_utc, status, skip_reason, \
             outcome, final_price, created_at, updated_at FROM auctions \
             ORDER BY end_time_utc ASC",
        )?;
        let rows = stmt.query_map([], row_to_auction)?;
        rows.collect()
    }

    /// Auctions the scheduler must consider on this tick.
    pub fn active_auctions(&self) -> rusqlite::Result<Vec<Auction>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, listing_id, listing_url, item_title, seller, current_price, \
             currency, max_bid, end_time_utc, last_refresh_utc, status, skip_reason, \
             outcome, final_price, created_at, updated_at FROM auctions \
             WHERE status IN ('scheduled','executing') ORDER BY end_time_utc ASC",
        )?;
        let rows = stmt.query_map([], row_to_auction)?;
        rows.collect()
    }

    /// Auctions awaiting outcome reconciliation: placed, pending, ended more
    /// than `outcome_settle_delay` ago.
    pub fn pending_outcome_auctions(
        &self,
        now: DateTime<Utc>,
        settle_delay: chrono::Duration,
    ) -> rusqlite::Result<Vec<Auction>> {
        let conn = self.open()?;
        let cutoff = now - settle_delay;
        let mut stmt = conn.prepare(
            "SELECT id, listing_id, listing_url, item_title, seller, current_price, \
             currency, max_bid, end_time_utc, last_refresh_utc, status, skip_reason, \
             outcome, final_price, created_at, updated_at FROM auctions \
             WHERE status = 'bid_placed' AND outcome = 'pending' AND end_time_utc < ?1",
        )?;
        let rows = stmt.query_map(params![cutoff.to_rfc3339()], row_to_auction)?;
        rows.collect()
    }

    /// Ended auctions still missing a final price, for the opportunistic
    /// backfill pass. Never touches `outcome`.
    pub fn ended_missing_final_price(&self, now: DateTime<Utc>) -> rusqlite::Result<Vec<Auction>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare(
            "SELECT id, listing_id, listing_url, item_title, seller, current_price, \
             currency, max_bid, end_time_utc, last_refresh_utc, status, skip_reason, \
             outcome, final_price, created_at, updated_at FROM auctions \
             WHERE status IN ('bid_placed','failed') AND outcome = 'pending' \
             AND final_price IS NULL AND end_time_utc < ?1",
        )?;
        let rows = stmt.query_map(params![now.to_rfc3339()], row_to_auction)?;
        rows.collect()
    }

    /// Write-through for a fresh `MarketClient::get_details` read: price and
    /// the display metadata (`listing_url`/`item_title`/`seller`) travel
    /// together, since both come off the same marketplace response.
    pub fn update_price(
        &self,
        id: i64,
        current_price: Money,
        listing_url: &str,
        item_title: &str,
        seller: &str,
        last_refresh_utc: DateTime<Utc>,
    ) -> rusqlite::Result<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE auctions SET current_price = ?1, listing_url = ?2, item_title = ?3, \
             seller = ?4, last_refresh_utc = ?5, updated_at = ?6 WHERE id = ?7",
            params![
                current_price.cents(),
                listing_url,
                item_title,
                seller,
                last_refresh_utc.to_rfc3339(),
                Utc::now().to_rfc3339(),
                id
            ],
        )?;
        Ok(())
    }

    /// Stale-while-rate-limited: metadata is not advanced, only logged.
    /// Kept as a no-op helper so call sites read intent-first.
    pub fn mark_refresh_rate_limited(&self, _id: i64) {}

    /// The critical atomic primitive: CAS `Scheduled -> Executing`.
    /// Returns whether this call won the claim.
    pub fn claim_for_execution(&self, id: i64) -> rusqlite::Result<bool> {
        let conn = self.open()?;
        let rows = conn.execute(
            "UPDATE auctions SET status = 'executing', updated_at = ?2 \
             WHERE id = ?1 AND status = 'scheduled'",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(rows == 1)
    }

    /// CAS `Scheduled -> Cancelled`. Returns whether the cancel took effect.
    pub fn cancel(&self, id: i64) -> rusqlite::Result<bool> {
        let conn = self.open()?;
        let rows = conn.execute(
            "UPDATE auctions SET status = 'cancelled', updated_at = ?2 \
             WHERE id = ?1 AND status = 'scheduled'",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(rows == 1)
    }

    pub fn set_skipped(&self, id: i64, reason: &str) -> rusqlite::Result<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE auctions SET status = 'skipped', skip_reason = ?2, \
             updated_at = ?3 WHERE id = ?1",
            params![id, reason, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_bid_placed(&self, id: i64) -> rusqlite::Result<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE auctions SET status = 'bid_placed', updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_failed(&self, id: i64) -> rusqlite::Result<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE auctions SET status = 'failed', updated_at = ?2 WHERE id = ?1",
            params![id, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn set_outcome(
        &self,
        id: i64,
        outcome: AuctionOutcome,
        final_price: Option<Money>,
    ) -> rusqlite::Result<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE auctions SET outcome = ?2, final_price = ?3, updated_at = ?4 \
             WHERE id = ?1",
            params![
                id,
                outcome.as_str(),
                final_price.map(|m| m.cents()),
                Utc::now().to_rfc3339()
            ],
        )?;
        Ok(())
    }

    pub fn set_final_price_only(&self, id: i64, final_price: Money) -> rusqlite::Result<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE auctions SET final_price = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, final_price.cents(), Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn record_bid_attempt(
        &self,
        auction_id: i64,
        result: BidResult,
        error_message: Option<&str>,
    ) -> rusqlite::Result<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO bid_attempts (auction_id, attempt_time_utc, result, error_message) \
             VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(auction_id) DO UPDATE SET \
             attempt_time_utc = excluded.attempt_time_utc, \
             result = excluded.result, error_message = excluded.error_message",
            params![
                auction_id,
                Utc::now().to_rfc3339(),
                result.as_str(),
                error_message
            ],
        )?;
        Ok(())
    }

    pub fn get_bid_attempt(&self, auction_id: i64) -> rusqlite::Result<Option<BidAttempt>> {
        let conn = self.open()?;
        conn.query_row(
            "SELECT auction_id, attempt_time_utc, result, error_message \
             FROM bid_attempts WHERE auction_id = ?1",
            params![auction_id],
            |row| {
                let attempt_time: String = row.get(1)?;
                let result: String = row.get(2)?;
                Ok(BidAttempt {
                    auction_id: row.get(0)?,
                    attempt_time_utc: DateTime::parse_from_rfc3339(&attempt_time)
                        .unwrap()
                        .with_timezone(&Utc),
                    result: BidResult::from_str(&result).unwrap_or(BidResult::Failed),
                    error_message: row.get(3)?,
                })
            },
        )
        .optional()
    }
}

fn row_to_auction(row: &Row) -> rusqlite::Result<Auction> {
    let end_time: String = row.get(8)?;
    let last_refresh: Option<String> = row.get(9)?;
    let status: String = row.get(10)?;
    let outcome: String = row.get(12)?;
    let final_price: Option<i64> = row.get(13)?;
    let created_at: String = row.get(14)?;
    let updated_at: String = row.get(15)?;

    Ok(Auction {
        id: row.get(0)?,
        listing_id: row.get(1)?,
        listing_url: row.get(2)?,
        item_title: row.get(3)?,
        seller: row.get(4)?,
        current_price: Money::from_cents(row.get(5)?),
        currency: row.get(6)?,
        max_bid: Money::from_cents(row.get(7)?),
        end_time_utc: DateTime::parse_from_rfc3339(&end_time)
            .unwrap()
            .with_timezone(&Utc),
        last_refresh_utc: last_refresh
            .map(|s| DateTime::parse_from_rfc3339(&s).unwrap().with_timezone(&Utc)),
        status: AuctionStatus::from_str(&status).unwrap_or(AuctionStatus::Failed),
        skip_reason: row.get(11)?,
        outcome: AuctionOutcome::from_str(&outcome).unwrap_or(AuctionOutcome::Pending),
        final_price: final_price.map(Money::from_cents),
        created_at: DateTime::parse_from_rfc3339(&created_at)
            .unwrap()
            .with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at)
            .unwrap()
            .with_timezone(&Utc),
    })
}
