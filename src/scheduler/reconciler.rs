//! Outcome reconciliation: after a placed bid's auction ends, poll the
//! marketplace to assign Won/Lost and the final price.
//!
//! Two passes: the primary pass maps the bidding-outcome endpoint's reply to
//! an outcome; the secondary pass opportunistically backfills `final_price`
//! for ended auctions still missing one, without ever touching `outcome`.

use crate::credentials::CredentialManager;
use crate::market::MarketClient;
use crate::models::AuctionOutcome;
use crate::store::Store;
use crate::time_source::Clock;
use chrono::Duration as ChronoDuration;
use std::time::Duration as StdDuration;
use tracing::{info, warn};

pub async fn reconcile(
    store: &Store,
    market: &dyn MarketClient,
    credentials: &CredentialManager,
    clock: &dyn Clock,
    settle_delay: StdDuration,
) -> anyhow::Result<()> {
    let now = clock.now();
    let settle = ChronoDuration::from_std(settle_delay).unwrap_or(ChronoDuration::seconds(30));

    let app_token = credentials.app_token().await?;

    for auction in store.pending_outcome_auctions(now, settle)? {
        match market.get_bid_outcome(&auction.listing_id, &app_token).await {
            Ok(Some(outcome)) if outcome.auction_status.eq_ignore_ascii_case("ENDED") => {
                let resolved = if outcome.high_bidder {
                    AuctionOutcome::Won
                } else {
                    AuctionOutcome::Lost
                };
                if let Err(e) = store.set_outcome(auction.id, resolved, outcome.current_price) {
                    warn!(auction_id = auction.id, error = %e, "failed to persist outcome");
                } else {
                    info!(auction_id = auction.id, outcome = resolved.as_str(), "outcome settled");
                }
            }
            Ok(Some(_)) => {
                // Not yet ended per the marketplace; retry next tick.
            }
            Ok(None) => {
                // 404: never bid / unknown. Stays Pending.
            }
            Err(e) => {
                warn!(auction_id = auction.id, error = %e, "outcome poll failed, retrying next tick");
            }
        }
    }

    for auction in store.ended_missing_final_price(now)? {
        match market.get_details(&auction.listing_id, &app_token).await {
            Ok(details) => {
                if let Err(e) = store.set_final_price_only(auction.id, details.current_price) {
                    warn!(auction_id = auction.id, error = %e, "failed to backfill final price");
                }
            }
            Err(e) => {
                warn!(auction_id = auction.id, error = %e, "final price backfill fetch failed");
            }
        }
    }

    Ok(())
}
