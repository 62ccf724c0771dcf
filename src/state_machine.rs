//! The auction lifecycle's legal-transition table and outcome-axis gating.
//!
//! The one genuinely atomic primitive — claiming `Scheduled -> Executing`
//! — lives on `Store` (it has to be a single SQL statement to be a real
//! CAS); this module is the pure, DB-free source of truth for which
//! transitions are legal at all, so the scheduler and tests can check a
//! transition without touching storage.

use crate::models::AuctionStatus;
use chrono::{DateTime, Duration, Utc};

/// Per spec's lifecycle diagram:
/// Scheduled -> {Executing, Cancelled, Skipped, Failed}
/// Executing -> {BidPlaced, Failed}
/// Everything else is terminal for the pre-outcome axis.
pub fn can_transition(from: AuctionStatus, to: AuctionStatus) -> bool {
    use AuctionStatus::*;
    matches!(
        (from, to),
        (Scheduled, Executing)
            | (Scheduled, Cancelled)
            | (Scheduled, Skipped)
            | (Scheduled, Failed)
            | (Executing, BidPlaced)
            | (Executing, Failed)
    )
}

/// The outcome axis (`Pending -> {Won, Lost}`) only opens once the status
/// has reached a terminal pre-outcome state and the settle delay has
/// elapsed past the auction's close.
pub fn outcome_transition_allowed(
    status: AuctionStatus,
    now: DateTime<Utc>,
    end_time_utc: DateTime<Utc>,
    settle_delay: Duration,
) -> bool {
    matches!(status, AuctionStatus::BidPlaced | AuctionStatus::Failed)
        && now >= end_time_utc + settle_delay
}
