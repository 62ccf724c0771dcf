//! IngestAPI handlers: add/bulk-add/list/status/cancel/logs.

use crate::error::AppError;
use crate::market::MarketError;
use crate::models::{Auction, BidAttempt};
use crate::money::Money;
use crate::store::NewAuction;
use crate::AppState;
use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct AddAuctionRequest {
    pub listing_id: String,
    pub max_bid: String,
}

#[derive(Debug, Serialize)]
pub struct AddAuctionResult {
    pub listing_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auction: Option<Auction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkAddRequest {
    pub items: Vec<AddAuctionRequest>,
}

#[derive(Debug, Serialize)]
pub struct BulkAddResponse {
    pub results: Vec<AddAuctionResult>,
}

/// Shared by `AddAuction` and each item of `BulkAdd`: validates against the
/// marketplace, then persists with `status = Scheduled`.
async fn add_one(state: &AppState, req: AddAuctionRequest) -> Result<Auction, AppError> {
    let max_bid = Money::parse(&req.max_bid)
        .map_err(|e| AppError::Validation(format!("invalid max_bid: {e}")))?;

    if state
        .store
        .has_active_auction_for_listing(&req.listing_id)?
    {
        return Err(AppError::Conflict(format!(
            "an active auction already exists for listing {}",
            req.listing_id
        )));
    }

    let app_token = state
        .credentials
        .app_token()
        .await
        .map_err(|e| AppError::CredentialExpired(e.to_string()))?;

    let details = state
        .market
        .get_details(&req.listing_id, &app_token)
        .await
        .map_err(market_error_to_app_error)?;

    if !details.listing_type.eq_ignore_ascii_case("AUCTION") {
        return Err(AppError::Validation(format!(
            "listing {} is not an auction",
            req.listing_id
        )));
    }

    let now = state.clock.now();
    if details.end_time_utc <= now {
        return Err(AppError::Validation(format!(
            "listing {} has already ended",
            req.listing_id
        )));
    }

    if max_bid.cents() <= details.current_price.cents() {
        return Err(AppError::Validation(format!(
            "max_bid {} must exceed current price {}",
            max_bid, details.current_price
        )));
    }

    let auction = state.store.create_auction(NewAuction {
        listing_id: req.listing_id,
        listing_url: details.listing_url,
        item_title: details.item_title,
        seller: details.seller,
        current_price: details.current_price,
        currency: details.currency,
        max_bid,
        end_time_utc: details.end_time_utc,
    })?;

    Ok(auction)
}

fn market_error_to_app_error(err: MarketError) -> AppError {
    match err {
        MarketError::Timeout | MarketError::RateLimited => {
            AppError::UpstreamTransient(err.to_string())
        }
        MarketError::Http { status, .. } if status >= 500 => {
            AppError::UpstreamTransient(err.to_string())
        }
        _ => AppError::UpstreamPermanent(err.to_string()),
    }
}

pub async fn add_auction(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AddAuctionRequest>,
) -> Result<Json<Auction>, AppError> {
    let auction = add_one(&state, req).await?;
    Ok(Json(auction))
}

pub async fn bulk_add(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BulkAddRequest>,
) -> Json<BulkAddResponse> {
    let mut results = Vec::with_capacity(req.items.len());
    for item in req.items {
        let listing_id = item.listing_id.clone();
        match add_one(&state, item).await {
            Ok(auction) => results.push(AddAuctionResult {
                listing_id,
                auction: Some(auction),
                error: None,
            }),
            Err(e) => results.push(AddAuctionResult {
                listing_id,
                auction: None,
                error: Some(e.to_string()),
            }),
        }
    }
    Json(BulkAddResponse { results })
}

pub async fn list_auctions(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<Auction>>, AppError> {
    let auctions = state
        .price_cache
        .list_all()
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok(Json(auctions))
}

pub async fn get_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Auction>, AppError> {
    let auction = state
        .price_cache
        .get_one(id)
        .await
        .map_err(|e| AppError::Internal(e.to_string()))?
        .ok_or_else(|| AppError::NotFound(format!("auction {id} not found")))?;
    Ok(Json(auction))
}

pub async fn cancel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Auction>, AppError> {
    let existing = state
        .store
        .get_auction(id)?
        .ok_or_else(|| AppError::NotFound(format!("auction {id} not found")))?;

    if !state.store.cancel(id)? {
        return Err(AppError::Conflict(format!(
            "auction {id} is {} and cannot be cancelled",
            existing.status.as_str()
        )));
    }

    let updated = state
        .store
        .get_auction(id)?
        .ok_or_else(|| AppError::NotFound(format!("auction {id} not found")))?;
    Ok(Json(updated))
}

#[derive(Debug, Serialize)]
pub struct LogsResponse {
    pub auction_id: i64,
    pub bid_attempt: Option<BidAttempt>,
}

pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<LogsResponse>, AppError> {
    state
        .store
        .get_auction(id)?
        .ok_or_else(|| AppError::NotFound(format!("auction {id} not found")))?;

    let bid_attempt = state.store.get_bid_attempt(id)?;
    Ok(Json(LogsResponse {
        auction_id: id,
        bid_attempt,
    }))
}

pub async fn health() -> &'static str {
    "ok"
}
