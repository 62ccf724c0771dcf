//! `MarketClient` implementation against eBay's Browse/Trading/Offer APIs.
//!
//! Item lookup falls back from a legacy-ID Browse call to the canonical
//! item endpoint on a miss. Bid placement speaks the Trading API's XML
//! framing; everything else speaks JSON. The `reqwest::Client` is built once
//! with connection reuse and per-call deadlines rather than one-shot clients
//! per request.

use super::xml::{build_place_offer_request, parse_trading_response};
use super::{map_bid_error_code, BidError, BidOutcome, ItemDetails, MarketClient, MarketError, TokenResponse};
use crate::config::Config;
use crate::money::Money;
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const SANDBOX_API_BASE: &str = "https://api.sandbox.ebay.com";
const PRODUCTION_API_BASE: &str = "https://api.ebay.com";
const SANDBOX_TOKEN_URL: &str = "https://api.sandbox.ebay.com/identity/v1/oauth2/token";
const PRODUCTION_TOKEN_URL: &str = "https://api.ebay.com/identity/v1/oauth2/token";
const TRADING_API_ENDPOINT: &str = "/ws/api.dll";
const SITE_ID_US: u32 = 0;

pub struct EbayMarketClient {
    http: reqwest::Client,
    client_id: String,
    client_secret: String,
    api_base: String,
    token_url: String,
    read_timeout: Duration,
    bid_timeout: Duration,
    token_timeout: Duration,
}

impl EbayMarketClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(60))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        let sandbox = config.marketplace_env.eq_ignore_ascii_case("sandbox");

        Ok(Self {
            http,
            client_id: config.marketplace_client_id.clone(),
            client_secret: config.marketplace_client_secret.clone(),
            api_base: if sandbox { SANDBOX_API_BASE } else { PRODUCTION_API_BASE }.to_string(),
            token_url: if sandbox { SANDBOX_TOKEN_URL } else { PRODUCTION_TOKEN_URL }.to_string(),
            read_timeout: config.market_read_timeout,
            bid_timeout: config.market_bid_timeout,
            token_timeout: config.market_token_timeout,
        })
    }

    fn basic_auth_header(&self) -> String {
        let raw = format!("{}:{}", self.client_id, self.client_secret);
        format!("Basic {}", BASE64.encode(raw))
    }

    async fn fetch_item_json(
        &self,
        path: String,
        app_token: &str,
    ) -> Result<Option<BrowseItem>, MarketError> {
        let resp = self
            .http
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(app_token)
            .timeout(self.read_timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(MarketError::Http {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        resp.json::<BrowseItem>()
            .await
            .map(Some)
            .map_err(|e| MarketError::Other(e.to_string()))
    }
}

#[async_trait]
impl MarketClient for EbayMarketClient {
    async fn get_details(
        &self,
        listing_id: &str,
        app_token: &str,
    ) -> Result<ItemDetails, MarketError> {
        // Primary path: legacy-id lookup; falls back to the canonical item
        // endpoint on 404.
        let legacy_path = format!(
            "/buy/browse/v1/item/get_item_by_legacy_id?legacy_item_id={}",
            listing_id
        );
        let item = match self.fetch_item_json(legacy_path, app_token).await? {
            Some(item) => item,
            None => {
                let fallback_path = format!("/buy/browse/v1/item/{}", listing_id);
                self.fetch_item_json(fallback_path, app_token)
                    .await?
                    .ok_or(MarketError::Other("item not found".to_string()))?
            }
        };

        if !item
            .buying_options
            .iter()
            .any(|o| o.eq_ignore_ascii_case("AUCTION"))
        {
            return Err(MarketError::NotAnAuction);
        }

        let current_price = Money::parse(&item.price.value)
            .map_err(|e| MarketError::Other(e.to_string()))?;
        let end_time_utc = DateTime::parse_from_rfc3339(&item.item_end_date)
            .map_err(|e| MarketError::Other(e.to_string()))?
            .with_timezone(&Utc);

        Ok(ItemDetails {
            listing_url: item.item_web_url,
            item_title: item.title,
            seller: item.seller.username,
            current_price,
            currency: item.price.currency,
            end_time_utc,
            listing_type: "AUCTION".to_string(),
        })
    }

    async fn place_bid(
        &self,
        listing_id: &str,
        amount: Money,
        user_token: &str,
    ) -> Result<(), BidError> {
        let body = build_place_offer_request(user_token, listing_id, amount, SITE_ID_US);

        let resp = self
            .http
            .post(format!("{}{}", self.api_base, TRADING_API_ENDPOINT))
            .header("X-EBAY-API-CALL-NAME", "PlaceOffer")
            .header("X-EBAY-API-COMPATIBILITY-LEVEL", "1155")
            .header("X-EBAY-API-SITEID", SITE_ID_US.to_string())
            .header("Content-Type", "text/xml")
            .body(body)
            .timeout(self.bid_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    BidError::Timeout
                } else {
                    BidError::ServerError(e.to_string())
                }
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(BidError::RateLimited);
        }
        if status.is_server_error() {
            return Err(BidError::ServerError(format!("http {}", status)));
        }

        let text = resp
            .text()
            .await
            .map_err(|e| BidError::ServerError(e.to_string()))?;
        let parsed = parse_trading_response(&text)
            .map_err(|e| BidError::Other { code: "parse".into(), message: e.to_string() })?;

        if parsed.is_success() {
            return Ok(());
        }

        match parsed.errors.first() {
            Some(err) => Err(map_bid_error_code(&err.error_code, &err.long_message)),
            None => Err(BidError::Other {
                code: "unknown".into(),
                message: parsed.ack,
            }),
        }
    }

    async fn get_bid_outcome(
        &self,
        listing_id: &str,
        app_token: &str,
    ) -> Result<Option<BidOutcome>, MarketError> {
        let resp = self
            .http
            .get(format!(
                "{}/buy/offer/v1_beta/bidding/{}",
                self.api_base, listing_id
            ))
            .bearer_auth(app_token)
            .timeout(self.read_timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            debug!(listing_id, "no bidding record yet, outcome stays pending");
            return Ok(None);
        }
        if resp.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(MarketError::RateLimited);
        }
        if !resp.status().is_success() {
            return Err(MarketError::Http {
                status: resp.status().as_u16(),
                message: resp.text().await.unwrap_or_default(),
            });
        }

        let body: BiddingResponse = resp
            .json()
            .await
            .map_err(|e| MarketError::Other(e.to_string()))?;

        Ok(Some(BidOutcome {
            auction_status: body.auction_status,
            high_bidder: body.high_bidder,
            current_price: body
                .current_price
                .and_then(|p| Money::parse(&p.value).ok()),
        }))
    }

    async fn refresh_app_token(&self) -> Result<TokenResponse, MarketError> {
        let resp = self
            .http
            .post(&self.token_url)
            .header("Authorization", self.basic_auth_header())
            .form(&[
                ("grant_type", "client_credentials"),
                ("scope", "https://api.ebay.com/oauth/api_scope"),
            ])
            .timeout(self.token_timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        parse_token_response(resp).await
    }

    async fn refresh_user_token(&self, refresh_token: &str) -> Result<TokenResponse, MarketError> {
        let resp = self
            .http
            .post(&self.token_url)
            .header("Authorization", self.basic_auth_header())
            .form(&[("grant_type", "refresh_token"), ("refresh_token", refresh_token)])
            .timeout(self.token_timeout)
            .send()
            .await
            .map_err(classify_reqwest_error)?;

        parse_token_response(resp).await
    }
}

async fn parse_token_response(resp: reqwest::Response) -> Result<TokenResponse, MarketError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        // `invalid_grant`/`invalid_client` are fatal, non-retryable
        // conditions surfaced to operators.
        warn!(status = status.as_u16(), body = %body, "oauth grant failed");
        return Err(MarketError::CredentialGrant(body));
    }

    let body: OAuthTokenResponse = resp
        .json()
        .await
        .map_err(|e| MarketError::Other(e.to_string()))?;

    Ok(TokenResponse {
        access_token: body.access_token,
        expires_at: Utc::now() + chrono::Duration::seconds(body.expires_in),
        refresh_token: body.refresh_token,
    })
}

fn classify_reqwest_error(err: reqwest::Error) -> MarketError {
    if err.is_timeout() {
        MarketError::Timeout
    } else {
        MarketError::Other(err.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct BrowseItem {
    title: String,
    #[serde(rename = "itemWebUrl")]
    item_web_url: String,
    seller: BrowseSeller,
    price: BrowsePrice,
    #[serde(rename = "itemEndDate")]
    item_end_date: String,
    #[serde(rename = "buyingOptions", default)]
    buying_options: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct BrowseSeller {
    username: String,
}

#[derive(Debug, Deserialize)]
struct BrowsePrice {
    value: String,
    currency: String,
}

#[derive(Debug, Deserialize)]
struct BiddingResponse {
    #[serde(rename = "auctionStatus")]
    auction_status: String,
    #[serde(rename = "highBidder", default)]
    high_bidder: bool,
    #[serde(rename = "currentPrice")]
    current_price: Option<BrowsePrice>,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
    expires_in: i64,
    refresh_token: Option<String>,
}

