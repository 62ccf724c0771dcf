//! Trading API XML framing.
//!
//! The Browse/Offer APIs are JSON; bid placement goes through the legacy
//! Trading API's `PlaceOffer` call, which is XML. This module builds that
//! outbound request body and parses the `Ack`/`Errors/ErrorCode/LongMessage`
//! response shape with `quick-xml`'s event reader, replacing the original's
//! substring-based response parsing (`"Error" in body`) with an actual
//! element walk. The parser also understands `GetItemResponse`'s
//! `CurrentPrice` element, though nothing in this tree issues that call today
//! — item lookups go through the Browse JSON API exclusively.

use crate::money::Money;
use quick_xml::events::Event;
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("malformed trading API response: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Default)]
pub struct TradingError {
    pub error_code: String,
    pub long_message: String,
}

#[derive(Debug, Clone, Default)]
pub struct TradingResponse {
    pub ack: String,
    pub errors: Vec<TradingError>,
    /// Present on `GetItemResponse`: the item's current/final price.
    pub current_price: Option<Money>,
    pub currency: Option<String>,
}

impl TradingResponse {
    pub fn is_success(&self) -> bool {
        self.ack.eq_ignore_ascii_case("Success") || self.ack.eq_ignore_ascii_case("Warning")
    }
}

fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

pub fn build_place_offer_request(
    auth_token: &str,
    item_id: &str,
    amount: Money,
    site_id: u32,
) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
<PlaceOfferRequest xmlns=\"urn:ebay:apis:eBLBaseComponents\">\
<RequesterCredentials><eBayAuthToken>{token}</eBayAuthToken></RequesterCredentials>\
<Action>Bid</Action>\
<ItemID>{item_id}</ItemID>\
<Offer><Action>Bid</Action><Quantity>1</Quantity>\
<MaxBid><Amount>{amount}</Amount></MaxBid></Offer>\
<SiteID>{site_id}</SiteID>\
</PlaceOfferRequest>",
        token = escape_xml(auth_token),
        item_id = escape_xml(item_id),
        amount = amount,
        site_id = site_id,
    )
}

/// Walks the response with `quick-xml`'s pull reader, collecting `Ack`,
/// every `Errors/ErrorCode` + `Errors/LongMessage` pair, and (if present)
/// `Item/SellingStatus/CurrentPrice`.
pub fn parse_trading_response(xml: &str) -> Result<TradingResponse, XmlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut out = TradingResponse::default();
    let mut path: Vec<String> = Vec::new();
    let mut current_error = TradingError::default();
    let mut text_buf = String::new();
    let mut currency_attr: Option<String> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                if name == "CurrentPrice" || name == "Amount" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"currencyID" {
                            currency_attr =
                                Some(String::from_utf8_lossy(&attr.value).to_string());
                        }
                    }
                }
                path.push(name);
                text_buf.clear();
            }
            Ok(Event::Text(t)) => {
                text_buf.push_str(&t.unescape().map_err(|e| XmlError::Malformed(e.to_string()))?);
            }
            Ok(Event::End(_)) => {
                let name = path.pop().unwrap_or_default();
                let value = text_buf.trim().to_string();
                text_buf.clear();

                let in_errors = path.last().map(|s| s == "Errors").unwrap_or(false);

                match name.as_str() {
                    "Ack" if path.is_empty() => out.ack = value,
                    "ErrorCode" if in_errors => current_error.error_code = value,
                    "LongMessage" if in_errors => current_error.long_message = value,
                    "Errors" => {
                        if !current_error.error_code.is_empty()
                            || !current_error.long_message.is_empty()
                        {
                            out.errors.push(std::mem::take(&mut current_error));
                        }
                    }
                    "CurrentPrice" => {
                        if let Ok(money) = Money::parse(&value) {
                            out.current_price = Some(money);
                            out.currency = currency_attr.take();
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(XmlError::Malformed(e.to_string())),
        }
    }

    if out.ack.is_empty() {
        return Err(XmlError::Malformed("missing Ack element".to_string()));
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_success_ack() {
        let xml = r#"<?xml version="1.0"?><PlaceOfferResponse><Ack>Success</Ack></PlaceOfferResponse>"#;
        let resp = parse_trading_response(xml).unwrap();
        assert!(resp.is_success());
        assert!(resp.errors.is_empty());
    }

    #[test]
    fn parses_failure_with_error_code() {
        let xml = r#"<?xml version="1.0"?><PlaceOfferResponse><Ack>Failure</Ack>
<Errors><ErrorCode>10729</ErrorCode><LongMessage>The item was not found.</LongMessage></Errors>
</PlaceOfferResponse>"#;
        let resp = parse_trading_response(xml).unwrap();
        assert!(!resp.is_success());
        assert_eq!(resp.errors.len(), 1);
        assert_eq!(resp.errors[0].error_code, "10729");
    }

    #[test]
    fn parses_current_price_from_get_item() {
        let xml = r#"<?xml version="1.0"?><GetItemResponse><Ack>Success</Ack>
<Item><SellingStatus><CurrentPrice currencyID="USD">110.00</CurrentPrice></SellingStatus></Item>
</GetItemResponse>"#;
        let resp = parse_trading_response(xml).unwrap();
        assert_eq!(resp.current_price.unwrap().to_string(), "110.00");
        assert_eq!(resp.currency.as_deref(), Some("USD"));
    }

    #[test]
    fn request_bodies_escape_xml_specials() {
        let body = build_place_offer_request("tok<en>", "123", Money::parse("10.00").unwrap(), 0);
        assert!(body.contains("tok&lt;en&gt;"));
    }
}
