//! Market data sub-client: instruments, tickers, order books and book summaries.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::call::CallOptions;
use crate::client::DeribitClient;
use crate::error::SessionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstrumentKind {
    Future,
    Option,
    Spot,
    FutureCombo,
    OptionCombo,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Instrument {
    pub instrument_name: String,
    pub kind: InstrumentKind,
    pub base_currency: String,
    #[serde(default)]
    pub quote_currency: Option<String>,
    pub is_active: bool,
    pub tick_size: f64,
    pub contract_size: f64,
    pub min_trade_amount: f64,
    #[serde(default)]
    pub expiration_timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Ticker {
    pub instrument_name: String,
    pub state: String,
    pub timestamp: i64,
    pub best_bid_price: Option<f64>,
    pub best_bid_amount: f64,
    pub best_ask_price: Option<f64>,
    pub best_ask_amount: f64,
    pub last_price: Option<f64>,
    pub mark_price: f64,
    #[serde(default)]
    pub index_price: Option<f64>,
    #[serde(default)]
    pub open_interest: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of `public/get_order_book`. Levels are `[price, amount]`, best first.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderBook {
    pub instrument_name: String,
    pub timestamp: i64,
    pub state: String,
    pub bids: Vec<[f64; 2]>,
    pub asks: Vec<[f64; 2]>,
    #[serde(default)]
    pub mark_price: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl OrderBook {
    pub fn best_bid(&self) -> Option<[f64; 2]> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<[f64; 2]> {
        self.asks.first().copied()
    }

    pub fn spread(&self) -> Option<f64> {
        Some(self.best_ask()?[0] - self.best_bid()?[0])
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BookSummary {
    pub instrument_name: String,
    pub bid_price: Option<f64>,
    pub ask_price: Option<f64>,
    pub mark_price: Option<f64>,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub open_interest: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Depths the server accepts for `public/get_order_book`.
pub const ORDER_BOOK_DEPTHS: [u32; 8] = [1, 5, 10, 20, 50, 100, 1000, 10000];

pub struct MarketData<'a> {
    pub(crate) client: &'a DeribitClient,
}

impl<'a> MarketData<'a> {
    pub async fn get_instrument(&self, instrument_name: &str) -> SessionResult<Instrument> {
        self.client
            .invoke(
                "public/get_instrument",
                json!({ "instrument_name": instrument_name }),
                CallOptions::new(),
            )
            .await
    }

    pub async fn get_instruments(
        &self,
        currency: &str,
        kind: Option<InstrumentKind>,
        expired: bool,
    ) -> SessionResult<Vec<Instrument>> {
        let mut params = json!({ "currency": currency, "expired": expired });
        if let Some(kind) = kind {
            params["kind"] = serde_json::to_value(kind)?;
        }
        self.client
            .invoke("public/get_instruments", params, CallOptions::new())
            .await
    }

    pub async fn get_ticker(&self, instrument_name: &str) -> SessionResult<Ticker> {
        self.client
            .invoke(
                "public/ticker",
                json!({ "instrument_name": instrument_name }),
                CallOptions::new(),
            )
            .await
    }

    /// `depth` is rounded up to the next accepted depth.
    pub async fn get_order_book(&self, instrument_name: &str, depth: u32) -> SessionResult<OrderBook> {
        let depth = ORDER_BOOK_DEPTHS
            .into_iter()
            .find(|d| *d >= depth)
            .unwrap_or(ORDER_BOOK_DEPTHS[ORDER_BOOK_DEPTHS.len() - 1]);
        self.client
            .invoke(
                "public/get_order_book",
                json!({ "instrument_name": instrument_name, "depth": depth }),
                CallOptions::new(),
            )
            .await
    }

    /// The server answers with a one-element list.
    pub async fn get_book_summary_by_instrument(
        &self,
        instrument_name: &str,
    ) -> SessionResult<Vec<BookSummary>> {
        self.client
            .invoke(
                "public/get_book_summary_by_instrument",
                json!({ "instrument_name": instrument_name }),
                CallOptions::new(),
            )
            .await
    }

    pub async fn get_book_summary_by_currency(
        &self,
        currency: &str,
        kind: Option<InstrumentKind>,
    ) -> SessionResult<Vec<BookSummary>> {
        let mut params = json!({ "currency": currency });
        if let Some(kind) = kind {
            params["kind"] = serde_json::to_value(kind)?;
        }
        self.client
            .invoke("public/get_book_summary_by_currency", params, CallOptions::new())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instrument_decodes() {
        let instrument: Instrument = serde_json::from_value(json!({
            "instrument_name": "BTC-PERPETUAL",
            "kind": "future",
            "base_currency": "BTC",
            "quote_currency": "USD",
            "is_active": true,
            "tick_size": 0.5,
            "contract_size": 10.0,
            "min_trade_amount": 10.0,
            "expiration_timestamp": 32503708800000i64,
            "settlement_period": "perpetual"
        }))
        .unwrap();
        assert_eq!(instrument.kind, InstrumentKind::Future);
        assert_eq!(instrument.extra.get("settlement_period"), Some(&json!("perpetual")));
    }

    #[test]
    fn test_order_book_levels() {
        let book: OrderBook = serde_json::from_value(json!({
            "instrument_name": "BTC-PERPETUAL",
            "timestamp": 1_700_000_000_000i64,
            "state": "open",
            "bids": [[49_999.5, 1200.0], [49_999.0, 300.0]],
            "asks": [[50_000.5, 800.0]],
            "mark_price": 50_000.1,
            "change_id": 42
        }))
        .unwrap();
        assert_eq!(book.best_bid(), Some([49_999.5, 1200.0]));
        assert_eq!(book.spread(), Some(1.0));
        assert_eq!(book.extra.get("change_id"), Some(&json!(42)));
    }

    #[test]
    fn test_empty_book_has_no_spread() {
        let book: OrderBook = serde_json::from_value(json!({
            "instrument_name": "BTC-29MAR24",
            "timestamp": 0,
            "state": "closed",
            "bids": [],
            "asks": []
        }))
        .unwrap();
        assert!(book.spread().is_none());
    }

    #[test]
    fn test_ticker_with_empty_side() {
        let ticker: Ticker = serde_json::from_value(json!({
            "instrument_name": "BTC-PERPETUAL",
            "state": "open",
            "timestamp": 1,
            "best_bid_price": null,
            "best_bid_amount": 0.0,
            "best_ask_price": 50_000.0,
            "best_ask_amount": 10.0,
            "last_price": 49_990.0,
            "mark_price": 49_995.0
        }))
        .unwrap();
        assert!(ticker.best_bid_price.is_none());
        assert_eq!(ticker.best_ask_price, Some(50_000.0));
    }
}
