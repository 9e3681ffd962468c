//! Account sub-client: balances and open positions.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::api::market_data::InstrumentKind;
use crate::call::CallOptions;
use crate::client::DeribitClient;
use crate::error::SessionResult;

/// Result of `private/get_account_summary`. Fields not modelled here are kept in `extra`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AccountSummary {
    pub currency: String,
    pub balance: f64,
    pub equity: f64,
    pub available_funds: f64,
    pub margin_balance: f64,
    pub initial_margin: f64,
    pub maintenance_margin: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One open position from `private/get_positions`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Position {
    pub instrument_name: String,
    pub kind: InstrumentKind,
    /// `buy`, `sell` or `zero`.
    pub direction: String,
    /// Signed; negative for short positions.
    pub size: f64,
    pub average_price: f64,
    pub mark_price: f64,
    #[serde(default)]
    pub total_profit_loss: Option<f64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub struct Account<'a> {
    pub(crate) client: &'a DeribitClient,
}

impl<'a> Account<'a> {
    pub async fn get_account_summary(&self, currency: &str, extended: bool) -> SessionResult<AccountSummary> {
        self.client
            .invoke(
                "private/get_account_summary",
                json!({ "currency": currency, "extended": extended }),
                CallOptions::new(),
            )
            .await
    }

    pub async fn get_positions(
        &self,
        currency: &str,
        kind: Option<InstrumentKind>,
    ) -> SessionResult<Vec<Position>> {
        let mut params = json!({ "currency": currency });
        if let Some(kind) = kind {
            params["kind"] = serde_json::to_value(kind)?;
        }
        self.client
            .invoke("private/get_positions", params, CallOptions::new())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_keeps_unknown_fields() {
        let summary: AccountSummary = serde_json::from_value(json!({
            "currency": "BTC",
            "balance": 1.5,
            "equity": 1.6,
            "available_funds": 1.2,
            "margin_balance": 1.6,
            "initial_margin": 0.3,
            "maintenance_margin": 0.2,
            "delta_total": 0.01
        }))
        .unwrap();
        assert_eq!(summary.currency, "BTC");
        assert_eq!(summary.extra.get("delta_total"), Some(&json!(0.01)));
    }

    #[test]
    fn test_short_position_decodes() {
        let positions: Vec<Position> = serde_json::from_value(json!([{
            "instrument_name": "BTC-PERPETUAL",
            "kind": "future",
            "direction": "sell",
            "size": -200.0,
            "average_price": 50_100.0,
            "mark_price": 50_000.0,
            "total_profit_loss": 0.0004,
            "leverage": 50
        }]))
        .unwrap();
        assert_eq!(positions[0].kind, InstrumentKind::Future);
        assert!(positions[0].size < 0.0);
        assert_eq!(positions[0].extra.get("leverage"), Some(&json!(50)));
    }
}
