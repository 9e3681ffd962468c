//! Trading sub-client: order entry, amendment, cancellation and open orders.
//!
//! These methods hit the matching engine and are charged the matching weight.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::call::CallOptions;
use crate::client::DeribitClient;
use crate::error::{SessionError, SessionResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    fn method(self) -> &'static str {
        match self {
            Direction::Buy => "private/buy",
            Direction::Sell => "private/sell",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Limit,
    StopLimit,
    TakeLimit,
    Market,
    StopMarket,
    TakeMarket,
    MarketLimit,
    TrailingStop,
}

impl OrderType {
    /// Types that rest at a limit price.
    pub fn needs_price(self) -> bool {
        matches!(self, OrderType::Limit | OrderType::StopLimit | OrderType::TakeLimit)
    }

    /// Types fired by a trigger price.
    pub fn is_triggered(self) -> bool {
        matches!(
            self,
            OrderType::StopLimit
                | OrderType::TakeLimit
                | OrderType::StopMarket
                | OrderType::TakeMarket
                | OrderType::TrailingStop
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    GoodTilCancelled,
    GoodTilDay,
    FillOrKill,
    ImmediateOrCancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    IndexPrice,
    MarkPrice,
    LastPrice,
}

/// Option orders priced in USD or implied volatility instead of the base currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdvancedType {
    Usd,
    Implv,
}

/// `type` filter for `private/get_open_orders_by_currency`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OpenOrdersFilter {
    #[default]
    All,
    Limit,
    TriggerAll,
    StopAll,
    TakeAll,
    TrailingAll,
}

// ─── Requests ────────────────────────────────────────────────────────────────

/// Parameters of `private/buy` and `private/sell`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaceOrderRequest {
    pub instrument_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contracts: Option<f64>,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_in_force: Option<TimeInForce>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_show: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_post_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger: Option<TriggerType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced: Option<AdvancedType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmp: Option<bool>,
    /// Milliseconds since the epoch after which the server rejects the order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<i64>,
}

impl PlaceOrderRequest {
    pub fn new(instrument_name: impl Into<String>, order_type: OrderType) -> Self {
        Self {
            instrument_name: instrument_name.into(),
            amount: None,
            contracts: None,
            order_type,
            label: None,
            price: None,
            time_in_force: None,
            max_show: None,
            post_only: None,
            reject_post_only: None,
            reduce_only: None,
            trigger_price: None,
            trigger_offset: None,
            trigger: None,
            advanced: None,
            mmp: None,
            valid_until: None,
        }
    }

    pub fn limit(instrument_name: impl Into<String>, amount: f64, price: f64) -> Self {
        Self::new(instrument_name, OrderType::Limit)
            .amount(amount)
            .price(price)
    }

    pub fn market(instrument_name: impl Into<String>, amount: f64) -> Self {
        Self::new(instrument_name, OrderType::Market).amount(amount)
    }

    pub fn amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn contracts(mut self, contracts: f64) -> Self {
        self.contracts = Some(contracts);
        self
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn time_in_force(mut self, time_in_force: TimeInForce) -> Self {
        self.time_in_force = Some(time_in_force);
        self
    }

    pub fn max_show(mut self, max_show: f64) -> Self {
        self.max_show = Some(max_show);
        self
    }

    pub fn post_only(mut self, reject_instead_of_reprice: bool) -> Self {
        self.post_only = Some(true);
        self.reject_post_only = Some(reject_instead_of_reprice);
        self
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = Some(true);
        self
    }

    pub fn trigger(mut self, trigger: TriggerType, trigger_price: f64) -> Self {
        self.trigger = Some(trigger);
        self.trigger_price = Some(trigger_price);
        self
    }

    pub fn trigger_offset(mut self, offset: f64) -> Self {
        self.trigger_offset = Some(offset);
        self
    }

    pub fn advanced(mut self, advanced: AdvancedType) -> Self {
        self.advanced = Some(advanced);
        self
    }

    pub fn mmp(mut self) -> Self {
        self.mmp = Some(true);
        self
    }

    pub fn valid_until(mut self, timestamp_ms: i64) -> Self {
        self.valid_until = Some(timestamp_ms);
        self
    }

    /// Reject requests the server would refuse anyway, before spending rate-limit credits.
    pub fn validate(&self) -> SessionResult<()> {
        if self.instrument_name.is_empty() {
            return Err(SessionError::Config("order needs an instrument".into()));
        }
        match (self.amount, self.contracts) {
            (None, None) => {
                return Err(SessionError::Config("order needs an amount or contracts".into()))
            }
            (Some(size), _) | (None, Some(size)) if size <= 0.0 => {
                return Err(SessionError::Config(format!("order size must be positive, got {}", size)))
            }
            _ => {}
        }
        if self.order_type.needs_price() && self.price.is_none() {
            return Err(SessionError::Config(format!(
                "{:?} order needs a price",
                self.order_type
            )));
        }
        if self.order_type.is_triggered() && self.trigger.is_none() {
            return Err(SessionError::Config(format!(
                "{:?} order needs a trigger",
                self.order_type
            )));
        }
        Ok(())
    }
}

/// Parameters of `private/edit`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EditOrderRequest {
    pub order_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contracts: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reject_post_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_offset: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advanced: Option<AdvancedType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mmp: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub valid_until: Option<i64>,
}

impl EditOrderRequest {
    pub fn new(order_id: impl Into<String>) -> Self {
        Self {
            order_id: order_id.into(),
            amount: None,
            contracts: None,
            price: None,
            post_only: None,
            reject_post_only: None,
            reduce_only: None,
            trigger_price: None,
            trigger_offset: None,
            advanced: None,
            mmp: None,
            valid_until: None,
        }
    }

    pub fn amount(mut self, amount: f64) -> Self {
        self.amount = Some(amount);
        self
    }

    pub fn contracts(mut self, contracts: f64) -> Self {
        self.contracts = Some(contracts);
        self
    }

    pub fn price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn post_only(mut self, reject_instead_of_reprice: bool) -> Self {
        self.post_only = Some(true);
        self.reject_post_only = Some(reject_instead_of_reprice);
        self
    }

    pub fn reduce_only(mut self) -> Self {
        self.reduce_only = Some(true);
        self
    }

    pub fn trigger_price(mut self, trigger_price: f64) -> Self {
        self.trigger_price = Some(trigger_price);
        self
    }

    pub fn trigger_offset(mut self, offset: f64) -> Self {
        self.trigger_offset = Some(offset);
        self
    }

    pub fn advanced(mut self, advanced: AdvancedType) -> Self {
        self.advanced = Some(advanced);
        self
    }

    pub fn mmp(mut self, mmp: bool) -> Self {
        self.mmp = Some(mmp);
        self
    }

    pub fn valid_until(mut self, timestamp_ms: i64) -> Self {
        self.valid_until = Some(timestamp_ms);
        self
    }

    pub fn validate(&self) -> SessionResult<()> {
        if self.order_id.is_empty() {
            return Err(SessionError::Config("edit needs an order id".into()));
        }
        if self.amount.is_none() && self.contracts.is_none() {
            return Err(SessionError::Config("edit needs an amount or contracts".into()));
        }
        Ok(())
    }
}

// ─── Responses ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub order_state: String,
    pub instrument_name: String,
    pub direction: String,
    pub amount: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Trade {
    pub trade_id: String,
    pub instrument_name: String,
    pub direction: String,
    pub price: f64,
    pub amount: f64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Result of `private/buy`, `private/sell` and `private/edit`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderResult {
    pub order: Order,
    #[serde(default)]
    pub trades: Vec<Trade>,
}

// ─── Sub-client ──────────────────────────────────────────────────────────────

pub struct Trading<'a> {
    pub(crate) client: &'a DeribitClient,
}

impl<'a> Trading<'a> {
    pub async fn buy(&self, request: &PlaceOrderRequest) -> SessionResult<OrderResult> {
        self.place(Direction::Buy, request).await
    }

    pub async fn sell(&self, request: &PlaceOrderRequest) -> SessionResult<OrderResult> {
        self.place(Direction::Sell, request).await
    }

    pub async fn place(
        &self,
        direction: Direction,
        request: &PlaceOrderRequest,
    ) -> SessionResult<OrderResult> {
        request.validate()?;
        tracing::debug!(
            instrument = %request.instrument_name,
            ?direction,
            order_type = ?request.order_type,
            "Placing order"
        );
        self.client
            .invoke(direction.method(), request, CallOptions::new().matching())
            .await
    }

    pub async fn edit(&self, request: &EditOrderRequest) -> SessionResult<OrderResult> {
        request.validate()?;
        self.client
            .invoke("private/edit", request, CallOptions::new().matching())
            .await
    }

    pub async fn cancel(&self, order_id: &str) -> SessionResult<Order> {
        self.client
            .invoke(
                "private/cancel",
                json!({ "order_id": order_id }),
                CallOptions::new().matching(),
            )
            .await
    }

    /// Cancel every open order; returns how many were cancelled.
    pub async fn cancel_all(&self) -> SessionResult<u64> {
        self.client
            .invoke("private/cancel_all", json!({}), CallOptions::new().matching())
            .await
    }

    pub async fn cancel_all_by_instrument(&self, instrument_name: &str) -> SessionResult<u64> {
        self.client
            .invoke(
                "private/cancel_all_by_instrument",
                json!({ "instrument_name": instrument_name }),
                CallOptions::new().matching(),
            )
            .await
    }

    pub async fn get_open_orders_by_currency(
        &self,
        currency: &str,
        filter: OpenOrdersFilter,
    ) -> SessionResult<Vec<Order>> {
        self.client
            .invoke(
                "private/get_open_orders_by_currency",
                json!({ "currency": currency, "type": filter }),
                CallOptions::new().matching(),
            )
            .await
    }
}
