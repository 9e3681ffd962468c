//! Channel name builders.

use std::fmt;

/// Notification interval of a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Interval {
    #[default]
    Ms100,
    Agg2,
    Raw,
}

impl Interval {
    pub fn as_str(self) -> &'static str {
        match self {
            Interval::Ms100 => "100ms",
            Interval::Agg2 => "agg2",
            Interval::Raw => "raw",
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn book(instrument: &str, interval: Interval) -> String {
    format!("book.{}.{}", instrument, interval)
}

/// Grouped order book, e.g. `book.BTC-PERPETUAL.none.10.100ms`.
pub fn book_grouped(instrument: &str, group: &str, depth: u32, interval: Interval) -> String {
    format!("book.{}.{}.{}.{}", instrument, group, depth, interval)
}

pub fn trades(instrument: &str, interval: Interval) -> String {
    format!("trades.{}.{}", instrument, interval)
}

pub fn ticker(instrument: &str, interval: Interval) -> String {
    format!("ticker.{}.{}", instrument, interval)
}

pub fn quote(instrument: &str) -> String {
    format!("quote.{}", instrument)
}

pub fn platform_state() -> String {
    "platform_state".to_string()
}

pub fn user_orders(instrument: &str, interval: Interval) -> String {
    format!("user.orders.{}.{}", instrument, interval)
}

pub fn user_trades(instrument: &str, interval: Interval) -> String {
    format!("user.trades.{}.{}", instrument, interval)
}

pub fn user_changes(instrument: &str, interval: Interval) -> String {
    format!("user.changes.{}.{}", instrument, interval)
}

pub fn user_portfolio(currency: &str) -> String {
    format!("user.portfolio.{}", currency.to_lowercase())
}

/// Whether a channel carries account data and needs an authenticated session.
pub fn is_private(channel: &str) -> bool {
    channel.starts_with("user.")
}
