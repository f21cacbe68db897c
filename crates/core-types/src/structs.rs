use crate::enums::{OrderSide, OrderStatus, OrderType, PositionSide, SignalType, TimeInForce};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// An OHLCV bar for a single symbol. Owned by the market-data side; read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    #[serde(default)]
    pub trade_count: u64,
    #[serde(default)]
    pub vwap: Option<Decimal>,
}

/// A single trade print.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub symbol: String,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub size: Decimal,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub trade_id: Option<String>,
}

/// A strategy's recommendation, prior to risk gating and order construction.
///
/// Signals are immutable once created and retained for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Uuid,
    pub strategy_id: String,
    pub symbol: String,
    pub signal_type: SignalType,
    /// Conviction in [-1.0, 1.0]; negative for bearish signals.
    pub strength: Decimal,
    pub metadata: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
}

impl Signal {
    /// Builds a signal, clamping `strength` into [-1, 1].
    pub fn new(
        strategy_id: impl Into<String>,
        symbol: impl Into<String>,
        signal_type: SignalType,
        strength: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            strategy_id: strategy_id.into(),
            symbol: symbol.into(),
            signal_type,
            strength: strength.clamp(Decimal::NEGATIVE_ONE, Decimal::ONE),
            metadata: BTreeMap::new(),
            created_at,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

/// A read-only snapshot of the brokerage account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountInfo {
    pub equity: Decimal,
    pub cash: Decimal,
    pub buying_power: Decimal,
    /// Equity at the start of the current session, when the venue reports it.
    pub day_start_equity: Option<Decimal>,
    /// Realized P&L booked since the session start.
    #[serde(default)]
    pub realized_pnl_today: Decimal,
    pub as_of: DateTime<Utc>,
}

/// An order owned by the engine. Status changes go through the methods in
/// `lifecycle.rs` only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub qty: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub strategy_id: Option<String>,
    pub broker_order_id: Option<String>,
    pub reject_reason: Option<String>,
    /// Set when a cancel was requested before the venue assigned an id.
    #[serde(default)]
    pub cancel_requested: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Creates a new `pending` order with nothing filled.
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        order_type: OrderType,
        qty: Decimal,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            symbol: symbol.into(),
            side,
            order_type,
            time_in_force: TimeInForce::Day,
            qty,
            limit_price: None,
            stop_price: None,
            status: OrderStatus::Pending,
            filled_qty: Decimal::ZERO,
            filled_avg_price: None,
            strategy_id: None,
            broker_order_id: None,
            reject_reason: None,
            cancel_requested: false,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn market(symbol: impl Into<String>, side: OrderSide, qty: Decimal) -> Self {
        Self::new(symbol, side, OrderType::Market, qty)
    }

    pub fn limit(symbol: impl Into<String>, side: OrderSide, qty: Decimal, price: Decimal) -> Self {
        let mut order = Self::new(symbol, side, OrderType::Limit, qty);
        order.limit_price = Some(price);
        order
    }

    pub fn with_time_in_force(mut self, tif: TimeInForce) -> Self {
        self.time_in_force = tif;
        self
    }

    pub fn with_strategy(mut self, strategy_id: impl Into<String>) -> Self {
        self.strategy_id = Some(strategy_id.into());
        self
    }

    /// Quantity not yet filled.
    pub fn remaining_qty(&self) -> Decimal {
        self.qty - self.filled_qty
    }

    /// The price the order is expected to trade at, if the order itself names one.
    pub fn own_price(&self) -> Option<Decimal> {
        self.limit_price.or(self.stop_price)
    }
}

/// The incremental part of a cumulative execution report.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fill {
    pub side: OrderSide,
    pub qty: Decimal,
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// The net holding in one symbol. `qty` is signed: positive long, negative short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub avg_entry_price: Decimal,
    pub market_value: Decimal,
    pub side: PositionSide,
    pub opened_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
