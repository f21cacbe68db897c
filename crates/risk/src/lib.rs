//! # Pre-trade Risk
//!
//! A stateless gate between order intent and the venue. A `RiskManager` is a
//! pure function of the order, one coherent `RiskContext` snapshot, and its own
//! configured thresholds; it holds no mutable state, so independent checks may
//! run in parallel. Supplying a consistent snapshot is the caller's job.

pub mod error;
pub mod simple_manager;

pub use error::RiskError;
pub use simple_manager::SimpleRiskManager;

use core_types::{AccountInfo, Order};
use rust_decimal::Decimal;

/// Everything a risk check may look at besides the order itself.
#[derive(Debug, Clone)]
pub struct RiskContext {
    /// Account snapshot fetched for this check.
    pub account: AccountInfo,
    /// Baseline for the loss breaker: the venue's figure, or the engine's own
    /// session baseline when the venue does not report one.
    pub day_start_equity: Decimal,
    /// Signed market value of the current position in the order's symbol.
    pub position_market_value: Decimal,
    /// Signed notional of the unfilled remainder of the symbol's working orders.
    pub working_notional: Decimal,
    /// Price used to value the order.
    pub reference_price: Decimal,
}

/// The pre-trade gate.
pub trait RiskManager: Send + Sync {
    /// Returns `Ok(())` when the order may proceed, or the reason it may not.
    fn check_order(&self, order: &Order, ctx: &RiskContext) -> Result<(), RiskError>;
}
