use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("Risk parameters from configuration are invalid: {0}")]
    InvalidParameters(String),

    #[error("Insufficient portfolio equity ({0}) to accept new orders.")]
    InsufficientEquity(Decimal),

    #[error("Position limit exceeded for {symbol}: projected exposure {projected} > limit {limit}")]
    PositionLimitExceeded {
        symbol: String,
        projected: Decimal,
        limit: Decimal,
    },

    #[error("Daily loss limit reached: P&L {pnl} <= {limit}; trading is halted for the session")]
    DailyLossLimitExceeded { pnl: Decimal, limit: Decimal },

    #[error("The provided reference price ({0}) is zero or negative.")]
    InvalidReferencePrice(Decimal),

    /// The exposure arithmetic does not fit in a `Decimal`.
    #[error("Order for {symbol} is too large to evaluate: {what} overflowed")]
    Overflow { symbol: String, what: &'static str },
}
