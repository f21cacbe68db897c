use crate::error::RiskError;
use crate::{RiskContext, RiskManager};
use configuration::{DailyLossBasis, RiskManagement};
use core_types::Order;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// A simple, concrete implementation of the `RiskManager` trait.
///
/// Two gates, each evaluated on its own:
/// 1. a daily loss breaker that halts all new orders once the session loss reaches
///    `max_daily_loss_pct` of day-start equity;
/// 2. a position-sizing limit on the projected notional exposure of the order's symbol.
#[derive(Debug, Clone)]
pub struct SimpleRiskManager {
    params: RiskManagement,
}

impl SimpleRiskManager {
    /// Creates a new `SimpleRiskManager` with the given configuration parameters.
    pub fn new(params: RiskManagement) -> Result<Self, RiskError> {
        // Validate that risk parameters are logical.
        if params.max_position_pct <= dec!(0) || params.max_position_pct > dec!(1) {
            return Err(RiskError::InvalidParameters(
                "max_position_pct must be in (0, 1]".to_string(),
            ));
        }
        if params.max_daily_loss_pct <= dec!(0) || params.max_daily_loss_pct >= dec!(1) {
            return Err(RiskError::InvalidParameters(
                "max_daily_loss_pct must be in (0, 1)".to_string(),
            ));
        }
        Ok(Self { params })
    }

    /// Shorthand for the common case of equity-based loss measurement.
    pub fn with_limits(max_position_pct: Decimal, max_daily_loss_pct: Decimal) -> Result<Self, RiskError> {
        Self::new(RiskManagement {
            max_position_pct,
            max_daily_loss_pct,
            daily_loss_basis: DailyLossBasis::Equity,
            session_utc_offset_hours: 0,
        })
    }

    pub fn params(&self) -> &RiskManagement {
        &self.params
    }

    fn check_daily_loss(&self, order: &Order, ctx: &RiskContext) -> Result<(), RiskError> {
        let overflow = |what| RiskError::Overflow {
            symbol: order.symbol.clone(),
            what,
        };
        let pnl = match self.params.daily_loss_basis {
            DailyLossBasis::Equity => ctx
                .account
                .equity
                .checked_sub(ctx.day_start_equity)
                .ok_or_else(|| overflow("daily P&L"))?,
            DailyLossBasis::Realized => ctx.account.realized_pnl_today,
        };
        let limit = -self
            .params
            .max_daily_loss_pct
            .checked_mul(ctx.day_start_equity)
            .ok_or_else(|| overflow("daily loss limit"))?;

        if pnl <= limit {
            return Err(RiskError::DailyLossLimitExceeded { pnl, limit });
        }
        Ok(())
    }

    fn check_position_size(&self, order: &Order, ctx: &RiskContext) -> Result<(), RiskError> {
        let overflow = |what| RiskError::Overflow {
            symbol: order.symbol.clone(),
            what,
        };
        let order_notional = order
            .remaining_qty()
            .checked_mul(ctx.reference_price)
            .map(|n| order.side.sign() * n)
            .ok_or_else(|| overflow("order notional"))?;
        let projected = ctx
            .position_market_value
            .checked_add(ctx.working_notional)
            .and_then(|e| e.checked_add(order_notional))
            .ok_or_else(|| overflow("projected exposure"))?;
        let limit = self
            .params
            .max_position_pct
            .checked_mul(ctx.account.equity)
            .ok_or_else(|| overflow("position limit"))?;

        if projected.abs() > limit {
            return Err(RiskError::PositionLimitExceeded {
                symbol: order.symbol.clone(),
                projected: projected.abs(),
                limit,
            });
        }
        Ok(())
    }
}

impl RiskManager for SimpleRiskManager {
    fn check_order(&self, order: &Order, ctx: &RiskContext) -> Result<(), RiskError> {
        if ctx.account.equity <= Decimal::ZERO {
            return Err(RiskError::InsufficientEquity(ctx.account.equity));
        }
        if ctx.reference_price <= Decimal::ZERO {
            return Err(RiskError::InvalidReferencePrice(ctx.reference_price));
        }

        // The breaker is a trading halt: it applies whatever the symbol or side.
        self.check_daily_loss(order, ctx)?;
        self.check_position_size(order, ctx)?;

        tracing::debug!(
            order_id = %order.id,
            symbol = %order.symbol,
            "Risk check passed"
        );
        Ok(())
    }
}
