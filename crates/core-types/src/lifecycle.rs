//! State transitions for `Order` and fill arithmetic for `Position`.
//!
//! Every mutation either fully applies or leaves the value untouched and
//! returns a `CoreError`.

use crate::enums::{OrderStatus, PositionSide};
use crate::error::CoreError;
use crate::structs::{Fill, Order, Position};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

impl Order {
    fn check_transition(&self, next: OrderStatus) -> Result<(), CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::OrderAlreadyTerminal(self.status));
        }
        if !self.status.can_transition_to(next) {
            return Err(CoreError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        Ok(())
    }

    /// `pending -> submitted`: the venue accepted the order.
    pub fn mark_submitted(
        &mut self,
        broker_order_id: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.check_transition(OrderStatus::Submitted)?;
        self.status = OrderStatus::Submitted;
        self.broker_order_id = Some(broker_order_id.into());
        self.updated_at = at;
        Ok(())
    }

    /// `pending/submitted -> rejected`.
    pub fn mark_rejected(
        &mut self,
        reason: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Result<(), CoreError> {
        self.check_transition(OrderStatus::Rejected)?;
        self.status = OrderStatus::Rejected;
        self.reject_reason = Some(reason.into());
        self.updated_at = at;
        Ok(())
    }

    /// `submitted/partial -> cancelled`. The filled quantity is retained.
    pub fn mark_cancelled(&mut self, at: DateTime<Utc>) -> Result<(), CoreError> {
        self.check_transition(OrderStatus::Cancelled)?;
        self.status = OrderStatus::Cancelled;
        self.updated_at = at;
        Ok(())
    }

    /// Applies a cumulative execution report.
    ///
    /// Returns the incremental `Fill`, or `None` when the report carries no new
    /// quantity (a duplicate or stale report).
    pub fn apply_fill(
        &mut self,
        cumulative_qty: Decimal,
        cumulative_avg_price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<Fill>, CoreError> {
        if self.status.is_terminal() {
            return Err(CoreError::OrderAlreadyTerminal(self.status));
        }
        if cumulative_qty > self.qty {
            return Err(CoreError::Overfill {
                filled: cumulative_qty,
                qty: self.qty,
            });
        }

        let delta = cumulative_qty - self.filled_qty;
        if delta <= Decimal::ZERO {
            return Ok(None);
        }

        let next = if cumulative_qty == self.qty {
            OrderStatus::Filled
        } else {
            OrderStatus::PartiallyFilled
        };
        self.check_transition(next)?;

        let prior_notional = self.filled_avg_price.unwrap_or(Decimal::ZERO) * self.filled_qty;
        let delta_price = (cumulative_avg_price * cumulative_qty - prior_notional) / delta;
        // Venues round the cumulative average; fall back to it if the
        // back-computed price is nonsensical.
        let price = if delta_price > Decimal::ZERO {
            delta_price
        } else {
            cumulative_avg_price
        };

        self.status = next;
        self.filled_qty = cumulative_qty;
        self.filled_avg_price = Some(cumulative_avg_price);
        self.updated_at = at;

        Ok(Some(Fill {
            side: self.side,
            qty: delta,
            price,
            timestamp: at,
        }))
    }
}

impl Position {
    /// Opens a position from the first fill in a symbol.
    pub fn open(symbol: impl Into<String>, fill: &Fill) -> Self {
        let qty = fill.side.sign() * fill.qty;
        Self {
            symbol: symbol.into(),
            qty,
            avg_entry_price: fill.price,
            market_value: qty * fill.price,
            side: PositionSide::from_qty(qty).unwrap_or(PositionSide::Long),
            opened_at: fill.timestamp,
            updated_at: fill.timestamp,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }

    /// Applies a fill and returns the realized P&L of any quantity it closed.
    ///
    /// Adding to the position re-weights `avg_entry_price`; reducing keeps it;
    /// crossing zero closes the old side and reopens at the fill price.
    pub fn apply_fill(&mut self, fill: &Fill) -> Decimal {
        let signed = fill.side.sign() * fill.qty;
        let new_qty = self.qty + signed;
        let mut realized = Decimal::ZERO;

        let same_direction = self.qty.is_zero() || (self.qty.is_sign_positive() == signed.is_sign_positive());

        if same_direction {
            let total = new_qty.abs();
            if !total.is_zero() {
                self.avg_entry_price =
                    (self.qty.abs() * self.avg_entry_price + fill.qty * fill.price) / total;
            }
            if self.qty.is_zero() {
                self.opened_at = fill.timestamp;
            }
        } else {
            let closing = self.qty.abs().min(fill.qty);
            let direction = if self.qty.is_sign_positive() {
                Decimal::ONE
            } else {
                Decimal::NEGATIVE_ONE
            };
            realized = closing * (fill.price - self.avg_entry_price) * direction;

            let crossed = !new_qty.is_zero() && (new_qty.is_sign_positive() != self.qty.is_sign_positive());
            if crossed {
                self.avg_entry_price = fill.price;
                self.opened_at = fill.timestamp;
            }
        }

        self.qty = new_qty;
        if let Some(side) = PositionSide::from_qty(new_qty) {
            self.side = side;
        }
        self.mark(fill.price);
        self.updated_at = fill.timestamp;
        realized
    }

    /// Recomputes the signed market value from the latest known price.
    pub fn mark(&mut self, price: Decimal) {
        self.market_value = self.qty * price;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enums::OrderSide;
    use rust_decimal_macros::dec;

    fn submitted(qty: Decimal) -> Order {
        let mut order = Order::market("AAPL", OrderSide::Buy, qty);
        order.mark_submitted("B-1", Utc::now()).unwrap();
        order
    }

    fn fill(side: OrderSide, qty: Decimal, price: Decimal) -> Fill {
        Fill {
            side,
            qty,
            price,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn partial_then_full_fill() {
        let mut order = submitted(dec!(10));

        let first = order.apply_fill(dec!(4), dec!(100), Utc::now()).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(first.qty, dec!(4));
        assert_eq!(first.price, dec!(100));

        // cumulative avg 103 over 10 => the last 6 traded at 105
        let second = order.apply_fill(dec!(10), dec!(103), Utc::now()).unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Filled);
        assert_eq!(second.qty, dec!(6));
        assert_eq!(second.price, dec!(105));
        assert_eq!(order.filled_qty, order.qty);
    }

    #[test]
    fn stale_fill_report_is_ignored() {
        let mut order = submitted(dec!(10));
        order.apply_fill(dec!(5), dec!(100), Utc::now()).unwrap();
        assert!(order.apply_fill(dec!(3), dec!(100), Utc::now()).unwrap().is_none());
        assert_eq!(order.filled_qty, dec!(5));
    }

    #[test]
    fn overfill_is_refused_without_mutation() {
        let mut order = submitted(dec!(10));
        let before = order.clone();
        assert!(matches!(
            order.apply_fill(dec!(11), dec!(100), Utc::now()),
            Err(CoreError::Overfill { .. })
        ));
        assert_eq!(order, before);
    }

    #[test]
    fn fill_on_pending_order_is_illegal() {
        let mut order = Order::market("AAPL", OrderSide::Buy, dec!(1));
        assert!(matches!(
            order.apply_fill(dec!(1), dec!(10), Utc::now()),
            Err(CoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn terminal_order_rejects_every_transition() {
        let mut order = submitted(dec!(2));
        order.apply_fill(dec!(2), dec!(50), Utc::now()).unwrap();
        let before = order.clone();

        assert_eq!(
            order.mark_cancelled(Utc::now()),
            Err(CoreError::OrderAlreadyTerminal(OrderStatus::Filled))
        );
        assert!(order.mark_rejected("late", Utc::now()).is_err());
        assert!(order.apply_fill(dec!(2), dec!(50), Utc::now()).is_err());
        assert_eq!(order, before);
    }

    #[test]
    fn cancel_keeps_partial_quantity() {
        let mut order = submitted(dec!(10));
        order.apply_fill(dec!(3), dec!(20), Utc::now()).unwrap();
        order.mark_cancelled(Utc::now()).unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.filled_qty, dec!(3));
    }

    #[test]
    fn position_average_is_size_weighted() {
        let mut pos = Position::open("AAPL", &fill(OrderSide::Buy, dec!(10), dec!(100)));
        pos.apply_fill(&fill(OrderSide::Buy, dec!(30), dec!(110)));
        assert_eq!(pos.qty, dec!(40));
        assert_eq!(pos.avg_entry_price, dec!(107.5));
        assert_eq!(pos.market_value, dec!(4400));
        assert_eq!(pos.side, PositionSide::Long);
    }

    #[test]
    fn reducing_keeps_entry_and_realizes_pnl() {
        let mut pos = Position::open("AAPL", &fill(OrderSide::Buy, dec!(10), dec!(100)));
        let pnl = pos.apply_fill(&fill(OrderSide::Sell, dec!(4), dec!(110)));
        assert_eq!(pnl, dec!(40));
        assert_eq!(pos.qty, dec!(6));
        assert_eq!(pos.avg_entry_price, dec!(100));
    }

    #[test]
    fn crossing_zero_reopens_at_fill_price() {
        let mut pos = Position::open("AAPL", &fill(OrderSide::Buy, dec!(5), dec!(100)));
        let pnl = pos.apply_fill(&fill(OrderSide::Sell, dec!(8), dec!(90)));
        assert_eq!(pnl, dec!(-50));
        assert_eq!(pos.qty, dec!(-3));
        assert_eq!(pos.side, PositionSide::Short);
        assert_eq!(pos.avg_entry_price, dec!(90));
        assert_eq!(pos.market_value, dec!(-270));
    }

    #[test]
    fn closing_exactly_goes_flat() {
        let mut pos = Position::open("AAPL", &fill(OrderSide::Sell, dec!(5), dec!(100)));
        let pnl = pos.apply_fill(&fill(OrderSide::Buy, dec!(5), dec!(95)));
        assert_eq!(pnl, dec!(25));
        assert!(pos.is_flat());
    }
}
