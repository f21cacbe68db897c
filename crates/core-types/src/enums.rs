use crate::error::CoreError;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Implements `as_str`, `Display` and `FromStr` for a fieldless enum using the
/// same lowercase names serde uses, so the storage layer can round-trip them as text.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(CoreError::InvalidInput(
                        stringify!($name).to_string(),
                        other.to_string(),
                    )),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side of the order
    pub fn opposite(&self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// +1 for buys, -1 for sells. Multiplying a quantity by this gives the signed delta.
    pub fn sign(&self) -> Decimal {
        match self {
            OrderSide::Buy => Decimal::ONE,
            OrderSide::Sell => Decimal::NEGATIVE_ONE,
        }
    }
}

text_enum!(OrderSide { Buy => "buy", Sell => "sell" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
    Stop,
    StopLimit,
}

text_enum!(OrderType {
    Market => "market",
    Limit => "limit",
    Stop => "stop",
    StopLimit => "stop_limit",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeInForce {
    #[default]
    Day,
    Gtc,
    Ioc,
    Fok,
}

text_enum!(TimeInForce { Day => "day", Gtc => "gtc", Ioc => "ioc", Fok => "fok" });

/// Lifecycle state of an order.
///
/// ```text
/// pending -> submitted -> { filled, partial, rejected, cancelled }
/// partial -> { partial, filled, cancelled }
/// pending -> rejected
/// ```
///
/// `filled`, `cancelled` and `rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Submitted,
    #[serde(rename = "partial")]
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected
        )
    }

    /// Whether the order may still receive fills or a cancel confirmation.
    pub fn is_working(&self) -> bool {
        !self.is_terminal()
    }

    /// The transition table of the order state machine.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Submitted)
                | (Pending, Rejected)
                | (Submitted, Rejected)
                | (Submitted, PartiallyFilled)
                | (Submitted, Filled)
                | (Submitted, Cancelled)
                | (PartiallyFilled, PartiallyFilled)
                | (PartiallyFilled, Filled)
                | (PartiallyFilled, Cancelled)
        )
    }
}

text_enum!(OrderStatus {
    Pending => "pending",
    Submitted => "submitted",
    PartiallyFilled => "partial",
    Filled => "filled",
    Cancelled => "cancelled",
    Rejected => "rejected",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// Derives the side from a signed quantity. Flat quantities have no side.
    pub fn from_qty(qty: Decimal) -> Option<Self> {
        if qty.is_zero() {
            None
        } else if qty.is_sign_positive() {
            Some(PositionSide::Long)
        } else {
            Some(PositionSide::Short)
        }
    }
}

text_enum!(PositionSide { Long => "long", Short => "short" });

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalType {
    Buy,
    Sell,
    Hold,
}

impl SignalType {
    /// The order side a signal of this type asks for, if any.
    pub fn order_side(&self) -> Option<OrderSide> {
        match self {
            SignalType::Buy => Some(OrderSide::Buy),
            SignalType::Sell => Some(OrderSide::Sell),
            SignalType::Hold => None,
        }
    }
}

text_enum!(SignalType { Buy => "buy", Sell => "sell", Hold => "hold" });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states_accept_no_transitions() {
        let all = [
            OrderStatus::Pending,
            OrderStatus::Submitted,
            OrderStatus::PartiallyFilled,
            OrderStatus::Filled,
            OrderStatus::Cancelled,
            OrderStatus::Rejected,
        ];
        for from in all.iter().filter(|s| s.is_terminal()) {
            for to in all {
                assert!(!from.can_transition_to(to), "{from} -> {to} must be illegal");
            }
        }
    }

    #[test]
    fn status_never_regresses_to_pending() {
        assert!(!OrderStatus::Submitted.can_transition_to(OrderStatus::Pending));
        assert!(!OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Submitted));
        assert!(OrderStatus::PartiallyFilled.can_transition_to(OrderStatus::Cancelled));
    }

    #[test]
    fn text_round_trip_matches_serde_names() {
        assert_eq!("partial".parse::<OrderStatus>().unwrap(), OrderStatus::PartiallyFilled);
        assert_eq!(OrderType::StopLimit.to_string(), "stop_limit");
        assert_eq!(
            serde_json::to_string(&OrderStatus::PartiallyFilled).unwrap(),
            "\"partial\""
        );
        assert!("sideways".parse::<OrderSide>().is_err());
    }
}
