use crate::enums::OrderStatus;
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    #[error("Invalid input for {0}: {1}")]
    InvalidInput(String, String),

    #[error("Calculation error: {0}")]
    Calculation(String),

    #[error("Order is already in terminal state '{0}'")]
    OrderAlreadyTerminal(OrderStatus),

    #[error("Illegal order transition from '{from}' to '{to}'")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Cumulative fill {filled} exceeds order quantity {qty}")]
    Overfill { filled: Decimal, qty: Decimal },
}
