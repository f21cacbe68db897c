use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BrokerError {
    #[error("Order refused by the venue: {0}")]
    Rejected(String),

    #[error("Authentication with the venue failed: {0}")]
    Auth(String),

    #[error("Network error talking to the venue: {0}")]
    Network(String),

    #[error("The venue is unavailable: {0}")]
    Unavailable(String),

    #[error("The venue does not know order {0}")]
    UnknownOrder(String),
}

impl BrokerError {
    /// True when the venue definitively did not take the order. Any other error
    /// leaves the outcome unknown: the request may have reached the venue.
    pub fn is_refusal(&self) -> bool {
        matches!(self, BrokerError::Rejected(_) | BrokerError::Auth(_))
    }
}
