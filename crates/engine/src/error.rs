use broker::BrokerError;
use core_types::{CoreError, OrderStatus};
use database::DbError;
use risk::RiskError;
use strategies::StrategyError;
use thiserror::Error;
use uuid::Uuid;

/// Order-state conflicts. These are reported to the caller as no-ops.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateError {
    #[error("Order {order_id} is already {status}")]
    OrderAlreadyTerminal { order_id: Uuid, status: OrderStatus },

    #[error("Order {0} has already been submitted")]
    DuplicateSubmission(Uuid),

    #[error("Order {0} is not known to the engine")]
    UnknownOrder(String),

    #[error("Illegal order transition: {0}")]
    Transition(CoreError),

    #[error("Malformed execution report: {0}")]
    MalformedReport(String),
}

/// Every failure names the stage of the order path that failed.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Order validation failed: {0}")]
    Validation(String),

    #[error("Order rejected by risk checks: {0}")]
    RiskRejected(#[from] RiskError),

    #[error("Broker call failed for order {order_id}: {source}")]
    Broker {
        order_id: Uuid,
        #[source]
        source: BrokerError,
    },

    /// A broker call not tied to a single order (account or position queries).
    #[error("Broker query failed: {0}")]
    BrokerQuery(BrokerError),

    #[error("Broker did not confirm order {order_id} in time; it will be reconciled")]
    BrokerUnconfirmed { order_id: Uuid },

    #[error(transparent)]
    State(#[from] StateError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] DbError),

    #[error("Strategy error: {0}")]
    Strategy(#[from] StrategyError),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl From<CoreError> for StateError {
    fn from(e: CoreError) -> Self {
        StateError::Transition(e)
    }
}

impl From<CoreError> for EngineError {
    fn from(e: CoreError) -> Self {
        EngineError::State(e.into())
    }
}
