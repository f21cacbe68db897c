use thiserror::Error;

#[derive(Error, Debug)]
pub enum StrategyError {
    #[error("Strategy received invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Strategy '{0}' is not registered")]
    StrategyNotFound(String),

    #[error("A strategy named '{0}' is already registered")]
    DuplicateStrategy(String),

    #[error("Strategy '{name}' failed to initialize: {reason}")]
    InitFailed { name: String, reason: String },

    #[error("An error occurred during evaluation: {0}")]
    Evaluation(String),
}
