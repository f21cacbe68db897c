//! # Strategy Library
//!
//! This crate contains the signal-generating side of the system. It defines a
//! universal `Strategy` capability, a name-keyed `StrategyRegistry` of factories,
//! and the built-in implementations.
//!
//! ## Architectural Principles
//!
//! - **Pure logic:** strategies know nothing about orders, brokers or storage. They
//!   consume `Bar`s and `Trade`s and produce `Signal`s.
//! - **Open extension point:** user-supplied strategies are added by registering a
//!   factory under a new name. The registry is built once at startup, passed by
//!   reference, and read-only afterwards.
//! - **One instance, one symbol:** each instance receives its own symbol's data in
//!   timestamp order and is never driven concurrently with itself; this is what the
//!   `&mut self` receivers rely on.

// Declare all the modules that constitute this crate.
pub mod error;
pub mod factory;
pub mod ma_crossover;

// Re-export the key components to create a clean, public-facing API.
pub use error::StrategyError;
pub use factory::{StrategyFactory, StrategyInstance, StrategyRegistry};
pub use ma_crossover::{MACrossover, MACrossoverParams};

use core_types::{Bar, Signal, Trade};

/// What a strategy instance is told about itself when it is created.
#[derive(Debug, Clone)]
pub struct StrategyContext {
    /// Unique id of this instance; stamped on every signal it emits.
    pub instance_id: String,
    /// The one symbol this instance trades.
    pub symbol: String,
    /// Implementation-specific parameters from configuration.
    pub params: serde_json::Value,
}

/// The core trait that all trading strategies must implement.
///
/// `Send` is required so each instance can be moved onto its own task.
pub trait Strategy: Send {
    /// The registry name of this implementation.
    fn name(&self) -> &str;

    /// One-time setup before any market data is delivered.
    fn init(&mut self, ctx: &StrategyContext) -> Result<(), StrategyError>;

    /// Called for every bar of the instance's symbol, in timestamp order.
    fn on_bar(&mut self, bar: &Bar) -> Result<Vec<Signal>, StrategyError>;

    /// Called for every trade print of the instance's symbol, in timestamp order.
    fn on_trade(&mut self, trade: &Trade) -> Result<Vec<Signal>, StrategyError>;
}
