//! # Broker Capability
//!
//! This crate defines the boundary between the engine and an execution venue:
//! the `Broker` trait for synchronous request/response calls, and the
//! `ExecutionReport` messages the venue pushes back asynchronously.
//!
//! ## Architectural Principles
//!
//! - **Execution Abstraction:** the engine is agnostic about whether it talks to a
//!   paper venue or a real one; both implement `Broker`.
//! - **Idempotency by client id:** the engine's order id travels as the client
//!   order id. A venue must treat a repeated submit with the same client id as the
//!   same order, and `order_status` looks orders up by it, which is what lets the
//!   engine reconcile an unconfirmed submission instead of resubmitting.
//! - **Cumulative reports:** every report carries the order's cumulative filled
//!   quantity and average price, so duplicates and replays are harmless.
//!
//! ## Public API
//!
//! - `Broker`: the venue capability.
//! - `ExecutionReport` / `ReportKind`: the inbound report stream.
//! - `SimulatedBroker`: an in-process paper venue.
//! - `BrokerError`: the specific error types that can be returned from this crate.

// Declare the modules that constitute this crate.
pub mod error;
pub mod simulated;

// Re-export the key components to provide a clean, public-facing API.
pub use error::BrokerError;
pub use simulated::SimulatedBroker;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{AccountInfo, Order, OrderStatus, Position};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The venue's acknowledgement of an accepted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitAck {
    pub broker_order_id: String,
    pub accepted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    PartialFill,
    Fill,
    Cancelled,
    Rejected,
}

/// An asynchronous execution report pushed by the venue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub broker_order_id: String,
    /// The engine's order id, echoed back by the venue.
    pub client_order_id: Uuid,
    pub kind: ReportKind,
    /// Cumulative filled quantity of the order.
    pub filled_qty: Decimal,
    /// Cumulative average fill price, when anything has filled.
    pub filled_avg_price: Option<Decimal>,
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// The venue's view of a single order, returned by a status query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VenueOrder {
    pub broker_order_id: String,
    pub client_order_id: Uuid,
    pub status: OrderStatus,
    pub filled_qty: Decimal,
    pub filled_avg_price: Option<Decimal>,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// A generic trait for an execution venue.
#[async_trait]
pub trait Broker: Send + Sync {
    /// The broker identifier (e.g. "simulator").
    fn name(&self) -> &str;

    /// Sends an order to the venue. `Ok` means the venue accepted it; fills and
    /// cancellations arrive later as `ExecutionReport`s.
    async fn submit(&self, order: &Order) -> Result<SubmitAck, BrokerError>;

    /// Requests cancellation. Confirmation arrives as a `Cancelled` report.
    async fn cancel(&self, broker_order_id: &str) -> Result<(), BrokerError>;

    /// A snapshot of the account's financial metrics.
    async fn get_account(&self) -> Result<AccountInfo, BrokerError>;

    /// All positions currently held at the venue.
    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError>;

    /// Looks an order up by the engine's id. `None` means the venue never saw it.
    async fn order_status(&self, client_order_id: Uuid) -> Result<Option<VenueOrder>, BrokerError>;
}
