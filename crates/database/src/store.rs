use crate::error::DbError;
use async_trait::async_trait;
use core_types::{Order, OrderStatus, Position, Signal};
use uuid::Uuid;

/// Durable order records, keyed by the engine's order id.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Inserts a new order. An existing id is a `DbError::Duplicate`.
    async fn create_order(&self, order: &Order) -> Result<(), DbError>;

    /// Overwrites the mutable fields of an existing order.
    async fn update_order(&self, order: &Order) -> Result<(), DbError>;

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, DbError>;

    /// All orders, or only those in `status`, oldest first.
    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, DbError>;
}

/// One row per symbol.
#[async_trait]
pub trait PositionStore: Send + Sync {
    async fn upsert_position(&self, position: &Position) -> Result<(), DbError>;
    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, DbError>;
    async fn list_positions(&self) -> Result<Vec<Position>, DbError>;
    async fn delete_position(&self, symbol: &str) -> Result<(), DbError>;
}

/// Append-only audit log of every signal the engine consumed.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Returns the autoincrement sequence number assigned to the row.
    async fn insert_signal(&self, signal: &Signal) -> Result<i64, DbError>;

    /// The newest `limit` signals of one strategy instance, newest first.
    async fn list_signals(&self, strategy_id: &str, limit: i64) -> Result<Vec<Signal>, DbError>;
}

/// Everything the engine persists.
pub trait Store: OrderStore + PositionStore + SignalStore {}

impl<T: OrderStore + PositionStore + SignalStore> Store for T {}
