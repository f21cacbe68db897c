use crate::error::DbError;
use crate::store::{OrderStore, PositionStore, SignalStore};
use async_trait::async_trait;
use core_types::{Order, OrderStatus, Position, Signal};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// A process-local store for paper trading and tests.
///
/// `set_fail_writes(true)` makes every write return `DbError::Unavailable`,
/// which is how the engine's fail-closed path is exercised.
#[derive(Debug, Default)]
pub struct MemoryStore {
    orders: RwLock<HashMap<Uuid, Order>>,
    positions: RwLock<HashMap<String, Position>>,
    signals: RwLock<Vec<(i64, Signal)>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), DbError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DbError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn create_order(&self, order: &Order) -> Result<(), DbError> {
        self.check_writable()?;
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(DbError::Duplicate(order.id.to_string()));
        }
        orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), DbError> {
        self.check_writable()?;
        let mut orders = self.orders.write().await;
        let stored = orders.get_mut(&order.id).ok_or(DbError::NotFound)?;
        *stored = order.clone();
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, DbError> {
        Ok(self.orders.read().await.get(&id).cloned())
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, DbError> {
        let mut orders: Vec<Order> = self
            .orders
            .read()
            .await
            .values()
            .filter(|o| status.is_none_or(|s| o.status == s))
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}

#[async_trait]
impl PositionStore for MemoryStore {
    async fn upsert_position(&self, position: &Position) -> Result<(), DbError> {
        self.check_writable()?;
        self.positions
            .write()
            .await
            .insert(position.symbol.clone(), position.clone());
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, DbError> {
        Ok(self.positions.read().await.get(symbol).cloned())
    }

    async fn list_positions(&self) -> Result<Vec<Position>, DbError> {
        let mut positions: Vec<Position> = self.positions.read().await.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn delete_position(&self, symbol: &str) -> Result<(), DbError> {
        self.check_writable()?;
        self.positions.write().await.remove(symbol);
        Ok(())
    }
}

#[async_trait]
impl SignalStore for MemoryStore {
    async fn insert_signal(&self, signal: &Signal) -> Result<i64, DbError> {
        self.check_writable()?;
        let mut signals = self.signals.write().await;
        let seq = signals.last().map_or(1, |(seq, _)| seq + 1);
        signals.push((seq, signal.clone()));
        Ok(seq)
    }

    async fn list_signals(&self, strategy_id: &str, limit: i64) -> Result<Vec<Signal>, DbError> {
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(self
            .signals
            .read()
            .await
            .iter()
            .rev()
            .filter(|(_, s)| s.strategy_id == strategy_id)
            .take(limit)
            .map(|(_, s)| s.clone())
            .collect())
    }
}
