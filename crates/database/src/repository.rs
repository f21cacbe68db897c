use crate::DbError;
use crate::store::{OrderStore, PositionStore, SignalStore};
use async_trait::async_trait;
use core_types::{Order, OrderStatus, Position, Signal};
use serde_json::Value as JsonValue;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgRow};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, symbol, side, order_type, time_in_force, qty, limit_price, stop_price, \
     status, filled_qty, filled_avg_price, strategy_id, broker_order_id, reject_reason, \
     cancel_requested, created_at, updated_at";

/// The `DbRepository` provides the PostgreSQL implementation of the store traits.
/// It encapsulates all SQL queries and data access logic.
///
/// Enums are stored as their lowercase text form and parsed back on read.
#[derive(Debug, Clone)]
pub struct DbRepository {
    pool: PgPool,
}

impl DbRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Parses a text column into one of the domain enums.
fn text_column<T>(row: &PgRow, column: &str) -> Result<T, DbError>
where
    T: FromStr<Err = core_types::CoreError>,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>()
        .map_err(|e| DbError::DecodeError(format!("{column}: {e}")))
}

fn order_from_row(row: &PgRow) -> Result<Order, DbError> {
    Ok(Order {
        id: row.try_get("id")?,
        symbol: row.try_get("symbol")?,
        side: text_column(row, "side")?,
        order_type: text_column(row, "order_type")?,
        time_in_force: text_column(row, "time_in_force")?,
        qty: row.try_get("qty")?,
        limit_price: row.try_get("limit_price")?,
        stop_price: row.try_get("stop_price")?,
        status: text_column(row, "status")?,
        filled_qty: row.try_get("filled_qty")?,
        filled_avg_price: row.try_get("filled_avg_price")?,
        strategy_id: row.try_get("strategy_id")?,
        broker_order_id: row.try_get("broker_order_id")?,
        reject_reason: row.try_get("reject_reason")?,
        cancel_requested: row.try_get("cancel_requested")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn position_from_row(row: &PgRow) -> Result<Position, DbError> {
    Ok(Position {
        symbol: row.try_get("symbol")?,
        qty: row.try_get("qty")?,
        avg_entry_price: row.try_get("avg_entry_price")?,
        market_value: row.try_get("market_value")?,
        side: text_column(row, "side")?,
        opened_at: row.try_get("opened_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn signal_from_row(row: &PgRow) -> Result<Signal, DbError> {
    let metadata: JsonValue = row.try_get("metadata")?;
    let metadata: BTreeMap<String, String> = serde_json::from_value(metadata)?;
    Ok(Signal {
        id: row.try_get("signal_id")?,
        strategy_id: row.try_get("strategy_id")?,
        symbol: row.try_get("symbol")?,
        signal_type: text_column(row, "signal_type")?,
        strength: row.try_get("strength")?,
        metadata,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl OrderStore for DbRepository {
    async fn create_order(&self, order: &Order) -> Result<(), DbError> {
        let query = format!(
            "INSERT INTO orders ({ORDER_COLUMNS}) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)"
        );
        sqlx::query(&query)
            .bind(order.id)
            .bind(&order.symbol)
            .bind(order.side.as_str())
            .bind(order.order_type.as_str())
            .bind(order.time_in_force.as_str())
            .bind(order.qty)
            .bind(order.limit_price)
            .bind(order.stop_price)
            .bind(order.status.as_str())
            .bind(order.filled_qty)
            .bind(order.filled_avg_price)
            .bind(order.strategy_id.as_deref())
            .bind(order.broker_order_id.as_deref())
            .bind(order.reject_reason.as_deref())
            .bind(order.cancel_requested)
            .bind(order.created_at)
            .bind(order.updated_at)
            .execute(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(db) if db.is_unique_violation() => {
                    DbError::Duplicate(order.id.to_string())
                }
                other => other.into(),
            })?;
        Ok(())
    }

    async fn update_order(&self, order: &Order) -> Result<(), DbError> {
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, filled_qty = $3, filled_avg_price = $4, broker_order_id = $5,
                reject_reason = $6, cancel_requested = $7, updated_at = $8
            WHERE id = $1
            "#,
        )
        .bind(order.id)
        .bind(order.status.as_str())
        .bind(order.filled_qty)
        .bind(order.filled_avg_price)
        .bind(order.broker_order_id.as_deref())
        .bind(order.reject_reason.as_deref())
        .bind(order.cancel_requested)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>, DbError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(order_from_row).transpose()
    }

    async fn list_orders(&self, status: Option<OrderStatus>) -> Result<Vec<Order>, DbError> {
        let query = format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE ($1::TEXT IS NULL OR status = $1) ORDER BY created_at ASC"
        );
        let rows = sqlx::query(&query)
            .bind(status.map(|s| s.as_str()))
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(order_from_row).collect()
    }
}

#[async_trait]
impl PositionStore for DbRepository {
    async fn upsert_position(&self, position: &Position) -> Result<(), DbError> {
        sqlx::query(
            r#"
            INSERT INTO positions (symbol, qty, avg_entry_price, market_value, side, opened_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (symbol) DO UPDATE SET
                qty = EXCLUDED.qty,
                avg_entry_price = EXCLUDED.avg_entry_price,
                market_value = EXCLUDED.market_value,
                side = EXCLUDED.side,
                opened_at = EXCLUDED.opened_at,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&position.symbol)
        .bind(position.qty)
        .bind(position.avg_entry_price)
        .bind(position.market_value)
        .bind(position.side.as_str())
        .bind(position.opened_at)
        .bind(position.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_position(&self, symbol: &str) -> Result<Option<Position>, DbError> {
        let row = sqlx::query(
            "SELECT symbol, qty, avg_entry_price, market_value, side, opened_at, updated_at \
             FROM positions WHERE symbol = $1",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(position_from_row).transpose()
    }

    async fn list_positions(&self) -> Result<Vec<Position>, DbError> {
        let rows = sqlx::query(
            "SELECT symbol, qty, avg_entry_price, market_value, side, opened_at, updated_at \
             FROM positions ORDER BY symbol ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(position_from_row).collect()
    }

    async fn delete_position(&self, symbol: &str) -> Result<(), DbError> {
        sqlx::query("DELETE FROM positions WHERE symbol = $1")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SignalStore for DbRepository {
    async fn insert_signal(&self, signal: &Signal) -> Result<i64, DbError> {
        let metadata = serde_json::to_value(&signal.metadata)?;
        let row = sqlx::query(
            r#"
            INSERT INTO signals (signal_id, strategy_id, symbol, signal_type, strength, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING id
            "#,
        )
        .bind(signal.id)
        .bind(&signal.strategy_id)
        .bind(&signal.symbol)
        .bind(signal.signal_type.as_str())
        .bind(signal.strength)
        .bind(metadata)
        .bind(signal.created_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("id")?)
    }

    async fn list_signals(&self, strategy_id: &str, limit: i64) -> Result<Vec<Signal>, DbError> {
        let rows = sqlx::query(
            r#"
            SELECT signal_id, strategy_id, symbol, signal_type, strength, metadata, created_at
            FROM signals
            WHERE strategy_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(strategy_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(signal_from_row).collect()
    }
}
