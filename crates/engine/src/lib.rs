//! # Trading Engine
//!
//! The orchestrator between strategies and the venue. It turns signals into
//! orders, gates every order through the risk manager, records it durably,
//! submits it to the broker and folds the asynchronous execution reports back
//! into order and position state.
//!
//! ## Concurrency model
//!
//! - Orders on different symbols proceed fully in parallel. For one symbol the
//!   risk-check-persist-submit sequence runs under a per-symbol mutex, so two
//!   concurrent orders can never both pass the position limit against the same
//!   stale exposure.
//! - Every mutation of an order runs under that order's own mutex and is
//!   persisted before it becomes visible. Reads (`order`, `orders`, `positions`)
//!   are snapshot reads of concurrent maps and never wait on the write path.
//! - A single `StateReconciler` task applies execution reports in arrival order.

pub mod error;
pub mod pipeline;
pub mod positions;
pub mod reconciler;
pub mod session;

pub use error::{EngineError, StateError};
pub use pipeline::{MarketEvent, SignalEnvelope, StrategyPipeline, spawn_signal_loop};
pub use positions::PositionBook;
pub use reconciler::StateReconciler;
pub use session::SessionBaseline;

use broker::{Broker, BrokerError};
use chrono::{DateTime, Utc};
use configuration::{EngineSettings, RiskManagement};
use core_types::{Fill, Order, OrderStatus, OrderType, Position, Signal};
use dashmap::DashMap;
use database::{DbError, Store};
use risk::{RiskContext, RiskManager};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::future::Future;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Quantities derived from signal strength are rounded to this many places.
const SIGNAL_QTY_DP: u32 = 6;

/// The collaborators and settings an `Engine` is built from.
pub struct EngineParts {
    pub settings: EngineSettings,
    pub risk: RiskManagement,
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn Store>,
    pub risk_manager: Arc<dyn RiskManager>,
}

/// What a successful `cancel_order` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The cancel was sent to the venue; confirmation arrives as a report.
    Requested,
    /// The venue has not acknowledged the order yet; the cancel is sent as soon
    /// as it does.
    Deferred,
}

pub struct Engine {
    symbols: HashSet<String>,
    broker_timeout: Duration,
    broker: Arc<dyn Broker>,
    store: Arc<dyn Store>,
    risk_manager: Arc<dyn RiskManager>,
    session: SessionBaseline,

    /// Every order seen this session, terminal ones included.
    orders: DashMap<Uuid, Order>,
    /// Ids of each symbol's working orders.
    working: DashMap<String, HashSet<Uuid>>,
    /// Broker ids of working orders only.
    broker_ids: DashMap<String, Uuid>,
    positions: PositionBook,
    symbol_locks: DashMap<String, Arc<Mutex<()>>>,
    order_locks: DashMap<Uuid, Arc<Mutex<()>>>,
    /// Orders whose venue-side state is unknown, with the time they became so.
    unconfirmed: DashMap<Uuid, DateTime<Utc>>,
}

fn lock_for<K: Eq + Hash>(locks: &DashMap<K, Arc<Mutex<()>>>, key: K) -> Arc<Mutex<()>> {
    Arc::clone(&locks.entry(key).or_default())
}

impl Engine {
    pub fn new(parts: EngineParts) -> Result<Self, EngineError> {
        if parts.settings.broker_timeout_ms == 0 {
            return Err(EngineError::Configuration(
                "engine.broker_timeout_ms must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            symbols: parts.settings.symbols.iter().cloned().collect(),
            broker_timeout: Duration::from_millis(parts.settings.broker_timeout_ms),
            broker: parts.broker,
            store: parts.store,
            risk_manager: parts.risk_manager,
            session: SessionBaseline::new(parts.risk.session_utc_offset_hours)?,
            orders: DashMap::new(),
            working: DashMap::new(),
            broker_ids: DashMap::new(),
            positions: PositionBook::new(),
            symbol_locks: DashMap::new(),
            order_locks: DashMap::new(),
            unconfirmed: DashMap::new(),
        })
    }

    /// Loads working orders and positions from the store.
    ///
    /// Orders still `pending` were persisted but never confirmed by the venue, so
    /// they go straight to the unconfirmed set for the next reconciliation sweep.
    /// With an empty position store the venue's positions are used instead.
    pub async fn init(&self) -> Result<(), EngineError> {
        tracing::info!(broker = %self.broker.name(), symbols = self.symbols.len(), "Initializing trading engine");

        let working: Vec<Order> = self
            .store
            .list_orders(None)
            .await?
            .into_iter()
            .filter(|o| o.status.is_working())
            .collect();
        for order in working {
            if order.status == OrderStatus::Pending {
                self.unconfirmed.insert(order.id, Utc::now());
            }
            if let Some(broker_order_id) = &order.broker_order_id {
                self.broker_ids.insert(broker_order_id.clone(), order.id);
            }
            self.track_working(&order);
            self.orders.insert(order.id, order);
        }

        let mut positions = self.store.list_positions().await?;
        if positions.is_empty() {
            positions = self
                .timed(self.broker.get_positions())
                .await
                .map_err(EngineError::BrokerQuery)?;
        }
        self.positions.load(positions);

        tracing::info!(
            open_orders = self.orders.len(),
            unconfirmed = self.unconfirmed.len(),
            positions = self.positions.snapshot().len(),
            "Engine state hydrated"
        );
        Ok(())
    }

    // --- Order path ---

    /// Risk-checks, persists and submits a new order.
    ///
    /// Returns the order as it stands after the venue's acknowledgement. Fills
    /// arrive later through `apply_report`.
    pub async fn submit_order(&self, order: Order) -> Result<Order, EngineError> {
        self.validate(&order)?;

        let lock = lock_for(&self.symbol_locks, order.symbol.clone());
        let _symbol_guard = lock.lock().await;

        if self.orders.contains_key(&order.id) {
            return Err(StateError::DuplicateSubmission(order.id).into());
        }

        let reference_price = order
            .own_price()
            .or_else(|| self.positions.last_price(&order.symbol))
            .ok_or_else(|| {
                EngineError::Validation(format!("no market price known for {}", order.symbol))
            })?;

        let account = self
            .timed(self.broker.get_account())
            .await
            .map_err(|source| EngineError::Broker {
                order_id: order.id,
                source,
            })?;
        let ctx = RiskContext {
            day_start_equity: self.session.day_start_equity(&account).await,
            account,
            position_market_value: self.positions.market_value(&order.symbol),
            working_notional: self.working_notional(&order.symbol, reference_price)?,
            reference_price,
        };

        if let Err(e) = self.risk_manager.check_order(&order, &ctx) {
            tracing::warn!(order_id = %order.id, symbol = %order.symbol, reason = %e, "Order rejected by risk checks");
            return Err(e.into());
        }

        // Nothing may reach the broker without a durable record.
        self.store.create_order(&order).await.map_err(|e| match e {
            DbError::Duplicate(_) => EngineError::State(StateError::DuplicateSubmission(order.id)),
            other => {
                tracing::error!(order_id = %order.id, error = %other, "Failed to persist order; not submitting");
                EngineError::Persistence(other)
            }
        })?;
        self.track_working(&order);
        self.orders.insert(order.id, order.clone());
        tracing::info!(
            order_id = %order.id,
            symbol = %order.symbol,
            side = %order.side,
            qty = %order.qty,
            order_type = %order.order_type,
            "Order persisted, submitting to broker"
        );

        match tokio::time::timeout(self.broker_timeout, self.broker.submit(&order)).await {
            Ok(Ok(ack)) => self.on_accepted(order.id, &ack.broker_order_id, ack.accepted_at).await,
            Ok(Err(source)) if source.is_refusal() => {
                tracing::warn!(order_id = %order.id, reason = %source, "Broker refused order");
                let reason = source.to_string();
                self.update_order(order.id, |o| {
                    o.mark_rejected(reason, Utc::now())?;
                    Ok(None)
                })
                .await?;
                Err(EngineError::Broker {
                    order_id: order.id,
                    source,
                })
            }
            Ok(Err(source)) => {
                tracing::warn!(order_id = %order.id, error = %source, "Broker outcome unknown; order queued for reconciliation");
                self.unconfirmed.insert(order.id, Utc::now());
                Err(EngineError::Broker {
                    order_id: order.id,
                    source,
                })
            }
            Err(_elapsed) => {
                tracing::warn!(order_id = %order.id, timeout = ?self.broker_timeout, "Broker submit timed out; order queued for reconciliation");
                self.unconfirmed.insert(order.id, Utc::now());
                Err(EngineError::BrokerUnconfirmed { order_id: order.id })
            }
        }
    }

    /// Requests cancellation of a working order.
    pub async fn cancel_order(&self, order_id: Uuid) -> Result<CancelOutcome, EngineError> {
        let order = self
            .update_order(order_id, |o| {
                if o.status.is_terminal() {
                    return Err(StateError::OrderAlreadyTerminal {
                        order_id: o.id,
                        status: o.status,
                    }
                    .into());
                }
                if o.broker_order_id.is_none() && !o.cancel_requested {
                    o.cancel_requested = true;
                    o.updated_at = Utc::now();
                }
                Ok(None)
            })
            .await?;

        let Some(broker_order_id) = order.broker_order_id.as_deref() else {
            tracing::info!(%order_id, "Cancel deferred until the broker acknowledges the order");
            return Ok(CancelOutcome::Deferred);
        };

        self.timed(self.broker.cancel(broker_order_id))
            .await
            .map_err(|source| EngineError::Broker { order_id, source })?;
        tracing::info!(%order_id, %broker_order_id, "Cancel requested");
        Ok(CancelOutcome::Requested)
    }

    /// Persists a signal for audit and turns a buy/sell into a market order of
    /// `order_qty × |strength|`. `hold` signals and zero sizes produce no order.
    pub async fn handle_signal(&self, signal: Signal, order_qty: Decimal) -> Result<Option<Order>, EngineError> {
        self.store.insert_signal(&signal).await?;

        let Some(side) = signal.signal_type.order_side() else {
            return Ok(None);
        };
        let qty = order_qty
            .checked_mul(signal.strength.abs())
            .ok_or_else(|| {
                EngineError::Validation(format!("signal size {order_qty} x {} overflows", signal.strength))
            })?
            .round_dp(SIGNAL_QTY_DP);
        if qty <= Decimal::ZERO {
            tracing::debug!(strategy = %signal.strategy_id, "Signal sized to zero; no order");
            return Ok(None);
        }

        let order = Order::market(&signal.symbol, side, qty).with_strategy(&signal.strategy_id);
        tracing::info!(
            strategy = %signal.strategy_id,
            symbol = %signal.symbol,
            signal = %signal.signal_type,
            %qty,
            order_id = %order.id,
            "Signal converted to order"
        );
        self.submit_order(order).await.map(Some)
    }

    /// Records the latest market price for a symbol and re-marks its position.
    pub fn update_price(&self, symbol: &str, price: Decimal) -> Option<Position> {
        self.positions.mark(symbol, price)
    }

    /// Marks to the price a bar or trade carries. Call before the event is
    /// published to the strategies, so orders they emit see that price.
    pub fn on_market_event(&self, event: &MarketEvent) -> Option<Position> {
        self.update_price(event.symbol(), event.price())
    }

    // --- Queries ---

    pub fn order(&self, order_id: Uuid) -> Option<Order> {
        self.orders.get(&order_id).map(|o| o.clone())
    }

    /// Every order the engine knows of this session, oldest first.
    pub fn orders(&self) -> Vec<Order> {
        let mut orders: Vec<Order> = self.orders.iter().map(|o| o.value().clone()).collect();
        orders.sort_by_key(|o| o.created_at);
        orders
    }

    pub fn open_orders(&self) -> Vec<Order> {
        self.orders()
            .into_iter()
            .filter(|o| o.status.is_working())
            .collect()
    }

    /// The in-memory position snapshot.
    pub fn positions(&self) -> Vec<Position> {
        self.positions.snapshot()
    }

    pub fn position(&self, symbol: &str) -> Option<Position> {
        self.positions.get(symbol)
    }

    /// Positions from the store, or from the broker when the store holds none.
    pub async fn get_positions(&self) -> Result<Vec<Position>, EngineError> {
        let stored = self.store.list_positions().await?;
        if !stored.is_empty() {
            return Ok(stored);
        }
        self.timed(self.broker.get_positions())
            .await
            .map_err(EngineError::BrokerQuery)
    }

    pub async fn signals(&self, strategy_id: &str, limit: i64) -> Result<Vec<Signal>, EngineError> {
        Ok(self.store.list_signals(strategy_id, limit).await?)
    }

    /// Ids of orders awaiting reconciliation with the venue.
    pub fn unconfirmed_orders(&self) -> Vec<Uuid> {
        self.unconfirmed.iter().map(|e| *e.key()).collect()
    }

    // --- Internals ---

    fn track_working(&self, order: &Order) {
        self.working
            .entry(order.symbol.clone())
            .or_default()
            .insert(order.id);
    }

    fn working_orders(&self, symbol: &str) -> Vec<Order> {
        let ids: Vec<Uuid> = self
            .working
            .get(symbol)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();
        ids.into_iter()
            .filter_map(|id| self.order(id))
            .filter(|o| o.status.is_working())
            .collect()
    }

    /// Drops the bookkeeping a terminal order no longer needs. Terminal orders
    /// never change again, so their lock can go as well.
    fn retire(&self, order: &Order) {
        if let Some(mut ids) = self.working.get_mut(&order.symbol) {
            ids.remove(&order.id);
        }
        if let Some(broker_order_id) = &order.broker_order_id {
            self.broker_ids.remove(broker_order_id);
        }
        self.order_locks.remove(&order.id);
    }

    #[cfg(test)]
    pub(crate) fn lock_count(&self) -> usize {
        self.order_locks.len()
    }

    fn validate(&self, order: &Order) -> Result<(), EngineError> {
        if order.qty <= Decimal::ZERO {
            return Err(EngineError::Validation(format!("qty must be positive, got {}", order.qty)));
        }
        if !self.symbols.contains(&order.symbol) {
            return Err(EngineError::Validation(format!("unknown symbol {}", order.symbol)));
        }
        if order.status != OrderStatus::Pending || !order.filled_qty.is_zero() {
            return Err(EngineError::Validation(
                "only fresh pending orders can be submitted".to_string(),
            ));
        }

        let needs_limit = matches!(order.order_type, OrderType::Limit | OrderType::StopLimit);
        let needs_stop = matches!(order.order_type, OrderType::Stop | OrderType::StopLimit);
        let positive = |price: Option<Decimal>| price.is_some_and(|p| p > Decimal::ZERO);
        if needs_limit && !positive(order.limit_price) {
            return Err(EngineError::Validation(format!(
                "{} orders need a positive limit price",
                order.order_type
            )));
        }
        if needs_stop && !positive(order.stop_price) {
            return Err(EngineError::Validation(format!(
                "{} orders need a positive stop price",
                order.order_type
            )));
        }
        Ok(())
    }

    /// Signed notional of the unfilled remainder of the symbol's working orders.
    fn working_notional(&self, symbol: &str, reference_price: Decimal) -> Result<Decimal, EngineError> {
        let overflow = || EngineError::Validation(format!("working exposure in {symbol} overflows"));
        let mut total = Decimal::ZERO;
        for order in self.working_orders(symbol) {
            let notional = order
                .remaining_qty()
                .checked_mul(order.own_price().unwrap_or(reference_price))
                .ok_or_else(overflow)?;
            total = total
                .checked_add(order.side.sign() * notional)
                .ok_or_else(overflow)?;
        }
        Ok(total)
    }

    /// Bounds a broker call by the configured timeout.
    async fn timed<T>(&self, call: impl Future<Output = Result<T, BrokerError>>) -> Result<T, BrokerError> {
        match tokio::time::timeout(self.broker_timeout, call).await {
            Ok(result) => result,
            Err(_elapsed) => Err(BrokerError::Unavailable(format!(
                "no response within {:?}",
                self.broker_timeout
            ))),
        }
    }

    /// Applies one mutation to an order under its lock.
    ///
    /// The mutation runs on a copy. A changed order is persisted first and only
    /// then published to readers; a fill it returns is applied to the position
    /// book before the order snapshot is replaced.
    pub(crate) async fn update_order<F>(&self, order_id: Uuid, mutate: F) -> Result<Order, EngineError>
    where
        F: FnOnce(&mut Order) -> Result<Option<Fill>, EngineError>,
    {
        if !self.orders.contains_key(&order_id) {
            return Err(StateError::UnknownOrder(order_id.to_string()).into());
        }
        let lock = lock_for(&self.order_locks, order_id);
        let _order_guard = lock.lock().await;

        let mut order = self
            .order(order_id)
            .ok_or_else(|| StateError::UnknownOrder(order_id.to_string()))?;
        let before = order.clone();
        let fill = mutate(&mut order)?;
        if order == before {
            return Ok(order);
        }

        if let Err(e) = self.store.update_order(&order).await {
            tracing::error!(%order_id, error = %e, "Failed to persist order update; queued for reconciliation");
            self.unconfirmed.insert(order_id, Utc::now());
            return Err(e.into());
        }

        let position_result = match &fill {
            Some(fill) => self.record_fill(&order, fill).await,
            None => Ok(()),
        };
        self.orders.insert(order_id, order.clone());
        if order.status.is_terminal() {
            self.retire(&order);
        } else if let Some(broker_order_id) = &order.broker_order_id {
            self.broker_ids.insert(broker_order_id.clone(), order_id);
        }
        tracing::debug!(%order_id, status = %order.status, filled_qty = %order.filled_qty, "Order updated");

        position_result.map(|_| order)
    }

    async fn record_fill(&self, order: &Order, fill: &Fill) -> Result<(), EngineError> {
        let (position, realized) = self.positions.apply_fill(&order.symbol, fill);
        tracing::info!(
            order_id = %order.id,
            symbol = %order.symbol,
            side = %fill.side,
            qty = %fill.qty,
            price = %fill.price,
            position_qty = %position.qty,
            %realized,
            "Fill applied"
        );

        if position.is_flat() {
            self.store.delete_position(&order.symbol).await?;
        } else {
            self.store.upsert_position(&position).await?;
        }
        Ok(())
    }

    /// `pending -> submitted` once the venue has acknowledged the order.
    pub(crate) async fn on_accepted(
        &self,
        order_id: Uuid,
        broker_order_id: &str,
        at: DateTime<Utc>,
    ) -> Result<Order, EngineError> {
        let order = self
            .update_order(order_id, |o| {
                if o.status == OrderStatus::Pending {
                    o.mark_submitted(broker_order_id, at)?;
                }
                Ok(None)
            })
            .await?;
        self.unconfirmed.remove(&order_id);
        tracing::info!(%order_id, %broker_order_id, status = %order.status, "Order acknowledged by broker");

        self.flush_deferred_cancel(&order).await;
        Ok(order)
    }

    /// Sends a cancel that was requested before the venue knew the order.
    pub(crate) async fn flush_deferred_cancel(&self, order: &Order) {
        if !order.cancel_requested || !order.status.is_working() {
            return;
        }
        let Some(broker_order_id) = order.broker_order_id.as_deref() else {
            return;
        };
        tracing::info!(order_id = %order.id, %broker_order_id, "Sending deferred cancel");
        if let Err(e) = self.timed(self.broker.cancel(broker_order_id)).await {
            tracing::warn!(order_id = %order.id, error = %e, "Deferred cancel failed");
        }
    }
}
