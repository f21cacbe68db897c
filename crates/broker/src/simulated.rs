use crate::error::BrokerError;
use crate::{Broker, ExecutionReport, ReportKind, SubmitAck, VenueOrder};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use configuration::Simulation;
use core_types::{AccountInfo, Fill, Order, OrderSide, OrderStatus, OrderType, Position, TimeInForce};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use uuid::Uuid;

/// Everything the paper venue knows. Guarded by one lock so an order's fill and
/// the resulting cash and position change are applied together.
#[derive(Debug)]
struct VenueState {
    cash: Decimal,
    day_start_equity: Decimal,
    realized_today: Decimal,
    next_id: u64,
    /// Keyed by broker order id; the stored order's `id` is the client order id.
    orders: HashMap<String, Order>,
    by_client: HashMap<Uuid, String>,
    positions: HashMap<String, Position>,
    last_prices: HashMap<String, Decimal>,
    reject_next: Option<String>,
}

impl VenueState {
    fn equity(&self) -> Decimal {
        self.cash
            + self
                .positions
                .values()
                .map(|p| p.market_value)
                .sum::<Decimal>()
    }

    /// Executes `qty` of a working order at `price`, updating cash and positions.
    fn execute(
        &mut self,
        broker_order_id: &str,
        qty: Decimal,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<ExecutionReport>, BrokerError> {
        let order = self
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(broker_order_id.to_string()))?;

        let qty = qty.min(order.remaining_qty());
        if qty <= Decimal::ZERO {
            return Ok(None);
        }

        let cumulative = order.filled_qty + qty;
        let prior_notional = order.filled_avg_price.unwrap_or(Decimal::ZERO) * order.filled_qty;
        let cumulative_avg = (prior_notional + qty * price) / cumulative;
        if order
            .apply_fill(cumulative, cumulative_avg, at)
            .map_err(|e| BrokerError::Rejected(e.to_string()))?
            .is_none()
        {
            return Ok(None);
        }

        let fill = Fill {
            side: order.side,
            qty,
            price,
            timestamp: at,
        };
        let report = ExecutionReport {
            broker_order_id: broker_order_id.to_string(),
            client_order_id: order.id,
            kind: if order.status == OrderStatus::Filled {
                ReportKind::Fill
            } else {
                ReportKind::PartialFill
            },
            filled_qty: order.filled_qty,
            filled_avg_price: order.filled_avg_price,
            reason: None,
            timestamp: at,
        };
        let symbol = order.symbol.clone();

        self.cash -= fill.side.sign() * fill.qty * fill.price;
        let realized = match self.positions.get_mut(&symbol) {
            Some(position) => position.apply_fill(&fill),
            None => {
                self.positions.insert(symbol.clone(), Position::open(symbol.clone(), &fill));
                Decimal::ZERO
            }
        };
        self.realized_today += realized;
        if self.positions.get(&symbol).is_some_and(Position::is_flat) {
            self.positions.remove(&symbol);
        }

        Ok(Some(report))
    }

    fn cancel(&mut self, broker_order_id: &str, reason: Option<String>, at: DateTime<Utc>) -> Result<ExecutionReport, BrokerError> {
        let order = self
            .orders
            .get_mut(broker_order_id)
            .ok_or_else(|| BrokerError::UnknownOrder(broker_order_id.to_string()))?;
        if !order.status.is_working() {
            return Err(BrokerError::Rejected(format!(
                "order {} is already {}",
                broker_order_id, order.status
            )));
        }
        order
            .mark_cancelled(at)
            .map_err(|e| BrokerError::Rejected(e.to_string()))?;

        Ok(ExecutionReport {
            broker_order_id: broker_order_id.to_string(),
            client_order_id: order.id,
            kind: ReportKind::Cancelled,
            filled_qty: order.filled_qty,
            filled_avg_price: order.filled_avg_price,
            reason,
            timestamp: at,
        })
    }
}

/// The price a working order would trade at given the last price, if it is
/// marketable at all.
fn execution_price(order: &Order, last: Decimal) -> Option<Decimal> {
    let marketable = |limit: Decimal| match order.side {
        OrderSide::Buy => last <= limit,
        OrderSide::Sell => last >= limit,
    };
    let triggered = |stop: Decimal| match order.side {
        OrderSide::Buy => last >= stop,
        OrderSide::Sell => last <= stop,
    };

    let tradable = match order.order_type {
        OrderType::Market => true,
        OrderType::Limit => marketable(order.limit_price?),
        OrderType::Stop => triggered(order.stop_price?),
        OrderType::StopLimit => triggered(order.stop_price?) && marketable(order.limit_price?),
    };
    tradable.then_some(last)
}

/// The "virtual venue" for paper trading.
///
/// Orders are booked under a `SIM-` id and fill at the last price set through
/// `set_price`. Every fill and cancellation is pushed on the report channel
/// returned by `new`, exactly as a real venue's stream would deliver it.
pub struct SimulatedBroker {
    params: Simulation,
    state: Mutex<VenueState>,
    ack_latency: Mutex<Duration>,
    reports: mpsc::UnboundedSender<ExecutionReport>,
}

impl SimulatedBroker {
    pub const NAME: &'static str = "simulator";

    pub fn new(params: Simulation) -> (Self, mpsc::UnboundedReceiver<ExecutionReport>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = VenueState {
            cash: params.initial_cash,
            day_start_equity: params.initial_cash,
            realized_today: Decimal::ZERO,
            next_id: 0,
            orders: HashMap::new(),
            by_client: HashMap::new(),
            positions: HashMap::new(),
            last_prices: HashMap::new(),
            reject_next: None,
        };
        let broker = Self {
            params,
            state: Mutex::new(state),
            ack_latency: Mutex::new(Duration::ZERO),
            reports: tx,
        };
        (broker, rx)
    }

    fn emit(&self, report: ExecutionReport) {
        tracing::debug!(
            broker_order_id = %report.broker_order_id,
            kind = ?report.kind,
            filled_qty = %report.filled_qty,
            "SimulatedBroker: emitting execution report"
        );
        if self.reports.send(report).is_err() {
            tracing::warn!("SimulatedBroker: report receiver dropped; report discarded");
        }
    }

    /// Records a new last price, re-marks the position and fills any working
    /// orders in the symbol that became marketable.
    pub async fn set_price(&self, symbol: &str, price: Decimal) {
        let now = Utc::now();
        let mut state = self.state.lock().await;
        state.last_prices.insert(symbol.to_string(), price);
        if let Some(position) = state.positions.get_mut(symbol) {
            position.mark(price);
        }

        let mut ready: Vec<(String, Decimal, Decimal)> = state
            .orders
            .iter()
            .filter(|(_, o)| o.symbol == symbol && o.status.is_working())
            .filter_map(|(id, o)| execution_price(o, price).map(|p| (id.clone(), o.remaining_qty(), p)))
            .collect();
        ready.sort_by(|a, b| a.0.cmp(&b.0));

        for (broker_order_id, qty, fill_price) in ready {
            match state.execute(&broker_order_id, qty, fill_price, now) {
                Ok(Some(report)) => self.emit(report),
                Ok(None) => {}
                Err(e) => tracing::warn!(%broker_order_id, error = %e, "SimulatedBroker: fill failed"),
            }
        }
    }

    /// Executes part or all of a working order at an explicit price.
    pub async fn fill(&self, broker_order_id: &str, qty: Decimal, price: Decimal) -> Result<(), BrokerError> {
        let mut state = self.state.lock().await;
        if let Some(report) = state.execute(broker_order_id, qty, price, Utc::now())? {
            self.emit(report);
        }
        Ok(())
    }

    /// Delay between booking an order and acknowledging it.
    pub async fn set_ack_latency(&self, latency: Duration) {
        *self.ack_latency.lock().await = latency;
    }

    /// Refuses the next submission with `reason`.
    pub async fn reject_next(&self, reason: impl Into<String>) {
        self.state.lock().await.reject_next = Some(reason.into());
    }

    /// Starts a new trading session: day-start equity is re-based and the
    /// realized P&L counter is reset.
    pub async fn start_session(&self) {
        let mut state = self.state.lock().await;
        state.day_start_equity = state.equity();
        state.realized_today = Decimal::ZERO;
    }

    fn validate(order: &Order) -> Result<(), BrokerError> {
        if order.qty <= Decimal::ZERO {
            return Err(BrokerError::Rejected("quantity must be positive".to_string()));
        }
        let needs_limit = matches!(order.order_type, OrderType::Limit | OrderType::StopLimit);
        let needs_stop = matches!(order.order_type, OrderType::Stop | OrderType::StopLimit);
        if needs_limit && order.limit_price.is_none() {
            return Err(BrokerError::Rejected("limit price required".to_string()));
        }
        if needs_stop && order.stop_price.is_none() {
            return Err(BrokerError::Rejected("stop price required".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl Broker for SimulatedBroker {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn submit(&self, order: &Order) -> Result<SubmitAck, BrokerError> {
        let now = Utc::now();
        let broker_order_id = {
            let mut state = self.state.lock().await;

            // A resubmission with a known client id is the same order.
            if let Some(existing) = state.by_client.get(&order.id) {
                tracing::info!(client_order_id = %order.id, broker_order_id = %existing, "SimulatedBroker: duplicate submission acknowledged");
                return Ok(SubmitAck {
                    broker_order_id: existing.clone(),
                    accepted_at: now,
                });
            }
            if let Some(reason) = state.reject_next.take() {
                return Err(BrokerError::Rejected(reason));
            }
            Self::validate(order)?;

            state.next_id += 1;
            let broker_order_id = format!("SIM-{:06}", state.next_id);

            let mut booked = order.clone();
            booked.status = OrderStatus::Pending;
            booked.filled_qty = Decimal::ZERO;
            booked.filled_avg_price = None;
            booked
                .mark_submitted(broker_order_id.clone(), now)
                .map_err(|e| BrokerError::Rejected(e.to_string()))?;
            state.by_client.insert(order.id, broker_order_id.clone());
            state.orders.insert(broker_order_id.clone(), booked);
            tracing::info!(
                %broker_order_id,
                client_order_id = %order.id,
                symbol = %order.symbol,
                side = %order.side,
                qty = %order.qty,
                "SimulatedBroker: order booked"
            );

            let last = state.last_prices.get(&order.symbol).copied();
            if self.params.fill_on_submit {
                if let Some(price) = last.and_then(|last| execution_price(order, last)) {
                    if let Some(report) = state.execute(&broker_order_id, order.qty, price, now)? {
                        self.emit(report);
                    }
                }
            }

            let unfilled = state
                .orders
                .get(&broker_order_id)
                .is_some_and(|o| o.status.is_working());
            if unfilled && matches!(order.time_in_force, TimeInForce::Ioc | TimeInForce::Fok) {
                let report = state.cancel(&broker_order_id, Some("not immediately marketable".to_string()), now)?;
                self.emit(report);
            }
            broker_order_id
        };

        let latency = *self.ack_latency.lock().await;
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        Ok(SubmitAck {
            broker_order_id,
            accepted_at: now,
        })
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        let report = self.state.lock().await.cancel(broker_order_id, None, Utc::now())?;
        tracing::info!(%broker_order_id, "SimulatedBroker: order cancelled");
        self.emit(report);
        Ok(())
    }

    async fn get_account(&self) -> Result<AccountInfo, BrokerError> {
        let state = self.state.lock().await;
        let equity = state.equity();
        Ok(AccountInfo {
            equity,
            cash: state.cash,
            buying_power: state.cash.max(Decimal::ZERO),
            day_start_equity: Some(state.day_start_equity),
            realized_pnl_today: state.realized_today,
            as_of: Utc::now(),
        })
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        let state = self.state.lock().await;
        let mut positions: Vec<Position> = state.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));
        Ok(positions)
    }

    async fn order_status(&self, client_order_id: Uuid) -> Result<Option<VenueOrder>, BrokerError> {
        let state = self.state.lock().await;
        let Some(broker_order_id) = state.by_client.get(&client_order_id) else {
            return Ok(None);
        };
        Ok(state.orders.get(broker_order_id).map(|o| VenueOrder {
            broker_order_id: broker_order_id.clone(),
            client_order_id,
            status: o.status,
            filled_qty: o.filled_qty,
            filled_avg_price: o.filled_avg_price,
            reason: o.reject_reason.clone(),
            updated_at: o.updated_at,
        }))
    }
}
