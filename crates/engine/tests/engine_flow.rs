use async_trait::async_trait;
use broker::{Broker, BrokerError, ExecutionReport, ReportKind, SimulatedBroker, SubmitAck, VenueOrder};
use configuration::{DailyLossBasis, EngineSettings, RiskManagement, Simulation};
use core_types::{AccountInfo, Order, OrderSide, OrderStatus, Position, Signal, SignalType, Trade};
use database::{MemoryStore, OrderStore, PositionStore};
use engine::{
    CancelOutcome, Engine, EngineError, EngineParts, MarketEvent, SignalEnvelope, StateError,
    StateReconciler, spawn_signal_loop,
};
use risk::{RiskError, SimpleRiskManager};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

struct Harness {
    engine: Arc<Engine>,
    broker: Arc<SimulatedBroker>,
    store: Arc<MemoryStore>,
    reports: mpsc::UnboundedReceiver<ExecutionReport>,
}

fn risk_params() -> RiskManagement {
    RiskManagement {
        max_position_pct: dec!(0.10),
        max_daily_loss_pct: dec!(0.02),
        daily_loss_basis: DailyLossBasis::Equity,
        session_utc_offset_hours: 0,
    }
}

fn settings(broker_timeout_ms: u64) -> EngineSettings {
    EngineSettings {
        symbols: vec!["AAPL".to_string(), "MSFT".to_string()],
        broker_timeout_ms,
        report_buffer: 16,
    }
}

/// Set `RUST_LOG=engine=debug` to see the order path while a test runs.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn build_engine(broker: Arc<dyn Broker>, store: Arc<MemoryStore>, broker_timeout_ms: u64) -> Engine {
    init_logging();
    Engine::new(EngineParts {
        settings: settings(broker_timeout_ms),
        risk: risk_params(),
        broker,
        store,
        risk_manager: Arc::new(SimpleRiskManager::new(risk_params()).unwrap()),
    })
    .unwrap()
}

fn harness(fill_on_submit: bool, broker_timeout_ms: u64) -> Harness {
    let (broker, reports) = SimulatedBroker::new(Simulation {
        initial_cash: dec!(100000),
        fill_on_submit,
    });
    let broker = Arc::new(broker);
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(build_engine(broker.clone(), store.clone(), broker_timeout_ms));
    Harness {
        engine,
        broker,
        store,
        reports,
    }
}

impl Harness {
    async fn set_price(&self, symbol: &str, price: Decimal) {
        self.broker.set_price(symbol, price).await;
        self.engine.update_price(symbol, price);
    }

    /// Applies every report the venue has emitted so far.
    async fn drain(&mut self) {
        while let Ok(report) = self.reports.try_recv() {
            self.engine.apply_report(&report).await.unwrap();
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_same_symbol_orders_cannot_jointly_breach_the_limit() {
    let h = harness(true, 1_000);
    h.set_price("AAPL", dec!(100)).await;

    // 6000 notional each against a 10000 limit.
    let first = Order::market("AAPL", OrderSide::Buy, dec!(60));
    let second = Order::market("AAPL", OrderSide::Buy, dec!(60));
    let a = tokio::spawn({
        let engine = Arc::clone(&h.engine);
        async move { engine.submit_order(first).await }
    });
    let b = tokio::spawn({
        let engine = Arc::clone(&h.engine);
        async move { engine.submit_order(second).await }
    });
    let results = [a.await.unwrap(), b.await.unwrap()];

    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let limit_rejections = results
        .iter()
        .filter(|r| {
            matches!(
                r,
                Err(EngineError::RiskRejected(RiskError::PositionLimitExceeded { .. }))
            )
        })
        .count();
    assert_eq!(accepted, 1);
    assert_eq!(limit_rejections, 1);
    assert_eq!(h.store.list_orders(None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn fill_reports_update_order_and_position() {
    let mut h = harness(true, 1_000);
    h.set_price("AAPL", dec!(100)).await;

    let order = h
        .engine
        .submit_order(Order::market("AAPL", OrderSide::Buy, dec!(10)))
        .await
        .unwrap();
    assert!(order.broker_order_id.is_some());
    h.drain().await;

    let order = h.engine.order(order.id).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert_eq!(order.filled_qty, dec!(10));

    let position = h.engine.position("AAPL").unwrap();
    assert_eq!(position.qty, dec!(10));
    assert_eq!(position.avg_entry_price, dec!(100));
    assert_eq!(h.store.get_position("AAPL").await.unwrap(), Some(position));

    h.set_price("AAPL", dec!(105)).await;
    assert_eq!(h.engine.position("AAPL").unwrap().market_value, dec!(1050));
}

#[tokio::test]
async fn partial_fill_then_cancel_keeps_filled_quantity() {
    let mut h = harness(false, 1_000);
    h.set_price("AAPL", dec!(101)).await;

    let order = h
        .engine
        .submit_order(Order::limit("AAPL", OrderSide::Buy, dec!(10), dec!(100)))
        .await
        .unwrap();
    let broker_order_id = order.broker_order_id.clone().unwrap();

    h.broker.fill(&broker_order_id, dec!(4), dec!(100)).await.unwrap();
    assert_eq!(h.engine.cancel_order(order.id).await.unwrap(), CancelOutcome::Requested);
    h.drain().await;

    let order = h.engine.order(order.id).unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.filled_qty, dec!(4));
    assert_eq!(h.engine.position("AAPL").unwrap().qty, dec!(4));
    assert!(h.engine.open_orders().is_empty());
}

#[tokio::test]
async fn cancelling_a_terminal_order_is_a_no_op() {
    let mut h = harness(true, 1_000);
    h.set_price("AAPL", dec!(100)).await;

    let order = h
        .engine
        .submit_order(Order::market("AAPL", OrderSide::Buy, dec!(5)))
        .await
        .unwrap();
    h.drain().await;
    let stored_before = h.store.get_order(order.id).await.unwrap();

    let result = h.engine.cancel_order(order.id).await;
    assert!(matches!(
        result,
        Err(EngineError::State(StateError::OrderAlreadyTerminal {
            status: OrderStatus::Filled,
            ..
        }))
    ));
    assert_eq!(h.store.get_order(order.id).await.unwrap(), stored_before);
}

#[tokio::test]
async fn persistence_failure_never_reaches_the_broker() {
    let h = harness(true, 1_000);
    h.set_price("AAPL", dec!(100)).await;
    h.store.set_fail_writes(true);

    let order = Order::market("AAPL", OrderSide::Buy, dec!(1));
    let id = order.id;
    let result = h.engine.submit_order(order).await;

    assert!(matches!(result, Err(EngineError::Persistence(_))));
    assert!(h.broker.order_status(id).await.unwrap().is_none());
    assert!(h.engine.order(id).is_none());
}

#[tokio::test]
async fn risk_rejection_has_no_side_effects() {
    let h = harness(true, 1_000);
    h.set_price("AAPL", dec!(100)).await;

    let order = Order::market("AAPL", OrderSide::Buy, dec!(101));
    let id = order.id;
    assert!(matches!(
        h.engine.submit_order(order).await,
        Err(EngineError::RiskRejected(RiskError::PositionLimitExceeded { .. }))
    ));
    assert!(h.store.get_order(id).await.unwrap().is_none());
    assert!(h.broker.order_status(id).await.unwrap().is_none());
}

#[tokio::test]
async fn malformed_orders_fail_validation() {
    let h = harness(true, 1_000);
    h.set_price("AAPL", dec!(100)).await;

    let unknown = Order::market("TSLA", OrderSide::Buy, dec!(1));
    assert!(matches!(h.engine.submit_order(unknown).await, Err(EngineError::Validation(_))));

    let zero = Order::market("AAPL", OrderSide::Buy, Decimal::ZERO);
    assert!(matches!(h.engine.submit_order(zero).await, Err(EngineError::Validation(_))));

    let mut no_limit = Order::limit("AAPL", OrderSide::Buy, dec!(1), dec!(100));
    no_limit.limit_price = None;
    assert!(matches!(h.engine.submit_order(no_limit).await, Err(EngineError::Validation(_))));

    let unpriced = Order::market("MSFT", OrderSide::Buy, dec!(1));
    assert!(matches!(h.engine.submit_order(unpriced).await, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn duplicate_submission_is_refused() {
    let h = harness(false, 1_000);
    h.set_price("AAPL", dec!(100)).await;

    let order = Order::market("AAPL", OrderSide::Buy, dec!(1));
    h.engine.submit_order(order.clone()).await.unwrap();
    assert!(matches!(
        h.engine.submit_order(order).await,
        Err(EngineError::State(StateError::DuplicateSubmission(_)))
    ));
}

#[tokio::test]
async fn broker_refusal_marks_the_order_rejected() {
    let h = harness(true, 1_000);
    h.set_price("AAPL", dec!(100)).await;
    h.broker.reject_next("symbol halted").await;

    let order = Order::market("AAPL", OrderSide::Buy, dec!(1));
    let id = order.id;
    assert!(matches!(
        h.engine.submit_order(order).await,
        Err(EngineError::Broker { source: BrokerError::Rejected(_), .. })
    ));
    let stored = h.store.get_order(id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Rejected);
    assert!(stored.reject_reason.unwrap().contains("symbol halted"));
}

#[tokio::test]
async fn timed_out_submit_is_reconciled_not_resubmitted() {
    let mut h = harness(true, 50);
    h.set_price("AAPL", dec!(100)).await;
    h.broker.set_ack_latency(Duration::from_millis(500)).await;

    let order = Order::market("AAPL", OrderSide::Buy, dec!(10));
    let id = order.id;
    let result = h.engine.submit_order(order).await;
    assert!(matches!(result, Err(EngineError::BrokerUnconfirmed { order_id }) if order_id == id));
    assert_eq!(h.engine.order(id).unwrap().status, OrderStatus::Pending);
    assert_eq!(h.engine.unconfirmed_orders(), vec![id]);

    h.broker.set_ack_latency(Duration::ZERO).await;
    assert_eq!(h.engine.reconcile_unconfirmed().await.unwrap(), 1);

    let order = h.engine.order(id).unwrap();
    assert_eq!(order.status, OrderStatus::Filled);
    assert!(order.broker_order_id.is_some());
    assert_eq!(h.engine.position("AAPL").unwrap().qty, dec!(10));
    assert!(h.engine.unconfirmed_orders().is_empty());

    // The venue's own fill report is now stale.
    h.drain().await;
    assert_eq!(h.engine.position("AAPL").unwrap().qty, dec!(10));
}

/// A venue that never answers a submission.
struct StalledBroker {
    inner: SimulatedBroker,
}

#[async_trait]
impl Broker for StalledBroker {
    fn name(&self) -> &str {
        "stalled"
    }

    async fn submit(&self, _order: &Order) -> Result<SubmitAck, BrokerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Err(BrokerError::Network("unreachable".to_string()))
    }

    async fn cancel(&self, broker_order_id: &str) -> Result<(), BrokerError> {
        self.inner.cancel(broker_order_id).await
    }

    async fn get_account(&self) -> Result<AccountInfo, BrokerError> {
        self.inner.get_account().await
    }

    async fn get_positions(&self) -> Result<Vec<Position>, BrokerError> {
        self.inner.get_positions().await
    }

    async fn order_status(&self, client_order_id: Uuid) -> Result<Option<VenueOrder>, BrokerError> {
        self.inner.order_status(client_order_id).await
    }
}

#[tokio::test]
async fn order_the_venue_never_saw_is_rejected_on_reconciliation() {
    let (inner, _reports) = SimulatedBroker::new(Simulation::default());
    let store = Arc::new(MemoryStore::new());
    let engine = build_engine(Arc::new(StalledBroker { inner }), store.clone(), 50);
    engine.update_price("AAPL", dec!(100));

    let order = Order::market("AAPL", OrderSide::Buy, dec!(1));
    let id = order.id;
    assert!(matches!(
        engine.submit_order(order).await,
        Err(EngineError::BrokerUnconfirmed { .. })
    ));

    assert_eq!(engine.reconcile_unconfirmed().await.unwrap(), 1);
    let stored = store.get_order(id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Rejected);
}

#[tokio::test]
async fn cancel_before_acknowledgement_is_deferred_then_sent() {
    let mut h = harness(false, 2_000);
    h.set_price("AAPL", dec!(100)).await;
    h.broker.set_ack_latency(Duration::from_millis(300)).await;

    let order = Order::market("AAPL", OrderSide::Buy, dec!(1));
    let id = order.id;
    let submit = tokio::spawn({
        let engine = Arc::clone(&h.engine);
        async move { engine.submit_order(order).await }
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.engine.cancel_order(id).await.unwrap(), CancelOutcome::Deferred);
    assert!(h.engine.order(id).unwrap().cancel_requested);

    submit.await.unwrap().unwrap();
    h.drain().await;
    assert_eq!(h.engine.order(id).unwrap().status, OrderStatus::Cancelled);
}

#[tokio::test]
async fn fill_before_acknowledgement_implies_acceptance() {
    let mut h = harness(true, 2_000);
    h.set_price("AAPL", dec!(100)).await;
    h.broker.set_ack_latency(Duration::from_millis(200)).await;

    let order = Order::market("AAPL", OrderSide::Buy, dec!(3));
    let id = order.id;
    let submit = tokio::spawn({
        let engine = Arc::clone(&h.engine);
        async move { engine.submit_order(order).await }
    });

    let report = h.reports.recv().await.unwrap();
    h.engine.apply_report(&report).await.unwrap();
    let during = h.engine.order(id).unwrap();
    assert_eq!(during.status, OrderStatus::Filled);
    assert_eq!(during.broker_order_id, Some(report.broker_order_id.clone()));

    let acked = submit.await.unwrap().unwrap();
    assert_eq!(acked.status, OrderStatus::Filled);
}

#[tokio::test]
async fn daily_loss_breaker_halts_other_symbols() {
    let mut h = harness(true, 1_000);
    h.set_price("AAPL", dec!(100)).await;
    h.set_price("MSFT", dec!(50)).await;

    h.engine
        .submit_order(Order::market("AAPL", OrderSide::Buy, dec!(100)))
        .await
        .unwrap();
    h.drain().await;

    // 100 shares lose 30 each: equity 97000 against a 2000 allowance.
    h.set_price("AAPL", dec!(70)).await;
    let result = h
        .engine
        .submit_order(Order::market("MSFT", OrderSide::Sell, dec!(1)))
        .await;
    assert!(matches!(
        result,
        Err(EngineError::RiskRejected(RiskError::DailyLossLimitExceeded { .. }))
    ));
}

#[tokio::test]
async fn signals_are_audited_and_sized_by_strength() {
    let h = harness(false, 1_000);
    h.set_price("AAPL", dec!(100)).await;

    let hold = Signal::new("ma:AAPL", "AAPL", SignalType::Hold, dec!(0), chrono::Utc::now());
    assert!(h.engine.handle_signal(hold, dec!(10)).await.unwrap().is_none());

    let sell = Signal::new("ma:AAPL", "AAPL", SignalType::Sell, dec!(-0.5), chrono::Utc::now());
    let order = h.engine.handle_signal(sell, dec!(10)).await.unwrap().unwrap();
    assert_eq!(order.side, OrderSide::Sell);
    assert_eq!(order.qty, dec!(5));
    assert_eq!(order.strategy_id.as_deref(), Some("ma:AAPL"));

    let audited = h.engine.signals("ma:AAPL", 10).await.unwrap();
    assert_eq!(audited.len(), 2);
    assert_eq!(audited[0].signal_type, SignalType::Sell);
}

#[tokio::test]
async fn init_queues_pending_orders_and_loads_positions() {
    let (broker, _reports) = SimulatedBroker::new(Simulation::default());
    let store = Arc::new(MemoryStore::new());

    let pending = Order::market("AAPL", OrderSide::Buy, dec!(1));
    store.create_order(&pending).await.unwrap();
    let mut done = Order::market("AAPL", OrderSide::Buy, dec!(1));
    done.mark_rejected("old", chrono::Utc::now()).unwrap();
    store.create_order(&done).await.unwrap();
    store
        .upsert_position(&Position {
            symbol: "MSFT".to_string(),
            qty: dec!(-3),
            avg_entry_price: dec!(50),
            market_value: dec!(-150),
            side: core_types::PositionSide::Short,
            opened_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        })
        .await
        .unwrap();

    let engine = build_engine(Arc::new(broker), store, 1_000);
    engine.init().await.unwrap();

    assert_eq!(engine.open_orders().len(), 1);
    assert_eq!(engine.unconfirmed_orders(), vec![pending.id]);
    assert_eq!(engine.position("MSFT").unwrap().qty, dec!(-3));
    assert!(engine.order(done.id).is_none());
}

#[tokio::test]
async fn reconciler_task_drains_reports_on_shutdown() {
    let h = harness(true, 1_000);
    h.set_price("AAPL", dec!(100)).await;
    let Harness {
        engine, reports, ..
    } = h;

    let (stop_tx, stop_rx) = oneshot::channel();
    let reconciler = StateReconciler::new(Arc::clone(&engine), reports, Duration::from_secs(60));
    let task = tokio::spawn(reconciler.start(stop_rx));

    engine
        .submit_order(Order::market("AAPL", OrderSide::Buy, dec!(2)))
        .await
        .unwrap();
    stop_tx.send(()).unwrap();
    task.await.unwrap();

    assert_eq!(engine.position("AAPL").unwrap().qty, dec!(2));
    assert!(engine.open_orders().is_empty());
}

#[tokio::test]
async fn oversized_order_is_rejected_without_panicking() {
    let h = harness(true, 1_000);
    h.set_price("AAPL", dec!(100)).await;

    let order = Order::market("AAPL", OrderSide::Buy, Decimal::MAX);
    let id = order.id;
    assert!(matches!(
        h.engine.submit_order(order).await,
        Err(EngineError::RiskRejected(RiskError::Overflow { .. }))
    ));
    assert!(h.store.get_order(id).await.unwrap().is_none());
    assert!(h.broker.order_status(id).await.unwrap().is_none());

    let full = Signal::new("ma:AAPL", "AAPL", SignalType::Buy, dec!(1), chrono::Utc::now());
    assert!(matches!(
        h.engine.handle_signal(full, Decimal::MAX).await,
        Err(EngineError::RiskRejected(RiskError::Overflow { .. }))
    ));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn signals_for_different_symbols_are_submitted_in_parallel() {
    let h = harness(false, 2_000);
    h.set_price("AAPL", dec!(100)).await;
    h.set_price("MSFT", dec!(50)).await;
    h.broker.set_ack_latency(Duration::from_millis(300)).await;

    let (tx, rx) = mpsc::channel(8);
    for symbol in ["AAPL", "MSFT"] {
        let signal = Signal::new(format!("ma:{symbol}"), symbol, SignalType::Buy, dec!(1), chrono::Utc::now());
        tx.send(SignalEnvelope {
            signal,
            order_qty: dec!(1),
        })
        .await
        .unwrap();
    }
    drop(tx);

    let started = tokio::time::Instant::now();
    let submitted = spawn_signal_loop(Arc::clone(&h.engine), rx).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(submitted, 2);
    // Two 300ms acknowledgements back to back would take at least 600ms.
    assert!(elapsed < Duration::from_millis(550), "took {elapsed:?}");
    assert_eq!(h.engine.open_orders().len(), 2);
}

#[tokio::test]
async fn cancel_report_ahead_of_its_fill_applies_the_fill_first() {
    let mut h = harness(false, 1_000);
    h.set_price("AAPL", dec!(101)).await;

    let order = h
        .engine
        .submit_order(Order::limit("AAPL", OrderSide::Buy, dec!(10), dec!(100)))
        .await
        .unwrap();
    let broker_order_id = order.broker_order_id.clone().unwrap();
    h.broker.fill(&broker_order_id, dec!(4), dec!(100)).await.unwrap();
    h.engine.cancel_order(order.id).await.unwrap();

    let partial = h.reports.recv().await.unwrap();
    let cancelled = h.reports.recv().await.unwrap();
    assert_eq!(partial.kind, ReportKind::PartialFill);
    assert_eq!(cancelled.kind, ReportKind::Cancelled);
    assert_eq!(cancelled.filled_qty, dec!(4));

    // Delivered out of order: the cancel carries fills the engine has not seen.
    h.engine.apply_report(&cancelled).await.unwrap();
    let after_cancel = h.engine.order(order.id).unwrap();
    assert_eq!(after_cancel.status, OrderStatus::Cancelled);
    assert_eq!(after_cancel.filled_qty, dec!(4));
    assert_eq!(after_cancel.filled_avg_price, Some(dec!(100)));
    assert_eq!(h.engine.position("AAPL").unwrap().qty, dec!(4));

    // The late fill report is stale and changes nothing.
    h.engine.apply_report(&partial).await.unwrap();
    assert_eq!(h.engine.order(order.id).unwrap(), after_cancel);
    assert_eq!(h.engine.position("AAPL").unwrap().qty, dec!(4));
    assert_eq!(h.store.get_order(order.id).await.unwrap(), Some(after_cancel));
}

#[tokio::test]
async fn fill_report_without_a_price_is_refused() {
    let h = harness(false, 1_000);
    h.set_price("AAPL", dec!(101)).await;

    let order = h
        .engine
        .submit_order(Order::limit("AAPL", OrderSide::Buy, dec!(10), dec!(100)))
        .await
        .unwrap();
    let report = ExecutionReport {
        broker_order_id: order.broker_order_id.clone().unwrap(),
        client_order_id: order.id,
        kind: ReportKind::Fill,
        filled_qty: dec!(10),
        filled_avg_price: None,
        reason: None,
        timestamp: chrono::Utc::now(),
    };

    assert!(matches!(
        h.engine.apply_report(&report).await,
        Err(EngineError::State(StateError::MalformedReport(_)))
    ));
    assert_eq!(h.engine.order(order.id).unwrap(), order);
    assert!(h.engine.position("AAPL").is_none());
}

#[tokio::test]
async fn market_events_mark_positions_to_the_event_price() {
    let mut h = harness(true, 1_000);
    h.set_price("AAPL", dec!(100)).await;
    h.engine
        .submit_order(Order::market("AAPL", OrderSide::Buy, dec!(10)))
        .await
        .unwrap();
    h.drain().await;

    let trade = MarketEvent::Trade(Trade {
        symbol: "AAPL".to_string(),
        timestamp: chrono::Utc::now(),
        price: dec!(110),
        size: dec!(50),
        exchange: None,
        trade_id: None,
    });
    let marked = h.engine.on_market_event(&trade).unwrap();
    assert_eq!(marked.market_value, dec!(1100));
    assert_eq!(h.engine.position("AAPL").unwrap().market_value, dec!(1100));
}
