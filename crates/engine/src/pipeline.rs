use crate::{Engine, EngineError};
use chrono::{DateTime, Utc};
use core_types::{Bar, Signal, Trade};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use strategies::StrategyInstance;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

/// A unified enum for the market data the pipeline routes to strategies.
#[derive(Debug, Clone)]
pub enum MarketEvent {
    Bar(Bar),
    Trade(Trade),
}

impl MarketEvent {
    pub fn symbol(&self) -> &str {
        match self {
            MarketEvent::Bar(bar) => &bar.symbol,
            MarketEvent::Trade(trade) => &trade.symbol,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            MarketEvent::Bar(bar) => bar.timestamp,
            MarketEvent::Trade(trade) => trade.timestamp,
        }
    }

    /// The last traded price the event carries.
    pub fn price(&self) -> Decimal {
        match self {
            MarketEvent::Bar(bar) => bar.close,
            MarketEvent::Trade(trade) => trade.price,
        }
    }
}

/// A signal together with the base order size of the instance that produced it.
#[derive(Debug, Clone)]
pub struct SignalEnvelope {
    pub signal: Signal,
    pub order_qty: Decimal,
}

/// Fans market data out to strategy instances, one task per instance.
///
/// Each instance owns its strategy and a bounded inbox, so it is never entered
/// concurrently with itself, while instances run in parallel with each other.
/// All instances emit into one signal channel.
pub struct StrategyPipeline {
    routes: HashMap<String, Vec<mpsc::Sender<MarketEvent>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl StrategyPipeline {
    pub fn spawn(
        instances: Vec<StrategyInstance>,
        buffer: usize,
    ) -> (Self, mpsc::Receiver<SignalEnvelope>) {
        let buffer = buffer.max(1);
        let (signal_tx, signal_rx) = mpsc::channel(buffer);
        let mut routes: HashMap<String, Vec<mpsc::Sender<MarketEvent>>> = HashMap::new();
        let mut tasks = Vec::with_capacity(instances.len());

        for instance in instances {
            let (tx, rx) = mpsc::channel(buffer);
            routes.entry(instance.symbol.clone()).or_default().push(tx);
            tracing::info!(instance = %instance.id, symbol = %instance.symbol, "Starting strategy task");
            tasks.push(tokio::spawn(run_instance(instance, rx, signal_tx.clone())));
        }

        (Self { routes, tasks }, signal_rx)
    }

    pub fn instance_count(&self) -> usize {
        self.tasks.len()
    }

    /// Delivers an event to every instance subscribed to its symbol. Waits when
    /// an instance's inbox is full. Returns the number of instances reached.
    pub async fn publish(&self, event: MarketEvent) -> usize {
        let Some(inboxes) = self.routes.get(event.symbol()) else {
            return 0;
        };

        let mut delivered = 0;
        for inbox in inboxes {
            if inbox.send(event.clone()).await.is_ok() {
                delivered += 1;
            } else {
                tracing::warn!(symbol = %event.symbol(), "Strategy task has stopped; event not delivered");
            }
        }
        delivered
    }

    /// Closes every inbox and waits for the instances to finish what they hold.
    pub async fn shutdown(self) {
        drop(self.routes);
        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Strategy task panicked");
            }
        }
    }
}

async fn run_instance(
    mut instance: StrategyInstance,
    mut inbox: mpsc::Receiver<MarketEvent>,
    signals: mpsc::Sender<SignalEnvelope>,
) {
    let mut last_seen: Option<DateTime<Utc>> = None;

    while let Some(event) = inbox.recv().await {
        let timestamp = event.timestamp();
        if last_seen.is_some_and(|last| timestamp < last) {
            tracing::warn!(instance = %instance.id, %timestamp, "Out-of-order event dropped");
            continue;
        }
        last_seen = Some(timestamp);

        let result = match &event {
            MarketEvent::Bar(bar) => instance.strategy.on_bar(bar),
            MarketEvent::Trade(trade) => instance.strategy.on_trade(trade),
        };

        match result {
            Ok(emitted) => {
                for signal in emitted {
                    let envelope = SignalEnvelope {
                        signal,
                        order_qty: instance.order_qty,
                    };
                    if signals.send(envelope).await.is_err() {
                        tracing::warn!(instance = %instance.id, "Signal receiver dropped; stopping strategy task");
                        return;
                    }
                }
            }
            Err(e) => {
                tracing::error!(instance = %instance.id, error = %e, "Strategy evaluation failed");
            }
        }
    }
    tracing::debug!(instance = %instance.id, "Strategy task finished");
}

/// Feeds pipeline signals into the engine until every strategy task is done.
/// Resolves to the number of orders submitted.
///
/// Each symbol gets its own lane: signals for one symbol are handled in the
/// order they were emitted, while different symbols proceed in parallel.
pub fn spawn_signal_loop(
    engine: Arc<Engine>,
    mut signals: mpsc::Receiver<SignalEnvelope>,
) -> JoinHandle<usize> {
    tokio::spawn(async move {
        let mut lanes: HashMap<String, mpsc::UnboundedSender<SignalEnvelope>> = HashMap::new();
        let mut workers = JoinSet::new();

        while let Some(envelope) = signals.recv().await {
            let lane = lanes.entry(envelope.signal.symbol.clone()).or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                workers.spawn(run_signal_lane(Arc::clone(&engine), rx));
                tx
            });
            if let Err(e) = lane.send(envelope) {
                tracing::error!(symbol = %e.0.signal.symbol, "Signal lane stopped; signal dropped");
            }
        }
        drop(lanes);

        let mut submitted = 0;
        while let Some(result) = workers.join_next().await {
            match result {
                Ok(count) => submitted += count,
                Err(e) => tracing::error!(error = %e, "Signal lane panicked"),
            }
        }
        submitted
    })
}

async fn run_signal_lane(
    engine: Arc<Engine>,
    mut signals: mpsc::UnboundedReceiver<SignalEnvelope>,
) -> usize {
    let mut submitted = 0;
    while let Some(SignalEnvelope { signal, order_qty }) = signals.recv().await {
        let strategy = signal.strategy_id.clone();
        match engine.handle_signal(signal, order_qty).await {
            Ok(Some(order)) => {
                submitted += 1;
                tracing::debug!(%strategy, order_id = %order.id, status = %order.status, "Signal order submitted");
            }
            Ok(None) => {}
            Err(EngineError::RiskRejected(reason)) => {
                tracing::warn!(%strategy, %reason, "Signal order blocked by risk checks");
            }
            Err(e) => {
                tracing::error!(%strategy, error = %e, "Failed to handle signal");
            }
        }
    }
    submitted
}
