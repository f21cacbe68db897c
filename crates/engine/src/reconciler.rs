use crate::Engine;
use crate::error::{EngineError, StateError};
use broker::{ExecutionReport, ReportKind, VenueOrder};
use core_types::OrderStatus;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Duration, MissedTickBehavior, interval};
use uuid::Uuid;

/// Turns a venue status snapshot into the report it implies, if any.
fn report_from_venue(venue: &VenueOrder) -> Option<ExecutionReport> {
    let kind = match venue.status {
        OrderStatus::Pending | OrderStatus::Submitted => return None,
        OrderStatus::PartiallyFilled => ReportKind::PartialFill,
        OrderStatus::Filled => ReportKind::Fill,
        OrderStatus::Cancelled => ReportKind::Cancelled,
        OrderStatus::Rejected => ReportKind::Rejected,
    };
    Some(ExecutionReport {
        broker_order_id: venue.broker_order_id.clone(),
        client_order_id: venue.client_order_id,
        kind,
        filled_qty: venue.filled_qty,
        filled_avg_price: venue.filled_avg_price,
        reason: venue.reason.clone(),
        timestamp: venue.updated_at,
    })
}

impl Engine {
    fn resolve_report(&self, report: &ExecutionReport) -> Result<Uuid, EngineError> {
        if self.orders.contains_key(&report.client_order_id) {
            return Ok(report.client_order_id);
        }
        self.broker_ids
            .get(&report.broker_order_id)
            .map(|id| *id)
            .ok_or_else(|| StateError::UnknownOrder(report.broker_order_id.clone()).into())
    }

    /// Applies one execution report to its order and, for fills, to the position.
    ///
    /// Reports are cumulative, so a duplicate or stale report changes nothing.
    /// A fill for an order still `pending` implies the venue accepted it. A
    /// cancel confirmation carrying more filled quantity than we know of applies
    /// that quantity before cancelling. Reports for terminal orders are dropped.
    pub async fn apply_report(&self, report: &ExecutionReport) -> Result<(), EngineError> {
        let order_id = self.resolve_report(report)?;
        let mut accepted_now = false;

        let order = self
            .update_order(order_id, |o| {
                if o.status.is_terminal() {
                    tracing::debug!(%order_id, status = %o.status, kind = ?report.kind, "Report for terminal order dropped");
                    return Ok(None);
                }
                let at = report.timestamp;

                if o.status == OrderStatus::Pending && report.kind != ReportKind::Rejected {
                    o.mark_submitted(report.broker_order_id.clone(), at)?;
                    accepted_now = true;
                }

                let mut fill = None;
                if report.kind != ReportKind::Rejected && report.filled_qty > o.filled_qty {
                    let Some(avg) = report.filled_avg_price else {
                        tracing::warn!(%order_id, filled_qty = %report.filled_qty, kind = ?report.kind, "Report carries new fills without a price");
                        return Err(StateError::MalformedReport(format!(
                            "{} reports {} filled with no average price",
                            report.broker_order_id, report.filled_qty
                        ))
                        .into());
                    };
                    fill = o.apply_fill(report.filled_qty, avg, at)?;
                }

                match report.kind {
                    ReportKind::Cancelled if o.status.is_working() => o.mark_cancelled(at)?,
                    ReportKind::Rejected => {
                        let reason = report
                            .reason
                            .clone()
                            .unwrap_or_else(|| "rejected by venue".to_string());
                        o.mark_rejected(reason, at)?;
                    }
                    _ => {}
                }
                Ok(fill)
            })
            .await?;

        if accepted_now {
            self.unconfirmed.remove(&order_id);
            self.flush_deferred_cancel(&order).await;
        }
        Ok(())
    }

    /// Resolves every unconfirmed order against the venue's view of it.
    ///
    /// An order the venue never saw is rejected; an order it knows is brought up
    /// to the venue's cumulative state. Orders whose status query fails stay
    /// queued. Returns the number of orders resolved.
    pub async fn reconcile_unconfirmed(&self) -> Result<usize, EngineError> {
        let queued = self.unconfirmed_orders();
        let mut resolved = 0;

        for order_id in queued {
            match self.reconcile_order(order_id).await {
                Ok(()) => {
                    self.unconfirmed.remove(&order_id);
                    resolved += 1;
                }
                Err(e) => {
                    tracing::warn!(%order_id, error = %e, "Order still unconfirmed");
                }
            }
        }
        Ok(resolved)
    }

    async fn reconcile_order(&self, order_id: Uuid) -> Result<(), EngineError> {
        let venue = self
            .timed(self.broker.order_status(order_id))
            .await
            .map_err(|source| EngineError::Broker { order_id, source })?;

        match venue {
            None => {
                let order = self
                    .update_order(order_id, |o| {
                        if o.status == OrderStatus::Pending {
                            o.mark_rejected("not received by the venue", chrono::Utc::now())?;
                        }
                        Ok(None)
                    })
                    .await?;
                tracing::warn!(%order_id, status = %order.status, "Venue has no record of order");
            }
            Some(venue) => {
                tracing::info!(%order_id, broker_order_id = %venue.broker_order_id, status = %venue.status, "Reconciling order with venue state");
                match report_from_venue(&venue) {
                    Some(report) => self.apply_report(&report).await?,
                    None => {
                        self.on_accepted(order_id, &venue.broker_order_id, venue.updated_at)
                            .await?;
                    }
                }
            }
        }
        Ok(())
    }
}

/// The background task that keeps engine state in step with the venue.
///
/// It drains the execution-report stream in arrival order, so reports for one
/// order are never reordered, and periodically sweeps unconfirmed orders.
pub struct StateReconciler {
    engine: Arc<Engine>,
    reports: mpsc::UnboundedReceiver<ExecutionReport>,
    sweep_every: Duration,
}

impl StateReconciler {
    pub fn new(
        engine: Arc<Engine>,
        reports: mpsc::UnboundedReceiver<ExecutionReport>,
        sweep_every: Duration,
    ) -> Self {
        Self {
            engine,
            reports,
            sweep_every,
        }
    }

    async fn apply(&self, report: ExecutionReport) {
        if let Err(e) = self.engine.apply_report(&report).await {
            tracing::error!(
                broker_order_id = %report.broker_order_id,
                kind = ?report.kind,
                error = %e,
                "Failed to apply execution report"
            );
        }
    }

    async fn sweep(&self) {
        match self.engine.reconcile_unconfirmed().await {
            Ok(0) => {}
            Ok(resolved) => tracing::info!(resolved, "Unconfirmed orders reconciled"),
            Err(e) => tracing::error!(error = %e, "Reconciliation sweep failed"),
        }
    }

    /// Runs until the report stream closes or `shutdown` fires. On shutdown,
    /// reports already queued are applied before returning.
    pub async fn start(mut self, mut shutdown: oneshot::Receiver<()>) {
        tracing::info!(sweep_every = ?self.sweep_every, "Starting execution-report reconciliation");
        let mut timer = interval(self.sweep_every);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_report = self.reports.recv() => match maybe_report {
                    Some(report) => self.apply(report).await,
                    None => {
                        tracing::info!("Execution-report stream closed");
                        break;
                    }
                },
                _ = timer.tick() => self.sweep().await,
                _ = &mut shutdown => {
                    while let Ok(report) = self.reports.try_recv() {
                        self.apply(report).await;
                    }
                    self.sweep().await;
                    break;
                }
            }
        }
        tracing::info!("Reconciler stopped");
    }
}
