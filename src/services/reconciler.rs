//! Periodic reconciliation sweep. Fills the gaps webhooks leave: expires
//! stale sessions, polls the rails that support it, and enforces the
//! pending/processing timeout policy. Non-overlapping by construction: a
//! sweep lock guarantees a single active sweeper across all processes.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{Actor, PaymentTransaction, TransactionStatus};
use crate::error::AppError;
use crate::ports::{StoreError, SweepLock, TransactionStore};
use crate::providers::{ProviderError, ProviderRegistry};
use crate::services::gateway::GatewayService;

#[derive(Debug, Clone)]
pub struct ReconcilePolicy {
    pub batch_size: i64,
    /// How long after initiation the sweep defers to the interactive flow.
    /// Anchored to `initiated_at`; retries do not reset it.
    pub dispatch_grace: chrono::Duration,
    /// Pending timeout, anchored to `initiated_at`.
    pub pending_timeout: chrono::Duration,
    /// Processing timeout, anchored to `processed_at`.
    pub processing_timeout: chrono::Duration,
    pub interval: std::time::Duration,
}

/// What one tick did. Failures are per-transaction and never abort the batch.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub examined: usize,
    pub failed: usize,
    pub skipped_lock: bool,
    pub cancelled: bool,
}

pub struct Reconciler {
    store: Arc<dyn TransactionStore>,
    gateway: Arc<GatewayService>,
    providers: ProviderRegistry,
    lock: Arc<dyn SweepLock>,
    policy: ReconcilePolicy,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn TransactionStore>,
        gateway: Arc<GatewayService>,
        providers: ProviderRegistry,
        lock: Arc<dyn SweepLock>,
        policy: ReconcilePolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            providers,
            lock,
            policy,
        }
    }

    /// Sweep loop. Runs until the shutdown channel fires; cancellation is
    /// honored between transactions, never mid-commit.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.policy.interval.as_secs(),
            batch_size = self.policy.batch_size,
            "reconciliation sweep started"
        );

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    info!("reconciliation sweep stopping");
                    break;
                }
                _ = sleep(self.policy.interval) => {}
            }

            match self.tick_with_shutdown(&mut shutdown).await {
                Ok(report) if report.cancelled => {
                    info!("reconciliation sweep cancelled mid-batch");
                    break;
                }
                Ok(report) => {
                    if report.examined > 0 || report.failed > 0 {
                        debug!(
                            examined = report.examined,
                            failed = report.failed,
                            "reconciliation tick finished"
                        );
                    }
                }
                Err(e) => error!("reconciliation tick failed: {e}"),
            }
        }
    }

    /// One full sweep pass. Public so operators and tests can force a tick.
    pub async fn tick(&self) -> Result<TickReport, AppError> {
        self.tick_cancellable(None).await
    }

    /// Like `tick`, but honors a shutdown channel between items.
    pub async fn tick_with_shutdown(
        &self,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<TickReport, AppError> {
        self.tick_cancellable(Some(shutdown)).await
    }

    async fn tick_cancellable(
        &self,
        mut shutdown: Option<&mut broadcast::Receiver<()>>,
    ) -> Result<TickReport, AppError> {
        if !self.lock.try_acquire().await.map_err(store_err)? {
            debug!("another sweeper holds the lock, skipping tick");
            return Ok(TickReport {
                skipped_lock: true,
                ..TickReport::default()
            });
        }

        let result = self.sweep_batch(&mut shutdown).await;
        if let Err(e) = self.lock.release().await {
            warn!("failed to release sweep lock: {e}");
        }
        result
    }

    async fn sweep_batch(
        &self,
        shutdown: &mut Option<&mut broadcast::Receiver<()>>,
    ) -> Result<TickReport, AppError> {
        let batch = self
            .store
            .list_open(self.policy.batch_size)
            .await
            .map_err(store_err)?;

        let mut report = TickReport::default();
        let now = Utc::now();

        for tx in batch {
            if let Some(rx) = shutdown.as_deref_mut() {
                if rx.try_recv().is_ok() {
                    report.cancelled = true;
                    break;
                }
            }

            report.examined += 1;
            if let Err(e) = self.reconcile_one(&tx, now).await {
                // Failure isolation: log and move on to the next item.
                warn!(
                    transaction_id = %tx.id,
                    status = %tx.status,
                    "reconciliation of transaction failed: {e}"
                );
                report.failed += 1;
            }
        }

        Ok(report)
    }

    async fn reconcile_one(
        &self,
        tx: &PaymentTransaction,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        match tx.status {
            TransactionStatus::Initiated => {
                if now - tx.initiated_at < self.policy.dispatch_grace {
                    // The interactive flow may be about to call process().
                    return Ok(());
                }
                if tx.is_expired(now) {
                    self.gateway.expire(tx.id, Actor::Scheduler).await?;
                }
                Ok(())
            }
            TransactionStatus::Pending | TransactionStatus::Processing => {
                if tx.is_expired(now) {
                    self.gateway.expire(tx.id, Actor::Scheduler).await?;
                    return Ok(());
                }

                // A failed refresh must not short-circuit the timeout
                // policy: a rail that keeps answering garbage would
                // otherwise hold its transactions open until expiry.
                let refreshed = self.refresh_status(tx).await;

                // Reload: the refresh (or a concurrent webhook) may have
                // finished the job already.
                let latest = self.store.get(tx.id).await.map_err(store_err)?;
                if latest.is_terminal() {
                    return refreshed;
                }

                self.enforce_timeouts(&latest, now).await?;
                refreshed
            }
            // Terminal rows are filtered out of the batch; nothing to do if
            // one slips in between query and processing.
            _ => Ok(()),
        }
    }

    /// Ask the rail for fresh news. Wallet rails are polled directly; the
    /// generic gateway path goes through `GatewayService::check_status`.
    /// Unreachable providers are left for the next tick.
    async fn refresh_status(&self, tx: &PaymentTransaction) -> Result<(), AppError> {
        let Some(external_reference) = tx.external_reference.clone() else {
            return Ok(());
        };
        let Some(adapter) = self.providers.get(tx.provider) else {
            return Err(AppError::Internal(format!("no adapter for {}", tx.provider)));
        };

        if !adapter.supports_polling() {
            self.gateway.check_status(tx.id, Actor::Scheduler).await?;
            return Ok(());
        }

        match adapter.check_status(&external_reference).await {
            Ok(status) if status.is_terminal() => {
                self.gateway
                    .update_status(
                        tx.id,
                        status.as_transaction_status(),
                        Some("reconciliation status refresh".to_string()),
                        Actor::Scheduler,
                    )
                    .await?;
                Ok(())
            }
            Ok(_) => Ok(()),
            Err(ProviderError::Unreachable(msg)) => {
                debug!(transaction_id = %tx.id, "provider unreachable during sweep: {msg}");
                Ok(())
            }
            Err(ProviderError::Protocol(msg)) => Err(AppError::ProviderUnavailable(msg)),
        }
    }

    /// Anchor-specific timeout policy: Pending measures from `initiated_at`,
    /// Processing from `processed_at`. A breach forces Failed.
    async fn enforce_timeouts(
        &self,
        tx: &PaymentTransaction,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        match tx.status {
            TransactionStatus::Pending => {
                if now - tx.initiated_at > self.policy.pending_timeout {
                    self.force_failed(tx.id, "pending timeout exceeded").await?;
                }
                Ok(())
            }
            TransactionStatus::Processing => {
                let anchor = tx.processed_at.unwrap_or(tx.initiated_at);
                if now - anchor > self.policy.processing_timeout {
                    self.force_failed(tx.id, "processing timeout exceeded")
                        .await?;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn force_failed(&self, id: Uuid, reason: &str) -> Result<(), AppError> {
        let applied = self
            .gateway
            .update_status(
                id,
                TransactionStatus::Failed,
                Some(reason.to_string()),
                Actor::Scheduler,
            )
            .await?;
        if applied {
            warn!(transaction_id = %id, "transaction forced to failed: {reason}");
        }
        Ok(())
    }
}

fn store_err(err: StoreError) -> AppError {
    match err {
        StoreError::NotFound(what) => AppError::NotFound(what),
        StoreError::Database(msg) => AppError::Database(msg),
    }
}
