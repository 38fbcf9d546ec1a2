//! Transactional façade over the transaction store. Every mutation of a
//! transaction, whoever drives it (interactive flow, webhook, reconciler),
//! funnels through `update_status` here, which is the single place the
//! transition graph and the optimistic-concurrency discipline are enforced.

use bigdecimal::BigDecimal;
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

use crate::domain::{Actor, AuditEntry, PaymentTransaction, ProviderType, TransactionStatus};
use crate::error::AppError;
use crate::ports::{ClientDirectory, StoreError, TransactionStore};
use crate::providers::{ProviderError, ProviderRegistry};
use crate::services::effects::{NotificationDispatcher, ReceiptGenerator};

/// One reload after a lost version race, then give up.
const VERSION_RETRIES: usize = 1;

pub struct GatewayService {
    store: Arc<dyn TransactionStore>,
    directory: Arc<dyn ClientDirectory>,
    providers: ProviderRegistry,
    notifier: Arc<dyn NotificationDispatcher>,
    receipts: Arc<dyn ReceiptGenerator>,
    amount_ceiling: BigDecimal,
    session_window: chrono::Duration,
}

impl GatewayService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn TransactionStore>,
        directory: Arc<dyn ClientDirectory>,
        providers: ProviderRegistry,
        notifier: Arc<dyn NotificationDispatcher>,
        receipts: Arc<dyn ReceiptGenerator>,
        amount_ceiling: u64,
        session_window: chrono::Duration,
    ) -> Self {
        Self {
            store,
            directory,
            providers,
            notifier,
            receipts,
            amount_ceiling: BigDecimal::from(amount_ceiling),
            session_window,
        }
    }

    pub fn store(&self) -> &Arc<dyn TransactionStore> {
        &self.store
    }

    /// Creates a transaction in Initiated with its session deadline and the
    /// first audit entry, in one atomic write.
    pub async fn initiate(
        &self,
        client_id: Uuid,
        amount: BigDecimal,
        currency: String,
        provider: ProviderType,
        metadata: Option<serde_json::Value>,
    ) -> Result<PaymentTransaction, AppError> {
        if amount <= BigDecimal::from(0) {
            return Err(AppError::Validation(
                "amount must be greater than zero".to_string(),
            ));
        }
        if amount >= self.amount_ceiling {
            return Err(AppError::Validation(format!(
                "amount exceeds the configured ceiling of {}",
                self.amount_ceiling
            )));
        }
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(AppError::Validation(
                "currency must be a 3-letter ISO code".to_string(),
            ));
        }
        if !self.directory.exists(client_id).await.map_err(store_err)? {
            return Err(AppError::NotFound(format!("client {client_id}")));
        }

        let tx = PaymentTransaction::new(
            client_id,
            amount,
            currency,
            provider,
            self.session_window,
            metadata,
        );
        let audit = AuditEntry::new(
            tx.id,
            Actor::User,
            None,
            TransactionStatus::Initiated,
            Some("transaction initiated".to_string()),
        );

        let inserted = self.store.insert(&tx, &audit).await.map_err(store_err)?;
        tracing::info!(
            transaction_id = %inserted.id,
            reference = %inserted.reference,
            provider = %inserted.provider,
            "transaction initiated"
        );
        Ok(inserted)
    }

    /// Dispatches the transaction onto its rail and moves it to Processing,
    /// recording the provider-assigned external reference. A transient
    /// dispatch failure leaves the row exactly as it was.
    pub async fn process(&self, id: Uuid) -> Result<PaymentTransaction, AppError> {
        let tx = self.store.get(id).await.map_err(store_err)?;

        if !matches!(
            tx.status,
            TransactionStatus::Initiated | TransactionStatus::Pending
        ) {
            return Err(AppError::IllegalTransition(format!(
                "cannot dispatch a transaction in state {}",
                tx.status
            )));
        }

        let adapter = self
            .providers
            .get(tx.provider)
            .ok_or_else(|| AppError::Internal(format!("no adapter for {}", tx.provider)))?;

        let outcome = adapter.dispatch(&tx).await.map_err(|e| match e {
            ProviderError::Unreachable(msg) => AppError::ProviderUnavailable(msg),
            ProviderError::Protocol(msg) => AppError::ProviderUnavailable(msg),
        })?;

        self.apply(
            id,
            TransactionStatus::Processing,
            Some("dispatched to provider".to_string()),
            Actor::User,
            Some(outcome.external_reference.as_str()),
        )
        .await?;

        // Some rails answer the push synchronously with a final verdict.
        if outcome.status.is_terminal() {
            self.update_status(
                id,
                outcome.status.as_transaction_status(),
                Some("provider resolved at dispatch".to_string()),
                Actor::User,
            )
            .await?;
        }

        self.store.get(id).await.map_err(store_err)
    }

    /// Read-path status refresh. Asks the provider when an external
    /// reference exists; only a definitive terminal answer mutates the row.
    pub async fn check_status(
        &self,
        id: Uuid,
        actor: Actor,
    ) -> Result<TransactionStatus, AppError> {
        let tx = self.store.get(id).await.map_err(store_err)?;

        if tx.is_terminal() {
            return Ok(tx.status);
        }
        let Some(external_reference) = tx.external_reference.clone() else {
            return Ok(tx.status);
        };
        let adapter = self
            .providers
            .get(tx.provider)
            .ok_or_else(|| AppError::Internal(format!("no adapter for {}", tx.provider)))?;

        match adapter.check_status(&external_reference).await {
            Ok(status) if status.is_terminal() => {
                self.update_status(
                    id,
                    status.as_transaction_status(),
                    Some("provider status refresh".to_string()),
                    actor,
                )
                .await?;
                Ok(self.store.get(id).await.map_err(store_err)?.status)
            }
            Ok(_) => Ok(tx.status),
            Err(ProviderError::Unreachable(msg)) => {
                // Left for the next webhook or reconciliation tick.
                tracing::warn!(transaction_id = %id, "provider unreachable during status check: {msg}");
                Ok(tx.status)
            }
            Err(ProviderError::Protocol(msg)) => {
                tracing::warn!(transaction_id = %id, "provider protocol error during status check: {msg}");
                Ok(tx.status)
            }
        }
    }

    /// The single mutation primitive. Returns `false` without touching the
    /// row when it is already terminal, which is what makes webhook
    /// redelivery and duplicate expiry safe.
    pub async fn update_status(
        &self,
        id: Uuid,
        new_status: TransactionStatus,
        reason: Option<String>,
        actor: Actor,
    ) -> Result<bool, AppError> {
        self.apply(id, new_status, reason, actor, None).await
    }

    /// Expires the transaction if its session deadline has passed. A no-op
    /// returning `false` for rows that are terminal or not yet due.
    pub async fn expire(&self, id: Uuid, actor: Actor) -> Result<bool, AppError> {
        let tx = self.store.get(id).await.map_err(store_err)?;

        if !matches!(
            tx.status,
            TransactionStatus::Initiated | TransactionStatus::Pending | TransactionStatus::Processing
        ) {
            return Ok(false);
        }
        if !tx.is_expired(Utc::now()) {
            return Ok(false);
        }

        self.apply(
            id,
            TransactionStatus::Expired,
            Some("session window elapsed".to_string()),
            actor,
            None,
        )
        .await
    }

    async fn apply(
        &self,
        id: Uuid,
        new_status: TransactionStatus,
        reason: Option<String>,
        actor: Actor,
        external_reference: Option<&str>,
    ) -> Result<bool, AppError> {
        let mut current = self.store.get(id).await.map_err(store_err)?;

        for attempt in 0..=VERSION_RETRIES {
            if current.status.is_terminal() {
                return Ok(false);
            }
            if !current.status.can_transition_to(new_status) {
                return Err(AppError::IllegalTransition(format!(
                    "{} -> {}",
                    current.status, new_status
                )));
            }

            let audit = AuditEntry::new(id, actor, Some(current.status), new_status, reason.clone());
            let applied = self
                .store
                .apply_transition(&current, new_status, external_reference, &audit)
                .await
                .map_err(store_err)?;

            match applied {
                Some(updated) => {
                    tracing::info!(
                        transaction_id = %id,
                        from = %audit.old_status.map(|s| s.as_str()).unwrap_or("-"),
                        to = %new_status,
                        actor = actor.as_str(),
                        "status transition committed"
                    );
                    if updated.is_terminal() {
                        self.finalize(&updated).await;
                    }
                    return Ok(true);
                }
                None if attempt < VERSION_RETRIES => {
                    // Another actor won the race; reload and re-validate.
                    current = self.store.get(id).await.map_err(store_err)?;
                }
                None => break,
            }
        }

        Err(AppError::ConcurrencyConflict(format!(
            "transaction {id} was concurrently modified"
        )))
    }

    /// Downstream side effects on entering a terminal state. Failures are
    /// warnings; the committed transition stands regardless.
    async fn finalize(&self, tx: &PaymentTransaction) {
        if let Err(e) = self.notifier.transaction_finalized(tx).await {
            tracing::warn!(transaction_id = %tx.id, "notification dispatch failed: {e}");
        }
        if tx.status == TransactionStatus::Completed {
            if let Err(e) = self.receipts.issue(tx).await {
                tracing::warn!(transaction_id = %tx.id, "receipt generation failed: {e}");
            }
        }
    }
}

fn store_err(err: StoreError) -> AppError {
    match err {
        StoreError::NotFound(what) => AppError::NotFound(what),
        StoreError::Database(msg) => AppError::Database(msg),
    }
}
