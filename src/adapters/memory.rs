//! In-memory implementations of the store ports. Used by the test suite and
//! useful for local experiments without a database.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Actor, AuditEntry, PaymentTransaction, ProviderType, TransactionStatus};
use crate::ports::{ClientDirectory, StoreError, StoreResult, SweepLock, TransactionStore};

#[derive(Default)]
pub struct InMemoryTransactionStore {
    transactions: Mutex<HashMap<Uuid, PaymentTransaction>>,
    audit: Mutex<Vec<AuditEntry>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test seam: place a transaction directly in an arbitrary state.
    pub fn seed(&self, tx: PaymentTransaction) {
        self.transactions.lock().unwrap().insert(tx.id, tx);
    }
}

#[async_trait]
impl TransactionStore for InMemoryTransactionStore {
    async fn insert(
        &self,
        tx: &PaymentTransaction,
        audit: &AuditEntry,
    ) -> StoreResult<PaymentTransaction> {
        let mut transactions = self.transactions.lock().unwrap();
        if transactions.contains_key(&tx.id) {
            return Err(StoreError::Database(format!(
                "duplicate transaction {}",
                tx.id
            )));
        }
        transactions.insert(tx.id, tx.clone());
        self.audit.lock().unwrap().push(audit.clone());
        Ok(tx.clone())
    }

    async fn get(&self, id: Uuid) -> StoreResult<PaymentTransaction> {
        self.transactions
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))
    }

    async fn get_by_external_reference(
        &self,
        provider: ProviderType,
        external_reference: &str,
    ) -> StoreResult<PaymentTransaction> {
        self.transactions
            .lock()
            .unwrap()
            .values()
            .find(|tx| {
                tx.provider == provider
                    && tx.external_reference.as_deref() == Some(external_reference)
            })
            .cloned()
            .ok_or_else(|| {
                StoreError::NotFound(format!("transaction {provider}/{external_reference}"))
            })
    }

    async fn apply_transition(
        &self,
        current: &PaymentTransaction,
        new_status: TransactionStatus,
        external_reference: Option<&str>,
        audit: &AuditEntry,
    ) -> StoreResult<Option<PaymentTransaction>> {
        let mut transactions = self.transactions.lock().unwrap();
        let stored = transactions
            .get_mut(&current.id)
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", current.id)))?;

        if stored.version != current.version {
            return Ok(None);
        }

        stored.status = new_status;
        stored.version += 1;
        if new_status == TransactionStatus::Processing && stored.processed_at.is_none() {
            stored.processed_at = Some(Utc::now());
        }
        if matches!(
            new_status,
            TransactionStatus::Failed | TransactionStatus::Cancelled | TransactionStatus::Expired
        ) && stored.failure_reason.is_none()
        {
            stored.failure_reason = audit.reason.clone();
        }
        if let Some(ext) = external_reference {
            stored.external_reference.get_or_insert_with(|| ext.to_string());
        }

        self.audit.lock().unwrap().push(audit.clone());
        Ok(Some(stored.clone()))
    }

    async fn list_open(&self, limit: i64) -> StoreResult<Vec<PaymentTransaction>> {
        let mut open: Vec<PaymentTransaction> = self
            .transactions
            .lock()
            .unwrap()
            .values()
            .filter(|tx| !tx.is_terminal())
            .cloned()
            .collect();
        open.sort_by_key(|tx| tx.initiated_at);
        open.truncate(limit as usize);
        Ok(open)
    }

    async fn has_transition(
        &self,
        transaction_id: Uuid,
        actor: Actor,
        status: TransactionStatus,
    ) -> StoreResult<bool> {
        Ok(self.audit.lock().unwrap().iter().any(|entry| {
            entry.transaction_id == transaction_id
                && entry.actor == actor
                && entry.new_status == status
        }))
    }

    async fn audit_trail(&self, transaction_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        Ok(self
            .audit
            .lock()
            .unwrap()
            .iter()
            .filter(|entry| entry.transaction_id == transaction_id)
            .cloned()
            .collect())
    }
}

/// Directory with a fixed set of known clients.
#[derive(Default)]
pub struct InMemoryClientDirectory {
    known: Mutex<HashSet<Uuid>>,
}

impl InMemoryClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, client_id: Uuid) {
        self.known.lock().unwrap().insert(client_id);
    }
}

#[async_trait]
impl ClientDirectory for InMemoryClientDirectory {
    async fn exists(&self, client_id: Uuid) -> StoreResult<bool> {
        Ok(self.known.lock().unwrap().contains(&client_id))
    }
}

/// Single-process sweep lock.
#[derive(Default)]
pub struct InMemorySweepLock {
    held: AtomicBool,
}

impl InMemorySweepLock {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SweepLock for InMemorySweepLock {
    async fn try_acquire(&self) -> StoreResult<bool> {
        Ok(self
            .held
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok())
    }

    async fn release(&self) -> StoreResult<()> {
        self.held.store(false, Ordering::Release);
        Ok(())
    }
}
