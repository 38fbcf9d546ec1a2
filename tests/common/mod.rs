#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{Duration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

use remit_core::adapters::{InMemoryClientDirectory, InMemoryTransactionStore};
use remit_core::domain::{Actor, AuditEntry, PaymentTransaction, ProviderType, TransactionStatus};
use remit_core::ports::{StoreResult, TransactionStore};
use remit_core::providers::{
    DispatchOutcome, ProviderAdapter, ProviderError, ProviderRegistry, ProviderStatus,
};
use remit_core::services::{GatewayService, NotificationDispatcher, ReceiptGenerator};

/// How a scripted provider answers its next call.
#[derive(Debug, Clone, Copy)]
pub enum ScriptedResponse {
    Status(ProviderStatus),
    Unreachable,
    ProtocolError,
}

/// Test double for a payment rail with programmable responses.
pub struct ScriptedProvider {
    provider: ProviderType,
    polling: bool,
    external_reference: String,
    dispatch_response: Mutex<ScriptedResponse>,
    status_response: Mutex<ScriptedResponse>,
    pub dispatch_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(provider: ProviderType, external_reference: &str) -> Self {
        Self {
            provider,
            polling: true,
            external_reference: external_reference.to_string(),
            dispatch_response: Mutex::new(ScriptedResponse::Status(ProviderStatus::Processing)),
            status_response: Mutex::new(ScriptedResponse::Status(ProviderStatus::Processing)),
            dispatch_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn without_polling(mut self) -> Self {
        self.polling = false;
        self
    }

    pub fn set_dispatch(&self, response: ScriptedResponse) {
        *self.dispatch_response.lock().unwrap() = response;
    }

    pub fn set_status(&self, response: ScriptedResponse) {
        *self.status_response.lock().unwrap() = response;
    }
}

fn materialize(response: ScriptedResponse) -> Result<ProviderStatus, ProviderError> {
    match response {
        ScriptedResponse::Status(status) => Ok(status),
        ScriptedResponse::Unreachable => {
            Err(ProviderError::Unreachable("scripted outage".to_string()))
        }
        ScriptedResponse::ProtocolError => {
            Err(ProviderError::Protocol("scripted garbage".to_string()))
        }
    }
}

#[async_trait]
impl ProviderAdapter for ScriptedProvider {
    fn provider_type(&self) -> ProviderType {
        self.provider
    }

    fn supports_polling(&self) -> bool {
        self.polling
    }

    async fn dispatch(&self, _tx: &PaymentTransaction) -> Result<DispatchOutcome, ProviderError> {
        self.dispatch_calls.fetch_add(1, Ordering::SeqCst);
        let status = materialize(*self.dispatch_response.lock().unwrap())?;
        Ok(DispatchOutcome {
            external_reference: self.external_reference.clone(),
            status,
        })
    }

    async fn check_status(
        &self,
        _external_reference: &str,
    ) -> Result<ProviderStatus, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        materialize(*self.status_response.lock().unwrap())
    }
}

/// Store double where every write loses the version race: reads pass
/// through, `apply_transition` always reports a concurrent winner.
#[derive(Default)]
pub struct ContendedStore {
    inner: InMemoryTransactionStore,
}

impl ContendedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(&self, tx: PaymentTransaction) {
        self.inner.seed(tx);
    }
}

#[async_trait]
impl TransactionStore for ContendedStore {
    async fn insert(
        &self,
        tx: &PaymentTransaction,
        audit: &AuditEntry,
    ) -> StoreResult<PaymentTransaction> {
        self.inner.insert(tx, audit).await
    }

    async fn get(&self, id: Uuid) -> StoreResult<PaymentTransaction> {
        self.inner.get(id).await
    }

    async fn get_by_external_reference(
        &self,
        provider: ProviderType,
        external_reference: &str,
    ) -> StoreResult<PaymentTransaction> {
        self.inner
            .get_by_external_reference(provider, external_reference)
            .await
    }

    async fn apply_transition(
        &self,
        _current: &PaymentTransaction,
        _new_status: TransactionStatus,
        _external_reference: Option<&str>,
        _audit: &AuditEntry,
    ) -> StoreResult<Option<PaymentTransaction>> {
        Ok(None)
    }

    async fn list_open(&self, limit: i64) -> StoreResult<Vec<PaymentTransaction>> {
        self.inner.list_open(limit).await
    }

    async fn has_transition(
        &self,
        transaction_id: Uuid,
        actor: Actor,
        status: TransactionStatus,
    ) -> StoreResult<bool> {
        self.inner.has_transition(transaction_id, actor, status).await
    }

    async fn audit_trail(&self, transaction_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        self.inner.audit_trail(transaction_id).await
    }
}

#[derive(Default)]
pub struct CountingReceipts {
    pub issued: AtomicUsize,
}

#[async_trait]
impl ReceiptGenerator for CountingReceipts {
    async fn issue(&self, _tx: &PaymentTransaction) -> anyhow::Result<()> {
        self.issued.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct CountingNotifier {
    pub sent: AtomicUsize,
    pub fail: std::sync::atomic::AtomicBool,
}

#[async_trait]
impl NotificationDispatcher for CountingNotifier {
    async fn transaction_finalized(&self, _tx: &PaymentTransaction) -> anyhow::Result<()> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("scripted notification outage");
        }
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<InMemoryTransactionStore>,
    pub directory: Arc<InMemoryClientDirectory>,
    pub gateway: Arc<GatewayService>,
    pub registry: ProviderRegistry,
    pub receipts: Arc<CountingReceipts>,
    pub notifier: Arc<CountingNotifier>,
    pub client_id: Uuid,
}

pub const AMOUNT_CEILING: u64 = 1_000_000_000;

pub fn harness(registry: ProviderRegistry) -> Harness {
    let store = Arc::new(InMemoryTransactionStore::new());
    let directory = Arc::new(InMemoryClientDirectory::new());
    let receipts = Arc::new(CountingReceipts::default());
    let notifier = Arc::new(CountingNotifier::default());

    let client_id = Uuid::new_v4();
    directory.register(client_id);

    let gateway = Arc::new(GatewayService::new(
        store.clone(),
        directory.clone(),
        registry.clone(),
        notifier.clone(),
        receipts.clone(),
        AMOUNT_CEILING,
        Duration::minutes(10),
    ));

    Harness {
        store,
        directory,
        gateway,
        registry,
        receipts,
        notifier,
        client_id,
    }
}

/// A transaction seeded directly into an arbitrary lifecycle position.
pub fn seeded_tx(
    client_id: Uuid,
    provider: ProviderType,
    status: TransactionStatus,
    age: Duration,
) -> PaymentTransaction {
    let now = Utc::now();
    let mut tx = PaymentTransaction::new(
        client_id,
        BigDecimal::from(100),
        "KES".to_string(),
        provider,
        Duration::minutes(10),
        None,
    );
    tx.status = status;
    tx.initiated_at = now - age;
    tx.expires_at = tx.initiated_at + Duration::minutes(10);
    if matches!(
        status,
        TransactionStatus::Processing
            | TransactionStatus::Completed
            | TransactionStatus::Failed
    ) {
        tx.processed_at = Some(tx.initiated_at + Duration::seconds(5));
    }
    if status != TransactionStatus::Initiated {
        tx.external_reference = Some(format!("EXT-{}", tx.id.simple()));
    }
    tx
}
