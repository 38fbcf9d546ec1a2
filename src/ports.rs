//! Port traits between the gateway core and its infrastructure.
//! Adapters live in `crate::adapters`; the core only sees these contracts.

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Actor, AuditEntry, PaymentTransaction, ProviderType, TransactionStatus};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("database error: {0}")]
    Database(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

/// Persistence boundary for transactions and their audit trail.
///
/// `apply_transition` is the only write path after insert. It must commit the
/// row update and the audit entry in one atomic unit, guarded by the row's
/// version column: `Ok(None)` means another actor won the race and nothing
/// was written.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert(
        &self,
        tx: &PaymentTransaction,
        audit: &AuditEntry,
    ) -> StoreResult<PaymentTransaction>;

    async fn get(&self, id: Uuid) -> StoreResult<PaymentTransaction>;

    async fn get_by_external_reference(
        &self,
        provider: ProviderType,
        external_reference: &str,
    ) -> StoreResult<PaymentTransaction>;

    /// Version-checked status write. Sets `processed_at` on first entry into
    /// Processing and `failure_reason` from the audit reason on Failed,
    /// Cancelled, and Expired. `external_reference` is recorded when given.
    async fn apply_transition(
        &self,
        current: &PaymentTransaction,
        new_status: TransactionStatus,
        external_reference: Option<&str>,
        audit: &AuditEntry,
    ) -> StoreResult<Option<PaymentTransaction>>;

    /// Oldest non-terminal transactions by initiation time, bounded.
    async fn list_open(&self, limit: i64) -> StoreResult<Vec<PaymentTransaction>>;

    /// Duplicate-delivery heuristic: has this actor already recorded a
    /// transition into `status` for this transaction?
    async fn has_transition(
        &self,
        transaction_id: Uuid,
        actor: Actor,
        status: TransactionStatus,
    ) -> StoreResult<bool>;

    /// Full audit trail, newest last. Operational forensics only.
    async fn audit_trail(&self, transaction_id: Uuid) -> StoreResult<Vec<AuditEntry>>;
}

/// Narrow contract onto the client CRUD service.
#[async_trait]
pub trait ClientDirectory: Send + Sync {
    async fn exists(&self, client_id: Uuid) -> StoreResult<bool>;
}

/// Mutual exclusion for the reconciliation sweep. One holder at a time across
/// all processes; a tick that fails to acquire simply skips.
#[async_trait]
pub trait SweepLock: Send + Sync {
    async fn try_acquire(&self) -> StoreResult<bool>;
    async fn release(&self) -> StoreResult<()>;
}
