//! Postgres implementations of the store, directory, and sweep-lock ports.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::pool::PoolConnection;
use sqlx::{PgPool, Postgres, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{Actor, AuditEntry, PaymentTransaction, ProviderType, TransactionStatus};
use crate::ports::{ClientDirectory, StoreError, StoreResult, SweepLock, TransactionStore};

const OPEN_STATUSES: &str = "('initiated', 'pending', 'processing')";

const TX_COLUMNS: &str = "id, reference, external_reference, client_id, amount, currency, \
     provider, status, initiated_at, processed_at, expires_at, failure_reason, version, metadata";

/// Postgres-backed transaction store.
#[derive(Clone)]
pub struct PostgresTransactionStore {
    pool: PgPool,
}

impl PostgresTransactionStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionStore for PostgresTransactionStore {
    async fn insert(
        &self,
        tx: &PaymentTransaction,
        audit: &AuditEntry,
    ) -> StoreResult<PaymentTransaction> {
        let mut db_tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            INSERT INTO transactions (
                id, reference, external_reference, client_id, amount, currency,
                provider, status, initiated_at, processed_at, expires_at,
                failure_reason, version, metadata
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(tx.id)
        .bind(&tx.reference)
        .bind(&tx.external_reference)
        .bind(tx.client_id)
        .bind(&tx.amount)
        .bind(&tx.currency)
        .bind(tx.provider.as_str())
        .bind(tx.status.as_str())
        .bind(tx.initiated_at)
        .bind(tx.processed_at)
        .bind(tx.expires_at)
        .bind(&tx.failure_reason)
        .bind(tx.version)
        .bind(&tx.metadata)
        .fetch_one(&mut *db_tx)
        .await?;

        insert_audit(&mut db_tx, audit).await?;
        db_tx.commit().await?;

        row.into_domain()
    }

    async fn get(&self, id: Uuid) -> StoreResult<PaymentTransaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound(format!("transaction {id}")))?
            .into_domain()
    }

    async fn get_by_external_reference(
        &self,
        provider: ProviderType,
        external_reference: &str,
    ) -> StoreResult<PaymentTransaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions WHERE provider = $1 AND external_reference = $2"
        ))
        .bind(provider.as_str())
        .bind(external_reference)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| {
            StoreError::NotFound(format!("transaction {provider}/{external_reference}"))
        })?
        .into_domain()
    }

    async fn apply_transition(
        &self,
        current: &PaymentTransaction,
        new_status: TransactionStatus,
        external_reference: Option<&str>,
        audit: &AuditEntry,
    ) -> StoreResult<Option<PaymentTransaction>> {
        let processed_at = if new_status == TransactionStatus::Processing {
            Some(Utc::now())
        } else {
            None
        };
        let failure_reason = match new_status {
            TransactionStatus::Failed
            | TransactionStatus::Cancelled
            | TransactionStatus::Expired => audit.reason.clone(),
            _ => None,
        };

        let mut db_tx = self.pool.begin().await?;

        // The version predicate is the whole concurrency story: if another
        // actor committed first, zero rows match and nothing is written.
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            r#"
            UPDATE transactions
            SET status = $1,
                processed_at = COALESCE(processed_at, $2),
                failure_reason = COALESCE($3, failure_reason),
                external_reference = COALESCE($4, external_reference),
                version = version + 1
            WHERE id = $5 AND version = $6
            RETURNING {TX_COLUMNS}
            "#
        ))
        .bind(new_status.as_str())
        .bind(processed_at)
        .bind(failure_reason)
        .bind(external_reference)
        .bind(current.id)
        .bind(current.version)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            db_tx.rollback().await?;
            return Ok(None);
        };

        insert_audit(&mut db_tx, audit).await?;
        db_tx.commit().await?;

        row.into_domain().map(Some)
    }

    async fn list_open(&self, limit: i64) -> StoreResult<Vec<PaymentTransaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TX_COLUMNS} FROM transactions \
             WHERE status IN {OPEN_STATUSES} ORDER BY initiated_at ASC LIMIT $1"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }

    async fn has_transition(
        &self,
        transaction_id: Uuid,
        actor: Actor,
        status: TransactionStatus,
    ) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM transaction_audit \
             WHERE transaction_id = $1 AND actor = $2 AND new_status = $3)",
        )
        .bind(transaction_id)
        .bind(actor.as_str())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }

    async fn audit_trail(&self, transaction_id: Uuid) -> StoreResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            "SELECT id, transaction_id, actor, old_status, new_status, reason, created_at \
             FROM transaction_audit WHERE transaction_id = $1 ORDER BY created_at ASC",
        )
        .bind(transaction_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(|r| r.into_domain()).collect()
    }
}

async fn insert_audit(
    db_tx: &mut sqlx::Transaction<'_, Postgres>,
    audit: &AuditEntry,
) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO transaction_audit (id, transaction_id, actor, old_status, new_status, reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(audit.id)
    .bind(audit.transaction_id)
    .bind(audit.actor.as_str())
    .bind(audit.old_status.map(|s| s.as_str()))
    .bind(audit.new_status.as_str())
    .bind(&audit.reason)
    .bind(audit.created_at)
    .execute(&mut **db_tx)
    .await?;

    Ok(())
}

/// Client directory backed by the clients table.
#[derive(Clone)]
pub struct PostgresClientDirectory {
    pool: PgPool,
}

impl PostgresClientDirectory {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ClientDirectory for PostgresClientDirectory {
    async fn exists(&self, client_id: Uuid) -> StoreResult<bool> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM clients WHERE id = $1)")
            .bind(client_id)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }
}

/// Advisory-lock key for the reconciliation sweep. Arbitrary but stable.
const SWEEP_LOCK_KEY: i64 = 0x5245_4D49_545F_5253;

/// Sweep lock on top of a Postgres session advisory lock, so exactly one
/// process runs a sweep at a time even when the service is scaled out.
/// The lock is session-scoped, so the holding connection is pinned until
/// release.
pub struct PostgresSweepLock {
    pool: PgPool,
    held: Mutex<Option<PoolConnection<Postgres>>>,
}

impl PostgresSweepLock {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            held: Mutex::new(None),
        }
    }
}

#[async_trait]
impl SweepLock for PostgresSweepLock {
    async fn try_acquire(&self) -> StoreResult<bool> {
        let mut held = self.held.lock().await;
        if held.is_some() {
            return Ok(false);
        }

        let mut conn = self.pool.acquire().await?;
        let acquired: bool = sqlx::query("SELECT pg_try_advisory_lock($1) AS locked")
            .bind(SWEEP_LOCK_KEY)
            .fetch_one(&mut *conn)
            .await?
            .get("locked");

        if acquired {
            *held = Some(conn);
        }
        Ok(acquired)
    }

    async fn release(&self) -> StoreResult<()> {
        let mut held = self.held.lock().await;
        if let Some(mut conn) = held.take() {
            sqlx::query("SELECT pg_advisory_unlock($1)")
                .bind(SWEEP_LOCK_KEY)
                .execute(&mut *conn)
                .await?;
        }
        Ok(())
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    reference: String,
    external_reference: Option<String>,
    client_id: Uuid,
    amount: bigdecimal::BigDecimal,
    currency: String,
    provider: String,
    status: String,
    initiated_at: chrono::DateTime<chrono::Utc>,
    processed_at: Option<chrono::DateTime<chrono::Utc>>,
    expires_at: chrono::DateTime<chrono::Utc>,
    failure_reason: Option<String>,
    version: i64,
    metadata: Option<serde_json::Value>,
}

impl TransactionRow {
    fn into_domain(self) -> StoreResult<PaymentTransaction> {
        let provider = ProviderType::parse(&self.provider)
            .ok_or_else(|| StoreError::Database(format!("unknown provider '{}'", self.provider)))?;
        let status = TransactionStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Database(format!("unknown status '{}'", self.status)))?;

        Ok(PaymentTransaction {
            id: self.id,
            reference: self.reference,
            external_reference: self.external_reference,
            client_id: self.client_id,
            amount: self.amount,
            currency: self.currency,
            provider,
            status,
            initiated_at: self.initiated_at,
            processed_at: self.processed_at,
            expires_at: self.expires_at,
            failure_reason: self.failure_reason,
            version: self.version,
            metadata: self.metadata,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    transaction_id: Uuid,
    actor: String,
    old_status: Option<String>,
    new_status: String,
    reason: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
}

impl AuditRow {
    fn into_domain(self) -> StoreResult<AuditEntry> {
        let actor = Actor::parse(&self.actor)
            .ok_or_else(|| StoreError::Database(format!("unknown actor '{}'", self.actor)))?;
        let old_status = match self.old_status {
            Some(raw) => Some(TransactionStatus::parse(&raw).ok_or_else(|| {
                StoreError::Database(format!("unknown status '{raw}' in audit"))
            })?),
            None => None,
        };
        let new_status = TransactionStatus::parse(&self.new_status).ok_or_else(|| {
            StoreError::Database(format!("unknown status '{}' in audit", self.new_status))
        })?;

        Ok(AuditEntry {
            id: self.id,
            transaction_id: self.transaction_id,
            actor,
            old_status,
            new_status,
            reason: self.reason,
            created_at: self.created_at,
        })
    }
}
