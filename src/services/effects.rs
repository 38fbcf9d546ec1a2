//! Downstream side effects fired when a transaction reaches a terminal
//! state. Both are fire-and-forget from the gateway's point of view: their
//! failure is logged and never rolls back a committed transition.

use async_trait::async_trait;

use crate::domain::PaymentTransaction;

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn transaction_finalized(&self, tx: &PaymentTransaction) -> anyhow::Result<()>;
}

#[async_trait]
pub trait ReceiptGenerator: Send + Sync {
    /// Called at most once per transaction, on entering Completed.
    async fn issue(&self, tx: &PaymentTransaction) -> anyhow::Result<()>;
}

/// Default dispatcher: the real notification service consumes these log
/// lines via the platform's log pipeline.
#[derive(Default)]
pub struct LoggingNotifier;

#[async_trait]
impl NotificationDispatcher for LoggingNotifier {
    async fn transaction_finalized(&self, tx: &PaymentTransaction) -> anyhow::Result<()> {
        tracing::info!(
            transaction_id = %tx.id,
            status = %tx.status,
            client_id = %tx.client_id,
            "transaction finalized"
        );
        Ok(())
    }
}

#[derive(Default)]
pub struct LoggingReceipts;

#[async_trait]
impl ReceiptGenerator for LoggingReceipts {
    async fn issue(&self, tx: &PaymentTransaction) -> anyhow::Result<()> {
        tracing::info!(
            transaction_id = %tx.id,
            reference = %tx.reference,
            amount = %tx.amount,
            "receipt issued"
        );
        Ok(())
    }
}
