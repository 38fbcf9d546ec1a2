//! Provider capability boundary. One adapter per provider family, selected
//! through a registry lookup. Adapters never touch the transaction store;
//! they only return normalized results for the gateway to act on.

pub mod gateway;
pub mod wallet;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::domain::{PaymentTransaction, ProviderType, TransactionStatus};

pub use gateway::CardGatewayAdapter;
pub use wallet::WalletRailAdapter;

/// Normalized provider-side view of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl ProviderStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProviderStatus::Completed | ProviderStatus::Failed | ProviderStatus::Cancelled
        )
    }

    pub fn as_transaction_status(self) -> TransactionStatus {
        match self {
            ProviderStatus::Pending => TransactionStatus::Pending,
            ProviderStatus::Processing => TransactionStatus::Processing,
            ProviderStatus::Completed => TransactionStatus::Completed,
            ProviderStatus::Failed => TransactionStatus::Failed,
            ProviderStatus::Cancelled => TransactionStatus::Cancelled,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    /// Transient: timeout, connection refused, circuit open. Never treated
    /// as a payment failure.
    #[error("provider unreachable: {0}")]
    Unreachable(String),

    /// The provider answered with something we cannot interpret.
    #[error("provider protocol error: {0}")]
    Protocol(String),
}

/// Result of dispatching a transaction to the rail.
#[derive(Debug, Clone)]
pub struct DispatchOutcome {
    pub external_reference: String,
    pub status: ProviderStatus,
}

#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    /// Whether the reconciler may poll this adapter directly.
    fn supports_polling(&self) -> bool;

    /// Push the transaction onto the rail. Returns the provider-assigned
    /// external reference.
    async fn dispatch(&self, tx: &PaymentTransaction) -> Result<DispatchOutcome, ProviderError>;

    async fn check_status(
        &self,
        external_reference: &str,
    ) -> Result<ProviderStatus, ProviderError>;
}

/// Lookup table from provider type to its adapter.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    adapters: HashMap<ProviderType, Arc<dyn ProviderAdapter>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.insert(adapter.provider_type(), adapter);
        self
    }

    pub fn get(&self, provider: ProviderType) -> Option<Arc<dyn ProviderAdapter>> {
        self.adapters.get(&provider).cloned()
    }
}
