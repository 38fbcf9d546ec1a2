//! Transaction domain entity and its state machine.
//! Framework-agnostic representation of a gateway payment transaction.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a payment transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Initiated,
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Expired,
}

impl TransactionStatus {
    /// The full transition graph, one row per source state. Every legality
    /// check in the system goes through this table.
    pub fn legal_next(self) -> &'static [TransactionStatus] {
        use TransactionStatus::*;
        match self {
            Initiated => &[Processing, Expired],
            Pending => &[Processing, Completed, Failed, Cancelled, Expired],
            Processing => &[Completed, Failed, Cancelled, Expired],
            Completed | Failed | Cancelled | Expired => &[],
        }
    }

    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        self.legal_next().contains(&next)
    }

    pub fn is_terminal(self) -> bool {
        self.legal_next().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Initiated => "initiated",
            TransactionStatus::Pending => "pending",
            TransactionStatus::Processing => "processing",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
            TransactionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<TransactionStatus> {
        match s {
            "initiated" => Some(TransactionStatus::Initiated),
            "pending" => Some(TransactionStatus::Pending),
            "processing" => Some(TransactionStatus::Processing),
            "completed" => Some(TransactionStatus::Completed),
            "failed" => Some(TransactionStatus::Failed),
            "cancelled" => Some(TransactionStatus::Cancelled),
            "expired" => Some(TransactionStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The closed set of payment rails we integrate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    MtnMomo,
    AirtelMoney,
    CardGateway,
}

impl ProviderType {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderType::MtnMomo => "mtn_momo",
            ProviderType::AirtelMoney => "airtel_money",
            ProviderType::CardGateway => "card_gateway",
        }
    }

    pub fn parse(s: &str) -> Option<ProviderType> {
        match s {
            "mtn_momo" => Some(ProviderType::MtnMomo),
            "airtel_money" => Some(ProviderType::AirtelMoney),
            "card_gateway" => Some(ProviderType::CardGateway),
            _ => None,
        }
    }

    pub const ALL: [ProviderType; 3] = [
        ProviderType::MtnMomo,
        ProviderType::AirtelMoney,
        ProviderType::CardGateway,
    ];
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which actor class drove a status change. Recorded on every audit entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    Webhook,
    Scheduler,
    System,
}

impl Actor {
    pub fn as_str(self) -> &'static str {
        match self {
            Actor::User => "user",
            Actor::Webhook => "webhook",
            Actor::Scheduler => "scheduler",
            Actor::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Actor> {
        match s {
            "user" => Some(Actor::User),
            "webhook" => Some(Actor::Webhook),
            "scheduler" => Some(Actor::Scheduler),
            "system" => Some(Actor::System),
            _ => None,
        }
    }
}

/// Domain entity representing one attempt to move money through a rail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentTransaction {
    pub id: Uuid,
    /// Caller-facing idempotency key for the interactive flow.
    pub reference: String,
    /// Assigned by the provider once it acknowledges the dispatch.
    pub external_reference: Option<String>,
    pub client_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub provider: ProviderType,
    pub status: TransactionStatus,
    pub initiated_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub expires_at: DateTime<Utc>,
    pub failure_reason: Option<String>,
    /// Optimistic concurrency token, bumped on every committed write.
    pub version: i64,
    pub metadata: Option<serde_json::Value>,
}

impl PaymentTransaction {
    pub fn new(
        client_id: Uuid,
        amount: BigDecimal,
        currency: String,
        provider: ProviderType,
        session_window: Duration,
        metadata: Option<serde_json::Value>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            reference: format!("TXN-{}", Uuid::new_v4().simple()),
            external_reference: None,
            client_id,
            amount,
            currency,
            provider,
            status: TransactionStatus::Initiated,
            initiated_at: now,
            processed_at: None,
            expires_at: now + session_window,
            failure_reason: None,
            version: 0,
            metadata,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// One append-only record per status change. Never mutated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub actor: Actor,
    pub old_status: Option<TransactionStatus>,
    pub new_status: TransactionStatus,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        transaction_id: Uuid,
        actor: Actor,
        old_status: Option<TransactionStatus>,
        new_status: TransactionStatus,
        reason: Option<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            actor,
            old_status,
            new_status,
            reason,
            created_at: Utc::now(),
        }
    }
}
