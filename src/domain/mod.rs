pub mod transaction;

pub use transaction::{
    Actor, AuditEntry, PaymentTransaction, ProviderType, TransactionStatus,
};
