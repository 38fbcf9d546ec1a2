pub mod memory;
pub mod postgres_store;

pub use memory::{InMemoryClientDirectory, InMemorySweepLock, InMemoryTransactionStore};
pub use postgres_store::{PostgresClientDirectory, PostgresSweepLock, PostgresTransactionStore};
