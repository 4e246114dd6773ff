//! Append-only, hash-chained message ledger.

pub mod hashing;
pub mod memory;
pub mod postgres;
pub mod store;
pub mod verifier;

pub use hashing::{compute_hash, GENESIS_HASH};
pub use memory::MemoryLedgerStore;
pub use postgres::PostgresLedgerStore;
pub use store::{LedgerStore, ReadOutcome, StoreError};
pub use verifier::verify_chain;
