//! Ledger module
//!
//! Account balances plus the participant side of two-phase commit.

mod locks;
mod memory;
mod postgres;
mod service;
mod store;

pub use locks::AccountLocks;
pub use memory::MemoryLedgerStore;
pub use postgres::PgLedgerStore;
pub use service::{LedgerError, LedgerService};
pub use store::LedgerStore;
