//! Transfer coordinator
//!
//! Owns no balances: it talks to the ledger through a `LedgerClient` and
//! keeps only the saga log and the transfer history.

mod client;
mod postgres;
mod service;
mod store;
mod worker;

pub use client::{ClientError, HttpLedgerClient, LedgerClient, LocalLedgerClient, PrepareRequest};
pub use postgres::PgTransferStore;
pub use service::{CoordinatorConfig, TransferCoordinator, TransferError};
pub use store::{MemoryTransferStore, TransferStore};
pub use worker::{RecoveryWorker, WorkerConfig};
