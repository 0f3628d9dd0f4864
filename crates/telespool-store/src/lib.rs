// ABOUTME: Persistence layer for telespool, handling the append-only record log and its store.
// ABOUTME: Provides batched-durability appends, sequential best-effort reads, and space-usage queries.

pub mod fsync;
pub mod log;
pub mod store;

pub use log::{LogError, LogReader, LogWriter, PersistentLog, WriterStats};
pub use store::{EntryKind, SpoolStore, StoreEntry, StoreError, StoreUsage};
