//! Persisted client-side state for the request layer.
//!
//! - [`ConditionalCacheStore`]: last validation tag and body per request signature
//! - [`SyncedTransactionLedger`]: transactions the server already acknowledged
//! - [`FileStore`]: directory-backed [`KeyValueStore`](purchases_core::KeyValueStore)

pub mod etag;
pub mod file_store;
pub mod ledger;

pub use etag::{CacheEntry, ConditionalCacheStore};
pub use file_store::FileStore;
pub use ledger::SyncedTransactionLedger;
