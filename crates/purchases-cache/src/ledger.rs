//! Transactions the server has already acknowledged.
//!
//! Persisted as a JSON array of identifiers under a single key. Only a
//! successful post (or a finishable backend rejection) marks an identifier;
//! the set is cleared wholesale on logout.

use parking_lot::Mutex;
use purchases_core::store::{load_json, save_json};
use purchases_core::{KeyValueStore, StoreError};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const SYNCED_TRANSACTIONS_KEY: &str = "synced_transactions";

pub struct SyncedTransactionLedger {
    store: Arc<dyn KeyValueStore>,
    synced: Mutex<BTreeSet<String>>,
}

impl SyncedTransactionLedger {
    /// Open the ledger, loading any previously persisted identifiers.
    ///
    /// An unreadable value starts the ledger empty; the next mark
    /// overwrites it.
    pub fn open(store: Arc<dyn KeyValueStore>) -> Self {
        let synced: BTreeSet<String> =
            match load_json::<Vec<String>>(store.as_ref(), SYNCED_TRANSACTIONS_KEY) {
                Ok(ids) => ids.unwrap_or_default().into_iter().collect(),
                Err(e) => {
                    warn!(error = %e, "unreadable synced transaction ledger; starting empty");
                    BTreeSet::new()
                }
            };
        debug!(count = synced.len(), "loaded synced transaction ledger");

        Self {
            store,
            synced: Mutex::new(synced),
        }
    }

    /// Record `id` as acknowledged. Returns whether it was new; marking an
    /// already-synced identifier does not touch the store.
    pub fn mark_synced(&self, id: &str) -> Result<bool, StoreError> {
        self.mark_all_synced([id]).map(|added| added > 0)
    }

    /// Record several identifiers with a single write. Returns how many
    /// were new.
    pub fn mark_all_synced<'a, I>(&self, ids: I) -> Result<usize, StoreError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut synced = self.synced.lock();
        let added: Vec<String> = ids
            .into_iter()
            .filter(|id| synced.insert(id.to_string()))
            .map(str::to_string)
            .collect();

        if added.is_empty() {
            return Ok(0);
        }

        if let Err(e) = persist(self.store.as_ref(), &synced) {
            for id in &added {
                synced.remove(id);
            }
            return Err(e);
        }

        debug!(added = added.len(), total = synced.len(), "marked transactions synced");
        Ok(added.len())
    }

    pub fn is_synced(&self, id: &str) -> bool {
        self.synced.lock().contains(id)
    }

    /// The subset of `ids` not yet synced, in input order.
    pub fn filter_unsynced<S: AsRef<str> + Clone>(&self, ids: &[S]) -> Vec<S> {
        self.filter_unsynced_by(ids.to_vec(), |id| id.as_ref())
    }

    /// Like [`filter_unsynced`](Self::filter_unsynced) for arbitrary
    /// transaction records, keyed by `id_of`.
    pub fn filter_unsynced_by<T, F>(&self, items: Vec<T>, id_of: F) -> Vec<T>
    where
        F: Fn(&T) -> &str,
    {
        let synced = self.synced.lock();
        items
            .into_iter()
            .filter(|item| !synced.contains(id_of(item)))
            .collect()
    }

    /// Every synced identifier, sorted.
    pub fn synced_ids(&self) -> Vec<String> {
        self.synced.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.synced.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.synced.lock().is_empty()
    }

    /// Forget every identifier. Used on logout.
    pub fn reset(&self) -> Result<(), StoreError> {
        let mut synced = self.synced.lock();
        self.store.remove(SYNCED_TRANSACTIONS_KEY)?;
        let cleared = synced.len();
        synced.clear();
        info!(cleared, "synced transaction ledger reset");
        Ok(())
    }
}

fn persist(store: &dyn KeyValueStore, synced: &BTreeSet<String>) -> Result<(), StoreError> {
    let ids: Vec<&String> = synced.iter().collect();
    save_json(store, SYNCED_TRANSACTIONS_KEY, &ids)
}
