//! Conditional-cache revalidation via opaque validation tags.
//!
//! Before an exchange the last known tag for the signature is attached so
//! the server may answer "not modified". After the exchange the outcome is
//! reconciled with the stored entry:
//!
//! - 304 with an entry: the stored body is replayed as a 200
//! - 2xx with a tag and a JSON body: the entry is replaced
//! - anything else: the entry is left alone (failed refreshes never evict)
//!
//! Tags are compared byte-for-byte and carry no ordering.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use purchases_core::http::VALIDATION_TAG_REQUEST_HEADER;
use purchases_core::store::{load_json, save_json};
use purchases_core::{
    Clock, ExchangeOutcome, HttpRequest, HttpResponse, HttpStatus, KeyValueStore,
    RequestSignature,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Namespace for persisted entries in the key-value store.
pub const CACHE_KEY_PREFIX: &str = "etag.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub validation_tag: String,
    /// Last successful response body, verbatim.
    pub stored_body: String,
    pub last_refreshed: DateTime<Utc>,
}

pub struct ConditionalCacheStore {
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl ConditionalCacheStore {
    pub fn new(store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Current entry for `signature`, reading through to the persistent
    /// store on first access.
    pub fn entry(&self, signature: &RequestSignature) -> Option<CacheEntry> {
        let key = storage_key(signature);
        let mut entries = self.entries.lock();
        self.load_locked(&mut entries, &key)
    }

    /// Validation tag to send with the next exchange, if one is known.
    pub fn prepare_request(&self, signature: &RequestSignature) -> Option<String> {
        self.entry(signature).map(|entry| entry.validation_tag)
    }

    /// Attach the known validation tag to an outgoing request.
    pub fn attach(&self, signature: &RequestSignature, request: HttpRequest) -> HttpRequest {
        match self.prepare_request(signature) {
            Some(tag) => request.with_header(VALIDATION_TAG_REQUEST_HEADER, tag),
            None => request,
        }
    }

    /// Reconcile an exchange outcome with the stored entry and return the
    /// outcome the classifier should see.
    pub fn record_outcome(
        &self,
        signature: &RequestSignature,
        outcome: ExchangeOutcome,
    ) -> ExchangeOutcome {
        let response = outcome?;

        if response.status.is_not_modified() {
            return Ok(self.resolve_not_modified(signature, response));
        }

        if response.status.is_successful() {
            if let Some(tag) = &response.validation_tag {
                self.store_response(signature, tag, &response);
            }
        }

        Ok(response)
    }

    /// Drop the entry so the next request is a full, unconditional fetch.
    pub fn invalidate(&self, signature: &RequestSignature) {
        let key = storage_key(signature);
        let mut entries = self.entries.lock();
        entries.remove(&key);
        if let Err(e) = self.store.remove(&key) {
            warn!(cache_key = %key, error = %e, "failed to remove persisted cache entry");
        }
        debug!(cache_key = %key, "cache entry invalidated");
    }

    /// Drop every entry, e.g. when the user identity changes.
    pub fn clear(&self) {
        let mut entries = self.entries.lock();
        entries.clear();
        match self.store.keys_with_prefix(CACHE_KEY_PREFIX) {
            Ok(keys) => {
                for key in keys {
                    if let Err(e) = self.store.remove(&key) {
                        warn!(cache_key = %key, error = %e, "failed to remove persisted cache entry");
                    }
                }
            }
            Err(e) => warn!(error = %e, "failed to list persisted cache entries"),
        }
    }

    fn resolve_not_modified(
        &self,
        signature: &RequestSignature,
        response: HttpResponse,
    ) -> HttpResponse {
        let key = storage_key(signature);
        let mut entries = self.entries.lock();
        let Some(mut entry) = self.load_locked(&mut entries, &key) else {
            drop(entries);
            // Nothing to replay; make sure the next request is unconditional.
            warn!(%signature, "not modified received without a stored entry");
            self.invalidate(signature);
            return response;
        };

        entry.last_refreshed = self.clock.now();
        debug!(%signature, tag = %entry.validation_tag, "validation tag unchanged; replaying stored body");
        self.put_locked(&mut entries, key, entry.clone());
        drop(entries);

        HttpResponse {
            status: HttpStatus::OK,
            validation_tag: Some(entry.validation_tag),
            body: entry.stored_body.into_bytes(),
        }
    }

    fn store_response(&self, signature: &RequestSignature, tag: &str, response: &HttpResponse) {
        let Ok(body) = std::str::from_utf8(&response.body) else {
            return;
        };
        if serde_json::from_str::<serde::de::IgnoredAny>(body).is_err() {
            // Never cache a body the classifier is about to reject.
            return;
        }

        let entry = CacheEntry {
            validation_tag: tag.to_string(),
            stored_body: body.to_string(),
            last_refreshed: self.clock.now(),
        };
        debug!(%signature, tag = %tag, "storing cache entry");
        self.put(signature, entry);
    }

    fn put(&self, signature: &RequestSignature, entry: CacheEntry) {
        let key = storage_key(signature);
        let mut entries = self.entries.lock();
        self.put_locked(&mut entries, key, entry);
    }

    // The helpers below run with `entries` held so the memory map and the
    // persistent store change together with respect to invalidation.

    fn load_locked(
        &self,
        entries: &mut HashMap<String, CacheEntry>,
        key: &str,
    ) -> Option<CacheEntry> {
        if let Some(entry) = entries.get(key) {
            return Some(entry.clone());
        }

        let loaded = match load_json::<CacheEntry>(self.store.as_ref(), key) {
            Ok(loaded) => loaded?,
            Err(e) => {
                warn!(cache_key = %key, error = %e, "ignoring unreadable cache entry");
                return None;
            }
        };
        entries.insert(key.to_string(), loaded.clone());
        Some(loaded)
    }

    fn put_locked(
        &self,
        entries: &mut HashMap<String, CacheEntry>,
        key: String,
        entry: CacheEntry,
    ) {
        if let Err(e) = save_json(self.store.as_ref(), &key, &entry) {
            warn!(cache_key = %key, error = %e, "failed to persist cache entry");
        }
        entries.insert(key, entry);
    }
}

fn storage_key(signature: &RequestSignature) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, signature.cache_key())
}
