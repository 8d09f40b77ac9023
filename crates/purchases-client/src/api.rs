//! Endpoint operations built on [`Backend::request`].

use crate::backend::Backend;
use crate::responses::{CustomerInfoResponse, OfferingsResponse, ProductsEntitlementsResponse};
use base64::Engine;
use purchases_cache::SyncedTransactionLedger;
use purchases_coalesce::DispatchDelay;
use purchases_core::{ClassifiedResult, RequestError, RequestSignature};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A receipt upload.
#[derive(Debug, Clone, Default)]
pub struct PostReceiptData {
    pub app_user_id: String,
    /// Raw receipt bytes; sent base64-encoded.
    pub receipt: Vec<u8>,
    /// Locally known transactions the receipt covers.
    pub transaction_ids: Vec<String>,
    pub product_ids: Vec<String>,
    pub is_restore: bool,
    pub presented_offering_identifier: Option<String>,
}

impl PostReceiptData {
    /// A restore, or a post that names no transactions, is sent even when
    /// the ledger has nothing new.
    fn is_receipt_only(&self) -> bool {
        self.is_restore || self.transaction_ids.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PostReceiptOutcome {
    Posted(Box<CustomerInfoResponse>),
    /// Every transaction was already acknowledged; nothing was sent.
    AlreadySynced,
}

#[derive(Debug, Serialize)]
struct ReceiptBody<'a> {
    fetch_token: String,
    app_user_id: &'a str,
    is_restore: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    product_ids: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    transaction_ids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presented_offering_identifier: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubscriberAttribute {
    /// `None` clears the attribute on the server.
    pub value: Option<String>,
    pub updated_at_ms: i64,
}

#[derive(Debug, Serialize)]
struct AttributesBody<'a> {
    attributes: &'a BTreeMap<String, SubscriberAttribute>,
}

#[derive(Clone)]
pub struct PurchasesClient {
    backend: Backend,
    ledger: Arc<SyncedTransactionLedger>,
}

impl PurchasesClient {
    pub fn new(backend: Backend, ledger: Arc<SyncedTransactionLedger>) -> Self {
        Self { backend, ledger }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn ledger(&self) -> &SyncedTransactionLedger {
        &self.ledger
    }

    pub async fn get_offerings(
        &self,
        app_user_id: &str,
        delay: DispatchDelay,
    ) -> ClassifiedResult<OfferingsResponse> {
        self.backend
            .request(offerings_signature(app_user_id), true, delay)
            .await
    }

    pub async fn get_customer_info(
        &self,
        app_user_id: &str,
        delay: DispatchDelay,
    ) -> ClassifiedResult<CustomerInfoResponse> {
        self.backend
            .request(customer_signature(app_user_id), true, delay)
            .await
    }

    pub async fn get_products_entitlements(
        &self,
        delay: DispatchDelay,
    ) -> ClassifiedResult<ProductsEntitlementsResponse> {
        self.backend
            .request(
                RequestSignature::get("/products_entitlement_mapping"),
                true,
                delay,
            )
            .await
    }

    /// Upload a receipt for the transactions the server has not seen yet.
    ///
    /// Never delayed and never cached. Transactions are recorded in the
    /// ledger after a success, or after a rejection that still lets them be
    /// finished.
    pub async fn post_receipt(&self, data: PostReceiptData) -> ClassifiedResult<PostReceiptOutcome> {
        let unsynced = self.ledger.filter_unsynced(&data.transaction_ids);
        if unsynced.is_empty() && !data.is_receipt_only() {
            debug!(
                app_user_id = %data.app_user_id,
                transactions = data.transaction_ids.len(),
                "all transactions already synced; skipping receipt post"
            );
            return Ok(PostReceiptOutcome::AlreadySynced);
        }

        let body = ReceiptBody {
            fetch_token: base64::engine::general_purpose::STANDARD.encode(&data.receipt),
            app_user_id: &data.app_user_id,
            is_restore: data.is_restore,
            product_ids: data.product_ids.clone(),
            transaction_ids: unsynced.clone(),
            presented_offering_identifier: data.presented_offering_identifier.as_deref(),
        };
        let signature = RequestSignature::post("/receipts", &body)
            .map_err(|e| RequestError::malformed(format!("unencodable receipt body: {e}"), ""))?;

        let result = self
            .backend
            .request::<CustomerInfoResponse>(signature, false, DispatchDelay::None)
            .await;

        let finishable = match &result {
            Ok(_) => true,
            Err(e) => e.finishable(),
        };
        if finishable {
            self.record_synced(&unsynced);
        }

        match result {
            Ok(info) => {
                info!(
                    app_user_id = %data.app_user_id,
                    transactions = unsynced.len(),
                    "receipt posted"
                );
                Ok(PostReceiptOutcome::Posted(Box::new(info)))
            }
            Err(e) => {
                warn!(
                    app_user_id = %data.app_user_id,
                    error_type = e.error_type(),
                    error = %e,
                    finishable,
                    "receipt post failed"
                );
                Err(e)
            }
        }
    }

    /// Send attribute changes. Nothing is sent when there are none.
    pub async fn post_subscriber_attributes(
        &self,
        app_user_id: &str,
        attributes: &BTreeMap<String, SubscriberAttribute>,
    ) -> ClassifiedResult<()> {
        if attributes.is_empty() {
            return Ok(());
        }

        let path = format!("/subscribers/{}/attributes", urlencoding::encode(app_user_id));
        let signature = RequestSignature::post(path, &AttributesBody { attributes })
            .map_err(|e| RequestError::malformed(format!("unencodable attributes body: {e}"), ""))?;

        self.backend
            .request::<Value>(signature, false, DispatchDelay::None)
            .await
            .map(|_| ())
    }

    /// Forget cached responses for one user so the next fetch is unconditional.
    pub fn invalidate_customer_cache(&self, app_user_id: &str) {
        self.backend.cache().invalidate(&customer_signature(app_user_id));
        self.backend.cache().invalidate(&offerings_signature(app_user_id));
    }

    /// Forget every cached response, e.g. after the user identity changes.
    pub fn clear_caches(&self) {
        self.backend.cache().clear();
    }

    fn record_synced(&self, ids: &[String]) {
        if ids.is_empty() {
            return;
        }
        if let Err(e) = self.ledger.mark_all_synced(ids.iter().map(String::as_str)) {
            warn!(error = %e, "failed to record synced transactions");
        }
    }
}

fn customer_signature(app_user_id: &str) -> RequestSignature {
    RequestSignature::get(format!("/subscribers/{}", urlencoding::encode(app_user_id)))
}

fn offerings_signature(app_user_id: &str) -> RequestSignature {
    RequestSignature::get(format!(
        "/subscribers/{}/offerings",
        urlencoding::encode(app_user_id)
    ))
}
