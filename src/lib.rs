// purchases-backend - Request layer for a purchase-management backend
//
// The library side wires a BackendConfig into a ready PurchasesClient:
// - State store: files under cache.state_dir, or memory when unset
// - Conditional cache and synced-transaction ledger share that store
// - Dispatcher limits come from the [dispatch] section
// - reqwest transport built from the [api] section
//
// The binary in main.rs is a thin CLI over these pieces.

mod init;

pub use init::{
    build_client, build_client_with_transport, dispatch_config, init_tracing, open_state_store,
};

pub use purchases_cache::{ConditionalCacheStore, FileStore, SyncedTransactionLedger};
pub use purchases_client::{
    Backend, CustomerInfoResponse, HttpTransport, OfferingsResponse, PostReceiptData,
    PostReceiptOutcome, ProductsEntitlementsResponse, PurchasesClient, SubscriberAttribute,
};
pub use purchases_coalesce::{DispatchConfig, DispatchDelay, OperationDispatcher};
pub use purchases_config::{BackendConfig, LogFormat};
pub use purchases_core::{
    BackendError, BackendErrorCode, ClassifiedResult, RequestError, RequestSignature, Transport,
};
