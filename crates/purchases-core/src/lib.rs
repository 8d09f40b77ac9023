// purchases-core - Shared types for the purchases backend request layer
//
// Everything here is runtime-agnostic: no tokio, no HTTP client. The
// client crate composes these pieces with the cache and coalescing crates.
//
// - signature: structural identity of a logical request
// - http: status codes, outgoing requests, transport responses
// - transport: the exchange collaborator and its failure modes
// - error: the classified error taxonomy delivered to callers
// - classify: raw outcome -> typed payload or typed error
// - store: persistent key-value collaborator
// - date: clock and lenient timestamp decoding

pub mod classify;
pub mod date;
pub mod error;
pub mod http;
pub mod signature;
pub mod store;
pub mod transport;

pub use classify::ResponseClassifier;
pub use date::{Clock, FixedClock, SystemClock};
pub use error::{BackendError, BackendErrorCode, ClassifiedResult, RequestError};
pub use http::{ExchangeOutcome, HttpRequest, HttpResponse, HttpStatus};
pub use signature::{HttpMethod, RequestSignature};
pub use store::{KeyValueStore, MemoryStore, StoreError};
pub use transport::{Transport, TransportError};
