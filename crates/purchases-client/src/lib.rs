//! The purchases backend request layer.
//!
//! [`Backend::request`] is the single entry point: it coalesces identical
//! requests, revalidates cached responses, runs the exchange on the
//! dispatcher and classifies the outcome. [`PurchasesClient`] builds the
//! endpoint operations on top of it.

pub mod api;
pub mod backend;
pub mod http;
pub mod responses;

pub use api::{PostReceiptData, PostReceiptOutcome, PurchasesClient, SubscriberAttribute};
pub use backend::Backend;
pub use http::HttpTransport;
pub use responses::{CustomerInfoResponse, OfferingsResponse, ProductsEntitlementsResponse};
