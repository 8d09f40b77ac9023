//! The network collaborator.
//!
//! Implementations perform exactly one exchange per call and never retry;
//! retry policy belongs to whoever called the request layer.

use crate::http::{ExchangeOutcome, HttpRequest};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// Failure before any response reached the client.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("could not connect to server: {0}")]
    Connect(String),

    /// The in-flight exchange was dropped before producing an outcome.
    #[error("exchange abandoned before completion")]
    Abandoned,

    #[error("transport failure: {0}")]
    Other(String),
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn exchange(&self, request: HttpRequest) -> ExchangeOutcome;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Arc<T> {
    async fn exchange(&self, request: HttpRequest) -> ExchangeOutcome {
        (**self).exchange(request).await
    }
}
