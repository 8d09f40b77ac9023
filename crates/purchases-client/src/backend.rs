//! Composition of coalescer, dispatcher, conditional cache and classifier.

use purchases_cache::ConditionalCacheStore;
use purchases_coalesce::{CallbackCoalescer, DispatchDelay, OperationDispatcher};
use purchases_core::{
    ClassifiedResult, HttpRequest, RequestError, RequestSignature, ResponseClassifier, Transport,
    TransportError,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, Instrument};

/// What every coalesced caller receives before decoding into its own type.
type SharedResult = ClassifiedResult<Value>;

#[derive(Clone)]
pub struct Backend {
    transport: Arc<dyn Transport>,
    cache: Arc<ConditionalCacheStore>,
    coalescer: CallbackCoalescer<SharedResult>,
    dispatcher: OperationDispatcher,
    caching: bool,
}

impl Backend {
    pub fn new(
        transport: Arc<dyn Transport>,
        cache: Arc<ConditionalCacheStore>,
        dispatcher: OperationDispatcher,
    ) -> Self {
        Self {
            transport,
            cache,
            coalescer: CallbackCoalescer::new(),
            dispatcher,
            caching: true,
        }
    }

    /// Turn validation-tag caching off for every request, regardless of
    /// what individual operations ask for.
    pub fn with_caching(mut self, enabled: bool) -> Self {
        self.caching = enabled;
        self
    }

    /// Perform `signature` and decode the result as `T`.
    ///
    /// Identical signatures in flight share one exchange. `use_cache`
    /// enables validation-tag revalidation; when callers sharing an exchange
    /// disagree, the one that started it decides. Must be called from
    /// within a tokio runtime.
    pub async fn request<T: DeserializeOwned>(
        &self,
        signature: RequestSignature,
        use_cache: bool,
        delay: DispatchDelay,
    ) -> ClassifiedResult<T> {
        let payload = self.request_value(signature, use_cache, delay).await?;
        ResponseClassifier::decode(payload)
    }

    /// Like [`request`](Self::request) without typed decoding.
    pub async fn request_value(
        &self,
        signature: RequestSignature,
        use_cache: bool,
        delay: DispatchDelay,
    ) -> ClassifiedResult<Value> {
        let use_cache = use_cache && self.caching;
        let (exchange, waiter) = self.coalescer.register(&signature).into_parts();

        if exchange.is_none() && delay == DispatchDelay::None {
            // Joined a background refresh that may still be sleeping.
            waiter.expedite();
        }

        if let Some(exchange) = exchange {
            let transport = Arc::clone(&self.transport);
            let cache = Arc::clone(&self.cache);
            let span = tracing::debug_span!("exchange", %signature, use_cache);
            self.dispatcher.dispatch(exchange, delay, move || {
                async move { perform(transport.as_ref(), &cache, &signature, use_cache).await }
                    .instrument(span)
            });
        }

        waiter
            .wait()
            .await
            .unwrap_or_else(|_| Err(RequestError::Network(TransportError::Abandoned)))
    }

    pub fn cache(&self) -> &ConditionalCacheStore {
        &self.cache
    }

    pub fn in_flight_count(&self) -> usize {
        self.coalescer.in_flight_count()
    }

    pub fn is_in_flight(&self, signature: &RequestSignature) -> bool {
        self.coalescer.is_in_flight(signature)
    }
}

async fn perform(
    transport: &dyn Transport,
    cache: &ConditionalCacheStore,
    signature: &RequestSignature,
    use_cache: bool,
) -> SharedResult {
    let mut request = HttpRequest::from_signature(signature);
    if use_cache {
        request = cache.attach(signature, request);
    }
    debug!(tag = ?request.validation_tag(), "sending request");

    let outcome = transport.exchange(request).await;
    let outcome = if use_cache {
        cache.record_outcome(signature, outcome)
    } else {
        outcome
    };

    match &outcome {
        Ok(response) => debug!(status = %response.status, "exchange finished"),
        Err(e) => debug!(error = %e, "exchange failed"),
    }
    ResponseClassifier::classify(outcome)
}
