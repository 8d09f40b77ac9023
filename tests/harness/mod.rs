//! Test harness for request-layer integration tests
//!
//! Provides a scripted in-process transport in place of the HTTP one:
//! - Responses are queued and handed out in order
//! - Every exchange is counted and its request recorded
//! - A gate can hold all exchanges until released, so callers can pile
//!   up on one in-flight operation
//!
//! Clients are built through the same wiring the binary uses.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use purchases_backend::{BackendConfig, PurchasesClient};
use purchases_core::{ExchangeOutcome, HttpRequest, HttpResponse, Transport, TransportError};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub struct MockTransport {
    script: Mutex<VecDeque<ExchangeOutcome>>,
    requests: Mutex<Vec<HttpRequest>>,
    calls: AtomicUsize,
    gate: watch::Sender<bool>,
}

impl MockTransport {
    /// A transport whose exchanges complete immediately.
    pub fn new() -> Arc<Self> {
        let (gate, _) = watch::channel(true);
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            gate,
        })
    }

    /// A transport whose exchanges wait for [`release`](Self::release).
    pub fn held() -> Arc<Self> {
        let transport = Self::new();
        transport.hold();
        transport
    }

    pub fn respond(&self, outcome: ExchangeOutcome) -> &Self {
        self.script.lock().push_back(outcome);
        self
    }

    pub fn respond_json(&self, status: u16, body: serde_json::Value) -> &Self {
        self.respond(Ok(HttpResponse::new(status, body.to_string())))
    }

    pub fn hold(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Wait until `n` exchanges have started.
    pub async fn wait_for_calls(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.calls() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("exchanges did not start in time");
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn exchange(&self, request: HttpRequest) -> ExchangeOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request);

        let mut gate = self.gate.subscribe();
        if gate.wait_for(|open| *open).await.is_err() {
            return Err(TransportError::Abandoned);
        }

        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Other("no scripted response".to_string())))
    }
}

/// Configuration with jitter disabled and state kept in memory.
pub fn test_config() -> BackendConfig {
    let mut config = BackendConfig::default();
    config.dispatch.jitter_default_max_ms = 0;
    config.dispatch.jitter_long_max_ms = 0;
    config
}

/// Same as [`test_config`] with state persisted under `dir`.
pub fn persistent_config(dir: &Path) -> BackendConfig {
    let mut config = test_config();
    config.cache.state_dir = Some(dir.to_path_buf());
    config
}

pub fn client(config: &BackendConfig, transport: &Arc<MockTransport>) -> PurchasesClient {
    let transport: Arc<dyn Transport> = transport.clone();
    purchases_backend::build_client_with_transport(config, transport)
        .expect("client should build from test config")
}
