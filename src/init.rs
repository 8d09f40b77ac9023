use anyhow::{Context, Result};
use purchases_cache::{ConditionalCacheStore, FileStore, SyncedTransactionLedger};
use purchases_client::{Backend, HttpTransport, PurchasesClient};
use purchases_coalesce::{DispatchConfig, OperationDispatcher};
use purchases_config::{BackendConfig, LogFormat};
use purchases_core::{KeyValueStore, MemoryStore, SystemClock, Transport};
use std::sync::Arc;
use tracing::{debug, info};

/// Initialize tracing/logging from BackendConfig
///
/// Logs go to stderr; stdout is reserved for command output.
pub fn init_tracing(config: &BackendConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    let registry = tracing_subscriber::registry().with(env_filter);

    // Ignore the error if a subscriber is already set
    let _ = match config.logging.format {
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_writer(std::io::stderr)),
        ),
        LogFormat::Text => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().with_writer(std::io::stderr)),
        ),
    };
}

/// Open the persistent store shared by the cache and the ledger.
pub fn open_state_store(config: &BackendConfig) -> Result<Arc<dyn KeyValueStore>> {
    match &config.cache.state_dir {
        Some(dir) => {
            let store = FileStore::open(dir)
                .with_context(|| format!("Failed to open state directory {}", dir.display()))?;
            info!(state_dir = %dir.display(), "using file-backed state store");
            Ok(Arc::new(store))
        }
        None => {
            debug!("no state_dir configured; state lives in memory");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}

pub fn dispatch_config(config: &BackendConfig) -> DispatchConfig {
    DispatchConfig {
        max_concurrent_exchanges: config.dispatch.max_concurrent_exchanges,
        jitter_default_max: config.dispatch.jitter_default_max(),
        jitter_long_max: config.dispatch.jitter_long_max(),
    }
}

/// Build a client that talks to `config.api.base_url` over HTTP.
pub fn build_client(config: &BackendConfig) -> Result<PurchasesClient> {
    let transport = HttpTransport::new(
        &config.api.base_url,
        config.api.api_key.clone(),
        config.api.timeout(),
        &config.api.user_agent,
    )
    .context("Failed to build HTTP client")?;

    build_client_with_transport(config, Arc::new(transport))
}

/// Build a client around an arbitrary transport.
pub fn build_client_with_transport(
    config: &BackendConfig,
    transport: Arc<dyn Transport>,
) -> Result<PurchasesClient> {
    let store = open_state_store(config)?;
    let ledger = SyncedTransactionLedger::open(Arc::clone(&store));
    let cache = ConditionalCacheStore::new(store, Arc::new(SystemClock));
    let dispatcher = OperationDispatcher::new(dispatch_config(config));

    info!(
        base_url = %config.api.base_url,
        caching = config.cache.enabled,
        max_concurrent_exchanges = config.dispatch.max_concurrent_exchanges,
        synced_transactions = ledger.len(),
        "purchases client ready"
    );

    let backend =
        Backend::new(transport, Arc::new(cache), dispatcher).with_caching(config.cache.enabled);
    Ok(PurchasesClient::new(backend, Arc::new(ledger)))
}
