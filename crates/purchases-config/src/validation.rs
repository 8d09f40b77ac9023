// Configuration validation
//
// Validates that required fields are present and values are sensible

use crate::*;
use anyhow::{bail, Result};
use tracing::warn;

pub fn validate_config(config: &BackendConfig) -> Result<()> {
    validate_api_config(&config.api)?;
    validate_dispatch_settings(&config.dispatch)?;
    validate_cache_config(&config.cache)?;
    Ok(())
}

fn validate_api_config(config: &ApiConfig) -> Result<()> {
    if config.base_url.trim().is_empty() {
        bail!("api.base_url must not be empty");
    }

    if !(config.base_url.starts_with("http://") || config.base_url.starts_with("https://")) {
        bail!(
            "api.base_url must use http or https, got '{}'",
            config.base_url
        );
    }

    if config.timeout_secs == 0 {
        bail!("api.timeout_secs must be greater than 0");
    }

    if config.timeout_secs > 300 {
        warn!(
            timeout_secs = config.timeout_secs,
            "api.timeout_secs is very large; callers may wait minutes for a result"
        );
    }

    if matches!(config.api_key.as_deref(), Some(key) if key.trim().is_empty()) {
        bail!("api.api_key must not be empty when set");
    }

    Ok(())
}

fn validate_dispatch_settings(config: &DispatchSettings) -> Result<()> {
    if config.max_concurrent_exchanges == 0 {
        bail!("dispatch.max_concurrent_exchanges must be greater than 0");
    }

    if config.jitter_long_max_ms < config.jitter_default_max_ms {
        bail!(
            "dispatch.jitter_long_max_ms ({}) must not be smaller than dispatch.jitter_default_max_ms ({})",
            config.jitter_long_max_ms,
            config.jitter_default_max_ms
        );
    }

    if config.max_concurrent_exchanges > 64 {
        warn!(
            max_concurrent_exchanges = config.max_concurrent_exchanges,
            "dispatch.max_concurrent_exchanges is very large"
        );
    }

    if config.jitter_long_max_ms > 60_000 {
        warn!(
            jitter_long_max_ms = config.jitter_long_max_ms,
            "dispatch.jitter_long_max_ms exceeds a minute; background refreshes will lag"
        );
    }

    Ok(())
}

fn validate_cache_config(config: &CacheConfig) -> Result<()> {
    if let Some(dir) = &config.state_dir {
        if dir.as_os_str().is_empty() {
            bail!("cache.state_dir must not be empty when set");
        }
    }

    Ok(())
}
