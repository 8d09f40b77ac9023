use super::{BackendConfig, LogFormat};
use anyhow::{anyhow, Context, Result};
use std::path::PathBuf;

pub const ENV_PREFIX: &str = "PURCHASES_";

/// Abstraction over environment-variable lookups so overrides can be
/// supplied from somewhere other than the process environment.
pub trait EnvSource {
    /// Get a variable by its name without the `PURCHASES_` prefix.
    fn get(&self, key: &str) -> Option<String>;
}

/// Apply environment-variable overrides (highest priority) to the config.
pub fn apply_env_overrides<E: EnvSource>(config: &mut BackendConfig, env: &E) -> Result<()> {
    // API
    if let Some(url) = get_env_string(env, "API_BASE_URL") {
        config.api.base_url = url;
    }
    if let Some(key) = get_env_string(env, "API_KEY") {
        config.api.api_key = Some(key);
    }
    if let Some(val) = get_env_u64(env, "API_TIMEOUT_SECS")? {
        config.api.timeout_secs = val;
    }
    if let Some(agent) = get_env_string(env, "USER_AGENT") {
        config.api.user_agent = agent;
    }

    // Dispatch
    if let Some(val) = get_env_usize(env, "MAX_CONCURRENT_EXCHANGES")? {
        config.dispatch.max_concurrent_exchanges = val;
    }
    if let Some(val) = get_env_u64(env, "JITTER_DEFAULT_MAX_MS")? {
        config.dispatch.jitter_default_max_ms = val;
    }
    if let Some(val) = get_env_u64(env, "JITTER_LONG_MAX_MS")? {
        config.dispatch.jitter_long_max_ms = val;
    }

    // Cache
    if let Some(val) = get_env_bool(env, "CACHE_ENABLED")? {
        config.cache.enabled = val;
    }
    if let Some(dir) = get_env_string(env, "STATE_DIR") {
        config.cache.state_dir = if dir.is_empty() {
            None
        } else {
            Some(PathBuf::from(dir))
        };
    }

    // Logging
    if let Some(level) = get_env_string(env, "LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Some(format) = get_env_string(env, "LOG_FORMAT") {
        config.logging.format = format
            .parse::<LogFormat>()
            .context("Invalid PURCHASES_LOG_FORMAT value")?;
    }

    Ok(())
}

fn get_env_string<E: EnvSource>(env: &E, key: &str) -> Option<String> {
    env.get(key)
}

fn get_env_u64<E: EnvSource>(env: &E, key: &str) -> Result<Option<u64>> {
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = val
                .parse::<u64>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_usize<E: EnvSource>(env: &E, key: &str) -> Result<Option<usize>> {
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = val
                .parse::<usize>()
                .map_err(|e| anyhow!("Failed to parse {}{}: {}", ENV_PREFIX, key, e))?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

fn get_env_bool<E: EnvSource>(env: &E, key: &str) -> Result<Option<bool>> {
    match get_env_string(env, key) {
        Some(val) => {
            let parsed = val.parse::<bool>().map_err(|e| {
                anyhow!(
                    "Failed to parse {}{} (expected bool): {}",
                    ENV_PREFIX,
                    key,
                    e
                )
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}
