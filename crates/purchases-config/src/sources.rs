// Configuration source loading.
//
// Priority order:
// 1. Environment variables (PURCHASES_* prefix)
// 2. Config file path from PURCHASES_CONFIG
// 3. Inline config content from PURCHASES_CONFIG_CONTENT
// 4. Default config files (./purchases.toml, ./.purchases.toml)
// 5. Built-in defaults
//
// Loading does not validate. Callers validate once logging is set up so
// validation warnings are not lost.

use crate::env_overrides::{self, EnvSource, ENV_PREFIX};
use crate::BackendConfig;
use anyhow::{Context, Result};
use std::env;
use std::path::Path;

const DEFAULT_CONFIG_FILES: &[&str] = &["./purchases.toml", "./.purchases.toml"];

/// Load configuration using the process environment and default files.
pub fn load_config() -> Result<BackendConfig> {
    load_from_sources(&StdEnvSource)
}

/// Load configuration from a specific file path (for CLI --config flag).
/// Returns error if the file doesn't exist or can't be parsed.
pub fn load_from_path(path: &Path) -> Result<BackendConfig> {
    let mut config = parse_file(path)?;
    env_overrides::apply_env_overrides(&mut config, &StdEnvSource)?;
    Ok(config)
}

pub fn load_with_env<E: EnvSource>(inline_config: Option<&str>, env: &E) -> Result<BackendConfig> {
    let mut config = match inline_config {
        Some(inline) => toml::from_str(inline).context("Failed to parse inline config content")?,
        None => BackendConfig::default(),
    };
    env_overrides::apply_env_overrides(&mut config, env)?;
    Ok(config)
}

fn load_from_sources<E: EnvSource>(env: &E) -> Result<BackendConfig> {
    let mut config = load_from_file(env)?.unwrap_or_default();
    env_overrides::apply_env_overrides(&mut config, env)?;
    Ok(config)
}

fn load_from_file<E: EnvSource>(env: &E) -> Result<Option<BackendConfig>> {
    if let Some(path) = env.get("CONFIG") {
        return parse_file(Path::new(&path)).map(Some);
    }

    if let Some(content) = env.get("CONFIG_CONTENT") {
        let config: BackendConfig = toml::from_str(&content).with_context(|| {
            format!("Failed to parse inline config from {}CONFIG_CONTENT", ENV_PREFIX)
        })?;
        return Ok(Some(config));
    }

    for path in DEFAULT_CONFIG_FILES {
        if Path::new(path).exists() {
            return parse_file(Path::new(path)).map(Some);
        }
    }

    Ok(None)
}

fn parse_file(path: &Path) -> Result<BackendConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

struct StdEnvSource;

impl EnvSource for StdEnvSource {
    fn get(&self, key: &str) -> Option<String> {
        env::var(format!("{}{}", ENV_PREFIX, key)).ok()
    }
}
