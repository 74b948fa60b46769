//! Configuration file loading and validation.

use crate::error::ConfigError;
use crate::types::VigilConfig;
use std::path::Path;

/// Name of the configuration file looked up in a project directory.
pub const CONFIG_FILE: &str = "vigil.toml";

/// Loads and validates a `vigil.toml` configuration from a project directory.
///
/// Reads `<project_dir>/vigil.toml`, parses it, and validates value ranges.
pub fn load_config(project_dir: &Path) -> Result<VigilConfig, ConfigError> {
    load_config_file(&project_dir.join(CONFIG_FILE))
}

/// Loads and validates a configuration from an explicit file path.
pub fn load_config_file(path: &Path) -> Result<VigilConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
        path: path.to_path_buf(),
        source,
    })?;
    load_config_from_str(&content)
}

/// Like [`load_config`], but a missing `vigil.toml` yields the defaults.
///
/// Any other read error, and any parse or validation error, is still reported.
pub fn load_config_or_default(project_dir: &Path) -> Result<VigilConfig, ConfigError> {
    let path = project_dir.join(CONFIG_FILE);
    match std::fs::read_to_string(&path) {
        Ok(content) => load_config_from_str(&content),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(VigilConfig::default()),
        Err(source) => Err(ConfigError::IoError { path, source }),
    }
}

/// Parses and validates a `vigil.toml` configuration from a string.
///
/// Useful for testing without filesystem dependencies.
pub fn load_config_from_str(content: &str) -> Result<VigilConfig, ConfigError> {
    let config: VigilConfig =
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

/// Validates that configuration values are in range.
fn validate_config(config: &VigilConfig) -> Result<(), ConfigError> {
    if config.cache.max_bytes.bytes() == 0 {
        return Err(ConfigError::invalid(
            "cache.max_bytes",
            "must be greater than zero",
        ));
    }
    if config.cache.max_dependency_depth == 0 {
        return Err(ConfigError::invalid(
            "cache.max_dependency_depth",
            "must be at least 1",
        ));
    }
    for (prefix, target) in &config.resolver.aliases {
        if prefix.is_empty() {
            return Err(ConfigError::invalid(
                "resolver.aliases",
                format!("alias for '{target}' has an empty prefix"),
            ));
        }
    }
    for (name, ns) in &config.namespaces {
        if name.contains('#') {
            return Err(ConfigError::invalid(
                format!("namespaces.{name}"),
                "namespace names must not contain '#'",
            ));
        }
        if ns.ttl_ms == Some(0) {
            return Err(ConfigError::invalid(
                format!("namespaces.{name}.ttl_ms"),
                "must be greater than zero",
            ));
        }
    }
    Ok(())
}
