//! Shared project discovery and cache opening for all subcommands.

use std::path::{Path, PathBuf};

use vigil_cache::CacheManager;
use vigil_config::{VigilConfig, CONFIG_FILE};

use crate::GlobalArgs;

/// Walks up from `start` looking for the nearest directory containing
/// `vigil.toml`. Falls back to `start` itself, since the file is optional.
pub fn find_project_root(start: &Path) -> PathBuf {
    let mut current = start;
    loop {
        if current.join(CONFIG_FILE).is_file() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return start.to_path_buf(),
        }
    }
}

/// Determines the project root.
///
/// If `--config` was given, uses its parent directory (or the path itself if
/// it is a directory). Otherwise walks up from the current directory.
pub fn resolve_project_root(global: &GlobalArgs) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let root = match global.config {
        Some(ref config_path) => {
            let p = PathBuf::from(config_path);
            if p.is_dir() {
                p
            } else {
                p.parent()
                    .filter(|parent| !parent.as_os_str().is_empty())
                    .map(Path::to_path_buf)
                    .unwrap_or_else(|| PathBuf::from("."))
            }
        }
        None => find_project_root(&std::env::current_dir()?),
    };
    if root.is_absolute() {
        Ok(root)
    } else {
        Ok(std::env::current_dir()?.join(root))
    }
}

/// Loads the configuration for `root`, honoring `--config` and
/// `--cache-dir`.
pub fn load_project_config(
    global: &GlobalArgs,
    root: &Path,
) -> Result<VigilConfig, Box<dyn std::error::Error>> {
    let mut config = match global.config {
        Some(ref config_path) if Path::new(config_path).is_file() => {
            vigil_config::load_config_file(Path::new(config_path))?
        }
        Some(ref config_path) if !Path::new(config_path).exists() => {
            return Err(format!("config file {config_path} does not exist").into());
        }
        _ => vigil_config::load_config_or_default(root)?,
    };
    if let Some(ref dir) = global.cache_dir {
        config.cache.dir = PathBuf::from(dir);
    }
    Ok(config)
}

/// Makes a command-line path absolute relative to the current directory.
pub fn target_path(raw: &str) -> Result<PathBuf, Box<dyn std::error::Error>> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

/// Resolves the project, loads its configuration and opens the cache.
pub fn open_cache(
    global: &GlobalArgs,
) -> Result<(PathBuf, CacheManager), Box<dyn std::error::Error>> {
    let root = resolve_project_root(global)?;
    let config = load_project_config(global, &root)?;
    let cache = CacheManager::open(config, &root);
    Ok((root, cache))
}
