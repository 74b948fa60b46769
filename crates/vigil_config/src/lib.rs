//! Parsing and validation of `vigil.toml` cache configuration files.
//!
//! This crate reads the configuration file and produces a strongly-typed
//! [`VigilConfig`] with cache budgets, resolver settings and per-namespace
//! validity policies. A missing file yields the defaults.

#![warn(missing_docs)]

pub mod error;
pub mod loader;
pub mod types;

pub use error::ConfigError;
pub use loader::{
    load_config, load_config_file, load_config_from_str, load_config_or_default, CONFIG_FILE,
};
pub use types::*;
