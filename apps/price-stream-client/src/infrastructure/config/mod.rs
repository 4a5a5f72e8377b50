//! Configuration Module
//!
//! Environment-driven configuration for the streaming client and binary.

mod settings;

pub use settings::{CacheSettings, ClientConfig, ConfigError, ServerSettings, parse_symbol_list};
