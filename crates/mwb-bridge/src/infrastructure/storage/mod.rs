//! Storage infrastructure: the read-only TOML configuration file.

pub mod config;
