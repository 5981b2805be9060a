//! Infrastructure layer for the bridge.
//!
//! Contains the OS-facing adapters: TCP sockets driven by tokio and the TOML
//! configuration file.
//!
//! **Dependency rule**: this layer may depend on `application` and `mwb_core`,
//! but MUST NOT be imported by the `application` layer.

pub mod network;
pub mod storage;
