//! Application layer of the bridge.
//!
//! Everything here is synchronous and free of sockets; the infrastructure
//! layer drives it from a single tokio task.
//!
//! # Sub-modules
//!
//! - **`compat_service`** – The orchestrator. Turns commands, received bytes
//!   and timer ticks into network actions and collaborator events.
//!
//! - **`commands`** – The `Command` and `CompatEvent` enums exchanged with
//!   collaborators.
//!
//! - **`session_registry`** – Arena of live sessions keyed by `SessionId`,
//!   with one list per channel.
//!
//! - **`reconnect`** – Fixed-delay, capped redial policy per host.
//!
//! - **`timer_wheel`** – Deadline-ordered queue for heartbeats, keep-alives
//!   and redials.

pub mod commands;
pub mod compat_service;
pub mod reconnect;
pub mod session_registry;
pub mod timer_wheel;

pub use commands::{Command, CompatEvent};
pub use compat_service::{CloseReason, CompatService, NetAction, ServiceConfig, ServiceError};
pub use session_registry::{DialTarget, PortPair, SessionId};
