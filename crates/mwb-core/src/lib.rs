//! # mwb-core
//!
//! Sans-IO protocol engine for the legacy MWB desktop-sharing wire format.
//!
//! Nothing in this crate opens a socket or needs an async runtime. The
//! bridge crate drives it from a tokio event loop; tests drive it directly.
//!
//! - **`protocol`** – the fixed 32/64-byte packet record, its type table,
//!   checksum and magic-tag sealing.
//!
//! - **`crypto`** – passphrase to key and magic number derivation, and the
//!   AES-256-CBC stream that wraps every connection.
//!
//! - **`chunk`** – splitting clipboard and drag/drop payloads into 48-byte
//!   pieces and reassembling them.
//!
//! - **`domain`** – machine identities and the four-slot machine matrix.
//!
//! - **`session`** – one connection's state machine: synchronisation block,
//!   challenge/response handshake, decrypt-and-frame pipeline.

pub mod chunk;
pub mod crypto;
pub mod domain;
pub mod protocol;
pub mod session;

pub use crypto::{derive_session_key, validate_passphrase, CryptoError, SessionKey};
pub use domain::machine::{LocalMachine, MachineId, PeerIdentity, ID_ALL, ID_NONE};
pub use domain::matrix::MachineMatrix;
pub use protocol::{Packet, PacketType, ProtocolError};
pub use session::{Channel, Direction, Session, SessionError, SessionOutput, SessionState};
