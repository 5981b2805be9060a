//! Domain entities: machine identities and the shared machine matrix.
//!
//! Pure data with no I/O. The session and service layers stamp these into
//! packets and update them from received ones.

pub mod machine;
pub mod matrix;
