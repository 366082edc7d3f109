//! Application layer for unlock-broker.
//!
//! The application layer holds the state shared by the two broker threads and
//! the rules for picking a key, but never touches a socket.
//!
//! # Responsibilities
//!
//! - [`CredentialStore`]: the key table and the "credentials available" flag
//!   behind one lock, with a condition variable for the start delay
//! - [`resolve_key`]: static key first, table lookup otherwise

pub mod credential_store;
pub mod resolve_key;

pub use credential_store::{ControlOutcome, CredentialStore};
pub use resolve_key::{resolve_key, KeyResolution, KeySource};
