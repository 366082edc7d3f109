//! Domain entities for afunix-unlock.
//!
//! Everything in this module is plain data and pure functions: the key table
//! does not lock and the peer parser does not touch a socket.  Locking and I/O
//! are layered on top by the broker crate.

pub mod key_table;
pub mod peer;

pub use key_table::{CapacityExceeded, KeyEntry, KeyTable};
pub use peer::parse_peer_device;
