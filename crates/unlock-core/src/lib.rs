//! # unlock-core
//!
//! Shared library for afunix-unlock containing the device key table, the peer
//! identity parser and the control message codec.
//!
//! This crate is used by the broker service and its client helpers.
//! It has no dependencies on sockets, threads, or the filesystem.
//!
//! # Architecture overview (for beginners)
//!
//! At boot, systemd-cryptsetup can ask a local `AF_UNIX` socket for the key
//! of an encrypted volume instead of prompting for a passphrase.  It binds
//! its client socket to an abstract address such as
//! `\0 7f3a9c01d2e4b5a6/cryptsetup/luks-6e38d5e1` before connecting, so the
//! server can tell which volume is asking just by looking at the peer address.
//!
//! This crate (`unlock-core`) is the shared foundation.  It defines:
//!
//! - **`domain`** – The bounded [`KeyTable`] of `(device, key)` pairs and the
//!   pure [`parse_peer_device`] function that turns a raw peer address into a
//!   device identifier.
//!
//! - **`protocol`** – The comma-separated control message that populates the
//!   table at runtime, and the naming rule that derives the control socket
//!   path from the primary socket path.

pub mod domain;
pub mod protocol;

pub use domain::key_table::{CapacityExceeded, KeyEntry, KeyTable, DEFAULT_CAPACITY};
pub use domain::peer::parse_peer_device;
pub use protocol::control::{encode_control_message, parse_control_message, ControlMessage};
pub use protocol::paths::derive_control_path;
