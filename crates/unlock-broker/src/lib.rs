//! unlock-broker library crate.
//!
//! This crate provides an `AF_UNIX` key broker that hands disk-encryption keys
//! to systemd-cryptsetup at boot, so encrypted volumes unlock without anyone
//! typing a passphrase.
//!
//! # Architecture
//!
//! ```text
//! systemd-cryptsetup (connects, reads until EOF)
//!         ↕  primary socket
//! [unlock-broker]
//!   ├── domain/           BrokerConfig
//!   ├── application/      CredentialStore (locked key table + flag), key resolution
//!   └── infrastructure/
//!         ├── delivery_loop/    accept → identify peer → resolve → respond
//!         ├── control_listener/ background thread feeding the store
//!         ├── socket/           bind, peer address, cleanup
//!         ├── client/           push_keys / request_key helpers
//!         └── config_file/      optional TOML overrides
//!         ↕  control socket
//! operator / provisioning script ("device,key,device,key")
//! ```
//!
//! # Layer rules
//!
//! - `domain` has no I/O.
//! - `application` depends on `domain` and `unlock-core`; it locks but never
//!   touches a socket.
//! - `infrastructure` owns every socket and the control thread.
//!
//! # Trust model
//!
//! The broker decides which key to send by looking at the address the client
//! bound its own socket to.  That address is self-reported and unverified, so
//! access to the primary socket must be restricted by filesystem permissions.

/// Domain layer: configuration types (no I/O).
pub mod domain;

/// Application layer: shared credential state and key resolution.
pub mod application;

/// Infrastructure layer: sockets, the control thread and the delivery loop.
pub mod infrastructure;
