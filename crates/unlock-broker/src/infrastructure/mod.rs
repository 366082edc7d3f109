//! Infrastructure layer for unlock-broker.
//!
//! The infrastructure layer handles all I/O: the two `AF_UNIX` listeners, the
//! control thread, the delivery loop, the client helpers and the config file.
//!
//! # Responsibilities
//!
//! - Binding both sockets, replacing stale socket files
//! - Reading the peer address of each unlock request
//! - Running the control listener on its own thread and stopping it cleanly
//! - Serving a bounded number of unlock requests
//!
//! # What does NOT belong here?
//!
//! - Table semantics and key selection (that is the application layer)
//! - Argument parsing (that is done in `main.rs`)

pub mod client;
pub mod config_file;
pub mod control_listener;
pub mod delivery_loop;
pub mod error;
pub mod socket;

// Re-export the primary entry points so `main.rs` can call them concisely.
pub use control_listener::{ControlHandle, ControlListener};
pub use delivery_loop::{run_broker, Broker, DeliveryReport};
pub use error::{BrokerError, Endpoint};
