//! Domain layer for unlock-broker.
//!
//! Only the broker's runtime configuration lives here.  Key and peer types
//! come from `unlock-core`.

pub mod config;

pub use config::{BrokerConfig, DEFAULT_MAX_ITERATIONS, DEFAULT_START_DELAY};
