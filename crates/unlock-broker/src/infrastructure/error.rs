//! Fatal broker errors.
//!
//! Everything that can go wrong for a single request (unknown device, a peer
//! that hung up, a malformed control message) is logged and skipped.  The
//! errors below are the ones that stop the broker.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Which of the two broker sockets an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// The socket systemd-cryptsetup connects to.
    Primary,
    /// The socket that receives `device,key` messages.
    Control,
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Primary => f.write_str("primary"),
            Endpoint::Control => f.write_str("control"),
        }
    }
}

/// Error type for broker operations.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// A listening socket could not be created or bound.
    #[error("failed to bind {endpoint} socket at {path}: {source}")]
    Bind {
        endpoint: Endpoint,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// `accept` failed for a reason other than shutdown.
    #[error("accept failed on {endpoint} socket: {source}")]
    Accept {
        endpoint: Endpoint,
        #[source]
        source: io::Error,
    },

    /// The peer address of an accepted unlock request could not be read.
    #[error("could not read peer address: {0}")]
    PeerAddress(#[source] io::Error),

    /// The control thread could not be started.
    #[error("failed to spawn control thread: {0}")]
    Spawn(#[source] io::Error),

    /// The control thread panicked.
    #[error("control thread panicked")]
    ControlThreadPanicked,

    /// The control thread stopped with an error of its own.
    #[error("control listener failed: {0}")]
    ControlListener(#[source] Box<BrokerError>),
}
