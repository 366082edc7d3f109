//! Client side of both broker sockets.
//!
//! - [`push_keys`] sends one control message, the way a provisioning script
//!   would.
//! - [`request_key`] asks for a key the way systemd-cryptsetup does: it binds
//!   its socket to `\0<random>/cryptsetup/<device>` before connecting and then
//!   reads until EOF.

use std::ffi::OsStr;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};

use socket2::{Domain, SockAddr, Socket, Type};
use thiserror::Error;
use tracing::debug;
use unlock_core::protocol::control::{encode_control_message, ControlEncodeError};
use uuid::Uuid;
use zeroize::Zeroizing;

/// Error type for the client helpers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The pairs cannot be expressed as a control message.
    #[error("invalid control message: {0}")]
    Encode(#[from] ControlEncodeError),

    /// The broker socket refused the connection or does not exist.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The client socket could not be created or bound.
    #[error("failed to prepare client socket: {0}")]
    Socket(#[source] io::Error),

    /// Reading or writing the connected socket failed.
    #[error("I/O error talking to broker: {0}")]
    Io(#[from] io::Error),
}

/// Sends `(device, key)` pairs to the control socket at `control_path`.
///
/// # Errors
///
/// Returns [`ClientError::Encode`] for pairs the broker could not parse back,
/// [`ClientError::Connect`] if the socket is not there.
pub fn push_keys<D, K>(control_path: &Path, pairs: &[(D, K)]) -> Result<(), ClientError>
where
    D: AsRef<str>,
    K: AsRef<[u8]>,
{
    let message = Zeroizing::new(encode_control_message(pairs)?);
    let mut stream = UnixStream::connect(control_path).map_err(|source| ClientError::Connect {
        path: control_path.to_path_buf(),
        source,
    })?;
    stream.write_all(&message)?;
    stream.shutdown(Shutdown::Write)?;
    debug!(pairs = pairs.len(), "control message sent");
    Ok(())
}

/// Abstract socket name systemd-cryptsetup would use for `device`.
///
/// Returned without the leading zero byte.
pub fn cryptsetup_abstract_name(device: &str) -> Vec<u8> {
    let nonce = Uuid::new_v4().simple().to_string();
    format!("{}/cryptsetup/{device}", &nonce[..16]).into_bytes()
}

/// Requests the key for `device` from the primary socket at `socket_path`.
///
/// An empty result means the broker had no key for the device.
///
/// # Errors
///
/// See [`request_key_as`].
pub fn request_key(socket_path: &Path, device: &str) -> Result<Zeroizing<Vec<u8>>, ClientError> {
    request_key_as(socket_path, &cryptsetup_abstract_name(device))
}

/// Requests a key while bound to the abstract address `abstract_name`.
///
/// `abstract_name` excludes the leading zero byte.
///
/// # Errors
///
/// Returns [`ClientError::Socket`] if the abstract address is taken,
/// [`ClientError::Connect`] if the broker socket is not there, or
/// [`ClientError::Io`] if reading fails.
pub fn request_key_as(
    socket_path: &Path,
    abstract_name: &[u8],
) -> Result<Zeroizing<Vec<u8>>, ClientError> {
    let mut local = Vec::with_capacity(abstract_name.len() + 1);
    local.push(0);
    local.extend_from_slice(abstract_name);

    let socket = Socket::new(Domain::UNIX, Type::STREAM, None).map_err(ClientError::Socket)?;
    let local_addr = SockAddr::unix(OsStr::from_bytes(&local)).map_err(ClientError::Socket)?;
    socket.bind(&local_addr).map_err(ClientError::Socket)?;

    let connect = |socket: &Socket| -> io::Result<()> {
        socket.connect(&SockAddr::unix(socket_path)?)
    };
    connect(&socket).map_err(|source| ClientError::Connect {
        path: socket_path.to_path_buf(),
        source,
    })?;

    let mut stream = UnixStream::from(OwnedFd::from(socket));
    let mut key = Zeroizing::new(Vec::new());
    stream.read_to_end(&mut key)?;
    debug!(len = key.len(), "key response received");
    Ok(key)
}
