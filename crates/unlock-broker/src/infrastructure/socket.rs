//! `AF_UNIX` socket helpers shared by both listeners.

use std::fs;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::{SocketAddr, UnixListener, UnixStream};
use std::path::Path;

use tracing::{debug, warn};

use crate::infrastructure::error::{BrokerError, Endpoint};

/// Binds a listening socket at `path`, replacing any stale socket file.
///
/// A socket file left behind by a previous run would make `bind` fail with
/// `AddrInUse`, so it is removed first.
///
/// # Errors
///
/// Returns [`BrokerError::Bind`] if the socket cannot be bound.
pub fn bind_fresh(path: &Path, endpoint: Endpoint) -> Result<UnixListener, BrokerError> {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed stale {endpoint} socket file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        // Let bind report the real problem.
        Err(e) => warn!(path = %path.display(), "could not remove stale {endpoint} socket: {e}"),
    }

    UnixListener::bind(path).map_err(|source| BrokerError::Bind {
        endpoint,
        path: path.to_path_buf(),
        source,
    })
}

/// Removes a socket file on shutdown; a missing file is not an error.
pub fn remove_socket_file(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed socket file"),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), "could not remove socket file: {e}"),
    }
}

/// Returns the raw address the peer of `stream` is bound to.
///
/// # Errors
///
/// Propagates the `getpeername` failure.
pub fn peer_address_bytes(stream: &UnixStream) -> io::Result<Vec<u8>> {
    let addr = stream.peer_addr()?;
    Ok(raw_address_bytes(&addr))
}

/// Converts a socket address into the raw bytes of its `sun_path`.
///
/// - Abstract names come back with their leading zero byte.
/// - Filesystem paths come back as their path bytes.
/// - Unnamed sockets give an empty vector.
pub fn raw_address_bytes(addr: &SocketAddr) -> Vec<u8> {
    #[cfg(target_os = "linux")]
    {
        use std::os::linux::net::SocketAddrExt;

        if let Some(name) = addr.as_abstract_name() {
            let mut raw = Vec::with_capacity(name.len() + 1);
            raw.push(0);
            raw.extend_from_slice(name);
            return raw;
        }
    }

    addr.as_pathname()
        .map(|path| path.as_os_str().as_bytes().to_vec())
        .unwrap_or_default()
}
