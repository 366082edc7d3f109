//! Control socket naming.
//!
//! When no control path is configured, it sits next to the primary socket:
//! `/run/systemd/clevis-unlock.sock` pairs with
//! `/run/systemd/clevis-unlock.control.sock`.

use std::ffi::OsString;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::path::{Path, PathBuf};

/// Suffix that marks a socket path.
pub const SOCKET_SUFFIX: &str = ".sock";

/// Suffix used for the derived control socket.
pub const CONTROL_SUFFIX: &str = ".control.sock";

/// Derives the default control socket path from the primary socket path.
///
/// Everything from the first `.sock` onwards is replaced by `.control.sock`.
/// A path without `.sock` gets `.control.sock` appended.
///
/// ```rust
/// use std::path::Path;
/// use unlock_core::derive_control_path;
///
/// assert_eq!(
///     derive_control_path(Path::new("/run/unlock.sock")),
///     Path::new("/run/unlock.control.sock"),
/// );
/// ```
pub fn derive_control_path(socket_path: &Path) -> PathBuf {
    let bytes = socket_path.as_os_str().as_bytes();
    let stem = find(bytes, SOCKET_SUFFIX.as_bytes()).map_or(bytes, |at| &bytes[..at]);

    let mut out = stem.to_vec();
    out.extend_from_slice(CONTROL_SUFFIX.as_bytes());
    PathBuf::from(OsString::from_vec(out))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
