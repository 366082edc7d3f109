//! Device identification from a peer's socket address.
//!
//! systemd-cryptsetup binds its client socket to an abstract address before
//! connecting.  The address looks like this (shown with the leading zero byte
//! as `\0`):
//!
//! ```text
//! \0 99226072855ae2d8 /cryptsetup/ luks-6e38d5e1-7f83-43cc-819a-7416bcbf9f84
//!    └── random ─────┘              └── device ─────────────────────────────┘
//! ```
//!
//! Everything after the final `/` names the volume being unlocked.
//!
//! The address is chosen by the client and is not verified by anyone.  Any
//! local process allowed to connect to the broker socket can claim to be any
//! device, so the socket's filesystem permissions are the only gate.

/// Extracts the device identifier from raw peer address bytes.
///
/// - A single leading zero byte (the abstract-namespace marker) is stripped.
/// - If the rest contains `/`, the identifier is everything after the last `/`.
/// - Otherwise the whole rest is the identifier.
/// - An empty rest gives an empty identifier.
///
/// Bytes that are not valid UTF-8 are replaced with `U+FFFD`.
///
/// # Examples
///
/// ```rust
/// use unlock_core::parse_peer_device;
///
/// assert_eq!(parse_peer_device(b"\0abc123/cryptsetup/luks-XYZ"), "luks-XYZ");
/// assert_eq!(parse_peer_device(b"\0abc123"), "abc123");
/// ```
pub fn parse_peer_device(raw: &[u8]) -> String {
    let name = raw.strip_prefix(b"\0").unwrap_or(raw);
    let device = match name.iter().rposition(|&b| b == b'/') {
        Some(slash) => &name[slash + 1..],
        None => name,
    };
    String::from_utf8_lossy(device).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cryptsetup_address_yields_device_after_last_slash() {
        assert_eq!(parse_peer_device(b"\0abc123/cryptsetup/luks-XYZ"), "luks-XYZ");
    }

    #[test]
    fn test_address_without_slash_yields_whole_name() {
        assert_eq!(parse_peer_device(b"\0abc123"), "abc123");
    }

    #[test]
    fn test_empty_abstract_name_yields_empty_device() {
        assert_eq!(parse_peer_device(b"\0"), "");
    }

    #[test]
    fn test_empty_input_yields_empty_device() {
        assert_eq!(parse_peer_device(b""), "");
    }

    #[test]
    fn test_trailing_slash_yields_empty_device() {
        assert_eq!(parse_peer_device(b"\0abc123/cryptsetup/"), "");
    }

    #[test]
    fn test_only_one_leading_zero_is_stripped() {
        // The second zero byte belongs to the name.
        assert_eq!(parse_peer_device(b"\0\0dev"), "\0dev");
    }

    #[test]
    fn test_pathname_peer_yields_file_name() {
        // A client bound to a filesystem path has no leading zero.
        assert_eq!(parse_peer_device(b"/run/clients/luks-home"), "luks-home");
    }

    #[test]
    fn test_real_systemd_address_format() {
        let raw = b"\x0099226072855ae2d8/cryptsetup/luks-6e38d5e1-7f83-43cc-819a-7416bcbf9f84";
        assert_eq!(
            parse_peer_device(raw),
            "luks-6e38d5e1-7f83-43cc-819a-7416bcbf9f84"
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced_not_rejected() {
        let device = parse_peer_device(b"\0x/dev\xff");
        assert_eq!(device, "dev\u{FFFD}");
    }
}
