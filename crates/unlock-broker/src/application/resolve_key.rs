//! Key resolution for one unlock request.
//!
//! A configured static key always wins; otherwise the key is looked up by the
//! device identifier parsed from the peer address.

use zeroize::Zeroizing;

use crate::application::credential_store::CredentialStore;

/// Anything that can map a device identifier to a key.
#[cfg_attr(test, mockall::automock)]
pub trait KeySource {
    /// Returns the key for `device`, if one is known.
    fn lookup_key(&self, device: &str) -> Option<Zeroizing<Vec<u8>>>;
}

impl KeySource for CredentialStore {
    fn lookup_key(&self, device: &str) -> Option<Zeroizing<Vec<u8>>> {
        self.lookup(device)
    }
}

/// Where the key for a request came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyResolution {
    /// The configured static key.
    Static(Zeroizing<Vec<u8>>),
    /// A key pushed over the control socket.
    Table(Zeroizing<Vec<u8>>),
    /// No static key and no table entry for the device.
    NotFound,
}

impl KeyResolution {
    /// Key bytes to send, if any.
    pub fn key(&self) -> Option<&[u8]> {
        match self {
            KeyResolution::Static(key) | KeyResolution::Table(key) => Some(key.as_slice()),
            KeyResolution::NotFound => None,
        }
    }

    /// Short label for log lines.
    pub fn source_name(&self) -> &'static str {
        match self {
            KeyResolution::Static(_) => "static",
            KeyResolution::Table(_) => "table",
            KeyResolution::NotFound => "none",
        }
    }
}

/// Picks the key for `device`.
///
/// With a static key the source is not consulted at all.
pub fn resolve_key(
    static_key: Option<&[u8]>,
    source: &dyn KeySource,
    device: &str,
) -> KeyResolution {
    if let Some(key) = static_key {
        return KeyResolution::Static(Zeroizing::new(key.to_vec()));
    }
    match source.lookup_key(device) {
        Some(key) => KeyResolution::Table(key),
        None => KeyResolution::NotFound,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;

    #[test]
    fn test_static_key_bypasses_source() {
        // Arrange: a source that must never be asked
        let mut source = MockKeySource::new();
        source.expect_lookup_key().never();

        // Act
        let resolution = resolve_key(Some(&b"KEY1"[..]), &source, "devA");

        // Assert
        assert_eq!(resolution.key(), Some(&b"KEY1"[..]));
        assert_eq!(resolution.source_name(), "static");
    }

    #[test]
    fn test_without_static_key_source_is_queried_with_device() {
        let mut source = MockKeySource::new();
        source
            .expect_lookup_key()
            .with(eq("devA"))
            .times(1)
            .returning(|_| Some(Zeroizing::new(b"keyA".to_vec())));

        let resolution = resolve_key(None, &source, "devA");

        assert_eq!(resolution, KeyResolution::Table(Zeroizing::new(b"keyA".to_vec())));
    }

    #[test]
    fn test_unknown_device_resolves_to_not_found() {
        let mut source = MockKeySource::new();
        source.expect_lookup_key().returning(|_| None);

        let resolution = resolve_key(None, &source, "ghost");

        assert_eq!(resolution, KeyResolution::NotFound);
        assert_eq!(resolution.key(), None);
    }

    #[test]
    fn test_credential_store_acts_as_key_source() {
        let store = CredentialStore::new(4);
        store.insert("devA", b"keyA").unwrap();

        let resolution = resolve_key(None, &store, "devA");

        assert_eq!(resolution.key(), Some(&b"keyA"[..]));
        assert_eq!(resolution.source_name(), "table");
    }

    #[test]
    fn test_empty_device_is_looked_up_like_any_other() {
        let store = CredentialStore::new(4);
        assert_eq!(resolve_key(None, &store, ""), KeyResolution::NotFound);
    }
}
