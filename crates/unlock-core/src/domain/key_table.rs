//! Bounded, append-only table of device keys.
//!
//! The broker keeps every `(device, key)` pair it has been told about in a
//! [`KeyTable`].  The table never forgets: entries are appended, never edited
//! or removed, and the table refuses new entries once it reaches its fixed
//! capacity.
//!
//! # Duplicate devices
//!
//! The same device may be inserted more than once (for example when an
//! operator pushes a corrected key).  [`KeyTable::lookup`] returns the key of
//! the **most recently inserted** matching entry, so a later control update
//! supersedes an earlier one.
//!
//! # Locking
//!
//! `KeyTable` itself is a plain value and does no locking.  The broker wraps
//! it in a single mutex together with the "credentials available" flag, so an
//! insert is always observed as a whole pair or not at all.

use thiserror::Error;
use zeroize::Zeroizing;

/// Number of entries a table holds when no capacity is configured.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Returned by [`KeyTable::insert`] when the table is already full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("key table is full ({capacity} entries)")]
pub struct CapacityExceeded {
    /// Capacity of the table that rejected the insert.
    pub capacity: usize,
}

/// One immutable `(device, key)` pair.
///
/// The key bytes are opaque: they are handed to the unlocking client exactly
/// as received.  They are wrapped in [`Zeroizing`] so the memory is wiped
/// when the entry is dropped.
#[derive(Clone, PartialEq, Eq)]
pub struct KeyEntry {
    device: String,
    key: Zeroizing<Vec<u8>>,
}

impl KeyEntry {
    /// Creates a new entry.
    pub fn new(device: impl Into<String>, key: impl Into<Vec<u8>>) -> Self {
        Self {
            device: device.into(),
            key: Zeroizing::new(key.into()),
        }
    }

    /// Device identifier this key unlocks.
    pub fn device(&self) -> &str {
        &self.device
    }

    /// Raw key bytes.
    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

// Keys must never end up in logs, so Debug only reports the length.
impl std::fmt::Debug for KeyEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyEntry")
            .field("device", &self.device)
            .field("key_len", &self.key.len())
            .finish()
    }
}

/// Ordered, append-only collection of [`KeyEntry`] with a fixed capacity.
///
/// # Examples
///
/// ```rust
/// use unlock_core::KeyTable;
///
/// let mut table = KeyTable::with_capacity(4);
/// table.insert("luks-a", b"first".to_vec()).unwrap();
/// table.insert("luks-a", b"second".to_vec()).unwrap();
///
/// // Last write wins.
/// assert_eq!(table.lookup("luks-a"), Some(&b"second"[..]));
/// assert_eq!(table.lookup("luks-b"), None);
/// ```
#[derive(Debug, Clone)]
pub struct KeyTable {
    entries: Vec<KeyEntry>,
    capacity: usize,
}

impl KeyTable {
    /// Creates an empty table holding at most `capacity` entries.
    ///
    /// Storage is allocated lazily; a large capacity costs nothing until keys
    /// actually arrive.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Appends a `(device, key)` pair.
    ///
    /// Both fields are stored in a single step; there is no window in which
    /// the device exists without its key.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`] if the table already holds `capacity`
    /// entries.  The table is left unchanged in that case.
    pub fn insert(
        &mut self,
        device: impl Into<String>,
        key: impl Into<Vec<u8>>,
    ) -> Result<(), CapacityExceeded> {
        if self.is_full() {
            return Err(CapacityExceeded {
                capacity: self.capacity,
            });
        }
        self.entries.push(KeyEntry::new(device, key));
        Ok(())
    }

    /// Returns the key of the most recently inserted entry for `device`.
    pub fn lookup(&self, device: &str) -> Option<&[u8]> {
        self.entries
            .iter()
            .rev()
            .find(|entry| entry.device == device)
            .map(KeyEntry::key)
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entry has been inserted yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Maximum number of entries.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns `true` when the next insert would fail.
    pub fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity
    }

    /// Iterates over entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &KeyEntry> {
        self.entries.iter()
    }
}

impl Default for KeyTable {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
