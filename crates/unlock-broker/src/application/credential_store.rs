//! Credential state shared between the delivery loop and the control thread.
//!
//! # One lock for two things
//!
//! The delivery loop needs two facts from the control thread: which keys are
//! known (the [`KeyTable`]) and whether any key has arrived at all (the
//! "credentials available" flag, used to cut the start delay short).  Both
//! live behind a single [`Mutex`], so a reader that sees the flag set is
//! guaranteed to also see the insert that set it.
//!
//! The lock is held only for a table scan or append, never while a socket is
//! read or written.
//!
//! # Waiting for keys
//!
//! A [`Condvar`] is notified on every successful insert.  The delivery loop
//! calls [`CredentialStore::wait_for_credentials`] with a deadline and wakes
//! up either when keys land or when the deadline passes, whichever is first.

use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tracing::{debug, info, warn};
use unlock_core::{CapacityExceeded, ControlMessage, KeyTable};
use zeroize::Zeroizing;

/// Table and flag, always accessed together.
#[derive(Debug)]
struct StoreState {
    table: KeyTable,
    credentials_available: bool,
}

/// Summary of applying one control message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlOutcome {
    /// Pairs stored in the table.
    pub inserted: usize,
    /// Pairs dropped because the table was full.
    pub rejected: usize,
    /// Whether the message ended with a device that had no key.
    pub malformed: bool,
}

/// Lock-protected key table plus the "credentials available" flag.
///
/// Shared between threads as `Arc<CredentialStore>`.
#[derive(Debug)]
pub struct CredentialStore {
    state: Mutex<StoreState>,
    changed: Condvar,
}

impl CredentialStore {
    /// Creates an empty store whose table holds at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(StoreState {
                table: KeyTable::with_capacity(capacity),
                credentials_available: false,
            }),
            changed: Condvar::new(),
        }
    }

    // Every critical section is a single push or scan, so a panic elsewhere
    // cannot leave the state half-updated; a poisoned lock is still usable.
    fn lock(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a `(device, key)` pair and raises the "credentials available" flag.
    ///
    /// # Errors
    ///
    /// Returns [`CapacityExceeded`] when the table is full.  Neither the table
    /// nor the flag changes in that case.
    pub fn insert(&self, device: &str, key: &[u8]) -> Result<(), CapacityExceeded> {
        let mut state = self.lock();
        state.table.insert(device, key)?;
        state.credentials_available = true;
        drop(state);
        self.changed.notify_all();
        Ok(())
    }

    /// Returns a copy of the newest key stored for `device`.
    ///
    /// The copy is owned so the lock is released before the caller writes it
    /// to a socket.
    pub fn lookup(&self, device: &str) -> Option<Zeroizing<Vec<u8>>> {
        self.lock()
            .table
            .lookup(device)
            .map(|key| Zeroizing::new(key.to_vec()))
    }

    /// Returns `true` once at least one key has been inserted.
    pub fn credentials_available(&self) -> bool {
        self.lock().credentials_available
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        self.lock().table.len()
    }

    /// Returns `true` if no key has been stored.
    pub fn is_empty(&self) -> bool {
        self.lock().table.is_empty()
    }

    /// Blocks until credentials are available or `deadline` passes.
    ///
    /// Returns the flag's value on wake-up: `true` if keys arrived, `false` if
    /// the deadline passed first.  Returns immediately if the flag is already
    /// set or the deadline is already in the past.
    pub fn wait_for_credentials(&self, deadline: Instant) -> bool {
        let mut state = self.lock();
        while !state.credentials_available {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            let (guard, _timeout) = self
                .changed
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner);
            state = guard;
        }
        state.credentials_available
    }

    /// Blocks until credentials are available, with no deadline.
    ///
    /// Used when the start delay is too long to express as an [`Instant`].
    pub fn wait_for_credentials_unbounded(&self) {
        let state = self.lock();
        drop(
            self.changed
                .wait_while(state, |state| !state.credentials_available)
                .unwrap_or_else(PoisonError::into_inner),
        );
    }

    /// Inserts every complete pair of a parsed control message.
    ///
    /// A full table or a trailing unpaired device is logged and skipped; the
    /// remaining pairs are still processed.
    pub fn apply_control_message(&self, message: &ControlMessage) -> ControlOutcome {
        let mut outcome = ControlOutcome {
            malformed: message.is_malformed(),
            ..ControlOutcome::default()
        };

        for entry in &message.pairs {
            match self.insert(entry.device(), entry.key()) {
                Ok(()) => {
                    info!(device = entry.device(), key_len = entry.key().len(), "added device key");
                    outcome.inserted += 1;
                }
                Err(e) => {
                    warn!(device = entry.device(), "dropping control pair: {e}");
                    outcome.rejected += 1;
                }
            }
        }

        if let Some(device) = &message.unpaired {
            warn!(device = %device, "malformed control message: device without key ignored");
        }
        debug!(?outcome, "control message applied");
        outcome
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new(unlock_core::DEFAULT_CAPACITY)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
