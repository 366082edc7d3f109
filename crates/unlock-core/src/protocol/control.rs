//! Control message format.
//!
//! A control client connects to the control socket, writes one message and
//! disconnects.  The message is a flat list of comma-separated tokens read as
//! alternating device and key:
//!
//! ```text
//! luks-root,rootpassword,luks-home,homepassword
//! └─device─┘ └──key─────┘ └device─┘ └──key─────┘
//! ```
//!
//! There is no framing and no acknowledgement.  The broker reads at most
//! [`MAX_CONTROL_MSG`] bytes.
//!
//! Parsing rules:
//!
//! - Empty tokens are skipped, so `a,,b` is the pair `(a, b)`.
//! - A trailing device without a key is reported in
//!   [`ControlMessage::unpaired`] and otherwise dropped; the complete pairs
//!   before it are still returned.
//! - Keys are opaque bytes; nothing is trimmed, not even a trailing newline.

use thiserror::Error;

use crate::domain::key_table::KeyEntry;

/// Largest control message the broker reads from one connection.
pub const MAX_CONTROL_MSG: usize = 1024;

const SEPARATOR: u8 = b',';

/// Result of parsing one control message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlMessage {
    /// Complete `(device, key)` pairs in message order.
    pub pairs: Vec<KeyEntry>,
    /// Trailing device token that had no key after it.
    pub unpaired: Option<String>,
}

impl ControlMessage {
    /// Returns `true` when the message ended with a device but no key.
    pub fn is_malformed(&self) -> bool {
        self.unpaired.is_some()
    }
}

/// Splits a raw control message into `(device, key)` pairs.
///
/// This never fails: anything that cannot be paired is reported through
/// [`ControlMessage::unpaired`] instead.
///
/// # Examples
///
/// ```rust
/// use unlock_core::parse_control_message;
///
/// let msg = parse_control_message(b"devA,keyA,devB");
/// assert_eq!(msg.pairs.len(), 1);
/// assert_eq!(msg.pairs[0].device(), "devA");
/// assert_eq!(msg.pairs[0].key(), b"keyA");
/// assert_eq!(msg.unpaired.as_deref(), Some("devB"));
/// ```
pub fn parse_control_message(raw: &[u8]) -> ControlMessage {
    let mut message = ControlMessage::default();
    let mut pending_device: Option<&[u8]> = None;

    for token in raw.split(|&b| b == SEPARATOR).filter(|t| !t.is_empty()) {
        match pending_device.take() {
            None => pending_device = Some(token),
            Some(device) => message.pairs.push(KeyEntry::new(
                String::from_utf8_lossy(device).into_owned(),
                token.to_vec(),
            )),
        }
    }

    message.unpaired = pending_device.map(|d| String::from_utf8_lossy(d).into_owned());
    message
}

/// Error returned by [`encode_control_message`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlEncodeError {
    /// The message would carry no pair at all.
    #[error("control message must contain at least one device/key pair")]
    Empty,

    /// A device or key is empty; the broker would silently skip it.
    #[error("empty {field} in pair {index}")]
    EmptyField { field: &'static str, index: usize },

    /// A device or key contains the `,` separator.
    #[error("{field} in pair {index} contains ','")]
    ContainsSeparator { field: &'static str, index: usize },

    /// The encoded message is longer than the broker reads.
    #[error("control message is {len} bytes; the broker reads at most {max}")]
    TooLong { len: usize, max: usize },
}

/// Builds a control message from `(device, key)` pairs.
///
/// # Errors
///
/// Rejects inputs the broker could not read back unchanged: no pairs, empty
/// fields, fields containing `,`, or a message longer than
/// [`MAX_CONTROL_MSG`].
pub fn encode_control_message<D, K>(pairs: &[(D, K)]) -> Result<Vec<u8>, ControlEncodeError>
where
    D: AsRef<str>,
    K: AsRef<[u8]>,
{
    if pairs.is_empty() {
        return Err(ControlEncodeError::Empty);
    }

    let mut out = Vec::new();
    for (index, (device, key)) in pairs.iter().enumerate() {
        let device = device.as_ref().as_bytes();
        let key = key.as_ref();
        check_field("device", index, device)?;
        check_field("key", index, key)?;

        if !out.is_empty() {
            out.push(SEPARATOR);
        }
        out.extend_from_slice(device);
        out.push(SEPARATOR);
        out.extend_from_slice(key);
    }

    if out.len() > MAX_CONTROL_MSG {
        return Err(ControlEncodeError::TooLong {
            len: out.len(),
            max: MAX_CONTROL_MSG,
        });
    }
    Ok(out)
}

fn check_field(field: &'static str, index: usize, value: &[u8]) -> Result<(), ControlEncodeError> {
    if value.is_empty() {
        return Err(ControlEncodeError::EmptyField { field, index });
    }
    if value.contains(&SEPARATOR) {
        return Err(ControlEncodeError::ContainsSeparator { field, index });
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
