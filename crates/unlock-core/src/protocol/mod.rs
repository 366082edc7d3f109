//! Wire-level conventions shared by the broker and its clients.

pub mod control;
pub mod paths;

pub use control::{encode_control_message, parse_control_message, ControlMessage, MAX_CONTROL_MSG};
pub use paths::{derive_control_path, CONTROL_SUFFIX, SOCKET_SUFFIX};
