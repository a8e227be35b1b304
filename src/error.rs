//! Error types for the bluez-hci library.

use thiserror::Error;

/// Errors that can occur while driving a Bluetooth adapter over the bus.
#[derive(Error, Debug)]
pub enum HciError {
    /// An underlying bus or service call failed. The native message text is
    /// passed through verbatim.
    #[error("{0}")]
    Io(String),

    /// A power-state change was requested but never confirmed within the
    /// bounded polling attempts. Carries the adapter name.
    #[error("failed to change power of interface {0}")]
    Timeout(String),

    /// A hardware address string could not be parsed.
    #[error("invalid hardware address {0:?}")]
    Parse(String),
}

impl From<dbus::Error> for HciError {
    fn from(err: dbus::Error) -> Self {
        HciError::Io(err.message().unwrap_or("unknown D-Bus failure").to_string())
    }
}
