//! Error types for the microbit-thermo crate.

use thiserror::Error;

/// The main error type for this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// Bluetooth-related error from the underlying BLE library.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// Bluetooth is not available or is disabled on this system.
    #[error("Bluetooth not available or disabled")]
    BluetoothUnavailable,

    /// Device discovery failed (radio or permission problem).
    #[error("Scan failed: {reason}")]
    ScanFailed {
        /// Description of why the scan failed.
        reason: String,
    },

    /// The peripheral is not known to the adapter.
    #[error("Device not found: {identifier}")]
    DeviceNotFound {
        /// The identifier that was searched for.
        identifier: String,
    },

    /// Failed to establish a connection to the peripheral.
    #[error("Connection failed: {reason}")]
    ConnectionFailed {
        /// Description of why the connection failed.
        reason: String,
    },

    /// Service not found on the connected peripheral.
    #[error("Service not found: {uuid} (is this the right device?)")]
    ServiceNotFound {
        /// The UUID of the service that was not found.
        uuid: String,
    },

    /// Characteristic not found on the connected peripheral.
    #[error("Characteristic not found: {uuid} (is this the right device?)")]
    CharacteristicNotFound {
        /// The UUID of the characteristic that was not found.
        uuid: String,
    },

    /// Invalid data was received from the peripheral.
    #[error("Invalid data received: {context}")]
    InvalidData {
        /// Description of what was invalid about the data.
        context: String,
    },

    /// Reading or writing persisted state failed.
    #[error("Persistence error for '{key}': {reason}")]
    Persistence {
        /// The storage key involved.
        key: String,
        /// Description of the failure.
        reason: String,
    },

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The configuration could not be loaded or saved.
    #[error("Configuration error: {reason}")]
    Config {
        /// Description of the failure.
        reason: String,
    },

    /// The operation is not valid in the current connection state.
    #[error("Cannot {operation} while {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: &'static str,
        /// The state the manager was in.
        state: String,
    },

    /// The operation was cancelled before it completed.
    #[error("Operation cancelled")]
    Cancelled,

    /// An invalid parameter was provided.
    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter {
        /// The name of the parameter.
        name: String,
        /// The invalid value that was provided.
        value: String,
    },
}

impl Error {
    /// Whether the peripheral connected but did not expose the temperature
    /// service, which usually means the name match picked the wrong device.
    pub fn is_discovery_failure(&self) -> bool {
        matches!(
            self,
            Self::ServiceNotFound { .. } | Self::CharacteristicNotFound { .. }
        )
    }

    pub(crate) fn persistence(key: &str, reason: impl std::fmt::Display) -> Self {
        Self::Persistence {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A specialized Result type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
