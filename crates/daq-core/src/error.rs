//! Custom error types for the workspace.
//!
//! `DaqError` is the root error for everything below the capability traits. Transport
//! and parsing code returns [`AppResult`]; driver and logic code uses `anyhow::Result`
//! but keeps a `DaqError` as the root cause for the failures callers need to branch on
//! (connection refused, missing configuration).
//!
//! ## Error Hierarchy
//!
//! - **`Connection`**: the endpoint could not be opened, or the device on the other end
//!   failed its identity check. Fatal to activation.
//! - **`Configuration`**: required configuration is missing or invalid, including a
//!   serial transport built without a read timeout.
//! - **`Instrument`**: the device answered but the exchange failed.
//! - **`InvalidResponse`**: a response could not be interpreted where a value was required.
//! - **`SerialPortNotConnected`** / **`SerialUnexpectedEof`**: the far end of a serial
//!   port went away during a write or before a reply.
//! - **`Io`**: wraps `std::io::Error` from the underlying port.

use thiserror::Error;

/// Convenience alias for results using the workspace error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Primary error type for instrument control.
///
/// # Example
///
/// ```rust
/// use daq_core::error::{AppResult, DaqError};
///
/// fn require_port(port: Option<&str>) -> AppResult<&str> {
///     port.ok_or_else(|| DaqError::Configuration("com_port is required".into()))
/// }
///
/// assert!(require_port(None).is_err());
/// ```
#[derive(Error, Debug)]
pub enum DaqError {
    /// The connection to a device could not be established.
    ///
    /// Raised when a serial port or VISA resource cannot be opened, or when the
    /// connected device does not identify as the expected model.
    ///
    /// **Error Type**: Permanent for this activation. No retry is attempted.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Configuration validation failed.
    ///
    /// Occurs when a required option is absent (e.g. `com_port`) or when a transport is
    /// asked to read without a timeout, which would leave the chunked read loop without
    /// a termination condition.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Standard I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Instrument-specific failure.
    ///
    /// The device was reachable but the command exchange failed, for example a write
    /// that could not be flushed or a VISA call that returned an error status.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// A response did not contain the expected data.
    #[error("Invalid response from '{command}': {response:?}")]
    InvalidResponse {
        /// Command that produced the response
        command: String,
        /// Decoded response text
        response: String,
    },

    /// A write found the far end of the port closed.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// The port reported end-of-file before any byte of an expected response.
    #[error("Unexpected EOF from serial port")]
    SerialUnexpectedEof,

    /// Feature requires a cargo feature flag that wasn't enabled at compile time.
    ///
    /// The string names the feature, e.g. `instrument_visa`.
    #[error("Feature '{0}' is not enabled. Please rebuild with --features {0}")]
    FeatureNotEnabled(String),
}

/// Returns the `DaqError` at the root of an `anyhow` chain, if any.
pub fn root_daq_error(err: &anyhow::Error) -> Option<&DaqError> {
    err.chain().find_map(|cause| cause.downcast_ref::<DaqError>())
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn root_error_survives_context() {
        let err: anyhow::Result<()> = Err(DaqError::Connection("COM9 busy".into()))
            .context("Failed to activate laser");
        let err = err.unwrap_err();

        assert!(matches!(root_daq_error(&err), Some(DaqError::Connection(_))));
        assert!(err.to_string().contains("Failed to activate laser"));
    }

    #[test]
    fn missing_feature_names_the_flag() {
        let err = DaqError::FeatureNotEnabled("instrument_visa".into());
        assert!(err.to_string().contains("--features instrument_visa"));
    }
}
