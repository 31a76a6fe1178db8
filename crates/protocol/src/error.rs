//! USB error types

use thiserror::Error;

/// USB transfer and device errors
///
/// Mirrors the libusb error codes a host can report. Hosts that are not backed
/// by libusb map their failures onto the closest kind or use `Other`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UsbError {
    /// Transfer timed out
    #[error("Transfer timed out")]
    Timeout,

    /// Endpoint stalled (protocol error)
    #[error("Endpoint stalled")]
    Pipe,

    /// Device was disconnected
    #[error("Device disconnected")]
    NoDevice,

    /// Device, interface or endpoint not found
    #[error("Not found")]
    NotFound,

    /// Device or interface is busy
    #[error("Resource busy")]
    Busy,

    /// Device sent more data than requested
    #[error("Buffer overflow")]
    Overflow,

    /// I/O error
    #[error("I/O error")]
    Io,

    /// Invalid parameter
    #[error("Invalid parameter")]
    InvalidParam,

    /// Access denied (permissions)
    #[error("Access denied")]
    Access,

    /// Device handle is not open
    #[error("Device is not open")]
    NotOpen,

    /// Other error with message
    #[error("{message}")]
    Other { message: String },
}

impl UsbError {
    /// Whether the error means the device is gone and further transfers will fail too
    pub fn is_disconnect(&self) -> bool {
        matches!(self, UsbError::NoDevice | UsbError::NotOpen)
    }
}

/// Type alias for USB results
pub type Result<T> = std::result::Result<T, UsbError>;
