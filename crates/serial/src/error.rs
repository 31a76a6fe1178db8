//! Serial session error types
//!
//! None of these are ever returned from a [`crate::SerialPort`] method. They
//! are delivered to the `error` handler, or logged when no handler is
//! registered.

use common::HostError;
use protocol::UsbError;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SerialError {
    /// The host refused to show a permission prompt outside a user action
    #[error("Permission request rejected: {0}")]
    PermissionContext(String),

    /// The user dismissed the device chooser
    #[error("No device selected")]
    UserCancelled,

    /// Any other failure while enumerating or choosing a device
    #[error("Device selection failed: {0}")]
    DeviceSelection(String),

    /// A control, bulk IN or bulk OUT transfer failed
    #[error("USB transfer failed during {operation}: {source}")]
    Transfer {
        operation: &'static str,
        source: UsbError,
    },

    /// A write payload could not be turned into bytes
    #[error("Cannot convert write payload: {0}")]
    DataConversion(String),
}

impl SerialError {
    pub(crate) fn transfer(operation: &'static str, source: UsbError) -> Self {
        SerialError::Transfer { operation, source }
    }
}

impl From<HostError> for SerialError {
    fn from(err: HostError) -> Self {
        match err {
            HostError::GestureRequired => SerialError::PermissionContext(err.to_string()),
            HostError::NoDeviceSelected => SerialError::UserCancelled,
            HostError::Usb(_) | HostError::Other(_) => SerialError::DeviceSelection(err.to_string()),
        }
    }
}
