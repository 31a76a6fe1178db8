//! Host device-access traits
//!
//! A serial session never talks to a USB stack directly. It asks a [`UsbHost`]
//! for a device and then drives the returned [`UsbDevice`]. The native
//! implementation is backed by libusb; tests use the mock host in `test_utils`
//! (behind the `test-utils` feature).
//!
//! All methods are blocking. Callers on an async runtime run them on a
//! blocking thread.

use protocol::{ConfigurationInfo, ControlSetup, DeviceInfo, FilterSet, UsbError};
use thiserror::Error;

/// Failure while asking the host for a device
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HostError {
    /// The host only shows a permission prompt while a user action is being handled
    #[error("Must be handling a user gesture to show a permission request")]
    GestureRequired,

    /// The user dismissed the chooser, or nothing matched the filters
    #[error("No device selected")]
    NoDeviceSelected,

    /// Enumeration failed at the USB level
    #[error("USB error: {0}")]
    Usb(#[from] UsbError),

    /// Anything else the host reports
    #[error("{0}")]
    Other(String),
}

/// Source of devices
pub trait UsbHost: Send + Sync + 'static {
    type Device: UsbDevice;

    /// Devices the user has already granted access to, in host order
    fn authorized_devices(&self) -> Result<Vec<Self::Device>, HostError>;

    /// Ask the user to pick one device accepted by `filters`
    fn request_device(&self, filters: &FilterSet) -> Result<Self::Device, HostError>;
}

/// One USB device, exclusively owned by a session
pub trait UsbDevice: Send + 'static {
    /// Vendor/product identification
    fn info(&self) -> DeviceInfo;

    /// Open a handle to the device
    fn open(&mut self) -> Result<(), UsbError>;

    /// Close the handle; later transfers fail with [`UsbError::NotOpen`]
    fn close(&mut self) -> Result<(), UsbError>;

    /// Whether a handle is currently open
    fn is_opened(&self) -> bool;

    /// Active configuration, `None` when the device is unconfigured
    fn configuration(&self) -> Option<ConfigurationInfo>;

    /// Select a configuration by its bConfigurationValue
    fn select_configuration(&mut self, value: u8) -> Result<(), UsbError>;

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError>;

    fn select_alternate_interface(&mut self, interface: u8, setting: u8)
    -> Result<(), UsbError>;

    /// Host-to-device control transfer with an optional data stage
    fn control_transfer_out(&mut self, setup: ControlSetup, data: &[u8])
    -> Result<(), UsbError>;

    /// Bulk IN transfer of up to `length` bytes from endpoint number `endpoint`
    ///
    /// An empty result means nothing arrived before the host's polling
    /// interval elapsed; it is not an error.
    fn transfer_in(&mut self, endpoint: u8, length: usize) -> Result<Vec<u8>, UsbError>;

    /// Bulk OUT transfer to endpoint number `endpoint`, returns bytes written
    fn transfer_out(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, UsbError>;
}
