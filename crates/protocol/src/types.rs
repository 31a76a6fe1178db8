//! USB descriptor model
//!
//! A host-neutral view of the parts of the configuration descriptor tree that
//! the session needs: interfaces, their alternate settings, and the endpoints
//! of each alternate setting.

use crate::cdc::VENDOR_SPECIFIC_CLASS;
use serde::{Deserialize, Serialize};

/// Interface number used by the WebUSB Arduino demo firmware
pub const DEFAULT_INTERFACE_NUMBER: u8 = 2;

/// IN endpoint number used by the WebUSB Arduino demo firmware
pub const DEFAULT_ENDPOINT_IN: u8 = 5;

/// OUT endpoint number used by the WebUSB Arduino demo firmware
pub const DEFAULT_ENDPOINT_OUT: u8 = 4;

/// Identification of a device offered by a host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID
    pub product_id: u16,
    /// Manufacturer string (if available)
    pub manufacturer: Option<String>,
    /// Product string (if available)
    pub product: Option<String>,
    /// Serial number string (if available)
    pub serial_number: Option<String>,
}

impl DeviceInfo {
    /// Human readable label, falling back to `vid:pid`
    pub fn label(&self) -> String {
        match (&self.manufacturer, &self.product) {
            (Some(m), Some(p)) => format!("{} {}", m, p),
            (None, Some(p)) => p.clone(),
            _ => format!("{:04x}:{:04x}", self.vendor_id, self.product_id),
        }
    }
}

/// Endpoint direction, from the host's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Device to host
    In,
    /// Host to device
    Out,
}

/// Endpoint transfer type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransferKind {
    Control,
    Isochronous,
    Bulk,
    Interrupt,
}

/// One endpoint of an alternate setting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    /// Endpoint number without the direction bit (1-15)
    pub number: u8,
    pub direction: Direction,
    pub kind: TransferKind,
}

/// One alternate setting of an interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlternateInfo {
    /// bAlternateSetting
    pub setting: u8,
    /// bInterfaceClass
    pub class: u8,
    /// bInterfaceSubClass
    pub subclass: u8,
    /// bInterfaceProtocol
    pub protocol: u8,
    pub endpoints: Vec<EndpointInfo>,
}

/// One interface and all of its alternate settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceInfo {
    /// bInterfaceNumber
    pub number: u8,
    pub alternates: Vec<AlternateInfo>,
}

/// The active configuration of a device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationInfo {
    /// bConfigurationValue
    pub value: u8,
    pub interfaces: Vec<InterfaceInfo>,
}

/// Interface and endpoint numbers used for the serial data stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointLayout {
    /// Interface claimed and addressed by the class requests
    pub interface_number: u8,
    /// Bulk IN endpoint number
    pub endpoint_in: u8,
    /// Bulk OUT endpoint number
    pub endpoint_out: u8,
}

impl Default for EndpointLayout {
    fn default() -> Self {
        Self {
            interface_number: DEFAULT_INTERFACE_NUMBER,
            endpoint_in: DEFAULT_ENDPOINT_IN,
            endpoint_out: DEFAULT_ENDPOINT_OUT,
        }
    }
}

impl EndpointLayout {
    /// Overwrite the layout from the vendor-specific interfaces of `config`
    ///
    /// Every alternate setting with class 0xFF is visited in descriptor order,
    /// so when several qualify the last one wins. Fields that no vendor-specific
    /// interface provides keep their previous value. Returns whether any
    /// vendor-specific interface was found.
    pub fn discover(&mut self, config: &ConfigurationInfo) -> bool {
        let mut found = false;

        for interface in &config.interfaces {
            for alternate in &interface.alternates {
                if alternate.class != VENDOR_SPECIFIC_CLASS {
                    continue;
                }

                found = true;
                self.interface_number = interface.number;

                for endpoint in &alternate.endpoints {
                    match endpoint.direction {
                        Direction::In => self.endpoint_in = endpoint.number,
                        Direction::Out => self.endpoint_out = endpoint.number,
                    }
                }
            }
        }

        found
    }
}
