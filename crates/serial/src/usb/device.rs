//! libusb-backed device
//!
//! Wraps a `rusb::Device` and its handle once opened, and converts rusb
//! descriptors into the protocol descriptor model.

use super::transfers::{self, map_rusb_error};
use common::UsbDevice;
use protocol::{
    AlternateInfo, ConfigurationInfo, ControlSetup, DeviceInfo, Direction, EndpointInfo,
    InterfaceInfo, TransferKind, UsbError,
};
use rusb::{ConfigDescriptor, Context, Device, DeviceDescriptor, DeviceHandle};
use tracing::{debug, warn};

/// One enumerated USB device
pub struct LibusbDevice {
    device: Device<Context>,
    info: DeviceInfo,
    handle: Option<DeviceHandle<Context>>,
    claimed: Vec<u8>,
}

impl LibusbDevice {
    /// Wrap an enumerated device, reading its string descriptors if possible
    pub fn new(device: Device<Context>) -> Result<Self, rusb::Error> {
        let descriptor = device.device_descriptor()?;
        let info = read_device_info(&device, &descriptor);

        Ok(Self {
            device,
            info,
            handle: None,
            claimed: Vec::new(),
        })
    }

    pub fn bus_number(&self) -> u8 {
        self.device.bus_number()
    }

    pub fn address(&self) -> u8 {
        self.device.address()
    }

    fn handle(&self) -> Result<&DeviceHandle<Context>, UsbError> {
        self.handle.as_ref().ok_or(UsbError::NotOpen)
    }
}

impl std::fmt::Debug for LibusbDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LibusbDevice")
            .field("bus", &self.bus_number())
            .field("address", &self.address())
            .field("info", &self.info)
            .field("open", &self.handle.is_some())
            .finish()
    }
}

impl UsbDevice for LibusbDevice {
    fn info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn open(&mut self) -> Result<(), UsbError> {
        if self.handle.is_some() {
            return Ok(());
        }

        let mut handle = self.device.open().map_err(|e| {
            warn!("Failed to open {}: {}", self.info.label(), e);
            map_rusb_error(e)
        })?;

        // Not available on every platform
        if let Err(e) = handle.set_auto_detach_kernel_driver(true) {
            debug!("Kernel driver auto-detach unavailable: {}", e);
        }

        debug!(
            "Opened {} (bus {}, address {})",
            self.info.label(),
            self.bus_number(),
            self.address()
        );
        self.handle = Some(handle);
        Ok(())
    }

    fn close(&mut self) -> Result<(), UsbError> {
        let Some(mut handle) = self.handle.take() else {
            return Ok(());
        };

        let mut result = Ok(());
        for interface in self.claimed.drain(..) {
            if let Err(e) = handle.release_interface(interface) {
                warn!("Failed to release interface {}: {}", interface, e);
                if result.is_ok() {
                    result = Err(map_rusb_error(e));
                }
            }
        }

        debug!("Closed {}", self.info.label());
        result
    }

    fn is_opened(&self) -> bool {
        self.handle.is_some()
    }

    fn configuration(&self) -> Option<ConfigurationInfo> {
        if let Some(handle) = &self.handle {
            match handle.active_configuration() {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    debug!("Cannot read active configuration: {}", e);
                    return None;
                }
            }
        }

        self.device
            .active_config_descriptor()
            .ok()
            .map(|config| convert_configuration(&config))
    }

    fn select_configuration(&mut self, value: u8) -> Result<(), UsbError> {
        let handle = self.handle.as_mut().ok_or(UsbError::NotOpen)?;
        handle
            .set_active_configuration(value)
            .map_err(map_rusb_error)?;
        debug!("Selected configuration {}", value);
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        let handle = self.handle.as_mut().ok_or(UsbError::NotOpen)?;
        handle.claim_interface(interface).map_err(map_rusb_error)?;
        debug!("Claimed interface {}", interface);
        self.claimed.push(interface);
        Ok(())
    }

    fn select_alternate_interface(&mut self, interface: u8, setting: u8) -> Result<(), UsbError> {
        let handle = self.handle.as_mut().ok_or(UsbError::NotOpen)?;
        handle
            .set_alternate_setting(interface, setting)
            .map_err(map_rusb_error)
    }

    fn control_transfer_out(&mut self, setup: ControlSetup, data: &[u8]) -> Result<(), UsbError> {
        transfers::write_control(self.handle()?, setup, data)
    }

    fn transfer_in(&mut self, endpoint: u8, length: usize) -> Result<Vec<u8>, UsbError> {
        transfers::read_bulk(self.handle()?, endpoint, length)
    }

    fn transfer_out(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, UsbError> {
        transfers::write_bulk(self.handle()?, endpoint, data)
    }
}

/// Identification plus string descriptors, read through a temporary handle
fn read_device_info(device: &Device<Context>, descriptor: &DeviceDescriptor) -> DeviceInfo {
    let handle = device.open().ok();
    let read = |index: Option<u8>| {
        let handle = handle.as_ref()?;
        index.and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
    };

    DeviceInfo {
        vendor_id: descriptor.vendor_id(),
        product_id: descriptor.product_id(),
        manufacturer: read(descriptor.manufacturer_string_index()),
        product: read(descriptor.product_string_index()),
        serial_number: read(descriptor.serial_number_string_index()),
    }
}

pub(crate) fn map_direction(direction: rusb::Direction) -> Direction {
    match direction {
        rusb::Direction::In => Direction::In,
        rusb::Direction::Out => Direction::Out,
    }
}

pub(crate) fn map_transfer_type(kind: rusb::TransferType) -> TransferKind {
    match kind {
        rusb::TransferType::Control => TransferKind::Control,
        rusb::TransferType::Isochronous => TransferKind::Isochronous,
        rusb::TransferType::Bulk => TransferKind::Bulk,
        rusb::TransferType::Interrupt => TransferKind::Interrupt,
    }
}

/// Convert a rusb configuration descriptor into the protocol model
pub(crate) fn convert_configuration(config: &ConfigDescriptor) -> ConfigurationInfo {
    let interfaces = config
        .interfaces()
        .map(|interface| InterfaceInfo {
            number: interface.number(),
            alternates: interface
                .descriptors()
                .map(|alt| AlternateInfo {
                    setting: alt.setting_number(),
                    class: alt.class_code(),
                    subclass: alt.sub_class_code(),
                    protocol: alt.protocol_code(),
                    endpoints: alt
                        .endpoint_descriptors()
                        .map(|ep| EndpointInfo {
                            number: ep.number(),
                            direction: map_direction(ep.direction()),
                            kind: map_transfer_type(ep.transfer_type()),
                        })
                        .collect(),
                })
                .collect(),
        })
        .collect();

    ConfigurationInfo {
        value: config.number(),
        interfaces,
    }
}
