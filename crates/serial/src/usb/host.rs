//! libusb-backed host
//!
//! There is no permission chooser on a native host. Devices listed in the
//! allow-list count as already authorized; a permission request picks the
//! first enumerated device accepted by the session's filters.

use super::device::LibusbDevice;
use super::transfers::map_rusb_error;
use common::{HostError, UsbDevice, UsbHost};
use protocol::{DeviceInfo, FilterSet, UsbError};
use rusb::{Context, UsbContext};
use tracing::{debug, info, warn};

/// Linux Foundation, the vendor of virtual root hubs
const ROOT_HUB_VENDOR: u16 = 0x1d6b;
const HUB_CLASS: u8 = 0x09;

pub struct LibusbHost {
    context: Context,
    authorized: FilterSet,
}

impl LibusbHost {
    /// Host with an empty allow-list
    pub fn new() -> Result<Self, UsbError> {
        let context = Context::new().map_err(map_rusb_error)?;
        Ok(Self {
            context,
            authorized: FilterSet::new(Vec::new()),
        })
    }

    /// Treat devices matching `authorized` as previously granted
    pub fn with_authorized(mut self, authorized: FilterSet) -> Self {
        self.authorized = authorized;
        self
    }

    /// Identification of every device accepted by `filters`
    pub fn list_devices(&self, filters: &FilterSet) -> Result<Vec<DeviceInfo>, UsbError> {
        Ok(self
            .matching(filters)
            .map_err(map_rusb_error)?
            .iter()
            .map(|device| device.info())
            .collect())
    }

    /// Enumerated devices accepted by `filters`, in bus order
    fn matching(&self, filters: &FilterSet) -> Result<Vec<LibusbDevice>, rusb::Error> {
        let devices = self.context.devices()?;
        let mut matched = Vec::new();

        for device in devices.iter() {
            let descriptor = match device.device_descriptor() {
                Ok(descriptor) => descriptor,
                Err(e) => {
                    debug!(
                        "Skipping device at bus={}, addr={}: {}",
                        device.bus_number(),
                        device.address(),
                        e
                    );
                    continue;
                }
            };

            if is_root_hub(descriptor.vendor_id(), descriptor.class_code()) {
                continue;
            }
            if !filters.matches(descriptor.vendor_id(), descriptor.product_id()) {
                continue;
            }

            match LibusbDevice::new(device) {
                Ok(device) => matched.push(device),
                Err(e) => warn!("Failed to read matching device: {}", e),
            }
        }

        debug!("{} devices matched {} filters", matched.len(), filters.len());
        Ok(matched)
    }
}

fn is_root_hub(vendor_id: u16, class_code: u8) -> bool {
    vendor_id == ROOT_HUB_VENDOR && class_code == HUB_CLASS
}

impl UsbHost for LibusbHost {
    type Device = LibusbDevice;

    fn authorized_devices(&self) -> Result<Vec<LibusbDevice>, HostError> {
        if self.authorized.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.matching(&self.authorized).map_err(map_rusb_error)?)
    }

    fn request_device(&self, filters: &FilterSet) -> Result<LibusbDevice, HostError> {
        let device = self
            .matching(filters)
            .map_err(map_rusb_error)?
            .into_iter()
            .next()
            .ok_or(HostError::NoDeviceSelected)?;

        info!("Selected {}", device.info().label());
        Ok(device)
    }
}
