//! Blocking libusb transfers
//!
//! Thin wrappers over `rusb` that apply the timeouts a serial session needs
//! and map `rusb` errors onto [`UsbError`].

use protocol::{ControlSetup, UsbError};
use rusb::{Context, DeviceHandle};
use std::time::Duration;
use tracing::{trace, warn};

/// Bulk IN timeout; short so the read loop keeps servicing commands
pub const IN_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Timeout for bulk OUT and control transfers
pub const OUT_TIMEOUT: Duration = Duration::from_secs(1);

/// Direction bit of an IN endpoint address
const ENDPOINT_IN: u8 = 0x80;

/// Read up to `length` bytes from bulk IN endpoint number `endpoint`
///
/// A timeout means the device had nothing to send and yields an empty
/// buffer.
pub fn read_bulk(
    handle: &DeviceHandle<Context>,
    endpoint: u8,
    length: usize,
) -> Result<Vec<u8>, UsbError> {
    let address = ENDPOINT_IN | endpoint;
    let mut buffer = vec![0u8; length];

    match handle.read_bulk(address, &mut buffer, IN_POLL_TIMEOUT) {
        Ok(len) => {
            buffer.truncate(len);
            trace!("Bulk IN {:#04x}: {} bytes", address, len);
            Ok(buffer)
        }
        Err(rusb::Error::Timeout) | Err(rusb::Error::Interrupted) => Ok(Vec::new()),
        Err(e) => Err(map_rusb_error(e)),
    }
}

/// Write `data` to bulk OUT endpoint number `endpoint`
pub fn write_bulk(
    handle: &DeviceHandle<Context>,
    endpoint: u8,
    data: &[u8],
) -> Result<usize, UsbError> {
    let address = endpoint & !ENDPOINT_IN;
    let written = handle
        .write_bulk(address, data, OUT_TIMEOUT)
        .map_err(map_rusb_error)?;
    check_written(address, written, data.len());
    Ok(written)
}

/// Log a bulk OUT result; returns true when the device took fewer bytes than offered
fn check_written(address: u8, written: usize, offered: usize) -> bool {
    if written < offered {
        warn!(
            "Short bulk OUT {:#04x}: {} of {} bytes written, remainder dropped",
            address, written, offered
        );
        return true;
    }
    trace!("Bulk OUT {:#04x}: {} bytes", address, written);
    false
}

/// Host-to-device control transfer
pub fn write_control(
    handle: &DeviceHandle<Context>,
    setup: ControlSetup,
    data: &[u8],
) -> Result<(), UsbError> {
    trace!(
        "Control OUT: request_type={:#04x}, request={:#04x}, value={:#06x}, index={}, len={}",
        setup.request_type,
        setup.request,
        setup.value,
        setup.index,
        data.len()
    );

    handle
        .write_control(
            setup.request_type,
            setup.request,
            setup.value,
            setup.index,
            data,
            OUT_TIMEOUT,
        )
        .map(|_| ())
        .map_err(map_rusb_error)
}

/// Map rusb::Error to protocol::UsbError
pub fn map_rusb_error(err: rusb::Error) -> UsbError {
    match err {
        rusb::Error::Timeout => UsbError::Timeout,
        rusb::Error::Pipe => UsbError::Pipe,
        rusb::Error::NoDevice => UsbError::NoDevice,
        rusb::Error::NotFound => UsbError::NotFound,
        rusb::Error::Busy => UsbError::Busy,
        rusb::Error::Overflow => UsbError::Overflow,
        rusb::Error::Io => UsbError::Io,
        rusb::Error::InvalidParam => UsbError::InvalidParam,
        rusb::Error::Access => UsbError::Access,
        _ => UsbError::Other {
            message: err.to_string(),
        },
    }
}
