//! CDC-ACM bring-up
//!
//! Runs the fixed sequence that turns a freshly selected device into an open
//! serial link: open, select configuration, find the vendor-specific
//! interface, claim it, pick alternate setting 0, raise DTR and set the line
//! coding.

use crate::error::SerialError;
use common::UsbDevice;
use protocol::{ControlLineState, ControlSetup, EndpointLayout, LineCoding};
use tracing::{debug, warn};

/// Configuration selected when the device reports none active
const DEFAULT_CONFIGURATION: u8 = 1;

/// Bring up `device` for serial traffic at `baud_rate`
///
/// `layout` is updated in place when a vendor-specific interface is found;
/// otherwise it keeps its previous numbering. The first failing step stops
/// the sequence and is returned as a transfer error named after the step.
pub fn configure<D: UsbDevice>(
    device: &mut D,
    baud_rate: u32,
    layout: &mut EndpointLayout,
) -> Result<(), SerialError> {
    device
        .open()
        .map_err(|e| SerialError::transfer("open", e))?;
    debug!("Opened {}", device.info().label());

    if device.configuration().is_none() {
        debug!("No active configuration, selecting {}", DEFAULT_CONFIGURATION);
        device
            .select_configuration(DEFAULT_CONFIGURATION)
            .map_err(|e| SerialError::transfer("select_configuration", e))?;
    }

    match device.configuration() {
        Some(config) if layout.discover(&config) => {
            debug!(
                "Serial interface {} (IN {}, OUT {})",
                layout.interface_number, layout.endpoint_in, layout.endpoint_out
            );
        }
        _ => warn!(
            "No vendor-specific interface found, using interface {} (IN {}, OUT {})",
            layout.interface_number, layout.endpoint_in, layout.endpoint_out
        ),
    }

    let interface = layout.interface_number;

    device
        .claim_interface(interface)
        .map_err(|e| SerialError::transfer("claim_interface", e))?;

    device
        .select_alternate_interface(interface, 0)
        .map_err(|e| SerialError::transfer("select_alternate_interface", e))?;

    device
        .control_transfer_out(
            ControlSetup::set_control_line_state(interface, ControlLineState::DTR),
            &[],
        )
        .map_err(|e| SerialError::transfer("set_control_line_state", e))?;

    let coding = LineCoding::new(baud_rate);
    device
        .control_transfer_out(ControlSetup::set_line_coding(interface), &coding.encode())
        .map_err(|e| SerialError::transfer("set_line_coding", e))?;

    debug!("Line coding set to {} baud 8N1", baud_rate);
    Ok(())
}

/// Drop DTR and close the handle
///
/// Both steps are attempted. Failures are returned in order so the caller can
/// route each one.
pub fn shutdown<D: UsbDevice>(device: &mut D, interface: u8) -> Vec<SerialError> {
    let mut errors = Vec::new();

    if device.is_opened() {
        if let Err(e) = device.control_transfer_out(
            ControlSetup::set_control_line_state(interface, ControlLineState::CLEAR),
            &[],
        ) {
            errors.push(SerialError::transfer("set_control_line_state", e));
        }
    }

    if let Err(e) = device.close() {
        errors.push(SerialError::transfer("close", e));
    }

    errors
}
