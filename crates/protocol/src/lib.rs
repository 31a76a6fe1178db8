//! Wire-level definitions for webusb-serial
//!
//! This crate defines everything that crosses the USB boundary when talking to
//! a CDC-ACM style microcontroller: the class-specific control requests, the
//! line coding payload, the descriptor model scanned at open time, and the
//! device acceptance filters used during device selection.
//!
//! # Example
//!
//! ```
//! use protocol::{ControlSetup, LineCoding};
//!
//! let coding = LineCoding::new(9600);
//! assert_eq!(coding.encode(), [0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08]);
//!
//! let setup = ControlSetup::set_line_coding(2);
//! assert_eq!(setup.request, 0x20);
//! assert_eq!(setup.index, 2);
//! ```

pub mod cdc;
pub mod error;
pub mod filters;
pub mod types;

pub use cdc::{
    BULK_IN_TRANSFER_LENGTH, CLASS_INTERFACE_OUT, ControlLineState, ControlSetup,
    DEFAULT_BAUD_RATE, LineCoding, SET_CONTROL_LINE_STATE, SET_LINE_CODING,
    VENDOR_SPECIFIC_CLASS,
};
pub use error::{Result, UsbError};
pub use filters::{DeviceFilter, FilterParseError, FilterSet, parse_hex_u16};
pub use types::{
    AlternateInfo, ConfigurationInfo, DeviceInfo, Direction, EndpointInfo, EndpointLayout,
    InterfaceInfo, TransferKind,
};
