//! CDC-ACM class requests
//!
//! Only the two host-to-device requests needed to bring a virtual serial port
//! up and down are modelled: SET_LINE_CODING and SET_CONTROL_LINE_STATE. Both
//! are class requests addressed to the claimed interface.

use byteorder::{ByteOrder, LittleEndian};

/// SET_LINE_CODING request code
pub const SET_LINE_CODING: u8 = 0x20;

/// SET_CONTROL_LINE_STATE request code
pub const SET_CONTROL_LINE_STATE: u8 = 0x22;

/// bmRequestType for host-to-device, class, interface recipient
pub const CLASS_INTERFACE_OUT: u8 = 0x21;

/// Interface class byte marking a vendor-specific interface
pub const VENDOR_SPECIFIC_CLASS: u8 = 0xFF;

/// Length requested by every bulk IN transfer of the read loop
pub const BULK_IN_TRANSFER_LENGTH: usize = 64;

/// Baud rate used when the caller does not pick one
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Serial line parameters sent with SET_LINE_CODING
///
/// The encoded form is 7 bytes: dwDTERate (little-endian u32), bCharFormat,
/// bParityType, bDataBits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineCoding {
    /// Data terminal rate in bits per second
    pub baud_rate: u32,
    /// 0 = 1 stop bit, 1 = 1.5 stop bits, 2 = 2 stop bits
    pub stop_bits: u8,
    /// 0 = none, 1 = odd, 2 = even, 3 = mark, 4 = space
    pub parity: u8,
    /// Number of data bits (5, 6, 7, 8 or 16)
    pub data_bits: u8,
}

impl LineCoding {
    /// 8N1 at the given baud rate
    pub fn new(baud_rate: u32) -> Self {
        Self {
            baud_rate,
            stop_bits: 0,
            parity: 0,
            data_bits: 8,
        }
    }

    /// Encode into the 7-byte SET_LINE_CODING payload
    pub fn encode(&self) -> [u8; 7] {
        let mut payload = [0u8; 7];
        LittleEndian::write_u32(&mut payload[0..4], self.baud_rate);
        payload[4] = self.stop_bits;
        payload[5] = self.parity;
        payload[6] = self.data_bits;
        payload
    }
}

impl Default for LineCoding {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

/// Modem control lines driven by SET_CONTROL_LINE_STATE
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlLineState {
    /// Data Terminal Ready (bit 0)
    pub dtr: bool,
    /// Request To Send (bit 1)
    pub rts: bool,
}

impl ControlLineState {
    /// DTR asserted, RTS clear. Asserting DTR resets most Arduino-style boards.
    pub const DTR: Self = Self {
        dtr: true,
        rts: false,
    };

    /// Both lines clear
    pub const CLEAR: Self = Self {
        dtr: false,
        rts: false,
    };

    /// wValue for the request
    pub fn value(&self) -> u16 {
        (self.dtr as u16) | ((self.rts as u16) << 1)
    }
}

/// Setup stage of a host-to-device control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSetup {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
}

impl ControlSetup {
    /// SET_CONTROL_LINE_STATE for `interface`
    pub fn set_control_line_state(interface: u8, state: ControlLineState) -> Self {
        Self {
            request_type: CLASS_INTERFACE_OUT,
            request: SET_CONTROL_LINE_STATE,
            value: state.value(),
            index: interface as u16,
        }
    }

    /// SET_LINE_CODING for `interface`; the payload comes from [`LineCoding::encode`]
    pub fn set_line_coding(interface: u8) -> Self {
        Self {
            request_type: CLASS_INTERFACE_OUT,
            request: SET_LINE_CODING,
            value: 0,
            index: interface as u16,
        }
    }
}
