//! Device acceptance filters
//!
//! A [`FilterSet`] is built once when a session is created and consulted once,
//! when the host is asked to pick a device. It is never mutated afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Arduino vendor ID
pub const VID_ARDUINO: u16 = 0x2341;

/// Adafruit vendor ID
pub const VID_ADAFRUIT: u16 = 0x239A;

/// Vendor ID used by the TinyISP programmer
pub const VID_TINYISP: u16 = 0x1781;

/// Built-in acceptance table: boards known to ship a WebUSB-capable CDC firmware
const DEFAULT_FILTERS: [DeviceFilter; 14] = [
    DeviceFilter::device(VID_ARDUINO, 0x8036), // Leonardo
    DeviceFilter::device(VID_ARDUINO, 0x8037), // Micro
    DeviceFilter::device(VID_ARDUINO, 0x804d), // Zero
    DeviceFilter::device(VID_ARDUINO, 0x804e), // MKR1000
    DeviceFilter::device(VID_ARDUINO, 0x804f), // MKRZERO
    DeviceFilter::device(VID_ARDUINO, 0x8050), // MKR FOX 1200
    DeviceFilter::device(VID_ARDUINO, 0x8052), // MKR GSM 1400
    DeviceFilter::device(VID_ARDUINO, 0x8053), // MKR WAN 1300
    DeviceFilter::device(VID_ARDUINO, 0x8054), // MKR WiFi 1010
    DeviceFilter::device(VID_ARDUINO, 0x8055), // MKR NB 1500
    DeviceFilter::device(VID_ARDUINO, 0x8056), // MKR Vidor 4000
    DeviceFilter::device(VID_ARDUINO, 0x8057), // NANO 33 IoT
    DeviceFilter::vendor(VID_ADAFRUIT),
    DeviceFilter::device(VID_TINYISP, 0x0c9f), // TinyISP
];

/// One (vendor, optional product) acceptance rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceFilter {
    /// USB Vendor ID
    pub vendor_id: u16,
    /// USB Product ID; `None` accepts every product of the vendor
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    /// Filter matching exactly one vendor/product pair
    pub const fn device(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id: Some(product_id),
        }
    }

    /// Filter matching every product of a vendor
    pub const fn vendor(vendor_id: u16) -> Self {
        Self {
            vendor_id,
            product_id: None,
        }
    }

    /// Check whether a device matches this rule
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.vendor_id == vendor_id && self.product_id.is_none_or(|pid| pid == product_id)
    }
}

impl fmt::Display for DeviceFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.product_id {
            Some(pid) => write!(f, "{:04x}:{:04x}", self.vendor_id, pid),
            None => write!(f, "{:04x}:*", self.vendor_id),
        }
    }
}

/// Error returned when a `vid:pid` pattern cannot be parsed
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Invalid device filter '{pattern}': expected 'vid:pid' or 'vid:*' in hex")]
pub struct FilterParseError {
    /// The offending pattern
    pub pattern: String,
}

impl FromStr for DeviceFilter {
    type Err = FilterParseError;

    /// Parse `vid:pid` or `vid:*`, hex digits with an optional `0x` prefix
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || FilterParseError {
            pattern: s.to_string(),
        };

        let (vid, pid) = s.trim().split_once(':').ok_or_else(err)?;
        let vendor_id = parse_hex_u16(vid).ok_or_else(err)?;

        if pid.trim() == "*" {
            return Ok(Self::vendor(vendor_id));
        }

        let product_id = parse_hex_u16(pid).ok_or_else(err)?;
        Ok(Self::device(vendor_id, product_id))
    }
}

/// Parse a 16-bit USB id written in hex, with an optional `0x` prefix
pub fn parse_hex_u16(s: &str) -> Option<u16> {
    let s = s.trim();
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    if digits.is_empty() {
        return None;
    }
    u16::from_str_radix(digits, 16).ok()
}

/// Immutable ordered set of acceptance rules
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterSet {
    filters: Vec<DeviceFilter>,
}

impl FilterSet {
    /// Filter set from an explicit list, without the built-in table
    pub fn new(filters: Vec<DeviceFilter>) -> Self {
        Self { filters }
    }

    /// Built-in table plus one explicit vendor/product pair
    pub fn with_device(vendor_id: u16, product_id: u16) -> Self {
        let mut filters = DEFAULT_FILTERS.to_vec();
        filters.push(DeviceFilter::device(vendor_id, product_id));
        Self { filters }
    }

    /// This set followed by `extra`, in order
    pub fn with_extra(self, extra: impl IntoIterator<Item = DeviceFilter>) -> Self {
        let mut filters = self.filters;
        filters.extend(extra);
        Self { filters }
    }

    /// Whether any rule accepts the device
    pub fn matches(&self, vendor_id: u16, product_id: u16) -> bool {
        self.filters
            .iter()
            .any(|filter| filter.matches(vendor_id, product_id))
    }

    /// Iterate over the rules in order
    pub fn iter(&self) -> impl Iterator<Item = &DeviceFilter> {
        self.filters.iter()
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }
}

impl Default for FilterSet {
    fn default() -> Self {
        Self {
            filters: DEFAULT_FILTERS.to_vec(),
        }
    }
}

impl<'a> IntoIterator for &'a FilterSet {
    type Item = &'a DeviceFilter;
    type IntoIter = std::slice::Iter<'a, DeviceFilter>;

    fn into_iter(self) -> Self::IntoIter {
        self.filters.iter()
    }
}
