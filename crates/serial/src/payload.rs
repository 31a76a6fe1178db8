//! Write payloads
//!
//! [`crate::SerialPort::write`] accepts anything convertible into a
//! [`WritePayload`]. Numbers are reduced to one byte with modular arithmetic,
//! text is sent as its UTF-8 encoding and raw bytes pass through unchanged.
//! Every payload has a byte form, so conversion never fails.

use bytes::Bytes;

#[derive(Debug, Clone, PartialEq)]
pub enum WritePayload {
    /// Exactly one byte
    Byte(u8),
    /// A number reduced modulo 256 after truncation toward zero
    Number(f64),
    /// Text, sent as UTF-8
    Text(String),
    /// Sequence of numbers, each reduced like [`WritePayload::Number`]
    Numbers(Vec<f64>),
    /// Bytes sent unchanged
    Raw(Bytes),
}

/// Reduce a number to one byte the way a typed byte array would store it
///
/// NaN and the infinities store as 0.
fn number_to_byte(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    // rem_euclid keeps the result in [0, 256) for negative input
    value.trunc().rem_euclid(256.0) as u8
}

impl WritePayload {
    /// Convert to the bytes that go on the wire
    pub fn into_bytes(self) -> Bytes {
        match self {
            WritePayload::Byte(b) => Bytes::copy_from_slice(&[b]),
            WritePayload::Number(n) => Bytes::copy_from_slice(&[number_to_byte(n)]),
            WritePayload::Text(text) => Bytes::from(text.into_bytes()),
            WritePayload::Numbers(numbers) => numbers.into_iter().map(number_to_byte).collect(),
            WritePayload::Raw(bytes) => bytes,
        }
    }
}

impl From<u8> for WritePayload {
    fn from(value: u8) -> Self {
        WritePayload::Byte(value)
    }
}

macro_rules! integer_payload {
    ($($t:ty),*) => {
        $(
            impl From<$t> for WritePayload {
                fn from(value: $t) -> Self {
                    WritePayload::Byte(value as u8)
                }
            }
        )*
    };
}

integer_payload!(i8, i16, i32, i64, u16, u32, u64, usize);

impl From<f64> for WritePayload {
    fn from(value: f64) -> Self {
        WritePayload::Number(value)
    }
}

impl From<f32> for WritePayload {
    fn from(value: f32) -> Self {
        WritePayload::Number(value as f64)
    }
}

impl From<&str> for WritePayload {
    fn from(value: &str) -> Self {
        WritePayload::Text(value.to_string())
    }
}

impl From<String> for WritePayload {
    fn from(value: String) -> Self {
        WritePayload::Text(value)
    }
}

impl From<char> for WritePayload {
    fn from(value: char) -> Self {
        WritePayload::Text(value.to_string())
    }
}

impl From<Vec<i32>> for WritePayload {
    fn from(values: Vec<i32>) -> Self {
        WritePayload::Numbers(values.into_iter().map(f64::from).collect())
    }
}

impl From<&[i32]> for WritePayload {
    fn from(values: &[i32]) -> Self {
        WritePayload::Numbers(values.iter().copied().map(f64::from).collect())
    }
}

impl From<Vec<f64>> for WritePayload {
    fn from(values: Vec<f64>) -> Self {
        WritePayload::Numbers(values)
    }
}

impl From<Vec<u8>> for WritePayload {
    fn from(value: Vec<u8>) -> Self {
        WritePayload::Raw(Bytes::from(value))
    }
}

impl From<&[u8]> for WritePayload {
    fn from(value: &[u8]) -> Self {
        WritePayload::Raw(Bytes::copy_from_slice(value))
    }
}

impl<const N: usize> From<&[u8; N]> for WritePayload {
    fn from(value: &[u8; N]) -> Self {
        WritePayload::Raw(Bytes::copy_from_slice(value))
    }
}

impl From<Bytes> for WritePayload {
    fn from(value: Bytes) -> Self {
        WritePayload::Raw(value)
    }
}
