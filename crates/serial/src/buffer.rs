//! Receive buffer
//!
//! Bytes from the read loop are appended in arrival order and removed by the
//! accessor family below. The buffer is unbounded. Text accessors decode one
//! byte to one character (Latin-1), so character positions equal byte
//! positions.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// FIFO of received bytes
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SerialBuffer {
    bytes: VecDeque<u8>,
}

fn latin1(bytes: impl IntoIterator<Item = u8>) -> String {
    bytes.into_iter().map(char::from).collect()
}

/// Encode `marker` as Latin-1, `None` if it contains a character above U+00FF
fn latin1_bytes(marker: &str) -> Option<Vec<u8>> {
    marker.chars().map(|c| u8::try_from(c).ok()).collect()
}

impl SerialBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one received byte
    pub fn push(&mut self, byte: u8) {
        self.bytes.push_back(byte);
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Remove and return the oldest byte
    pub fn read(&mut self) -> Option<u8> {
        self.bytes.pop_front()
    }

    /// Remove the oldest byte and decode it as a character
    pub fn read_char(&mut self) -> Option<char> {
        self.read().map(char::from)
    }

    /// Drain everything; `None` when there was nothing buffered
    pub fn read_bytes(&mut self) -> Option<Vec<u8>> {
        if self.bytes.is_empty() {
            return None;
        }
        Some(self.bytes.drain(..).collect())
    }

    /// Remove and return everything up to and including the first `marker`
    ///
    /// Returns `None` and leaves the buffer untouched when `marker` is absent.
    pub fn read_bytes_until(&mut self, marker: u8) -> Option<Vec<u8>> {
        let index = self.bytes.iter().position(|&b| b == marker)?;
        Some(self.bytes.drain(..=index).collect())
    }

    /// Drain everything as a string
    pub fn read_string(&mut self) -> String {
        latin1(self.bytes.drain(..))
    }

    /// Return the text before the first occurrence of `marker`
    ///
    /// The returned text and the marker itself are removed. When the marker
    /// does not occur the result is empty and the buffer is untouched.
    pub fn read_string_until(&mut self, marker: &str) -> String {
        let Some(needle) = latin1_bytes(marker) else {
            return String::new();
        };

        let haystack = self.bytes.make_contiguous();
        let found = if needle.is_empty() {
            Some(0)
        } else {
            haystack
                .windows(needle.len())
                .position(|window| window == needle.as_slice())
        };

        match found {
            Some(index) => {
                let text = latin1(self.bytes.drain(..index));
                self.bytes.drain(..needle.len());
                text
            }
            None => String::new(),
        }
    }

    /// Text up to the next `\n`, without the newline
    pub fn read_line(&mut self) -> String {
        self.read_string_until("\n")
    }

    /// Most recently received byte; the whole buffer is discarded
    pub fn last(&mut self) -> Option<u8> {
        let last = self.bytes.pop_back();
        self.bytes.clear();
        last
    }

    /// [`SerialBuffer::last`] decoded as a character
    pub fn last_char(&mut self) -> Option<char> {
        self.last().map(char::from)
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    /// Copy of the buffered bytes without consuming them
    pub fn peek_all(&self) -> Vec<u8> {
        self.bytes.iter().copied().collect()
    }
}

impl Extend<u8> for SerialBuffer {
    fn extend<T: IntoIterator<Item = u8>>(&mut self, iter: T) {
        self.bytes.extend(iter);
    }
}

/// Shared handle to a session's receive buffer
///
/// Cheap to clone. Handlers can capture a reader to drain the buffer without
/// keeping the whole session alive.
#[derive(Debug, Clone, Default)]
pub struct SerialReader {
    inner: Arc<Mutex<SerialBuffer>>,
}

impl SerialReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, SerialBuffer> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one byte, returning the new length
    pub(crate) fn push(&self, byte: u8) -> usize {
        let mut buffer = self.lock();
        buffer.push(byte);
        buffer.len()
    }

    pub fn read(&self) -> Option<u8> {
        self.lock().read()
    }

    pub fn read_char(&self) -> Option<char> {
        self.lock().read_char()
    }

    pub fn read_bytes(&self) -> Option<Vec<u8>> {
        self.lock().read_bytes()
    }

    pub fn read_bytes_until(&self, marker: u8) -> Option<Vec<u8>> {
        self.lock().read_bytes_until(marker)
    }

    pub fn read_string(&self) -> String {
        self.lock().read_string()
    }

    pub fn read_string_until(&self, marker: &str) -> String {
        self.lock().read_string_until(marker)
    }

    pub fn read_line(&self) -> String {
        self.lock().read_line()
    }

    pub fn available(&self) -> usize {
        self.lock().len()
    }

    pub fn last(&self) -> Option<u8> {
        self.lock().last()
    }

    pub fn last_char(&self) -> Option<char> {
        self.lock().last_char()
    }

    pub fn clear(&self) {
        self.lock().clear()
    }
}
