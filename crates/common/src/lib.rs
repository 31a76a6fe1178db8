//! Common utilities for webusb-serial
//!
//! This crate provides shared functionality between the serial session library
//! and the monitor binary, including the host/device access traits, error
//! handling, logging setup, the channel bridge between the async session and
//! its device worker thread, and an in-memory host for tests.

pub mod channel;
pub mod error;
pub mod host;
pub mod logging;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use channel::{SessionBridge, SessionCommand, SessionWorker, create_session_bridge};
pub use error::{Error, Result};
pub use host::{HostError, UsbDevice, UsbHost};
pub use logging::setup_logging;
