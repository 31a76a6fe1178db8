//! Native host backed by libusb
//!
//! Transfers are blocking. The read loop runs them on its own thread and the
//! session runs device selection and bring-up through `spawn_blocking`.

mod device;
mod host;
mod transfers;

pub use device::LibusbDevice;
pub use host::LibusbHost;
pub use transfers::{IN_POLL_TIMEOUT, OUT_TIMEOUT, map_rusb_error};
