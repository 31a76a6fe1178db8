//! Serial-port style access to CDC-ACM microcontrollers over user-space USB
//!
//! A [`SerialPort`] selects a device through a [`common::UsbHost`], raises DTR
//! and sets the line coding, then reads the bulk IN endpoint on a dedicated
//! thread. Received bytes land in a buffer that is drained with the `read*`
//! family; events are delivered to single-slot handlers.
//!
//! # Example
//!
//! ```no_run
//! use serial::usb::LibusbHost;
//! use serial::{Handler, OpenOptions, SerialPort};
//!
//! # async fn run() -> Result<(), protocol::UsbError> {
//! let port = SerialPort::new(LibusbHost::new()?);
//!
//! let reader = port.reader();
//! port.on_data(Handler::notify(move || {
//!     let line = reader.read_line();
//!     if !line.is_empty() {
//!         println!("{}", line);
//!     }
//! }));
//!
//! port.open(OpenOptions::default()).await;
//! port.write("hello\n");
//! port.close().await;
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod error;
pub mod events;
pub mod payload;
pub mod session;
pub mod setup;
pub mod usb;
mod worker;

pub use buffer::{SerialBuffer, SerialReader};
pub use error::SerialError;
pub use events::{Event, Handler, HandlerRegistry, UnknownEvent};
pub use payload::WritePayload;
pub use session::{DEFAULT_BUFFER_SIZE, OpenOptions, SerialPort};
