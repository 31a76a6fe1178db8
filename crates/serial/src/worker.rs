//! Read loop thread
//!
//! After a successful open the device handle moves into a dedicated thread.
//! The thread alternates between draining session commands and issuing one
//! bulk IN transfer at a time. Commands always win over the next transfer, so
//! a close is handled before another read is attempted.

use crate::buffer::SerialReader;
use crate::error::SerialError;
use crate::events::{Event, HandlerRegistry};
use crate::setup;
use common::{SessionCommand, SessionWorker, UsbDevice};
use protocol::{BULK_IN_TRANSFER_LENGTH, EndpointLayout};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::JoinHandle;
use tracing::{debug, error, info, trace, warn};

/// State shared between a session and its read loop
#[derive(Clone)]
pub(crate) struct SharedState {
    pub reader: SerialReader,
    pub handlers: Arc<HandlerRegistry>,
    pub buffer_size: Arc<AtomicUsize>,
}

/// Owns an opened, configured device until the session closes it
pub(crate) struct ReadLoop<D: UsbDevice> {
    device: D,
    layout: EndpointLayout,
    worker: SessionWorker,
    shared: SharedState,
    /// Cleared after the first failed IN transfer
    reading: bool,
}

/// How the loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    Closed,
    SessionDropped,
}

impl<D: UsbDevice> ReadLoop<D> {
    pub fn new(
        device: D,
        layout: EndpointLayout,
        worker: SessionWorker,
        shared: SharedState,
    ) -> Self {
        Self {
            device,
            layout,
            worker,
            shared,
            reading: true,
        }
    }

    /// Run until the session closes or goes away
    pub fn run(mut self) {
        info!(
            "Read loop started on interface {} (IN {}, OUT {})",
            self.layout.interface_number, self.layout.endpoint_in, self.layout.endpoint_out
        );

        let exit = loop {
            let command = if self.reading {
                match self.worker.try_recv_command() {
                    Ok(command) => command,
                    Err(_) => break Exit::SessionDropped,
                }
            } else {
                // Nothing left to read, sleep until the session needs us
                match self.worker.recv_command() {
                    Ok(command) => Some(command),
                    Err(_) => break Exit::SessionDropped,
                }
            };

            match command {
                Some(command) => {
                    if let Some(exit) = self.guarded(|this| this.handle_command(command)) {
                        break exit;
                    }
                }
                None => {
                    self.guarded(|this| {
                        this.poll();
                        None
                    });
                }
            }
        };

        match exit {
            Exit::Closed => info!("Read loop stopped"),
            Exit::SessionDropped => {
                debug!("Read loop exiting ({:?}), releasing device", exit);
                self.release();
            }
        }
    }

    /// Run `f`, keeping a panicking handler from taking the thread down
    fn guarded<F>(&mut self, f: F) -> Option<Exit>
    where
        F: FnOnce(&mut Self) -> Option<Exit>,
    {
        contain_panic(|| f(self)).flatten()
    }

    fn handle_command(&mut self, command: SessionCommand) -> Option<Exit> {
        match command {
            SessionCommand::Write { data } => {
                self.write(&data);
                None
            }
            SessionCommand::Close { response } => {
                self.reading = false;
                for error in setup::shutdown(&mut self.device, self.layout.interface_number) {
                    self.shared.handlers.report(error);
                }
                debug!("Closed {}", self.device.info().label());
                let _ = response.send(());
                Some(Exit::Closed)
            }
        }
    }

    /// One bulk IN transfer, delivering each byte
    fn poll(&mut self) {
        match self
            .device
            .transfer_in(self.layout.endpoint_in, BULK_IN_TRANSFER_LENGTH)
        {
            Ok(data) => {
                if !data.is_empty() {
                    trace!("Received {} bytes", data.len());
                }
                for byte in data {
                    self.deliver(byte);
                }
            }
            Err(e) => {
                self.reading = false;
                if e.is_disconnect() {
                    info!("Device went away, read loop idle: {}", e);
                } else {
                    warn!("Bulk IN failed, read loop idle: {}", e);
                }
                self.shared
                    .handlers
                    .report(SerialError::transfer("transfer_in", e));
            }
        }
    }

    /// Buffer one byte, then fire its events
    ///
    /// Each handler call is contained on its own so a panic never costs the
    /// bytes that follow in the same transfer.
    fn deliver(&self, byte: u8) {
        let len = self.shared.reader.push(byte);

        if len >= self.shared.buffer_size.load(Ordering::Relaxed) {
            contain_panic(|| self.shared.handlers.emit(Event::Data));
        }

        contain_panic(|| self.shared.handlers.emit_byte(Event::RawData, byte));
    }

    fn write(&mut self, data: &[u8]) {
        match self.device.transfer_out(self.layout.endpoint_out, data) {
            Ok(written) => trace!("Wrote {} of {} bytes", written, data.len()),
            Err(e) => self
                .shared
                .handlers
                .report(SerialError::transfer("transfer_out", e)),
        }
    }

    /// Close without reporting anything; nobody is left to tell
    fn release(&mut self) {
        for error in setup::shutdown(&mut self.device, self.layout.interface_number) {
            debug!("Ignoring error while releasing device: {}", error);
        }
    }
}

/// Run `f`, logging instead of unwinding when it panics
fn contain_panic<T>(f: impl FnOnce() -> T) -> Option<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Panic in serial event handler: {:?}", e);
            None
        }
    }
}

/// Spawn the read loop thread
pub(crate) fn spawn_read_loop<D: UsbDevice>(
    read_loop: ReadLoop<D>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("serial-read-loop".to_string())
        .spawn(move || read_loop.run())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Handler;
    use common::create_session_bridge;
    use common::test_utils::MockDevice;
    use protocol::UsbError;
    use std::sync::Mutex;

    fn opened_device() -> MockDevice {
        let mut device = MockDevice::arduino_leonardo();
        setup::configure(&mut device, 9600, &mut EndpointLayout::default()).unwrap();
        device
    }

    fn shared(buffer_size: usize) -> SharedState {
        SharedState {
            reader: SerialReader::new(),
            handlers: Arc::new(HandlerRegistry::new()),
            buffer_size: Arc::new(AtomicUsize::new(buffer_size)),
        }
    }

    #[test]
    fn test_poll_delivers_bytes_and_events() {
        let device = opened_device();
        device.push_inbound(b"abc");

        let state = shared(2);
        let data_events = Arc::new(AtomicUsize::new(0));
        let raw = Arc::new(Mutex::new(Vec::new()));

        let d = data_events.clone();
        state.handlers.set(Event::Data, Handler::notify(move || {
            d.fetch_add(1, Ordering::SeqCst);
        }));
        let r = raw.clone();
        state.handlers.set(Event::RawData, Handler::byte(move |b| r.lock().unwrap().push(b)));

        let (_bridge, worker) = create_session_bridge();
        let mut read_loop = ReadLoop::new(device, EndpointLayout::default(), worker, state.clone());
        read_loop.poll();

        // Threshold 2: fires for the second and third byte only
        assert_eq!(data_events.load(Ordering::SeqCst), 2);
        assert_eq!(*raw.lock().unwrap(), b"abc".to_vec());
        assert_eq!(state.reader.available(), 3);
    }

    #[test]
    fn test_handler_panic_keeps_rest_of_transfer() {
        let device = opened_device();
        device.push_inbound(b"abc");

        let state = shared(1);
        let calls = Arc::new(AtomicUsize::new(0));
        let c = calls.clone();
        state.handlers.set(Event::Data, Handler::notify(move || {
            if c.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first data event");
            }
        }));

        let (_bridge, worker) = create_session_bridge();
        let mut read_loop = ReadLoop::new(device, EndpointLayout::default(), worker, state.clone());
        read_loop.poll();

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(state.reader.read_string(), "abc");
    }

    #[test]
    fn test_poll_failure_stops_reading() {
        let device = opened_device();
        device.push_inbound_error(UsbError::NoDevice);

        let state = shared(1);
        let errors = Arc::new(Mutex::new(Vec::new()));
        let e = errors.clone();
        state.handlers.set(Event::Error, Handler::error(move |err| {
            e.lock().unwrap().push(err.clone());
        }));

        let (_bridge, worker) = create_session_bridge();
        let mut read_loop = ReadLoop::new(device, EndpointLayout::default(), worker, state);
        read_loop.poll();

        assert!(!read_loop.reading);
        assert_eq!(
            *errors.lock().unwrap(),
            vec![SerialError::transfer("transfer_in", UsbError::NoDevice)]
        );
    }

    #[test]
    fn test_write_uses_out_endpoint() {
        let device = opened_device();
        let probe = device.clone();

        let (_bridge, worker) = create_session_bridge();
        let mut read_loop = ReadLoop::new(device, EndpointLayout::default(), worker, shared(1));
        read_loop.write(&[42]);

        assert_eq!(probe.out_transfers(), vec![(4, vec![42])]);
    }

    #[test]
    fn test_close_command_acknowledged() {
        let device = opened_device();
        let probe = device.clone();

        let (bridge, worker) = create_session_bridge();
        let handle = spawn_read_loop(ReadLoop::new(
            device,
            EndpointLayout::default(),
            worker,
            shared(1),
        ))
        .unwrap();

        let (tx, rx) = tokio::sync::oneshot::channel();
        bridge
            .try_send_command(SessionCommand::Close { response: tx })
            .unwrap();
        rx.blocking_recv().unwrap();
        handle.join().unwrap();

        assert!(!probe.state().opened);
        let (setup, _) = probe.control_transfers().pop().unwrap();
        assert_eq!(setup.value, 0);
    }

    #[test]
    fn test_session_drop_releases_device() {
        let device = opened_device();
        let probe = device.clone();

        let (bridge, worker) = create_session_bridge();
        let handle = spawn_read_loop(ReadLoop::new(
            device,
            EndpointLayout::default(),
            worker,
            shared(1),
        ))
        .unwrap();

        drop(bridge);
        handle.join().unwrap();
        assert!(!probe.state().opened);
    }

    #[test]
    fn test_panicking_handler_does_not_kill_loop() {
        let device = opened_device();
        device.push_inbound(b"x");
        let probe = device.clone();

        let state = shared(1);
        state.handlers.set(Event::Data, Handler::notify(|| panic!("sketch bug")));

        let (bridge, worker) = create_session_bridge();
        let handle = spawn_read_loop(ReadLoop::new(
            device,
            EndpointLayout::default(),
            worker,
            state,
        ))
        .unwrap();

        while probe.pending_inbound() > 0 {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        bridge
            .try_send_command(SessionCommand::Write {
                data: bytes::Bytes::from_static(b"ok"),
            })
            .unwrap();
        drop(bridge);
        handle.join().unwrap();

        assert_eq!(probe.out_transfers(), vec![(4, b"ok".to_vec())]);
        assert!(!probe.state().opened);
    }
}
