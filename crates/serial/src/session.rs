//! Serial session
//!
//! [`SerialPort`] ties the pieces together: it selects a device through a
//! [`UsbHost`], runs the CDC-ACM bring-up on a blocking thread, and hands the
//! opened handle to the read loop. No method returns an error. Failures end
//! at the `error` handler or in the log.

use crate::buffer::SerialReader;
use crate::error::SerialError;
use crate::events::{Event, Handler, HandlerRegistry};
use crate::payload::WritePayload;
use crate::setup;
use crate::worker::{ReadLoop, SharedState, spawn_read_loop};
use common::{
    HostError, SessionBridge, SessionCommand, UsbDevice, UsbHost, create_session_bridge,
};
use protocol::{DEFAULT_BAUD_RATE, EndpointLayout, FilterSet, UsbError};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::oneshot;
use tracing::{debug, info, trace, warn};

/// Default data-event threshold
pub const DEFAULT_BUFFER_SIZE: usize = 1;

/// Options for [`SerialPort::open`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenOptions {
    /// Reuse a previously authorized device instead of prompting
    pub auto_connect: bool,
    pub baud_rate: u32,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            auto_connect: true,
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn auto_connect(mut self, auto_connect: bool) -> Self {
        self.auto_connect = auto_connect;
        self
    }

    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }
}

#[derive(Default)]
enum SessionState {
    #[default]
    Inert,
    /// An open is in flight; the value identifies the attempt
    Connecting(u64),
    Connected(SessionBridge),
}

/// A CDC-ACM serial connection to one USB device
///
/// Clones share the same session.
pub struct SerialPort<H: UsbHost> {
    host: Arc<H>,
    filters: Arc<FilterSet>,
    shared: SharedState,
    layout: Arc<Mutex<EndpointLayout>>,
    state: Arc<Mutex<SessionState>>,
    attempts: Arc<AtomicU64>,
}

impl<H: UsbHost> Clone for SerialPort<H> {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            filters: self.filters.clone(),
            shared: self.shared.clone(),
            layout: self.layout.clone(),
            state: self.state.clone(),
            attempts: self.attempts.clone(),
        }
    }
}

impl<H: UsbHost> std::fmt::Debug for SerialPort<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialPort")
            .field("filters", &self.filters.len())
            .field("layout", &self.layout())
            .field("connected", &self.is_connected())
            .field("available", &self.available())
            .finish()
    }
}

impl<H: UsbHost> SerialPort<H> {
    /// Session accepting the default device table
    pub fn new(host: H) -> Self {
        Self::with_filters(host, FilterSet::default())
    }

    /// Session accepting the default device table plus one extra device
    pub fn with_device(host: H, vendor_id: u16, product_id: u16) -> Self {
        Self::with_filters(host, FilterSet::with_device(vendor_id, product_id))
    }

    pub fn with_filters(host: H, filters: FilterSet) -> Self {
        Self::from_shared_host(Arc::new(host), filters)
    }

    /// Session over a host that is also used elsewhere
    pub fn from_shared_host(host: Arc<H>, filters: FilterSet) -> Self {
        Self {
            host,
            filters: Arc::new(filters),
            shared: SharedState {
                reader: SerialReader::new(),
                handlers: Arc::new(HandlerRegistry::new()),
                buffer_size: Arc::new(AtomicUsize::new(DEFAULT_BUFFER_SIZE)),
            },
            layout: Arc::new(Mutex::new(EndpointLayout::default())),
            state: Arc::new(Mutex::new(SessionState::Inert)),
            attempts: Arc::new(AtomicU64::new(0)),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn filters(&self) -> &FilterSet {
        &self.filters
    }

    /// Whether a device is held and its read loop is still running
    pub fn is_connected(&self) -> bool {
        match &*self.lock_state() {
            SessionState::Connected(bridge) => !bridge.is_closed(),
            _ => false,
        }
    }

    /// Does nothing; there is no server connection to stop
    pub fn stop(&self) {
        debug!("stop() has no effect on a USB serial session");
    }

    /// Select, open and configure a device, then start reading
    ///
    /// Returns once the device is configured or the attempt failed. Does
    /// nothing while a device is held or another open is in flight.
    pub async fn open(&self, options: OpenOptions) {
        let attempt = {
            let mut state = self.lock_state();
            match *state {
                SessionState::Inert => {}
                SessionState::Connecting(_) => {
                    debug!("Open already in progress");
                    return;
                }
                SessionState::Connected(_) => {
                    debug!("Device already open");
                    return;
                }
            }
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            *state = SessionState::Connecting(attempt);
            attempt
        };

        let device = match self.select_device(options.auto_connect).await {
            Ok(device) => device,
            Err(err) => {
                self.abandon(attempt);
                self.report_selection_error(err);
                return;
            }
        };

        let (device, layout) = match self.bring_up(device, options.baud_rate).await {
            Ok(configured) => configured,
            Err(err) => {
                self.abandon(attempt);
                self.shared.handlers.report(err);
                return;
            }
        };

        let (bridge, worker) = create_session_bridge();
        {
            let mut state = self.lock_state();
            if !matches!(*state, SessionState::Connecting(current) if current == attempt) {
                drop(state);
                debug!("Session closed while opening, releasing device");
                Self::release_detached(device, layout.interface_number);
                return;
            }
            *state = SessionState::Connected(bridge);
        }
        *self.layout.lock().unwrap_or_else(|e| e.into_inner()) = layout;

        info!(
            "Serial port open on {} at {} baud",
            device.info().label(),
            options.baud_rate
        );
        self.shared.handlers.emit(Event::Open);

        let read_loop = ReadLoop::new(device, layout, worker, self.shared.clone());
        if let Err(e) = spawn_read_loop(read_loop) {
            // The device was moved into the failed spawn and is closed on drop
            *self.lock_state() = SessionState::Inert;
            self.shared.handlers.report(SerialError::transfer(
                "start_read_loop",
                UsbError::Other {
                    message: e.to_string(),
                },
            ));
        }
    }

    /// [`SerialPort::open`] with a callback stored as the `open` handler
    pub async fn open_with<F>(&self, options: OpenOptions, on_open: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_open(Handler::notify(on_open));
        self.open(options).await;
    }

    fn abandon(&self, attempt: u64) {
        let mut state = self.lock_state();
        if matches!(*state, SessionState::Connecting(current) if current == attempt) {
            *state = SessionState::Inert;
        }
    }

    async fn select_device(&self, auto_connect: bool) -> Result<H::Device, HostError> {
        let host = self.host.clone();
        let filters = self.filters.clone();

        tokio::task::spawn_blocking(move || {
            if auto_connect {
                if let Some(device) = host.authorized_devices()?.into_iter().next() {
                    debug!("Reusing authorized device {}", device.info().label());
                    return Ok(device);
                }
                debug!("No authorized device, asking for permission");
            }
            host.request_device(&filters)
        })
        .await
        .map_err(|e| HostError::Other(format!("Device selection task failed: {}", e)))?
    }

    /// Run the bring-up sequence; on failure the handle is closed again
    async fn bring_up(
        &self,
        device: H::Device,
        baud_rate: u32,
    ) -> Result<(H::Device, EndpointLayout), SerialError> {
        let mut layout = *self.layout.lock().unwrap_or_else(|e| e.into_inner());

        tokio::task::spawn_blocking(move || {
            let mut device = device;
            match setup::configure(&mut device, baud_rate, &mut layout) {
                Ok(()) => Ok((device, layout)),
                Err(err) => {
                    if device.is_opened() {
                        if let Err(e) = device.close() {
                            debug!("Failed to close device after setup error: {}", e);
                        }
                    }
                    Err(err)
                }
            }
        })
        .await
        .map_err(|e| {
            SerialError::transfer(
                "configure",
                UsbError::Other {
                    message: e.to_string(),
                },
            )
        })?
    }

    fn release_detached(device: H::Device, interface: u8) {
        tokio::task::spawn_blocking(move || {
            let mut device = device;
            for error in setup::shutdown(&mut device, interface) {
                debug!("Ignoring error while releasing device: {}", error);
            }
        });
    }

    fn report_selection_error(&self, err: HostError) {
        let error = SerialError::from(err);
        match error {
            SerialError::UserCancelled => debug!("Device chooser dismissed"),
            SerialError::PermissionContext(_) => {
                warn!("Call open() from a key or mouse handler so the device chooser can be shown");
                self.shared.handlers.report(error);
            }
            _ => self.shared.handlers.report(error),
        }
    }

    /// Send bytes to the device
    ///
    /// Without an open device the payload is dropped. Queue and transfer
    /// failures go to the `error` handler.
    pub fn write(&self, data: impl Into<WritePayload>) {
        let bytes = data.into().into_bytes();

        let bridge = match &*self.lock_state() {
            SessionState::Connected(bridge) => bridge.clone(),
            _ => {
                trace!("Not connected, dropping {} bytes", bytes.len());
                return;
            }
        };

        if let Err(e) = bridge.try_send_command(SessionCommand::Write { data: bytes }) {
            self.shared.handlers.report(SerialError::transfer(
                "transfer_out",
                UsbError::Other {
                    message: e.to_string(),
                },
            ));
        }
    }

    /// Drop DTR, close the device and fire `close`
    ///
    /// Always fires the `close` handler, even when nothing was open.
    pub async fn close(&self) {
        let previous = std::mem::take(&mut *self.lock_state());

        match previous {
            SessionState::Connected(bridge) => {
                let (response, done) = oneshot::channel();
                match bridge.send_command(SessionCommand::Close { response }).await {
                    Ok(()) => {
                        if done.await.is_err() {
                            debug!("Read loop exited before acknowledging close");
                        }
                    }
                    Err(e) => debug!("Read loop already gone: {}", e),
                }
                info!("Serial port closed");
            }
            SessionState::Connecting(_) => debug!("Close requested while opening"),
            SessionState::Inert => {}
        }

        self.shared.handlers.emit(Event::Close);
    }

    /// [`SerialPort::close`] with a callback stored as the `close` handler
    pub async fn close_with<F>(&self, on_close: F)
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.on_close(Handler::notify(on_close));
        self.close().await;
    }

    /// Register a handler by event name
    ///
    /// Unknown names are ignored.
    pub fn on(&self, name: &str, handler: Handler) {
        match name.parse::<Event>() {
            Ok(event) => self.on_event(event, handler),
            Err(e) => debug!("{}, handler ignored", e),
        }
    }

    pub fn on_event(&self, event: Event, handler: Handler) {
        self.shared.handlers.set(event, handler);
    }

    pub fn on_open(&self, handler: Handler) {
        self.on_event(Event::Open, handler);
    }

    pub fn on_data(&self, handler: Handler) {
        self.on_event(Event::Data, handler);
    }

    pub fn on_close(&self, handler: Handler) {
        self.on_event(Event::Close, handler);
    }

    pub fn on_error(&self, handler: Handler) {
        self.on_event(Event::Error, handler);
    }

    pub fn on_raw_data(&self, handler: Handler) {
        self.on_event(Event::RawData, handler);
    }

    /// Shared handle to the receive buffer, for use inside handlers
    pub fn reader(&self) -> SerialReader {
        self.shared.reader.clone()
    }

    pub fn read(&self) -> Option<u8> {
        self.shared.reader.read()
    }

    pub fn read_char(&self) -> Option<char> {
        self.shared.reader.read_char()
    }

    pub fn read_bytes(&self) -> Option<Vec<u8>> {
        self.shared.reader.read_bytes()
    }

    pub fn read_bytes_until(&self, marker: u8) -> Option<Vec<u8>> {
        self.shared.reader.read_bytes_until(marker)
    }

    pub fn read_string(&self) -> String {
        self.shared.reader.read_string()
    }

    pub fn read_string_until(&self, marker: &str) -> String {
        self.shared.reader.read_string_until(marker)
    }

    pub fn read_line(&self) -> String {
        self.shared.reader.read_line()
    }

    /// Number of buffered bytes
    pub fn available(&self) -> usize {
        self.shared.reader.available()
    }

    pub fn last(&self) -> Option<u8> {
        self.shared.reader.last()
    }

    pub fn last_char(&self) -> Option<char> {
        self.shared.reader.last_char()
    }

    pub fn clear(&self) {
        self.shared.reader.clear()
    }

    /// Buffer length at which the `data` event starts firing
    pub fn set_buffer_size(&self, size: usize) {
        self.shared.buffer_size.store(size, Ordering::Relaxed);
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.buffer_size.load(Ordering::Relaxed)
    }

    /// Interface and endpoint numbers in use (defaults until a device is opened)
    pub fn layout(&self) -> EndpointLayout {
        *self.layout.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn interface_number(&self) -> u8 {
        self.layout().interface_number
    }

    pub fn endpoint_in(&self) -> u8 {
        self.layout().endpoint_in
    }

    pub fn endpoint_out(&self) -> u8 {
        self.layout().endpoint_out
    }
}
