//! Test utilities for webusb-serial
//!
//! Provides an in-memory [`MockHost`] and [`MockDevice`] implementing the host
//! traits, plus descriptor builders and helpers for async tests.
//!
//! # Example
//!
//! ```
//! use common::test_utils::{MockDevice, MockHost, create_mock_device_info};
//! use common::{UsbDevice, UsbHost};
//! use protocol::FilterSet;
//!
//! let device = MockDevice::arduino_leonardo();
//! let host = MockHost::new().with_requestable(device.clone());
//!
//! let picked = host.request_device(&FilterSet::default()).unwrap();
//! assert_eq!(picked.info(), create_mock_device_info(0x2341, 0x8036));
//! ```

use crate::host::{HostError, UsbDevice, UsbHost};
use protocol::{
    AlternateInfo, ConfigurationInfo, ControlSetup, DeviceInfo, Direction, EndpointInfo,
    FilterSet, InterfaceInfo, TransferKind, UsbError, VENDOR_SPECIFIC_CLASS,
};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Default test timeout (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an idle mock IN transfer waits before returning empty
const MOCK_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Create a mock DeviceInfo for testing
pub fn create_mock_device_info(vendor_id: u16, product_id: u16) -> DeviceInfo {
    DeviceInfo {
        vendor_id,
        product_id,
        manufacturer: Some("Test Manufacturer".to_string()),
        product: Some(format!("Test Product {:04x}", product_id)),
        serial_number: Some("SN000001".to_string()),
    }
}

fn bulk(number: u8, direction: Direction) -> EndpointInfo {
    EndpointInfo {
        number,
        direction,
        kind: TransferKind::Bulk,
    }
}

fn single_alternate(number: u8, class: u8, endpoints: Vec<EndpointInfo>) -> InterfaceInfo {
    InterfaceInfo {
        number,
        alternates: vec![AlternateInfo {
            setting: 0,
            class,
            subclass: 0,
            protocol: 0,
            endpoints,
        }],
    }
}

/// Configuration laid out like the WebUSB Arduino firmware
///
/// Interface 0 is CDC communications (interrupt IN 3), interface 1 is CDC
/// data (bulk 2/2) and `interface` is the vendor-specific serial interface
/// with bulk IN `endpoint_in` and bulk OUT `endpoint_out`.
pub fn create_mock_configuration(
    interface: u8,
    endpoint_in: u8,
    endpoint_out: u8,
) -> ConfigurationInfo {
    ConfigurationInfo {
        value: 1,
        interfaces: vec![
            single_alternate(
                0,
                0x02,
                vec![EndpointInfo {
                    number: 3,
                    direction: Direction::In,
                    kind: TransferKind::Interrupt,
                }],
            ),
            single_alternate(1, 0x0A, vec![bulk(2, Direction::In), bulk(2, Direction::Out)]),
            single_alternate(
                interface,
                VENDOR_SPECIFIC_CLASS,
                vec![bulk(endpoint_in, Direction::In), bulk(endpoint_out, Direction::Out)],
            ),
        ],
    }
}

/// Configuration with a single vendor-specific interface
pub fn create_vendor_only_configuration(
    interface: u8,
    endpoint_in: u8,
    endpoint_out: u8,
) -> ConfigurationInfo {
    ConfigurationInfo {
        value: 1,
        interfaces: vec![single_alternate(
            interface,
            VENDOR_SPECIFIC_CLASS,
            vec![bulk(endpoint_in, Direction::In), bulk(endpoint_out, Direction::Out)],
        )],
    }
}

/// Recorded state of a [`MockDevice`]
#[derive(Debug, Default)]
pub struct MockState {
    pub info: Option<DeviceInfo>,
    pub opened: bool,
    /// Active configuration
    pub configuration: Option<ConfigurationInfo>,
    /// Configurations the device can switch to
    pub configurations: Vec<ConfigurationInfo>,
    pub claimed: Vec<u8>,
    /// (interface, alternate setting) selections in order
    pub alternates: Vec<(u8, u8)>,
    /// Every control transfer with its data stage
    pub control_transfers: Vec<(ControlSetup, Vec<u8>)>,
    /// Every OUT transfer as (endpoint, data)
    pub out_transfers: Vec<(u8, Vec<u8>)>,
    /// Every IN transfer request as (endpoint, length)
    pub in_requests: Vec<(u8, usize)>,
    /// Scripted results for IN transfers
    pub inbound: VecDeque<Result<Vec<u8>, UsbError>>,
    /// Method names in call order
    pub calls: Vec<&'static str>,
    pub fail_open: Option<UsbError>,
    pub fail_control: Option<UsbError>,
    pub fail_close: Option<UsbError>,
    pub fail_out: Option<UsbError>,
}

/// Scriptable in-memory device
///
/// Clones share state, so a test can keep one clone to inspect what a session
/// did with the other.
#[derive(Debug, Clone)]
pub struct MockDevice {
    state: Arc<Mutex<MockState>>,
}

impl MockDevice {
    /// Configured device with the given active configuration
    pub fn new(info: DeviceInfo, configuration: ConfigurationInfo) -> Self {
        let state = MockState {
            info: Some(info),
            configuration: Some(configuration.clone()),
            configurations: vec![configuration],
            ..MockState::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Leonardo running the WebUSB demo firmware (interface 2, endpoints 5/4)
    pub fn arduino_leonardo() -> Self {
        Self::new(
            create_mock_device_info(0x2341, 0x8036),
            create_mock_configuration(2, 5, 4),
        )
    }

    /// Start without an active configuration
    pub fn unconfigured(self) -> Self {
        self.state().configuration = None;
        self
    }

    /// Make `open` fail
    pub fn fail_open_with(self, error: UsbError) -> Self {
        self.state().fail_open = Some(error);
        self
    }

    /// Make every control transfer fail
    pub fn fail_control_with(self, error: UsbError) -> Self {
        self.state().fail_control = Some(error);
        self
    }

    /// Make `close` fail (the handle is still marked closed)
    pub fn fail_close_with(self, error: UsbError) -> Self {
        self.state().fail_close = Some(error);
        self
    }

    /// Make every OUT transfer fail
    pub fn fail_writes_with(self, error: UsbError) -> Self {
        self.state().fail_out = Some(error);
        self
    }

    /// Queue bytes to be returned by one IN transfer
    pub fn push_inbound(&self, data: &[u8]) {
        self.state().inbound.push_back(Ok(data.to_vec()));
    }

    /// Queue a failing IN transfer
    pub fn push_inbound_error(&self, error: UsbError) {
        self.state().inbound.push_back(Err(error));
    }

    /// Lock the shared state
    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn control_transfers(&self) -> Vec<(ControlSetup, Vec<u8>)> {
        self.state().control_transfers.clone()
    }

    pub fn out_transfers(&self) -> Vec<(u8, Vec<u8>)> {
        self.state().out_transfers.clone()
    }

    pub fn calls(&self) -> Vec<&'static str> {
        self.state().calls.clone()
    }

    /// Number of scripted IN results not yet consumed
    pub fn pending_inbound(&self) -> usize {
        self.state().inbound.len()
    }

    pub fn in_request_count(&self) -> usize {
        self.state().in_requests.len()
    }
}

impl UsbDevice for MockDevice {
    fn info(&self) -> DeviceInfo {
        self.state()
            .info
            .clone()
            .unwrap_or_else(|| create_mock_device_info(0, 0))
    }

    fn open(&mut self) -> Result<(), UsbError> {
        let mut state = self.state();
        state.calls.push("open");
        if let Some(error) = state.fail_open.clone() {
            return Err(error);
        }
        state.opened = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), UsbError> {
        let mut state = self.state();
        state.calls.push("close");
        state.opened = false;
        state.claimed.clear();
        match state.fail_close.clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn is_opened(&self) -> bool {
        self.state().opened
    }

    fn configuration(&self) -> Option<ConfigurationInfo> {
        self.state().configuration.clone()
    }

    fn select_configuration(&mut self, value: u8) -> Result<(), UsbError> {
        let mut state = self.state();
        state.calls.push("select_configuration");
        if !state.opened {
            return Err(UsbError::NotOpen);
        }
        let config = state
            .configurations
            .iter()
            .find(|c| c.value == value)
            .cloned()
            .ok_or(UsbError::NotFound)?;
        state.configuration = Some(config);
        Ok(())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), UsbError> {
        let mut state = self.state();
        state.calls.push("claim_interface");
        if !state.opened {
            return Err(UsbError::NotOpen);
        }
        state.claimed.push(interface);
        Ok(())
    }

    fn select_alternate_interface(&mut self, interface: u8, setting: u8) -> Result<(), UsbError> {
        let mut state = self.state();
        state.calls.push("select_alternate_interface");
        if !state.claimed.contains(&interface) {
            return Err(UsbError::InvalidParam);
        }
        state.alternates.push((interface, setting));
        Ok(())
    }

    fn control_transfer_out(&mut self, setup: ControlSetup, data: &[u8]) -> Result<(), UsbError> {
        let mut state = self.state();
        state.calls.push("control_transfer_out");
        if !state.opened {
            return Err(UsbError::NotOpen);
        }
        if let Some(error) = state.fail_control.clone() {
            return Err(error);
        }
        state.control_transfers.push((setup, data.to_vec()));
        Ok(())
    }

    fn transfer_in(&mut self, endpoint: u8, length: usize) -> Result<Vec<u8>, UsbError> {
        let next = {
            let mut state = self.state();
            if !state.opened {
                return Err(UsbError::NotOpen);
            }
            state.in_requests.push((endpoint, length));
            state.inbound.pop_front()
        };

        match next {
            Some(Ok(mut data)) => {
                data.truncate(length);
                Ok(data)
            }
            Some(Err(error)) => Err(error),
            None => {
                std::thread::sleep(MOCK_POLL_INTERVAL);
                Ok(Vec::new())
            }
        }
    }

    fn transfer_out(&mut self, endpoint: u8, data: &[u8]) -> Result<usize, UsbError> {
        let mut state = self.state();
        state.calls.push("transfer_out");
        if !state.opened {
            return Err(UsbError::NotOpen);
        }
        if let Some(error) = state.fail_out.clone() {
            return Err(error);
        }
        state.out_transfers.push((endpoint, data.to_vec()));
        Ok(data.len())
    }
}

/// In-memory host
#[derive(Debug, Default)]
pub struct MockHost {
    authorized: Mutex<Vec<MockDevice>>,
    requestable: Mutex<Option<MockDevice>>,
    request_error: Mutex<Option<HostError>>,
    requests: AtomicUsize,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device that was authorized earlier
    pub fn with_authorized(self, device: MockDevice) -> Self {
        self.authorized
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(device);
        self
    }

    /// Device the "user" picks when prompted
    pub fn with_requestable(self, device: MockDevice) -> Self {
        *self.requestable.lock().unwrap_or_else(|e| e.into_inner()) = Some(device);
        self
    }

    /// Make every prompt fail
    pub fn with_request_error(self, error: HostError) -> Self {
        *self.request_error.lock().unwrap_or_else(|e| e.into_inner()) = Some(error);
        self
    }

    /// Number of permission prompts shown so far
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl UsbHost for MockHost {
    type Device = MockDevice;

    fn authorized_devices(&self) -> Result<Vec<MockDevice>, HostError> {
        Ok(self
            .authorized
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn request_device(&self, filters: &FilterSet) -> Result<MockDevice, HostError> {
        self.requests.fetch_add(1, Ordering::SeqCst);

        if let Some(error) = self
            .request_error
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
        {
            return Err(error);
        }

        let requestable = self.requestable.lock().unwrap_or_else(|e| e.into_inner());
        match requestable.as_ref() {
            Some(device) => {
                let info = device.info();
                if filters.matches(info.vendor_id, info.product_id) {
                    Ok(device.clone())
                } else {
                    Err(HostError::NoDeviceSelected)
                }
            }
            None => Err(HostError::NoDeviceSelected),
        }
    }
}

/// Timeout wrapper for async tests
///
/// Wraps an async operation with a timeout to prevent tests from hanging.
pub async fn with_timeout<T, F>(duration: Duration, future: F) -> Result<T, TimeoutError>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| TimeoutError { duration })
}

/// Poll `condition` until it holds or `duration` elapses
pub async fn wait_until<F>(duration: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + duration;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}

/// Error returned when a test times out
#[derive(Debug)]
pub struct TimeoutError {
    /// The timeout duration that was exceeded
    pub duration: Duration,
}

impl std::fmt::Display for TimeoutError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Test timed out after {:?}", self.duration)
    }
}

impl std::error::Error for TimeoutError {}
