//! Serial Session Integration Tests
//!
//! Drives a `SerialPort` against the in-memory host from `common::test_utils`.
//!
//! # Test Scenarios
//! - Device selection (authorized reuse, permission prompt, failures)
//! - CDC-ACM bring-up on the wire and endpoint discovery
//! - Read loop delivery, thresholds and failure handling
//! - Write conversion and routing
//! - Close sequencing and callbacks
//!
//! Run with: `cargo test -p serial --test session_tests`

use common::{HostError, UsbDevice};
use common::test_utils::{
    DEFAULT_TEST_TIMEOUT, MockDevice, MockHost, create_mock_device_info,
    create_vendor_only_configuration, wait_until,
};
use protocol::{EndpointLayout, SET_CONTROL_LINE_STATE, SET_LINE_CODING, UsbError};
use serial::{Event, Handler, OpenOptions, SerialError, SerialPort};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn prompt_only() -> OpenOptions {
    OpenOptions::default().auto_connect(false)
}

/// Collects everything delivered to the `error` slot
fn collect_errors(port: &SerialPort<MockHost>) -> Arc<Mutex<Vec<SerialError>>> {
    let errors = Arc::new(Mutex::new(Vec::new()));
    let sink = errors.clone();
    port.on_error(Handler::error(move |e| sink.lock().unwrap().push(e.clone())));
    errors
}

fn counter(port: &SerialPort<MockHost>, event: Event) -> Arc<AtomicUsize> {
    let count = Arc::new(AtomicUsize::new(0));
    let c = count.clone();
    port.on_event(
        event,
        Handler::notify(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }),
    );
    count
}

async fn open_leonardo() -> (SerialPort<MockHost>, MockDevice) {
    let device = MockDevice::arduino_leonardo();
    let port = SerialPort::new(MockHost::new().with_requestable(device.clone()));
    port.open(prompt_only()).await;
    assert!(port.is_connected());
    (port, device)
}

// ============================================================================
// Device Selection Tests
// ============================================================================

#[tokio::test]
async fn test_auto_connect_reuses_authorized_device() {
    let device = MockDevice::arduino_leonardo();
    let host = Arc::new(MockHost::new().with_authorized(device.clone()));
    let port = SerialPort::from_shared_host(host.clone(), Default::default());

    port.open(OpenOptions::default()).await;

    assert!(port.is_connected());
    assert_eq!(host.request_count(), 0);
    assert!(device.state().opened);
}

#[tokio::test]
async fn test_prompt_when_auto_connect_disabled() {
    let authorized = MockDevice::arduino_leonardo();
    let requested = MockDevice::arduino_leonardo();
    let host = Arc::new(
        MockHost::new()
            .with_authorized(authorized.clone())
            .with_requestable(requested.clone()),
    );
    let port = SerialPort::from_shared_host(host.clone(), Default::default());

    port.open(prompt_only()).await;

    assert_eq!(host.request_count(), 1);
    assert!(requested.state().opened);
    assert!(!authorized.state().opened);
}

#[tokio::test]
async fn test_prompt_when_nothing_authorized() {
    let device = MockDevice::arduino_leonardo();
    let host = Arc::new(MockHost::new().with_requestable(device.clone()));
    let port = SerialPort::from_shared_host(host.clone(), Default::default());

    port.open(OpenOptions::default()).await;

    assert_eq!(host.request_count(), 1);
    assert!(port.is_connected());
}

#[tokio::test]
async fn test_user_cancel_is_silent() {
    let port = SerialPort::new(MockHost::new().with_request_error(HostError::NoDeviceSelected));
    let errors = collect_errors(&port);
    let opened = counter(&port, Event::Open);

    port.open(prompt_only()).await;

    assert!(!port.is_connected());
    assert!(errors.lock().unwrap().is_empty());
    assert_eq!(opened.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_gesture_required_reported() {
    let port = SerialPort::new(MockHost::new().with_request_error(HostError::GestureRequired));
    let errors = collect_errors(&port);

    port.open(prompt_only()).await;

    let errors = errors.lock().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], SerialError::PermissionContext(_)));
}

#[tokio::test]
async fn test_other_selection_failure_reported() {
    let port = SerialPort::new(
        MockHost::new().with_request_error(HostError::Other("chooser crashed".to_string())),
    );
    let errors = collect_errors(&port);

    port.open(prompt_only()).await;

    let errors = errors.lock().unwrap();
    assert!(matches!(
        errors.as_slice(),
        [SerialError::DeviceSelection(msg)] if msg.contains("chooser crashed")
    ));
}

#[tokio::test]
async fn test_filters_gate_selection() {
    let device = MockDevice::new(
        create_mock_device_info(0xdead, 0xbeef),
        create_vendor_only_configuration(2, 5, 4),
    );

    let port = SerialPort::new(MockHost::new().with_requestable(device.clone()));
    port.open(prompt_only()).await;
    assert!(!port.is_connected());

    let port =
        SerialPort::with_device(MockHost::new().with_requestable(device.clone()), 0xdead, 0xbeef);
    port.open(prompt_only()).await;
    assert!(port.is_connected());
}

#[tokio::test]
async fn test_second_open_is_noop() {
    let device = MockDevice::arduino_leonardo();
    let host = Arc::new(MockHost::new().with_requestable(device.clone()));
    let port = SerialPort::from_shared_host(host.clone(), Default::default());

    tokio::join!(port.open(prompt_only()), port.open(prompt_only()));
    port.open(prompt_only()).await;

    assert_eq!(host.request_count(), 1);
    assert_eq!(device.control_transfers().len(), 2);
}

// ============================================================================
// Bring-up Tests
// ============================================================================

#[tokio::test]
async fn test_open_wire_sequence() {
    let (port, device) = open_leonardo().await;

    let transfers = device.control_transfers();
    assert_eq!(transfers.len(), 2);

    let (dtr, data) = &transfers[0];
    assert_eq!(
        (dtr.request_type, dtr.request, dtr.value, dtr.index),
        (0x21, SET_CONTROL_LINE_STATE, 1, 2)
    );
    assert!(data.is_empty());

    let (coding, data) = &transfers[1];
    assert_eq!(
        (coding.request_type, coding.request, coding.value, coding.index),
        (0x21, SET_LINE_CODING, 0, 2)
    );
    assert_eq!(data, &vec![0x80, 0x25, 0x00, 0x00, 0x00, 0x00, 0x08]);

    assert_eq!(port.layout(), EndpointLayout::default());
    port.close().await;
}

#[tokio::test]
async fn test_open_discovers_endpoints() {
    let device = MockDevice::new(
        create_mock_device_info(0x2341, 0x8036),
        create_vendor_only_configuration(0, 3, 2),
    );
    let port = SerialPort::new(MockHost::new().with_requestable(device.clone()));

    port.open(prompt_only()).await;

    assert_eq!(port.interface_number(), 0);
    assert_eq!(port.endpoint_in(), 3);
    assert_eq!(port.endpoint_out(), 2);

    port.write(42);
    assert!(
        wait_until(DEFAULT_TEST_TIMEOUT, || !device.out_transfers().is_empty()).await
    );
    assert_eq!(device.out_transfers(), vec![(2, vec![42])]);
    port.close().await;
}

#[tokio::test]
async fn test_open_selects_configuration_when_unset() {
    let device = MockDevice::arduino_leonardo().unconfigured();
    let port = SerialPort::new(MockHost::new().with_requestable(device.clone()));

    port.open(prompt_only()).await;

    assert!(port.is_connected());
    assert!(device.calls().contains(&"select_configuration"));
    assert_eq!(device.configuration().map(|c| c.value), Some(1));
    port.close().await;
}

#[tokio::test]
async fn test_open_baud_rate() {
    let device = MockDevice::arduino_leonardo();
    let port = SerialPort::new(MockHost::new().with_requestable(device.clone()));

    port.open(prompt_only().baud_rate(115_200)).await;

    let (_, data) = device.control_transfers().pop().unwrap();
    assert_eq!(data, vec![0x00, 0xC2, 0x01, 0x00, 0x00, 0x00, 0x08]);
    port.close().await;
}

#[tokio::test]
async fn test_open_callback_after_configure() {
    let device = MockDevice::arduino_leonardo();
    let port = SerialPort::new(MockHost::new().with_requestable(device.clone()));

    let seen = Arc::new(Mutex::new(None));
    let s = seen.clone();
    let probe = device.clone();
    port.open_with(prompt_only(), move || {
        *s.lock().unwrap() = Some(probe.control_transfers().len());
    })
    .await;

    assert_eq!(*seen.lock().unwrap(), Some(2));
    port.close().await;
}

#[tokio::test]
async fn test_configure_failure_closes_device() {
    let device = MockDevice::arduino_leonardo().fail_control_with(UsbError::Pipe);
    let port = SerialPort::new(MockHost::new().with_requestable(device.clone()));
    let errors = collect_errors(&port);
    let opened = counter(&port, Event::Open);

    port.open(prompt_only()).await;

    assert!(!port.is_connected());
    assert!(!device.state().opened);
    assert_eq!(opened.load(Ordering::SeqCst), 0);
    assert_eq!(
        *errors.lock().unwrap(),
        vec![SerialError::Transfer {
            operation: "set_control_line_state",
            source: UsbError::Pipe,
        }]
    );

    // The session is usable again
    device.state().fail_control = None;
    port.open(prompt_only()).await;
    assert!(port.is_connected());
    port.close().await;
}

// ============================================================================
// Read Loop Tests
// ============================================================================

#[tokio::test]
async fn test_bytes_arrive_in_order() {
    let (port, device) = open_leonardo().await;

    device.push_inbound(b"hel");
    device.push_inbound(b"lo");

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || port.available() == 5).await);
    assert_eq!(port.read_bytes(), Some(b"hello".to_vec()));
    assert_eq!(port.available(), 0);
    port.close().await;
}

#[tokio::test]
async fn test_read_requests_64_bytes_from_in_endpoint() {
    let (port, device) = open_leonardo().await;

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || device.in_request_count() > 0).await);
    let (endpoint, length) = device.state().in_requests[0];
    assert_eq!((endpoint, length), (5, 64));
    port.close().await;
}

#[tokio::test]
async fn test_data_event_threshold() {
    let device = MockDevice::arduino_leonardo();
    let port = SerialPort::new(MockHost::new().with_requestable(device.clone()));
    port.set_buffer_size(3);
    let data_events = counter(&port, Event::Data);

    let raw = Arc::new(Mutex::new(Vec::new()));
    let r = raw.clone();
    port.on("rawdata", Handler::byte(move |b| r.lock().unwrap().push(b)));

    port.open(prompt_only()).await;
    device.push_inbound(b"abcd");

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || raw.lock().unwrap().len() == 4).await);
    // Fires for the third and fourth byte
    assert_eq!(data_events.load(Ordering::SeqCst), 2);
    assert_eq!(*raw.lock().unwrap(), b"abcd".to_vec());
    port.close().await;
}

#[tokio::test]
async fn test_data_handler_drains_lines() {
    let (port, device) = open_leonardo().await;

    let lines = Arc::new(Mutex::new(Vec::new()));
    let l = lines.clone();
    let reader = port.reader();
    port.on_data(Handler::notify(move || {
        let line = reader.read_line();
        if !line.is_empty() {
            l.lock().unwrap().push(line);
        }
    }));

    device.push_inbound(b"12,34\n56");
    device.push_inbound(b",78\n");

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || lines.lock().unwrap().len() == 2).await);
    assert_eq!(*lines.lock().unwrap(), vec!["12,34", "56,78"]);
    port.close().await;
}

#[tokio::test]
async fn test_panicking_data_handler_keeps_bytes() {
    let (port, device) = open_leonardo().await;

    let calls = Arc::new(AtomicUsize::new(0));
    let c = calls.clone();
    port.on_data(Handler::notify(move || {
        if c.fetch_add(1, Ordering::SeqCst) == 0 {
            panic!("handler bug on first byte");
        }
    }));

    device.push_inbound(b"abc");
    device.push_inbound(b"d");

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || port.available() == 4).await);
    assert_eq!(port.read_string(), "abcd");
    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert!(port.is_connected());
    port.close().await;
}

#[tokio::test]
async fn test_read_failure_reported_once() {
    let (port, device) = open_leonardo().await;
    let errors = collect_errors(&port);

    device.push_inbound_error(UsbError::NoDevice);
    device.push_inbound(b"never read");

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || !errors.lock().unwrap().is_empty()).await);
    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(
        *errors.lock().unwrap(),
        vec![SerialError::Transfer {
            operation: "transfer_in",
            source: UsbError::NoDevice,
        }]
    );
    assert_eq!(device.pending_inbound(), 1);
    assert_eq!(port.available(), 0);
}

#[tokio::test]
async fn test_last_discards_buffer() {
    let (port, device) = open_leonardo().await;

    device.push_inbound(b"xyz");
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || port.available() == 3).await);

    assert_eq!(port.last_char(), Some('z'));
    assert_eq!(port.available(), 0);
    assert_eq!(port.read(), None);
    port.close().await;
}

// ============================================================================
// Write Tests
// ============================================================================

#[tokio::test]
async fn test_write_single_byte() {
    let (port, device) = open_leonardo().await;

    port.write(42);

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || !device.out_transfers().is_empty()).await);
    assert_eq!(device.out_transfers(), vec![(4, vec![42])]);
    port.close().await;
}

#[tokio::test]
async fn test_write_payload_kinds_in_order() {
    let (port, device) = open_leonardo().await;

    port.write("hi");
    port.write(vec![1, 2, 300]);
    port.write(&b"\x00\xff"[..]);

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || device.out_transfers().len() == 3).await);
    assert_eq!(
        device.out_transfers(),
        vec![
            (4, b"hi".to_vec()),
            (4, vec![1, 2, 44]),
            (4, vec![0x00, 0xff]),
        ]
    );
    port.close().await;
}

#[tokio::test]
async fn test_write_non_finite_sends_zero() {
    let (port, device) = open_leonardo().await;
    let errors = collect_errors(&port);

    port.write(f64::NAN);
    port.write(vec![f64::INFINITY, 66.6]);

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || device.out_transfers().len() == 2).await);
    assert_eq!(device.out_transfers(), vec![(4, vec![0]), (4, vec![0, 66])]);
    assert!(errors.lock().unwrap().is_empty());
    port.close().await;
}

#[tokio::test]
async fn test_write_failure_reported() {
    let device = MockDevice::arduino_leonardo().fail_writes_with(UsbError::Pipe);
    let port = SerialPort::new(MockHost::new().with_requestable(device.clone()));
    let errors = collect_errors(&port);
    port.open(prompt_only()).await;

    port.write("x");

    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || !errors.lock().unwrap().is_empty()).await);
    assert_eq!(
        errors.lock().unwrap()[0],
        SerialError::Transfer {
            operation: "transfer_out",
            source: UsbError::Pipe,
        }
    );
    port.close().await;
}

#[tokio::test]
async fn test_write_after_close_dropped() {
    let (port, device) = open_leonardo().await;
    port.close().await;

    port.write(7);
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(device.out_transfers().is_empty());
}

// ============================================================================
// Close Tests
// ============================================================================

#[tokio::test]
async fn test_close_clears_dtr_then_closes() {
    let (port, device) = open_leonardo().await;
    let errors = collect_errors(&port);
    let closed = counter(&port, Event::Close);

    port.close().await;

    assert!(!port.is_connected());
    assert!(!device.state().opened);
    assert_eq!(closed.load(Ordering::SeqCst), 1);

    let transfers = device.control_transfers();
    assert_eq!(transfers.len(), 3);
    let (clear, data) = &transfers[2];
    assert_eq!(
        (clear.request_type, clear.request, clear.value, clear.index),
        (0x21, SET_CONTROL_LINE_STATE, 0, 2)
    );
    assert!(data.is_empty());

    // Stopping the loop is explicit, so no transfer error follows the close
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(errors.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_close_without_device_fires_callback() {
    let port = SerialPort::new(MockHost::new());

    let closed = Arc::new(AtomicUsize::new(0));
    let c = closed.clone();
    port.close_with(move || {
        c.fetch_add(1, Ordering::SeqCst);
    })
    .await;

    assert_eq!(closed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_after_disconnect_routes_errors() {
    let (port, device) = open_leonardo().await;
    let errors = collect_errors(&port);
    let closed = counter(&port, Event::Close);

    device.state().fail_control = Some(UsbError::NoDevice);
    port.close().await;

    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert!(!device.state().opened);
    assert_eq!(
        *errors.lock().unwrap(),
        vec![SerialError::Transfer {
            operation: "set_control_line_state",
            source: UsbError::NoDevice,
        }]
    );
}

#[tokio::test]
async fn test_close_while_opening_releases_device() {
    let device = MockDevice::arduino_leonardo();
    let port = SerialPort::new(MockHost::new().with_requestable(device.clone()));
    let open_events = counter(&port, Event::Open);

    let opening = tokio::spawn({
        let port = port.clone();
        async move { port.open(prompt_only()).await }
    });
    tokio::task::yield_now().await;
    port.close().await;
    opening.await.unwrap();

    assert!(!port.is_connected());
    assert_eq!(open_events.load(Ordering::SeqCst), 0);
    // The in-flight open hands the device back on a blocking thread
    assert!(wait_until(DEFAULT_TEST_TIMEOUT, || !device.state().opened).await);
    assert_eq!(device.calls().last(), Some(&"close"));
    port.close().await;
}

#[tokio::test]
async fn test_reopen_after_close() {
    let (port, device) = open_leonardo().await;
    port.close().await;

    port.open(prompt_only()).await;

    assert!(port.is_connected());
    assert!(device.state().opened);
    port.close().await;
}

#[tokio::test]
async fn test_stop_is_noop() {
    let (port, _device) = open_leonardo().await;
    port.stop();
    assert!(port.is_connected());
    port.close().await;
}
