//! Event handlers
//!
//! Each event has a single handler slot. Registering again replaces the
//! previous handler; there is no fan-out.

use crate::error::SerialError;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{debug, trace, warn};

/// Events a session can emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Event {
    /// Device opened and configured
    Open,
    /// Buffer reached the data threshold (fires per received byte)
    Data,
    /// Session closed
    Close,
    /// Something failed
    Error,
    /// Accepted for compatibility, never emitted
    List,
    /// Accepted for compatibility, never emitted
    Connected,
    /// One received byte, regardless of the data threshold
    RawData,
}

impl Event {
    pub const ALL: [Event; 7] = [
        Event::Open,
        Event::Data,
        Event::Close,
        Event::Error,
        Event::List,
        Event::Connected,
        Event::RawData,
    ];

    /// Name accepted by [`crate::SerialPort::on`]
    pub fn name(&self) -> &'static str {
        match self {
            Event::Open => "open",
            Event::Data => "data",
            Event::Close => "close",
            Event::Error => "error",
            Event::List => "list",
            Event::Connected => "connected",
            Event::RawData => "rawdata",
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned for an event name outside the fixed set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownEvent(pub String);

impl fmt::Display for UnknownEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unknown event '{}'", self.0)
    }
}

impl std::error::Error for UnknownEvent {}

impl FromStr for Event {
    type Err = UnknownEvent;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Event::ALL
            .into_iter()
            .find(|event| event.name() == s)
            .ok_or_else(|| UnknownEvent(s.to_string()))
    }
}

/// A registered callback
///
/// A `Notify` handler can sit in any slot and ignores the event's argument.
/// `Error` and `Byte` handlers only run when their argument is delivered.
#[derive(Clone)]
pub enum Handler {
    Notify(Arc<dyn Fn() + Send + Sync>),
    Error(Arc<dyn Fn(&SerialError) + Send + Sync>),
    Byte(Arc<dyn Fn(u8) + Send + Sync>),
}

impl Handler {
    pub fn notify<F>(f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Handler::Notify(Arc::new(f))
    }

    pub fn error<F>(f: F) -> Self
    where
        F: Fn(&SerialError) + Send + Sync + 'static,
    {
        Handler::Error(Arc::new(f))
    }

    pub fn byte<F>(f: F) -> Self
    where
        F: Fn(u8) + Send + Sync + 'static,
    {
        Handler::Byte(Arc::new(f))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Handler::Notify(_) => "Notify",
            Handler::Error(_) => "Error",
            Handler::Byte(_) => "Byte",
        };
        f.debug_tuple("Handler").field(&kind).finish()
    }
}

/// Single-slot handler table shared by a session and its read loop
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    slots: Mutex<HashMap<Event, Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `handler` for `event`, replacing any previous one
    pub fn set(&self, event: Event, handler: Handler) {
        trace!("Registering {:?} for '{}'", handler, event);
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(event, handler);
    }

    pub fn is_registered(&self, event: Event) -> bool {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&event)
    }

    // Cloned out so the lock is released before the handler runs
    fn get(&self, event: Event) -> Option<Handler> {
        self.slots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&event)
            .cloned()
    }

    /// Emit an event without argument; returns whether a handler ran
    pub fn emit(&self, event: Event) -> bool {
        match self.get(event) {
            Some(Handler::Notify(f)) => {
                f();
                true
            }
            Some(other) => {
                trace!("Handler {:?} for '{}' expects an argument", other, event);
                false
            }
            None => false,
        }
    }

    /// Emit an event carrying one byte; returns whether a handler ran
    pub fn emit_byte(&self, event: Event, byte: u8) -> bool {
        match self.get(event) {
            Some(Handler::Notify(f)) => {
                f();
                true
            }
            Some(Handler::Byte(f)) => {
                f(byte);
                true
            }
            Some(other) => {
                trace!("Handler {:?} for '{}' cannot take a byte", other, event);
                false
            }
            None => false,
        }
    }

    /// Deliver an error to the `error` handler; returns whether a handler ran
    pub fn emit_error(&self, error: &SerialError) -> bool {
        match self.get(Event::Error) {
            Some(Handler::Notify(f)) => {
                f();
                true
            }
            Some(Handler::Error(f)) => {
                f(error);
                true
            }
            Some(other) => {
                trace!("Handler {:?} for 'error' cannot take an error", other);
                false
            }
            None => false,
        }
    }

    /// Deliver an error, or log it when nobody is listening
    ///
    /// Payload conversion failures are dropped quietly; everything else is
    /// logged as a warning.
    pub fn report(&self, error: SerialError) {
        if self.emit_error(&error) {
            debug!("Delivered error to handler: {}", error);
            return;
        }

        match error {
            SerialError::DataConversion(_) => debug!("Dropped write: {}", error),
            SerialError::UserCancelled => debug!("{}", error),
            _ => warn!("{}", error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::UsbError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_event_names_round_trip() {
        for event in Event::ALL {
            assert_eq!(event.name().parse::<Event>(), Ok(event));
        }
        assert_eq!("rawdata".parse::<Event>(), Ok(Event::RawData));
        assert!("rawData".parse::<Event>().is_err());
        assert!("registerClient".parse::<Event>().is_err());
    }

    #[test]
    fn test_last_registration_wins() {
        let registry = HandlerRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = first.clone();
        registry.set(Event::Data, Handler::notify(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        let s = second.clone();
        registry.set(Event::Data, Handler::notify(move || {
            s.fetch_add(1, Ordering::SeqCst);
        }));

        assert!(registry.emit(Event::Data));
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_emit_without_handler() {
        let registry = HandlerRegistry::new();
        assert!(!registry.emit(Event::Open));
        assert!(!registry.emit_byte(Event::RawData, 1));
        assert!(!registry.emit_error(&SerialError::UserCancelled));
    }

    #[test]
    fn test_byte_handler_receives_value() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        registry.set(Event::RawData, Handler::byte(move |b| s.lock().unwrap().push(b)));

        registry.emit_byte(Event::RawData, 7);
        registry.emit_byte(Event::RawData, 9);
        assert_eq!(*seen.lock().unwrap(), vec![7, 9]);

        // A byte handler is not invoked without its argument
        assert!(!registry.emit(Event::RawData));
    }

    #[test]
    fn test_error_handler_receives_error() {
        let registry = HandlerRegistry::new();
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        registry.set(Event::Error, Handler::error(move |e| {
            *s.lock().unwrap() = Some(e.clone());
        }));

        let err = SerialError::transfer("transfer_out", UsbError::Pipe);
        assert!(registry.emit_error(&err));
        assert_eq!(*seen.lock().unwrap(), Some(err));
    }

    #[test]
    fn test_notify_handler_in_error_slot() {
        let registry = HandlerRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        registry.set(Event::Error, Handler::notify(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));

        registry.report(SerialError::DataConversion("NaN".to_string()));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_may_reenter_registry() {
        let registry = Arc::new(HandlerRegistry::new());
        let inner = registry.clone();
        registry.set(Event::Open, Handler::notify(move || {
            inner.set(Event::Close, Handler::notify(|| {}));
        }));

        assert!(registry.emit(Event::Open));
        assert!(registry.is_registered(Event::Close));
    }
}
