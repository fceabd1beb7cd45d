use chrono::Utc;
use swiftbug_common::protocol::{CapturedEvent, ConsoleEntry, LogLevel};

use super::guard::CaptureGuard;
use super::serialize::SafeSerializer;
use super::value::PageValue;
use crate::channel::EventSender;

/// The page's own console entry point, captured at install time.
pub trait ConsoleSink {
    fn write(&self, level: LogLevel, args: &[PageValue]);
}

impl<F> ConsoleSink for F
where
    F: Fn(LogLevel, &[PageValue]),
{
    fn write(&self, level: LogLevel, args: &[PageValue]) {
        self(level, args)
    }
}

/// Capture half of the console interceptor: serializes a call and emits it
/// across the page channel.
#[derive(Debug, Clone)]
pub struct ConsoleCapture {
    serializer: SafeSerializer,
    guard: CaptureGuard,
    events: EventSender,
}

impl ConsoleCapture {
    pub fn new(events: EventSender) -> Self {
        Self {
            serializer: SafeSerializer::default(),
            guard: CaptureGuard::new(),
            events,
        }
    }

    pub fn with_depth_limit(mut self, depth_limit: usize) -> Self {
        self.serializer = SafeSerializer::new(depth_limit);
        self
    }

    pub fn guard(&self) -> &CaptureGuard {
        &self.guard
    }

    /// Returns whether an event was emitted. Calls made while a capture is
    /// already in progress are skipped.
    pub fn record(&self, level: LogLevel, args: &[PageValue]) -> bool {
        if self.guard.is_suppressed() {
            return false;
        }
        let _scope = self.guard.suppress();
        let entry = self.entry(level, args);
        self.events.emit(CapturedEvent::Console(entry))
    }

    pub fn entry(&self, level: LogLevel, args: &[PageValue]) -> ConsoleEntry {
        let mut rendered = Vec::with_capacity(args.len());
        let mut serialized = Vec::with_capacity(args.len());
        for arg in args {
            let (value, text) = self.serializer.serialize_and_render(arg);
            serialized.push(value);
            rendered.push(text);
        }
        ConsoleEntry {
            level,
            timestamp: Utc::now(),
            message: rendered.join(" "),
            args: serialized,
        }
    }

    /// Uncaught exception reported by the page's global error handler.
    pub fn record_uncaught(&self, message: &str, location: Option<(&str, u32, u32)>) -> bool {
        let text = match location {
            Some((file, line, col)) => {
                format!("Uncaught Error: {} at {}:{}:{}", message, file, line, col)
            }
            None => format!("Uncaught Error: {}", message),
        };
        self.record_plain(LogLevel::Error, text)
    }

    pub fn record_rejection(&self, reason: &PageValue) -> bool {
        let text = format!(
            "Unhandled Promise Rejection: {}",
            self.serializer.render(reason)
        );
        self.record_plain(LogLevel::Error, text)
    }

    fn record_plain(&self, level: LogLevel, message: String) -> bool {
        if self.guard.is_suppressed() {
            return false;
        }
        let _scope = self.guard.suppress();
        self.events.emit(CapturedEvent::Console(ConsoleEntry {
            level,
            timestamp: Utc::now(),
            message,
            args: Vec::new(),
        }))
    }
}

/// Console wrapper installed in place of the page's console methods.
///
/// The original sink is held by value; every call reaches it first and
/// unchanged, whether or not the call ends up captured.
pub struct ConsoleInterceptor<S: ConsoleSink> {
    original: S,
    capture: ConsoleCapture,
}

impl<S: ConsoleSink> ConsoleInterceptor<S> {
    pub fn install(original: S, capture: ConsoleCapture) -> Self {
        Self { original, capture }
    }

    pub fn call(&self, level: LogLevel, args: &[PageValue]) {
        self.original.write(level, args);
        self.capture.record(level, args);
    }

    pub fn log(&self, args: &[PageValue]) {
        self.call(LogLevel::Log, args)
    }

    pub fn info(&self, args: &[PageValue]) {
        self.call(LogLevel::Info, args)
    }

    pub fn warn(&self, args: &[PageValue]) {
        self.call(LogLevel::Warn, args)
    }

    pub fn error(&self, args: &[PageValue]) {
        self.call(LogLevel::Error, args)
    }

    pub fn debug(&self, args: &[PageValue]) {
        self.call(LogLevel::Debug, args)
    }

    pub fn capture(&self) -> &ConsoleCapture {
        &self.capture
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{BridgeMessage, page_channel};
    use crate::interceptor::value::ObjectRef;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn drain(inbox: &mut crate::channel::BridgeInbox) -> Vec<ConsoleEntry> {
        let mut out = Vec::new();
        while let Ok(msg) = inbox.try_recv() {
            if let BridgeMessage::Event(CapturedEvent::Console(entry)) = msg {
                out.push(entry);
            }
        }
        out
    }

    #[test]
    fn original_console_receives_every_call() {
        let (tx, mut inbox) = page_channel(16);
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = {
            let seen = seen.clone();
            move |level: LogLevel, args: &[PageValue]| seen.borrow_mut().push((level, args.len()))
        };
        let console = ConsoleInterceptor::install(sink, ConsoleCapture::new(tx));

        console.warn(&[PageValue::from("a"), PageValue::from(2.0)]);
        console.error(&[]);

        assert_eq!(*seen.borrow(), vec![(LogLevel::Warn, 2), (LogLevel::Error, 0)]);
        let entries = drain(&mut inbox);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "a 2");
        assert_eq!(entries[0].level, LogLevel::Warn);
        assert_eq!(entries[0].args, vec![serde_json::json!("a"), serde_json::json!(2)]);
    }

    #[test]
    fn console_calls_from_a_getter_are_not_recaptured() {
        let (tx, mut inbox) = page_channel(16);
        let original_calls = Rc::new(RefCell::new(0usize));
        let sink = {
            let calls = original_calls.clone();
            move |_: LogLevel, _: &[PageValue]| *calls.borrow_mut() += 1
        };
        let console = Rc::new(ConsoleInterceptor::install(sink, ConsoleCapture::new(tx)));

        let obj = ObjectRef::new();
        {
            let console = console.clone();
            obj.define_getter("noisy", move || {
                console.log(&[PageValue::from("from getter")]);
                Ok(PageValue::from("v"))
            });
        }

        console.log(&[PageValue::Object(obj)]);

        // Outer call plus the nested one from the getter.
        assert_eq!(*original_calls.borrow(), 2);
        let entries = drain(&mut inbox);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].args[0], serde_json::json!({"noisy": "v"}));
        assert!(!console.capture().guard().is_suppressed());
    }

    #[test]
    fn getters_run_once_per_captured_call() {
        let (tx, mut inbox) = page_channel(4);
        let capture = ConsoleCapture::new(tx);
        let hits = Rc::new(RefCell::new(0usize));
        let obj = ObjectRef::new();
        {
            let hits = hits.clone();
            obj.define_getter("count", move || {
                *hits.borrow_mut() += 1;
                Ok(PageValue::from(1.0))
            });
        }

        assert!(capture.record(LogLevel::Log, &[PageValue::Object(obj)]));

        assert_eq!(*hits.borrow(), 1);
        let entries = drain(&mut inbox);
        assert_eq!(entries[0].args[0], serde_json::json!({"count": 1}));
        assert_eq!(entries[0].message, "{\n  \"count\": 1\n}");
    }

    #[test]
    fn uncaught_errors_carry_location() {
        let (tx, mut inbox) = page_channel(4);
        let capture = ConsoleCapture::new(tx);
        capture.record_uncaught("boom", Some(("app.js", 10, 4)));
        capture.record_rejection(&PageValue::from("nope"));

        let entries = drain(&mut inbox);
        assert_eq!(entries[0].message, "Uncaught Error: boom at app.js:10:4");
        assert_eq!(entries[0].level, LogLevel::Error);
        assert_eq!(entries[1].message, "Unhandled Promise Rejection: nope");
    }

    #[test]
    fn full_channel_drops_without_blocking() {
        let (tx, mut inbox) = page_channel(1);
        let capture = ConsoleCapture::new(tx);
        assert!(capture.record(LogLevel::Log, &[PageValue::from("first")]));
        assert!(!capture.record(LogLevel::Log, &[PageValue::from("second")]));
        assert_eq!(drain(&mut inbox).len(), 1);
    }
}
