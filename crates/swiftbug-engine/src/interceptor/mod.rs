//! Page-context interceptors for console and network calls.

pub mod console;
pub mod guard;
pub mod network;
pub mod remote;
pub mod serialize;
pub mod value;

pub use console::{ConsoleCapture, ConsoleInterceptor, ConsoleSink};
pub use guard::CaptureGuard;
pub use network::{
    CapturePolicy, HttpRequest, HttpResponse, HttpTransport, NetworkCapture, NetworkInterceptor,
    PendingRequest, RequestBody, TransportError,
};
pub use serialize::SafeSerializer;
pub use value::{HostKind, ObjectRef, PageValue};
