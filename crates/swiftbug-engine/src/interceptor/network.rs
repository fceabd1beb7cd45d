//! Network interceptor: wraps an HTTP transport so that every logical request
//! produces exactly one record, whatever way it ends.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use swiftbug_common::Settings;
use swiftbug_common::protocol::{CapturedEvent, NetworkRecord, RequestKind};
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::channel::EventSender;

pub const STATIC_EXTENSIONS: [&str; 12] = [
    ".css", ".js", ".png", ".jpg", ".jpeg", ".gif", ".ico", ".svg", ".woff", ".woff2", ".ttf",
    ".eot",
];

pub const TRUNCATED: &str = "[TRUNCATED]";
pub const NON_TEXT_BODY: &str = "[Binary or Non-Text Response]";
pub const BODY_READ_ERROR: &str = "[Error Reading Response]";
pub const NON_STRING_BODY: &str = "[Non-String Body]";
pub const ABORTED: &str = "Request aborted";

static NEXT_REQUEST: AtomicU64 = AtomicU64::new(1);

// ============================================================
// Capture policy
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePolicy {
    pub ignore_static_resources: bool,
    pub capture_all: bool,
    pub max_body_size: usize,
}

impl Default for CapturePolicy {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for CapturePolicy {
    fn from(settings: &Settings) -> Self {
        Self {
            ignore_static_resources: settings.ignore_static_resources,
            capture_all: settings.capture_all_network_requests,
            max_body_size: settings.max_request_body_size.max(1),
        }
    }
}

impl CapturePolicy {
    /// URLs that do not parse are never treated as static.
    pub fn is_static_resource(&self, url: &str) -> bool {
        if !self.ignore_static_resources {
            return false;
        }
        match url::Url::parse(url) {
            Ok(parsed) => {
                let path = parsed.path().to_lowercase();
                STATIC_EXTENSIONS.iter().any(|ext| path.ends_with(ext))
            }
            Err(_) => false,
        }
    }

    pub fn should_capture(&self, record: &NetworkRecord) -> bool {
        self.capture_all || record.is_failure()
    }

    /// Same decision as [`Self::should_capture`], taken before the record
    /// exists.
    pub fn keeps_response(&self, response: &HttpResponse) -> bool {
        self.capture_all || NetworkRecord::is_failed_status(response.status, &response.status_text)
    }

    /// Applies filter, policy and truncation. `None` means the record is not
    /// kept.
    pub fn admit(&self, mut record: NetworkRecord) -> Option<NetworkRecord> {
        if self.is_static_resource(&record.url) || !self.should_capture(&record) {
            return None;
        }
        record.request_body = truncate_body(&record.request_body, self.max_body_size);
        record.response_body = truncate_body(&record.response_body, self.max_body_size);
        Some(record)
    }
}

/// Cuts `body` to at most `max_bytes` (on a char boundary) and appends the
/// truncation marker.
pub fn truncate_body(body: &str, max_bytes: usize) -> String {
    if body.len() <= max_bytes {
        return body.to_string();
    }
    let mut end = max_bytes;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{}", &body[..end], TRUNCATED)
}

pub fn is_text_content_type(content_type: &str) -> bool {
    let ct = content_type.to_ascii_lowercase();
    ct.contains("application/json") || ct.contains("text/") || ct.contains("application/xml")
}

/// Shared sink for network records of one page context. The policy can be
/// swapped at runtime when settings change.
#[derive(Debug)]
pub struct NetworkCapture {
    policy: RwLock<CapturePolicy>,
    events: EventSender,
}

impl NetworkCapture {
    pub fn new(policy: CapturePolicy, events: EventSender) -> Self {
        Self {
            policy: RwLock::new(policy),
            events,
        }
    }

    pub fn policy(&self) -> CapturePolicy {
        match self.policy.read() {
            Ok(p) => p.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_policy(&self, policy: CapturePolicy) {
        match self.policy.write() {
            Ok(mut p) => *p = policy,
            Err(poisoned) => *poisoned.into_inner() = policy,
        }
    }

    /// Returns whether the record passed the policy and was queued.
    pub fn submit(&self, record: NetworkRecord) -> bool {
        match self.policy().admit(record) {
            Some(record) => self.events.emit(CapturedEvent::Network(record)),
            None => false,
        }
    }

    /// Opens the bookkeeping for one request.
    pub fn begin(self: &Arc<Self>, kind: RequestKind, request: &HttpRequest) -> PendingRequest {
        PendingRequest::open(Arc::clone(self), kind, request)
    }
}

// ============================================================
// Transport seam
// ============================================================

#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    Text(String),
    Binary(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<RequestBody>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: "GET".to_string(),
            url: url.into(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    #[error("{0}")]
    Network(String),

    #[error("Request aborted")]
    Aborted,
}

/// The page's native HTTP primitive.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

// ============================================================
// Per-request bookkeeping
// ============================================================

/// Record under construction for one in-flight request.
///
/// Emitted exactly once: by [`PendingRequest::finish`] (or `complete`), or on
/// drop as an aborted network error if the request never finished.
#[derive(Debug)]
pub struct PendingRequest {
    record: Option<NetworkRecord>,
    capture: Arc<NetworkCapture>,
}

impl PendingRequest {
    fn open(capture: Arc<NetworkCapture>, kind: RequestKind, request: &HttpRequest) -> Self {
        let now = Utc::now().timestamp_millis();
        let id = format!(
            "req_{}_{}",
            now,
            NEXT_REQUEST.fetch_add(1, Ordering::Relaxed)
        );
        let request_body = match &request.body {
            Some(RequestBody::Text(s)) => s.clone(),
            Some(RequestBody::Binary(_)) => NON_STRING_BODY.to_string(),
            None => String::new(),
        };
        let record = NetworkRecord {
            id,
            kind,
            url: request.url.clone(),
            method: request.method.to_uppercase(),
            request_headers: request.headers.clone(),
            response_headers: BTreeMap::new(),
            request_body,
            response_body: String::new(),
            status: 0,
            status_text: String::new(),
            start_time: now,
            end_time: 0,
            response_time: 0,
        };
        Self {
            record: Some(record),
            capture,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.record.as_ref().map(|r| r.id.as_str())
    }

    /// Copies the outcome into the record without emitting it.
    pub fn fill(&mut self, outcome: &Result<HttpResponse, TransportError>) {
        let Some(record) = self.record.as_mut() else {
            return;
        };
        stamp_end(record);
        match outcome {
            Ok(response) => {
                record.status = response.status;
                record.status_text = response.status_text.clone();
                record.response_headers = response
                    .headers
                    .iter()
                    .map(|(k, v)| (k.to_lowercase(), v.clone()))
                    .collect();
                let content_type = response.content_type().unwrap_or_default();
                record.response_body = if is_text_content_type(content_type) {
                    String::from_utf8(response.body.clone())
                        .unwrap_or_else(|_| BODY_READ_ERROR.to_string())
                } else {
                    NON_TEXT_BODY.to_string()
                };
            }
            Err(err) => {
                record.status = 0;
                record.status_text = NetworkRecord::NETWORK_ERROR.to_string();
                let message = err.to_string();
                record.response_body = if message.is_empty() {
                    NetworkRecord::NETWORK_ERROR.to_string()
                } else {
                    message
                };
            }
        }
    }

    pub fn finish(mut self) -> bool {
        match self.record.take() {
            Some(record) => self.capture.submit(record),
            None => false,
        }
    }

    pub fn complete(mut self, outcome: &Result<HttpResponse, TransportError>) -> bool {
        self.fill(outcome);
        self.finish()
    }
}

impl Drop for PendingRequest {
    fn drop(&mut self) {
        if let Some(mut record) = self.record.take() {
            if record.end_time == 0 {
                stamp_end(&mut record);
                record.status = 0;
                record.status_text = NetworkRecord::NETWORK_ERROR.to_string();
                record.response_body = ABORTED.to_string();
            }
            self.capture.submit(record);
        }
    }
}

fn stamp_end(record: &mut NetworkRecord) {
    record.end_time = Utc::now().timestamp_millis();
    record.response_time = record.end_time - record.start_time;
}

// ============================================================
// Wrapper
// ============================================================

/// Capability wrapper around the page's HTTP transport. Results and errors
/// from the inner transport are returned untouched.
pub struct NetworkInterceptor<T: HttpTransport> {
    inner: T,
    capture: Arc<NetworkCapture>,
}

impl<T: HttpTransport> NetworkInterceptor<T> {
    pub fn install(inner: T, capture: Arc<NetworkCapture>) -> Self {
        Self { inner, capture }
    }

    pub fn capture(&self) -> &Arc<NetworkCapture> {
        &self.capture
    }

    /// Promise-style call.
    pub async fn fetch(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let pending = self.capture.begin(RequestKind::Fetch, &request);
        let result = self.inner.fetch(request).await;
        pending.complete(&result);
        result
    }

    /// Callback-style call. `on_loadend` runs before the record is emitted.
    pub fn send<F>(self: &Arc<Self>, request: HttpRequest, on_loadend: F) -> JoinHandle<()>
    where
        T: 'static,
        F: FnOnce(Result<HttpResponse, TransportError>) + Send + 'static,
    {
        let this = Arc::clone(self);
        let mut pending = self.capture.begin(RequestKind::Xhr, &request);
        tokio::spawn(async move {
            let result = this.inner.fetch(request).await;
            pending.fill(&result);
            on_loadend(result);
            pending.finish();
        })
    }
}
