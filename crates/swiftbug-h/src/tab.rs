//! Per-tab capture: DevTools events feed the tab's page context.
//!
//! Console calls, uncaught exceptions and XHR/fetch traffic are observed
//! through the protocol instead of wrapping page globals, so the page's own
//! console and transport are never touched. A main-frame navigation starts a
//! fresh page context, matching a content script's lifetime.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    self, EventLoadingFailed, EventLoadingFinished, EventRequestWillBeSent,
    EventResponseReceived, GetResponseBodyParams, Headers, RequestId, ResourceType,
};
use chromiumoxide::cdp::browser_protocol::page::{
    EventFrameNavigated, EventJavascriptDialogOpening, EventLoadEventFired,
    HandleJavaScriptDialogParams,
};
use chromiumoxide::cdp::js_protocol::runtime::{
    self, ConsoleApiCalledType, EventConsoleApiCalled, EventExceptionThrown, ExceptionDetails,
    RemoteObject,
};
use chromiumoxide::error::CdpError;
use futures::StreamExt;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use swiftbug_engine::bridge::{NoiseFilter, PageContext};
use swiftbug_engine::config::schema::CaptureConfig;
use swiftbug_engine::interceptor::network::is_text_content_type;
use swiftbug_engine::interceptor::remote::from_remote_object;
use swiftbug_engine::interceptor::{
    CapturePolicy, ConsoleCapture, HttpRequest, HttpResponse, NetworkCapture, PageValue,
    PendingRequest, RequestBody, TransportError,
};
use swiftbug_engine::protocol::{LogLevel, RequestKind, TabId, TabStatus, TabUpdate};
use swiftbug_engine::Settings;
use tokio::sync::{RwLock, broadcast};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

type ContextSlot = Arc<RwLock<Arc<PageContext>>>;

/// State shared by every tab of one browser.
#[derive(Clone)]
pub struct TabShared {
    pub settings: Arc<RwLock<Settings>>,
    pub updates: broadcast::Sender<TabUpdate>,
    pub capture: CaptureConfig,
}

impl TabShared {
    pub fn new(capture: CaptureConfig) -> Self {
        let (updates, _) = broadcast::channel(256);
        Self {
            settings: Arc::new(RwLock::new(Settings::default())),
            updates,
            capture,
        }
    }

    async fn fresh_context(&self) -> Arc<PageContext> {
        let context = Arc::new(PageContext::load(
            self.capture.channel_capacity,
            NoiseFilter::new(&self.capture.noise_patterns),
        ));
        let settings = self.settings.read().await.clone();
        context.ready(&settings).await;
        context
    }
}

/// One open page and the tasks observing it. Dropping the handle stops
/// observation.
pub struct TabHandle {
    page: Page,
    context: ContextSlot,
    tasks: Vec<JoinHandle<()>>,
}

impl TabHandle {
    pub fn page(&self) -> &Page {
        &self.page
    }

    /// The context of the current document.
    pub async fn context(&self) -> Arc<PageContext> {
        self.context.read().await.clone()
    }
}

impl Drop for TabHandle {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub fn tab_id(page: &Page) -> TabId {
    TabId(page.target_id().inner().clone())
}

pub async fn attach(page: Page, shared: TabShared) -> Result<TabHandle, CdpError> {
    let tab = tab_id(&page);
    page.execute(network::EnableParams::default()).await?;
    page.execute(runtime::EnableParams::default()).await?;

    let context: ContextSlot = Arc::new(RwLock::new(shared.fresh_context().await));

    let console_calls = page.event_listener::<EventConsoleApiCalled>().await?;
    let exceptions = page.event_listener::<EventExceptionThrown>().await?;
    let requests = page.event_listener::<EventRequestWillBeSent>().await?;
    let responses = page.event_listener::<EventResponseReceived>().await?;
    let finished = page.event_listener::<EventLoadingFinished>().await?;
    let failed = page.event_listener::<EventLoadingFailed>().await?;
    let navigated = page.event_listener::<EventFrameNavigated>().await?;
    let loaded = page.event_listener::<EventLoadEventFired>().await?;
    let mut dialogs = page.event_listener::<EventJavascriptDialogOpening>().await?;

    let mut tasks = Vec::new();

    let slot = Arc::clone(&context);
    tasks.push(tokio::spawn(async move {
        let (mut calls, mut exceptions) = (console_calls, exceptions);
        loop {
            tokio::select! {
                Some(event) = calls.next() => {
                    let ctx = slot.read().await.clone();
                    record_console_call(ctx.console(), &event);
                }
                Some(event) = exceptions.next() => {
                    let ctx = slot.read().await.clone();
                    record_exception(ctx.console(), &event.exception_details);
                }
                else => break,
            }
        }
    }));

    let slot = Arc::clone(&context);
    let network_page = page.clone();
    tasks.push(tokio::spawn(async move {
        NetworkPump {
            page: network_page,
            slot,
            in_flight: HashMap::new(),
        }
        .run(requests, responses, finished, failed)
        .await;
    }));

    let slot = Arc::clone(&context);
    let lifecycle_page = page.clone();
    let lifecycle_tab = tab.clone();
    let lifecycle_shared = shared.clone();
    tasks.push(tokio::spawn(async move {
        let (mut navigated, mut loaded) = (navigated, loaded);
        loop {
            tokio::select! {
                Some(event) = navigated.next() => {
                    if event.frame.parent_id.is_some() {
                        continue;
                    }
                    *slot.write().await = lifecycle_shared.fresh_context().await;
                    debug!("Tab {} committed {}", lifecycle_tab, event.frame.url);
                    let _ = lifecycle_shared.updates.send(TabUpdate {
                        tab_id: lifecycle_tab.clone(),
                        status: TabStatus::Loading,
                        url: Some(event.frame.url.clone()),
                    });
                }
                Some(_) = loaded.next() => {
                    let url = lifecycle_page.url().await.ok().flatten();
                    let _ = lifecycle_shared.updates.send(TabUpdate {
                        tab_id: lifecycle_tab.clone(),
                        status: TabStatus::Complete,
                        url,
                    });
                }
                else => break,
            }
        }
    }));

    // Dialogs block script evaluation; accept them so restores keep moving.
    let dialog_page = page.clone();
    tasks.push(tokio::spawn(async move {
        while let Some(event) = dialogs.next().await {
            info!(
                "Handling JavaScript Dialog: {} ({:?})",
                event.message, event.r#type
            );
            if let Err(e) = dialog_page
                .execute(HandleJavaScriptDialogParams::new(true))
                .await
            {
                error!("Failed to handle/accept dialog: {}", e);
            }
        }
    }));

    info!("Attached capture to tab {}", tab);
    Ok(TabHandle {
        page,
        context,
        tasks,
    })
}

// ============================================================
// Console
// ============================================================

pub fn console_level(kind: &ConsoleApiCalledType) -> Option<LogLevel> {
    match kind {
        ConsoleApiCalledType::Log => Some(LogLevel::Log),
        ConsoleApiCalledType::Info => Some(LogLevel::Info),
        ConsoleApiCalledType::Warning => Some(LogLevel::Warn),
        ConsoleApiCalledType::Error | ConsoleApiCalledType::Assert => Some(LogLevel::Error),
        ConsoleApiCalledType::Debug => Some(LogLevel::Debug),
        _ => None,
    }
}

fn page_value(object: &RemoteObject) -> PageValue {
    match serde_json::to_value(object) {
        Ok(json) => from_remote_object(&json),
        Err(_) => PageValue::Undefined,
    }
}

fn record_console_call(console: &ConsoleCapture, event: &EventConsoleApiCalled) {
    let Some(level) = console_level(&event.r#type) else {
        return;
    };
    let args: Vec<PageValue> = event.args.iter().map(page_value).collect();
    console.record(level, &args);
}

/// `TypeError: x is undefined` -> `x is undefined`.
pub fn error_message(description: &str) -> &str {
    let first_line = description.lines().next().unwrap_or_default();
    match first_line.split_once(": ") {
        Some((name, rest)) if !name.contains(' ') && name.ends_with("Error") => rest,
        _ => first_line,
    }
}

fn record_exception(console: &ConsoleCapture, details: &ExceptionDetails) {
    if details.text.starts_with("Uncaught (in promise)") {
        let reason = details
            .exception
            .as_ref()
            .map(page_value)
            .unwrap_or(PageValue::Undefined);
        console.record_rejection(&reason);
        return;
    }

    let message = details
        .exception
        .as_ref()
        .and_then(|e| e.description.as_deref())
        .map(error_message)
        .unwrap_or(details.text.as_str())
        .to_string();
    let line = u32::try_from(details.line_number + 1).unwrap_or(0);
    let column = u32::try_from(details.column_number + 1).unwrap_or(0);
    let location = details.url.as_deref().map(|url| (url, line, column));
    console.record_uncaught(&message, location);
}

// ============================================================
// Network
// ============================================================

pub fn request_kind(resource: Option<&ResourceType>) -> Option<RequestKind> {
    match resource {
        Some(ResourceType::Xhr) => Some(RequestKind::Xhr),
        Some(ResourceType::Fetch) => Some(RequestKind::Fetch),
        _ => None,
    }
}

pub fn headers_map(headers: &Headers) -> BTreeMap<String, String> {
    headers
        .inner()
        .as_object()
        .map(|map| {
            map.iter()
                .map(|(k, v)| {
                    let value = v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string());
                    (k.clone(), value)
                })
                .collect()
        })
        .unwrap_or_default()
}

fn response_of(response: &network::Response) -> HttpResponse {
    let mut headers = headers_map(&response.headers);
    if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
        headers.insert("content-type".to_string(), response.mime_type.clone());
    }
    HttpResponse {
        status: u16::try_from(response.status).unwrap_or(0),
        status_text: response.status_text.clone(),
        headers,
        body: Vec::new(),
    }
}

/// Bodies are only fetched for text responses the policy will keep.
fn wants_body(policy: &CapturePolicy, response: &HttpResponse) -> bool {
    policy.keeps_response(response) && response.content_type().is_some_and(is_text_content_type)
}

struct InFlight {
    pending: PendingRequest,
    capture: Arc<NetworkCapture>,
    response: Option<HttpResponse>,
}

struct NetworkPump {
    page: Page,
    slot: ContextSlot,
    in_flight: HashMap<RequestId, InFlight>,
}

impl NetworkPump {
    async fn run(
        mut self,
        mut requests: chromiumoxide::listeners::EventStream<EventRequestWillBeSent>,
        mut responses: chromiumoxide::listeners::EventStream<EventResponseReceived>,
        mut finished: chromiumoxide::listeners::EventStream<EventLoadingFinished>,
        mut failed: chromiumoxide::listeners::EventStream<EventLoadingFailed>,
    ) {
        loop {
            // Earlier protocol phases first when several are ready.
            tokio::select! {
                biased;
                Some(event) = requests.next() => self.on_request(&event).await,
                Some(event) = responses.next() => {
                    if let Some(entry) = self.in_flight.get_mut(&event.request_id) {
                        entry.response = Some(response_of(&event.response));
                    }
                }
                Some(event) = finished.next() => {
                    if let Some(entry) = self.in_flight.remove(&event.request_id) {
                        self.on_finished(&event.request_id, entry).await;
                    }
                }
                Some(event) = failed.next() => {
                    if let Some(entry) = self.in_flight.remove(&event.request_id) {
                        let err = if event.canceled.unwrap_or(false) {
                            TransportError::Aborted
                        } else {
                            TransportError::Network(event.error_text.clone())
                        };
                        entry.pending.complete(&Err(err));
                    }
                }
                else => break,
            }
        }
    }

    async fn on_request(&mut self, event: &EventRequestWillBeSent) {
        // A redirect reuses the request id; the previous hop is complete.
        if let Some(previous) = self.in_flight.remove(&event.request_id) {
            let hop = event
                .redirect_response
                .as_ref()
                .map(response_of)
                .ok_or(TransportError::Aborted);
            previous.pending.complete(&hop);
        }

        let Some(kind) = request_kind(event.r#type.as_ref()) else {
            return;
        };
        let request = HttpRequest {
            method: event.request.method.clone(),
            url: event.request.url.clone(),
            headers: headers_map(&event.request.headers),
            body: event.request.post_data.clone().map(RequestBody::Text),
        };
        let context = self.slot.read().await.clone();
        let capture = Arc::clone(context.network());
        let pending = capture.begin(kind, &request);
        self.in_flight.insert(
            event.request_id.clone(),
            InFlight {
                pending,
                capture,
                response: None,
            },
        );
    }

    async fn on_finished(&self, request_id: &RequestId, entry: InFlight) {
        let InFlight {
            pending,
            capture,
            response,
        } = entry;
        let Some(mut response) = response else {
            pending.complete(&Err(TransportError::Network(
                "Finished without a response".to_string(),
            )));
            return;
        };

        if wants_body(&capture.policy(), &response) {
            match self
                .page
                .execute(GetResponseBodyParams::new(request_id.clone()))
                .await
            {
                Ok(body) if body.result.base64_encoded => {
                    response.body = BASE64.decode(&body.result.body).unwrap_or_default();
                }
                Ok(body) => response.body = body.result.body.clone().into_bytes(),
                Err(e) => debug!("Could not read response body: {}", e),
            }
        }
        pending.complete(&Ok(response));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn console_types_map_to_levels() {
        assert_eq!(
            console_level(&ConsoleApiCalledType::Warning),
            Some(LogLevel::Warn)
        );
        assert_eq!(
            console_level(&ConsoleApiCalledType::Assert),
            Some(LogLevel::Error)
        );
        assert_eq!(console_level(&ConsoleApiCalledType::Table), None);
    }

    #[test]
    fn error_names_are_stripped() {
        assert_eq!(
            error_message("TypeError: x is undefined\n    at foo (a.js:1:2)"),
            "x is undefined"
        );
        assert_eq!(error_message("boom"), "boom");
        assert_eq!(error_message("Custom thing: not an error name"), "Custom thing: not an error name");
    }

    #[test]
    fn only_script_requests_are_tracked() {
        assert_eq!(
            request_kind(Some(&ResourceType::Fetch)),
            Some(RequestKind::Fetch)
        );
        assert_eq!(request_kind(Some(&ResourceType::Xhr)), Some(RequestKind::Xhr));
        assert_eq!(request_kind(Some(&ResourceType::Image)), None);
        assert_eq!(request_kind(None), None);
    }

    fn response(status: u16, status_text: &str, content_type: &str) -> HttpResponse {
        HttpResponse {
            status,
            status_text: status_text.to_string(),
            headers: BTreeMap::from([("content-type".to_string(), content_type.to_string())]),
            body: Vec::new(),
        }
    }

    #[test]
    fn bodies_follow_the_capture_policy() {
        let policy = CapturePolicy::default();
        assert!(wants_body(&policy, &response(404, "Not Found", "application/json")));
        assert!(wants_body(&policy, &response(200, "Network Error", "text/plain")));
        assert!(!wants_body(&policy, &response(200, "OK", "application/json")));
        assert!(!wants_body(&policy, &response(500, "Server Error", "image/png")));

        let all = CapturePolicy {
            capture_all: true,
            ..CapturePolicy::default()
        };
        assert!(wants_body(&all, &response(200, "OK", "text/html")));
    }

    #[test]
    fn headers_become_strings() {
        let headers = Headers::new(json!({"Content-Type": "application/json", "X-Count": 3}));
        let map = headers_map(&headers);
        assert_eq!(map["Content-Type"], "application/json");
        assert_eq!(map["X-Count"], "3");
    }
}
