//! A page context wired end to end: interceptors emit over the page channel,
//! the bridge buffers, queries read back.

use async_trait::async_trait;
use std::sync::Arc;
use swiftbug_engine::bridge::{NoiseFilter, PageContext};
use swiftbug_engine::interceptor::{
    ConsoleInterceptor, HttpRequest, HttpResponse, HttpTransport, NetworkInterceptor, PageValue,
    TransportError,
};
use swiftbug_engine::protocol::{BridgeQuery, CapturedEvent, LogLevel};
use swiftbug_engine::Settings;

struct Status(u16);

#[async_trait]
impl HttpTransport for Status {
    async fn fetch(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
        Ok(HttpResponse {
            status: self.0,
            status_text: if self.0 >= 400 { "Error" } else { "OK" }.to_string(),
            headers: [("Content-Type".to_string(), "application/json".to_string())].into(),
            body: br#"{"ok":false}"#.to_vec(),
        })
    }
}

fn messages(events: &[CapturedEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            CapturedEvent::Console(entry) => Some(entry.message.clone()),
            CapturedEvent::Network(_) => None,
        })
        .collect()
}

#[tokio::test]
async fn test_events_before_ready_are_delivered_in_order() {
    let page = PageContext::with_defaults();
    let console =
        ConsoleInterceptor::install(|_: LogLevel, _: &[PageValue]| {}, page.console().clone());

    console.log(&["early".into()]);
    console.warn(&["also early".into(), PageValue::Number(2.0)]);
    page.ready(&Settings::default()).await;
    console.error(&["after ready".into()]);

    let events = page.query(BridgeQuery::ConsoleLog).await.unwrap();
    assert_eq!(
        messages(&events),
        vec!["early", "also early 2", "after ready"]
    );
}

#[tokio::test]
async fn test_extension_noise_is_dropped() {
    let page = PageContext::load(64, NoiseFilter::new(&["MyDevTool".to_string()]));
    page.ready(&Settings::default()).await;
    let console = page.console();

    console.record(LogLevel::Log, &["[SwiftBug] content script loaded".into()]);
    console.record(LogLevel::Log, &["mydevtool says hi".into()]);
    console.record(LogLevel::Log, &["real page output".into()]);

    let events = page.query(BridgeQuery::ConsoleLog).await.unwrap();
    assert_eq!(messages(&events), vec!["real page output"]);
}

#[tokio::test]
async fn test_console_limit_applies_to_live_settings() {
    let page = PageContext::with_defaults();
    page.ready(&Settings::default()).await;
    for i in 0..5 {
        page.console().record(LogLevel::Info, &[PageValue::Number(i as f64)]);
    }

    page.apply_settings(&Settings {
        max_console_lines: 2,
        ..Settings::default()
    })
    .await;

    let events = page.query(BridgeQuery::ConsoleLog).await.unwrap();
    assert_eq!(messages(&events), vec!["3", "4"]);
}

#[tokio::test]
async fn test_failed_requests_reach_the_bridge() {
    let page = PageContext::with_defaults();
    page.ready(&Settings::default()).await;

    let failing = NetworkInterceptor::install(Status(503), Arc::clone(page.network()));
    let passing = NetworkInterceptor::install(Status(200), Arc::clone(page.network()));
    failing
        .fetch(HttpRequest::get("https://api.test/orders"))
        .await
        .unwrap();
    passing
        .fetch(HttpRequest::get("https://api.test/health"))
        .await
        .unwrap();

    let events = page.query(BridgeQuery::NetworkRequests).await.unwrap();
    assert_eq!(events.len(), 1);
    match &events[0] {
        CapturedEvent::Network(record) => {
            assert_eq!(record.url, "https://api.test/orders");
            assert_eq!(record.status, 503);
            assert_eq!(record.response_body, r#"{"ok":false}"#);
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_dropped_context_stops_answering() {
    let page = PageContext::with_defaults();
    let sender = page.sender();
    drop(page);
    for _ in 0..10 {
        if sender.is_closed() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(sender.is_closed());
}
