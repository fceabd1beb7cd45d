//! Report fetching against a local HTTP server.

use serde_json::json;
use swiftbug_engine::error::CoreError;
use swiftbug_engine::fetch::{FetchError, HttpFetcher, ReportFetcher};
use swiftbug_engine::store::ReportStore;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn shared_report() -> serde_json::Value {
    json!({
        "version": "1.0.0",
        "exportedAt": "2024-03-01T12:00:00Z",
        "report": {
            "id": "bug_1709294400000_abc",
            "url": "https://app.example.com/cart",
            "timestamp": "2024-03-01T12:00:00Z"
        }
    })
}

#[tokio::test]
async fn test_fetch_is_cached_after_first_success() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/reports/1.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(shared_report()))
        .expect(1)
        .mount(&server)
        .await;

    let store = ReportStore::in_memory();
    store.initialize().await.unwrap();
    let fetcher = HttpFetcher::new();
    let url = format!("{}/reports/1.json", server.uri());

    let first = store.fetch_report_from_url(&url, &fetcher).await.unwrap();
    assert_eq!(first["id"], "bug_1709294400000_abc");

    let second = store.fetch_report_from_url(&url, &fetcher).await.unwrap();
    assert_eq!(first, second);

    let info = store.cache_info().await.unwrap();
    assert_eq!(info.size, 1);
    assert_eq!(info.keys, vec![url]);
}

#[tokio::test]
async fn test_clear_cache_forces_refetch() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/r.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(shared_report()))
        .expect(2)
        .mount(&server)
        .await;

    let store = ReportStore::in_memory();
    let fetcher = HttpFetcher::new();
    let url = format!("{}/r.json", server.uri());

    store.fetch_report_from_url(&url, &fetcher).await.unwrap();
    store.clear_cache().await.unwrap();
    assert_eq!(store.cache_info().await.unwrap().size, 0);
    store.fetch_report_from_url(&url, &fetcher).await.unwrap();
}

#[tokio::test]
async fn test_http_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing.json"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new();
    let err = fetcher
        .fetch_json(&format!("{}/missing.json", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Http { status: 404, .. }));
    assert_eq!(err.to_string(), "HTTP 404: Not Found");
}

#[tokio::test]
async fn test_non_json_body_is_rejected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page.html"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/html")
                .set_body_string("<html></html>"),
        )
        .mount(&server)
        .await;

    let fetcher = HttpFetcher::new();
    let err = fetcher
        .fetch_json(&format!("{}/page.html", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::InvalidJson(_)));
}

#[tokio::test]
async fn test_json_without_report_shape_is_not_cached() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/other.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"hello": "world"})))
        .mount(&server)
        .await;

    let store = ReportStore::in_memory();
    let fetcher = HttpFetcher::new();
    let url = format!("{}/other.json", server.uri());

    let err = store
        .fetch_report_from_url(&url, &fetcher)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Fetch(FetchError::InvalidFormat)));
    assert_eq!(store.cache_info().await.unwrap().size, 0);
}

#[tokio::test]
async fn test_unreachable_host_is_a_network_error() {
    let fetcher = HttpFetcher::new();
    let err = fetcher
        .fetch_json("http://127.0.0.1:9/unreachable.json")
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Network { .. }));
}
