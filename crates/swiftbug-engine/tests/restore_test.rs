mod common;

use chrono::Utc;
use common::{MockBackend, cookie};
use std::time::Duration;
use swiftbug_engine::error::CoreError;
use swiftbug_engine::protocol::{Snapshot, SnapshotDraft, StorageMap};
use swiftbug_engine::restore::{RestoreOptions, Restorer, localize_snapshot};

fn snapshot(url: &str) -> Snapshot {
    let mut secure = cookie("session", "restored", "app.example.com");
    secure.secure = true;
    let local: StorageMap = [("theme".to_string(), "dark".to_string())].into();
    let session: StorageMap = [("cart".to_string(), "3".to_string())].into();
    SnapshotDraft {
        cookies: Some(vec![secure]),
        local_storage: Some(local),
        session_storage: Some(session),
        ..Default::default()
    }
    .into_snapshot("bug_1_abc".to_string(), Utc::now(), url.to_string())
}

fn position(calls: &[String], prefix: &str) -> usize {
    calls
        .iter()
        .position(|c| c.starts_with(prefix))
        .unwrap_or_else(|| panic!("no call starting with {:?} in {:?}", prefix, calls))
}

#[tokio::test(start_paused = true)]
async fn test_same_url_injects_without_navigating_first() {
    let backend = MockBackend::with_tab("https://app.example.com/cart");
    backend.add_cookie(cookie("stale", "old", "app.example.com"));
    backend.set_storage("1", &[("leftover", "1")], &[]);

    let restorer = Restorer::default();
    let tab = backend.tab("1");
    let start = tokio::time::Instant::now();
    let report = restorer
        .restore(&backend, snapshot("https://app.example.com/cart"), &tab)
        .await
        .unwrap();

    assert!(start.elapsed() < Duration::from_millis(1000));
    assert_eq!(report.cookies_cleared, 1);
    assert_eq!(report.cookies_restored, 1);
    assert_eq!(report.storage_written, 2);
    assert!(report.storage_cleared);

    assert_eq!(backend.cookie_names(), vec!["session".to_string()]);
    let storage = backend.storage_of("1");
    assert!(!storage.local.contains_key("leftover"));
    assert_eq!(storage.local["theme"], "dark");
    assert_eq!(storage.session["cart"], "3");

    // Clear, then restore, then a single reload at the very end.
    let calls = backend.calls();
    assert!(position(&calls, "remove_cookie stale") < position(&calls, "set_cookie session"));
    assert!(position(&calls, "script 1 clear-storage") < position(&calls, "script 1 write-storage"));
    assert_eq!(calls.last().unwrap(), "update_tab 1 https://app.example.com/cart");
    assert_eq!(calls.iter().filter(|c| c.starts_with("update_tab")).count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_same_origin_navigates_in_place_and_settles() {
    let backend = MockBackend::with_tab("https://app.example.com/home");
    let restorer = Restorer::default();
    let tab = backend.tab("1");

    let pending = restorer
        .begin(&backend, snapshot("https://app.example.com/cart"), &tab)
        .await
        .unwrap();
    assert!(!pending.opened_new_tab());
    assert_eq!(pending.tab_id().0, "1");
    assert_eq!(backend.tab("1").url, "https://app.example.com/cart");

    let start = tokio::time::Instant::now();
    pending.complete(&backend).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(1000));

    assert_eq!(backend.tab_count(), 1);
    let calls = backend.calls();
    assert!(position(&calls, "update_tab 1") < position(&calls, "script 1 clear-storage"));
}

#[tokio::test(start_paused = true)]
async fn test_cross_origin_opens_new_tab() {
    let backend = MockBackend::with_tab("https://elsewhere.test/");
    backend.set_storage("1", &[("mine", "keep")], &[]);
    let restorer = Restorer::default();
    let tab = backend.tab("1");

    let pending = restorer
        .begin(&backend, snapshot("https://app.example.com/cart"), &tab)
        .await
        .unwrap();
    assert!(pending.opened_new_tab());
    assert_eq!(pending.tab_id().0, "2");

    pending.complete(&backend).await.unwrap();

    assert_eq!(backend.tab_count(), 2);
    assert_eq!(backend.tab("1").url, "https://elsewhere.test/");
    assert_eq!(backend.storage_of("1").local["mine"], "keep");
    assert_eq!(backend.storage_of("2").local["theme"], "dark");
}

#[tokio::test(start_paused = true)]
async fn test_load_timeout_fails_restoration() {
    let backend = MockBackend::with_tab("https://app.example.com/home");
    *backend.completes_loads.lock().unwrap() = false;
    let restorer = Restorer::new(RestoreOptions {
        load_timeout: Some(Duration::from_secs(5)),
        ..RestoreOptions::default()
    });
    let tab = backend.tab("1");

    let result = restorer
        .restore(&backend, snapshot("https://app.example.com/cart"), &tab)
        .await;

    assert!(matches!(result, Err(CoreError::LoadTimeout(id)) if id == "1"));
    assert!(!backend.calls().iter().any(|c| c.contains("write-storage")));
}

#[tokio::test(start_paused = true)]
async fn test_restore_to_local_rewrites_url_and_cookies() {
    let backend = MockBackend::with_tab("https://app.example.com/home");
    let restorer = Restorer::default();

    let report = restorer
        .restore_to_local(
            &backend,
            snapshot("https://app.example.com/cart?item=4#summary"),
            "http://localhost:3000",
        )
        .await
        .unwrap();
    assert_eq!(report.cookies_restored, 1);

    let new_tab = backend.tab("2");
    assert_eq!(new_tab.url, "http://localhost:3000/cart?item=4#summary");

    let jar = backend.cookies.lock().unwrap().clone();
    assert_eq!(jar.len(), 1);
    assert_eq!(jar[0].domain, "localhost");
    assert!(!jar[0].secure);
}

#[test]
fn test_localize_requires_endpoint() {
    let result = localize_snapshot(snapshot("https://app.example.com/"), "  ");
    assert!(matches!(result, Err(CoreError::LocalEndpointMissing)));

    let result = localize_snapshot(snapshot("https://app.example.com/"), "not a url");
    assert!(matches!(result, Err(CoreError::InvalidUrl { .. })));
}

#[test]
fn test_localize_keeps_secure_over_https() {
    let local = localize_snapshot(
        snapshot("https://app.example.com/a"),
        "https://dev.local:8443",
    )
    .unwrap();
    assert_eq!(local.url, "https://dev.local:8443/a");
    assert_eq!(local.cookies[0].domain, "dev.local");
    assert!(local.cookies[0].secure);
}
