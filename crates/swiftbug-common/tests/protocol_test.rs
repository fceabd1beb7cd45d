use serde_json::json;
use swiftbug_common::protocol::{
    BridgeQuery, CapturedEvent, Cookie, LogLevel, NetworkRecord, Request, RequestKind, Response,
    Snapshot, SnapshotDraft, TabId, default_title, generate_report_id,
};
use swiftbug_common::{BoundedBuffer, Settings, SettingsPatch};

#[test]
fn test_request_wire_names() {
    let req: Request = serde_json::from_value(json!({
        "action": "restoreBugData",
        "data": {"url": "https://a.test/"},
        "tabId": "12"
    }))
    .unwrap();
    match &req {
        Request::RestoreBugData { data, tab_id } => {
            assert_eq!(data.url.as_deref(), Some("https://a.test/"));
            assert_eq!(tab_id, &Some(TabId::from("12")));
        }
        other => panic!("unexpected request {:?}", other),
    }
    assert_eq!(req.action(), "restoreBugData");

    let req: Request = serde_json::from_value(json!({"action": "getBugReports"})).unwrap();
    assert_eq!(req.action(), "getBugReports");

    let req: Request = serde_json::from_value(json!({
        "action": "updateSettings",
        "settings": {"maxStoredReports": 10}
    }))
    .unwrap();
    assert!(matches!(
        req,
        Request::UpdateSettings { settings } if settings.max_stored_reports == Some(10)
    ));
}

#[test]
fn test_response_shapes() {
    assert_eq!(
        serde_json::to_value(Response::ack()).unwrap(),
        json!({"success": true})
    );
    assert_eq!(
        serde_json::to_value(Response::failure("No active tab found")).unwrap(),
        json!({"success": false, "error": "No active tab found"})
    );
}

#[test]
fn test_snapshot_uses_camel_case() {
    let snapshot = SnapshotDraft {
        url: Some("https://a.test/".to_string()),
        ..Default::default()
    }
    .into_snapshot("bug_1".into(), chrono::Utc::now(), "https://a.test/".into());
    let value = serde_json::to_value(&snapshot).unwrap();
    for key in [
        "userAgent",
        "localStorage",
        "sessionStorage",
        "consoleLog",
        "networkRequests",
    ] {
        assert!(value.get(key).is_some(), "missing {}", key);
    }
    let back: Snapshot = serde_json::from_value(value).unwrap();
    assert_eq!(back, snapshot);
}

#[test]
fn test_network_record_failure_rules() {
    let mut record: NetworkRecord = serde_json::from_value(json!({
        "id": "req_1_0",
        "type": "xhr",
        "url": "https://a.test/api",
        "method": "POST",
        "status": 200,
        "statusText": "OK"
    }))
    .unwrap();
    assert_eq!(record.kind, RequestKind::Xhr);
    assert!(!record.is_failure());

    record.status = 404;
    assert!(record.is_failure());

    record.status = 0;
    assert!(record.is_failure());
}

#[test]
fn test_captured_event_envelope() {
    let event: CapturedEvent = serde_json::from_value(json!({
        "kind": "console",
        "payload": {"level": "warn", "timestamp": "2024-01-01T00:00:00Z", "message": "careful"}
    }))
    .unwrap();
    assert!(matches!(event, CapturedEvent::Console(e) if e.level == LogLevel::Warn));
    assert_eq!(
        serde_json::to_value(BridgeQuery::ConsoleLog).unwrap(),
        json!("getConsoleLog")
    );
}

#[test]
fn test_cookie_defaults() {
    let cookie: Cookie =
        serde_json::from_value(json!({"name": "a", "value": "1", "domain": ".a.test"})).unwrap();
    assert_eq!(cookie.path, "/");
    assert!(!cookie.secure);
    assert_eq!(cookie.identity(), ("a", ".a.test", "/"));
}

#[test]
fn test_default_title_and_ids() {
    assert_eq!(default_title("https://shop.test/cart"), "Bug Report - shop.test");
    assert_eq!(default_title("not a url"), "Bug Report - not a url");

    let id = generate_report_id();
    let parts: Vec<&str> = id.split('_').collect();
    assert_eq!(parts[0], "bug");
    assert!(parts[1].parse::<i64>().is_ok());
    assert_eq!(parts[2].len(), 9);
    assert_ne!(generate_report_id(), id);
}

#[test]
fn test_settings_patch_merge() {
    let mut settings = Settings::default();
    settings.merge(SettingsPatch {
        max_stored_reports: Some(0),
        localhost_endpoint: Some("http://localhost:3000".into()),
        ..Default::default()
    });
    assert_eq!(settings.max_stored_reports, 1);
    assert_eq!(settings.localhost_endpoint, "http://localhost:3000");
    assert!(settings.include_screenshot);
}

#[test]
fn test_bounded_buffer_keeps_newest() {
    let mut buffer = BoundedBuffer::new(3);
    for i in 0..5 {
        buffer.push(i);
    }
    assert_eq!(buffer.to_vec(), vec![2, 3, 4]);

    buffer.set_capacity(1);
    assert_eq!(buffer.to_vec(), vec![4]);
}
