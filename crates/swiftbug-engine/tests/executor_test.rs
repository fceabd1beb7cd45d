mod common;

use async_trait::async_trait;
use common::MockBackend;
use serde_json::Value;
use std::sync::Arc;
use swiftbug_engine::backend::Backend;
use swiftbug_engine::executor::{CommandExecutor, ExecutorError};
use swiftbug_engine::fetch::{FetchError, ReportFetcher};
use swiftbug_engine::handler::MessageHandler;
use swiftbug_engine::restore::Restorer;
use swiftbug_engine::store::ReportStore;
use tempfile::TempDir;

struct OfflineFetcher;

#[async_trait]
impl ReportFetcher for OfflineFetcher {
    async fn fetch_json(&self, url: &str) -> Result<Value, FetchError> {
        Err(FetchError::Network {
            url: url.to_string(),
            reason: "offline".into(),
        })
    }
}

async fn executor(backend: Arc<MockBackend>, export_dir: &TempDir) -> CommandExecutor {
    let store = Arc::new(ReportStore::in_memory());
    store.initialize().await.unwrap();
    let handler = MessageHandler::new(
        backend as Arc<dyn Backend>,
        store,
        Arc::new(OfflineFetcher),
        Restorer::default(),
        export_dir.path(),
    );
    CommandExecutor::new(Arc::new(handler))
}

fn saved_id(output: &str) -> String {
    output
        .strip_prefix("Saved report ")
        .unwrap_or_else(|| panic!("unexpected output {:?}", output))
        .to_string()
}

#[tokio::test]
async fn test_save_list_show_delete() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::with_tab("https://app.example.com/cart"));
    let exec = executor(backend, &dir).await;

    let id = saved_id(&exec.execute_line("save").await.unwrap());
    assert!(id.starts_with("bug_"));

    let list = exec.execute_line("list").await.unwrap();
    assert!(list.contains(&id), "{}", list);

    let shown = exec.execute_line(&format!("show {}", id)).await.unwrap();
    let report: Value = serde_json::from_str(&shown).unwrap();
    assert_eq!(report["url"], "https://app.example.com/cart");

    assert_eq!(exec.execute_line(&format!("delete {}", id)).await.unwrap(), "OK");
    assert_eq!(exec.execute_line("list").await.unwrap(), "No saved reports.");
    assert!(matches!(
        exec.execute_line(&format!("show {}", id)).await,
        Err(ExecutorError::ReportNotFound(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_restore_then_wait() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::with_tab("https://app.example.com/cart"));
    backend.set_storage("1", &[("theme", "dark")], &[]);
    let exec = executor(backend.clone(), &dir).await;

    let id = saved_id(&exec.execute_line("save").await.unwrap());
    backend.set_storage("1", &[("theme", "light")], &[]);

    let started = exec.execute_line(&format!("restore {}", id)).await.unwrap();
    assert_eq!(started, "Restoring into tab 1");

    let done = exec.execute_line("wait").await.unwrap();
    assert!(done.starts_with("Restored: "), "{}", done);
    assert_eq!(backend.storage_of("1").local["theme"], "dark");

    assert_eq!(
        exec.execute_line("wait").await.unwrap(),
        "No restorations in progress."
    );
}

#[tokio::test]
async fn test_failed_requests_surface_as_errors() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::with_tab("https://app.example.com/"));
    let exec = executor(backend, &dir).await;

    let err = exec
        .execute_line("export missing-id")
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Bug report not found: missing-id");

    let err = exec
        .execute_line("fetch https://share.test/r.json")
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Failed(_)));

    assert!(matches!(
        exec.execute_line("restore nope").await,
        Err(ExecutorError::ReportNotFound(_))
    ));
}

#[tokio::test]
async fn test_set_updates_settings() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::with_tab("https://app.example.com/"));
    let exec = executor(backend, &dir).await;

    let output = exec.execute_line("set maxConsoleLines 10").await.unwrap();
    assert!(output.contains("maxConsoleLines: 10"), "{}", output);

    let settings = exec.execute_line("settings").await.unwrap();
    assert!(settings.contains("maxConsoleLines: 10"));
    assert!(exec.execute_line("help").await.unwrap().starts_with("Commands:"));
}
