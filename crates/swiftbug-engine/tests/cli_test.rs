mod common;

use async_trait::async_trait;
use common::MockBackend;
use serde_json::Value;
use std::sync::Arc;
use swiftbug_engine::backend::Backend;
use swiftbug_engine::cli::{self, CliError, OnError, ScriptSummary, Transcript};
use swiftbug_engine::executor::CommandExecutor;
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

#[derive(Default)]
struct Recorded {
    outputs: Vec<String>,
    failures: Vec<String>,
}

impl Transcript for Recorded {
    fn output(&mut self, text: &str) {
        self.outputs.push(text.to_string());
    }

    fn failure(&mut self, text: &str) {
        self.failures.push(text.to_string());
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

#[tokio::test(start_paused = true)]
async fn test_script_reports_restorations_at_the_end() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::with_tab("https://app.example.com/cart"));
    backend.set_storage("1", &[("theme", "dark")], &[]);
    let exec = executor(backend.clone(), &dir).await;

    let saved = exec.execute_line("save").await.unwrap();
    let id = saved.strip_prefix("Saved report ").unwrap();
    backend.set_storage("1", &[("theme", "light")], &[]);

    let script = format!("# put the cart back\n\nrestore {}\nlist\n", id);
    let mut transcript = Recorded::default();
    let summary = cli::run_script(&exec, script.as_bytes(), &mut transcript, OnError::Stop)
        .await
        .unwrap();

    assert_eq!(
        summary,
        ScriptSummary {
            executed: 2,
            failed: 0,
            restorations: 1,
        }
    );
    assert_eq!(transcript.outputs[0], "Restoring into tab 1");
    assert!(transcript.outputs.last().unwrap().starts_with("Restored: "));
    assert!(transcript.failures.is_empty());
    assert_eq!(backend.storage_of("1").local["theme"], "dark");
}

#[tokio::test]
async fn test_script_stops_on_first_failure() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::with_tab("https://app.example.com/"));
    let exec = executor(backend, &dir).await;
    let script = "list\nshow missing\nlist\n";

    let mut transcript = Recorded::default();
    let err = cli::run_script(&exec, script.as_bytes(), &mut transcript, OnError::Stop)
        .await
        .unwrap_err();
    assert!(matches!(err, CliError::Command { line: 2, ref command, .. } if command == "show missing"));
    assert_eq!(transcript.outputs, vec!["No saved reports."]);
    assert_eq!(transcript.failures.len(), 1);

    let mut transcript = Recorded::default();
    let summary = cli::run_script(&exec, script.as_bytes(), &mut transcript, OnError::Continue)
        .await
        .unwrap();
    assert_eq!(summary.executed, 3);
    assert_eq!(summary.failed, 1);
    assert_eq!(transcript.outputs.len(), 2);
}

#[tokio::test]
async fn test_missing_command_file() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::with_tab("https://app.example.com/"));
    let exec = executor(backend, &dir).await;

    let err = cli::run_file(
        &exec,
        &dir.path().join("absent.txt"),
        &mut Recorded::default(),
        OnError::Stop,
    )
    .await
    .unwrap_err();
    assert!(matches!(err, CliError::Open { .. }));
}

#[tokio::test]
async fn test_repl_keeps_going_until_exit() {
    let dir = TempDir::new().unwrap();
    let backend = Arc::new(MockBackend::with_tab("https://app.example.com/"));
    let exec = executor(backend, &dir).await;

    let mut transcript = Recorded::default();
    cli::run_repl(&exec, "bogus\n\nhelp\nexit\nsave\n".as_bytes(), &mut transcript)
        .await
        .unwrap();

    assert_eq!(transcript.outputs.len(), 2);
    assert!(transcript.outputs[1].starts_with("Commands:"));
    assert_eq!(transcript.failures.len(), 1);
    assert!(transcript.failures[0].contains("Unknown command: bogus"));
    // Nothing after `exit` ran.
    assert_eq!(exec.execute_line("list").await.unwrap(), "No saved reports.");
}
