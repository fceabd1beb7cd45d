//! Line-oriented command pipeline shared by the binaries.
//!
//! input -> parse -> request -> handler -> format

use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;
use swiftbug_common::protocol::{Request, SnapshotDraft, TabId};
use swiftbug_common::{Settings, SettingsPatch};

use crate::formatter::format_response;
use crate::handler::MessageHandler;

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Unknown command: {0}. Type 'help' for a list of commands.")]
    UnknownCommand(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Unknown setting: {0}")]
    UnknownSetting(String),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Report not found: {0}")]
    ReportNotFound(String),

    #[error("{0}")]
    Failed(String),

    #[error("Store error: {0}")]
    Store(#[from] crate::store::StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

pub const HELP: &str = "\
Commands:
  collect [tab]            Snapshot the page without saving
  save [tab]               Snapshot the page and save it
  list                     List saved reports, newest first
  show <id>                Print one report as JSON
  delete <id>              Delete a report
  delete-all               Delete every report
  export <id>              Write one report to the export directory
  export-all               Write every report to one file
  import <path>            Import a report file
  fetch <url>              Fetch a report from a URL (cached)
  restore <id> [tab]       Restore a report into a tab
  restore-file <path>      Restore a report file without saving it first
  restore-local <id>       Restore a report against the local endpoint
  wait                     Wait for started restorations to finish
  settings                 Show settings
  set <key> <value>        Update one setting
  cache                    Show fetch cache info
  clear-cache              Empty the fetch cache
  help                     Show this help";

/// One parsed input line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Collect(Option<TabId>),
    Save(Option<TabId>),
    List,
    Show(String),
    Delete(String),
    DeleteAll,
    Export(String),
    ExportAll,
    Import(PathBuf),
    Fetch(String),
    Restore { id: String, tab: Option<TabId> },
    RestoreFile(PathBuf),
    RestoreLocal(String),
    Wait,
    Settings,
    Set { key: String, value: String },
    Cache,
    ClearCache,
    Help,
}

pub fn parse_command(line: &str) -> Result<Command, ExecutorError> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(ExecutorError::Usage("<command> [args]"));
    };
    let rest: Vec<&str> = words.collect();
    let arg = |usage: &'static str| -> Result<String, ExecutorError> {
        rest.first()
            .map(|s| s.to_string())
            .ok_or(ExecutorError::Usage(usage))
    };
    let tab_at = |i: usize| rest.get(i).map(|s| TabId::from(*s));

    let command = match verb.to_lowercase().as_str() {
        "collect" => Command::Collect(tab_at(0)),
        "save" => Command::Save(tab_at(0)),
        "list" | "ls" => Command::List,
        "show" => Command::Show(arg("show <id>")?),
        "delete" | "rm" => Command::Delete(arg("delete <id>")?),
        "delete-all" => Command::DeleteAll,
        "export" => Command::Export(arg("export <id>")?),
        "export-all" => Command::ExportAll,
        "import" => Command::Import(PathBuf::from(arg("import <path>")?)),
        "fetch" => Command::Fetch(arg("fetch <url>")?),
        "restore" => Command::Restore {
            id: arg("restore <id> [tab]")?,
            tab: tab_at(1),
        },
        "restore-file" => Command::RestoreFile(PathBuf::from(arg("restore-file <path>")?)),
        "restore-local" => Command::RestoreLocal(arg("restore-local <id>")?),
        "wait" => Command::Wait,
        "settings" => Command::Settings,
        "set" => {
            if rest.len() < 2 {
                return Err(ExecutorError::Usage("set <key> <value>"));
            }
            Command::Set {
                key: rest[0].to_string(),
                value: rest[1..].join(" "),
            }
        }
        "cache" => Command::Cache,
        "clear-cache" => Command::ClearCache,
        "help" | "?" => Command::Help,
        other => return Err(ExecutorError::UnknownCommand(other.to_string())),
    };
    Ok(command)
}

/// Builds a one-field settings patch from `set <key> <value>`.
///
/// Values are read as JSON first so `true` and `25` keep their types;
/// anything else is taken as a string.
pub fn settings_patch(key: &str, value: &str) -> Result<SettingsPatch, ExecutorError> {
    let known = serde_json::to_value(Settings::default())?;
    if known.get(key).is_none() {
        return Err(ExecutorError::UnknownSetting(key.to_string()));
    }
    let parsed = serde_json::from_str::<Value>(value)
        .unwrap_or_else(|_| Value::String(value.to_string()));
    let mut fields = Map::new();
    fields.insert(key.to_string(), parsed);
    serde_json::from_value(Value::Object(fields)).map_err(|e| ExecutorError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub struct CommandExecutor {
    handler: Arc<MessageHandler>,
}

impl CommandExecutor {
    pub fn new(handler: Arc<MessageHandler>) -> Self {
        Self { handler }
    }

    pub fn handler(&self) -> &Arc<MessageHandler> {
        &self.handler
    }

    /// Execute a line of input. A failed request is an error, so scripts can
    /// stop on it.
    pub async fn execute_line(&self, line: &str) -> Result<String, ExecutorError> {
        let command = parse_command(line)?;
        self.execute(command).await
    }

    pub async fn execute(&self, command: Command) -> Result<String, ExecutorError> {
        let request = match command {
            Command::Help => return Ok(HELP.to_string()),
            Command::Wait => return Ok(self.wait().await),
            Command::Show(id) => {
                let report = self
                    .handler
                    .store()
                    .get_report(&id)
                    .await?
                    .ok_or(ExecutorError::ReportNotFound(id))?;
                return Ok(serde_json::to_string_pretty(&report)?);
            }
            other => self.to_request(other).await?,
        };

        let action = request.action();
        let response = self.handler.handle(request).await;
        if !response.success {
            return Err(ExecutorError::Failed(
                response.error.unwrap_or_else(|| "Unknown error".to_string()),
            ));
        }
        Ok(format_response(action, &response))
    }

    async fn to_request(&self, command: Command) -> Result<Request, ExecutorError> {
        let request = match command {
            Command::Collect(tab_id) => Request::CollectPageData { tab_id },
            Command::Save(tab_id) => Request::SaveBugSnapshot { tab_id },
            Command::List => Request::GetBugReports,
            Command::Delete(report_id) => Request::DeleteBugReport { report_id },
            Command::DeleteAll => Request::DeleteAllBugReports,
            Command::Export(report_id) => Request::ExportBugReport { report_id },
            Command::ExportAll => Request::ExportAllBugReports,
            Command::Import(path) => Request::ImportBugReport {
                data: read_json(&path).await?,
            },
            Command::Fetch(url) => Request::FetchBugReportFromUrl { url },
            Command::Restore { id, tab } => Request::RestoreBugData {
                data: Box::new(self.saved_draft(&id).await?),
                tab_id: tab,
            },
            Command::RestoreFile(path) => {
                let mut json = read_json(&path).await?;
                if let Some(inner) = json.get_mut("report") {
                    json = inner.take();
                }
                Request::RestoreBugData {
                    data: Box::new(serde_json::from_value(json)?),
                    tab_id: None,
                }
            }
            Command::RestoreLocal(id) => Request::RestoreBugDataToLocal {
                data: Box::new(self.saved_draft(&id).await?),
            },
            Command::Settings => Request::GetSettings,
            Command::Set { key, value } => Request::UpdateSettings {
                settings: settings_patch(&key, &value)?,
            },
            Command::Cache => Request::GetCacheInfo,
            Command::ClearCache => Request::ClearCache,
            Command::Help | Command::Wait | Command::Show(_) => {
                return Err(ExecutorError::Usage("help"));
            }
        };
        Ok(request)
    }

    async fn saved_draft(&self, id: &str) -> Result<SnapshotDraft, ExecutorError> {
        self.handler
            .store()
            .get_report(id)
            .await?
            .map(SnapshotDraft::from)
            .ok_or_else(|| ExecutorError::ReportNotFound(id.to_string()))
    }

    async fn wait(&self) -> String {
        let results = self.handler.wait_restorations().await;
        if results.is_empty() {
            return "No restorations in progress.".to_string();
        }
        results
            .iter()
            .map(|r| match r {
                Ok(report) => format!("Restored: {}", report),
                Err(e) => format!("Restoration failed: {}", e),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

async fn read_json(path: &std::path::Path) -> Result<Value, ExecutorError> {
    let text = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_restore_with_optional_tab() {
        assert_eq!(
            parse_command("restore bug_1 7").unwrap(),
            Command::Restore {
                id: "bug_1".into(),
                tab: Some(TabId::from("7"))
            }
        );
        assert_eq!(
            parse_command("restore bug_1").unwrap(),
            Command::Restore {
                id: "bug_1".into(),
                tab: None
            }
        );
        assert!(matches!(
            parse_command("restore"),
            Err(ExecutorError::Usage(_))
        ));
    }

    #[test]
    fn unknown_command_is_rejected() {
        assert!(matches!(
            parse_command("frobnicate"),
            Err(ExecutorError::UnknownCommand(c)) if c == "frobnicate"
        ));
    }

    #[test]
    fn set_keeps_json_types() {
        let patch = settings_patch("maxStoredReports", "25").unwrap();
        assert_eq!(patch.max_stored_reports, Some(25));

        let patch = settings_patch("includeScreenshot", "false").unwrap();
        assert_eq!(patch.include_screenshot, Some(false));

        let patch = settings_patch("localhostEndpoint", "http://localhost:3000").unwrap();
        assert_eq!(
            patch.localhost_endpoint.as_deref(),
            Some("http://localhost:3000")
        );
    }

    #[test]
    fn set_rejects_unknown_keys_and_bad_types() {
        assert!(matches!(
            settings_patch("colour", "red"),
            Err(ExecutorError::UnknownSetting(_))
        ));
        assert!(matches!(
            settings_patch("maxStoredReports", "lots"),
            Err(ExecutorError::InvalidValue { .. })
        ));
    }
}
