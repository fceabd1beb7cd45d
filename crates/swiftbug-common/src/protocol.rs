use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::settings::SettingsPatch;

/// Version string written into every export envelope.
pub const EXPORT_VERSION: &str = "1.0.0";

// ============================================================
// Captured events
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Log,
    Info,
    Warn,
    Error,
    Debug,
}

impl LogLevel {
    pub const ALL: [LogLevel; 5] = [
        LogLevel::Log,
        LogLevel::Info,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Debug,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Log => "log",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Debug => "debug",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One intercepted console call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleEntry {
    pub level: LogLevel,
    pub timestamp: DateTime<Utc>,
    /// Rendered arguments joined by single spaces.
    pub message: String,
    /// Safe-serialized call arguments.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<serde_json::Value>,
}

impl ConsoleEntry {
    pub fn timestamp_ms(&self) -> i64 {
        self.timestamp.timestamp_millis()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Xhr,
    Fetch,
}

/// Request/response metadata for one intercepted HTTP call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: RequestKind,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub request_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub request_body: String,
    #[serde(default)]
    pub response_body: String,
    #[serde(default)]
    pub status: u16,
    #[serde(default)]
    pub status_text: String,
    #[serde(default)]
    pub start_time: i64,
    #[serde(default)]
    pub end_time: i64,
    #[serde(default)]
    pub response_time: i64,
}

impl NetworkRecord {
    pub const NETWORK_ERROR: &'static str = "Network Error";

    pub fn is_failure(&self) -> bool {
        Self::is_failed_status(self.status, &self.status_text)
    }

    /// Network error, status 0, or an HTTP error status.
    pub fn is_failed_status(status: u16, status_text: &str) -> bool {
        status == 0 || status >= 400 || status_text == Self::NETWORK_ERROR
    }
}

/// Envelope crossing the page/content isolation boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum CapturedEvent {
    Console(ConsoleEntry),
    Network(NetworkRecord),
}

// ============================================================
// Page state
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    #[serde(default = "root_path")]
    pub path: String,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub host_only: bool,
    #[serde(default)]
    pub session: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

fn root_path() -> String {
    "/".to_string()
}

impl Cookie {
    /// Identity used for de-duplication: (name, domain, path).
    pub fn identity(&self) -> (&str, &str, &str) {
        (&self.name, &self.domain, &self.path)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    pub scroll_x: f64,
    pub scroll_y: f64,
}

pub type StorageMap = BTreeMap<String, String>;

/// A stored point-in-time capture of a page: one bug report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "unknown_user_agent")]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewport: Option<Viewport>,
    #[serde(default)]
    pub cookies: Vec<Cookie>,
    #[serde(default)]
    pub local_storage: StorageMap,
    #[serde(default)]
    pub session_storage: StorageMap,
    #[serde(default)]
    pub console_log: Vec<ConsoleEntry>,
    #[serde(default)]
    pub network_requests: Vec<NetworkRecord>,
    /// PNG data URL of the visible viewport.
    #[serde(default)]
    pub screenshot: Option<String>,
}

fn unknown_user_agent() -> String {
    "Unknown".to_string()
}

/// Partial snapshot fields as submitted by the presentation layer or read
/// from an import file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotDraft {
    pub id: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub url: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub user_agent: Option<String>,
    pub viewport: Option<Viewport>,
    pub cookies: Option<Vec<Cookie>>,
    pub local_storage: Option<StorageMap>,
    pub session_storage: Option<StorageMap>,
    pub console_log: Option<Vec<ConsoleEntry>>,
    pub network_requests: Option<Vec<NetworkRecord>>,
    pub screenshot: Option<String>,
}

impl SnapshotDraft {
    /// Fills every missing field with its default. The caller decides the
    /// identity and creation time.
    pub fn into_snapshot(self, id: String, timestamp: DateTime<Utc>, url: String) -> Snapshot {
        let title = self
            .title
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| default_title(&url));
        Snapshot {
            id,
            timestamp,
            title,
            description: self.description.unwrap_or_default(),
            user_agent: self.user_agent.unwrap_or_else(unknown_user_agent),
            viewport: self.viewport,
            cookies: self.cookies.unwrap_or_default(),
            local_storage: self.local_storage.unwrap_or_default(),
            session_storage: self.session_storage.unwrap_or_default(),
            console_log: self.console_log.unwrap_or_default(),
            network_requests: self.network_requests.unwrap_or_default(),
            screenshot: self.screenshot,
            url,
        }
    }
}

impl From<Snapshot> for SnapshotDraft {
    fn from(s: Snapshot) -> Self {
        Self {
            id: Some(s.id),
            timestamp: Some(s.timestamp),
            url: Some(s.url),
            title: Some(s.title),
            description: Some(s.description),
            user_agent: Some(s.user_agent),
            viewport: s.viewport,
            cookies: Some(s.cookies),
            local_storage: Some(s.local_storage),
            session_storage: Some(s.session_storage),
            console_log: Some(s.console_log),
            network_requests: Some(s.network_requests),
            screenshot: s.screenshot,
        }
    }
}

/// `Bug Report - <hostname>`, or the raw URL when it does not parse.
pub fn default_title(url: &str) -> String {
    let host = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url.to_string());
    format!("Bug Report - {}", host)
}

/// `bug_<epoch ms>_<9 base36 chars>`.
pub fn generate_report_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..9)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect();
    format!("bug_{}_{}", Utc::now().timestamp_millis(), suffix)
}

// ============================================================
// Export envelopes
// ============================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportFile {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub report: Snapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkExportFile {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub report_count: usize,
    pub reports: Vec<Snapshot>,
}

// ============================================================
// Tabs and privileged browser calls
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub String);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TabId {
    fn from(s: &str) -> Self {
        TabId(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_id: Option<i64>,
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TabStatus {
    Loading,
    Complete,
}

/// Tab lifecycle notification pushed by a backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TabUpdate {
    pub tab_id: TabId,
    pub status: TabStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Execution world for page-context code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ScriptWorld {
    Isolated,
    Main,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CookieQuery {
    /// Cookies that would be sent to this exact URL.
    Url(String),
    /// Cookies whose domain matches or is a subdomain of this one.
    Domain(String),
}

/// Network-settable cookie form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetCookieDetails {
    pub url: String,
    pub name: String,
    pub value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_date: Option<f64>,
}

/// Pull queries answered by a page's content bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BridgeQuery {
    #[serde(rename = "getConsoleLog")]
    ConsoleLog,
    #[serde(rename = "getNetworkRequests")]
    NetworkRequests,
}

// ============================================================
// Presentation layer message contract
// ============================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Request {
    CollectPageData {
        #[serde(default, rename = "tabId", skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },
    SaveBugReport {
        data: SnapshotDraft,
    },
    /// Collect and save in one step, without user-entered fields.
    SaveBugSnapshot {
        #[serde(default, rename = "tabId", skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },
    GetBugReports,
    DeleteBugReport {
        #[serde(rename = "reportId")]
        report_id: String,
    },
    DeleteAllBugReports,
    ExportBugReport {
        #[serde(rename = "reportId")]
        report_id: String,
    },
    ExportAllBugReports,
    ImportBugReport {
        data: serde_json::Value,
    },
    FetchBugReportFromUrl {
        url: String,
    },
    /// Unknown or id-less snapshots are stored before restoring.
    RestoreBugData {
        data: Box<SnapshotDraft>,
        #[serde(default, rename = "tabId", skip_serializing_if = "Option::is_none")]
        tab_id: Option<TabId>,
    },
    RestoreBugDataToLocal {
        data: Box<SnapshotDraft>,
    },
    GetSettings,
    UpdateSettings {
        settings: SettingsPatch,
    },
    GetCacheInfo,
    ClearCache,
}

impl Request {
    /// Wire name of the action.
    pub fn action(&self) -> &'static str {
        match self {
            Request::CollectPageData { .. } => "collectPageData",
            Request::SaveBugReport { .. } => "saveBugReport",
            Request::SaveBugSnapshot { .. } => "saveBugSnapshot",
            Request::GetBugReports => "getBugReports",
            Request::DeleteBugReport { .. } => "deleteBugReport",
            Request::DeleteAllBugReports => "deleteAllBugReports",
            Request::ExportBugReport { .. } => "exportBugReport",
            Request::ExportAllBugReports => "exportAllBugReports",
            Request::ImportBugReport { .. } => "importBugReport",
            Request::FetchBugReportFromUrl { .. } => "fetchBugReportFromUrl",
            Request::RestoreBugData { .. } => "restoreBugData",
            Request::RestoreBugDataToLocal { .. } => "restoreBugDataToLocal",
            Request::GetSettings => "getSettings",
            Request::UpdateSettings { .. } => "updateSettings",
            Request::GetCacheInfo => "getCacheInfo",
            Request::ClearCache => "clearCache",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn ack() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}
