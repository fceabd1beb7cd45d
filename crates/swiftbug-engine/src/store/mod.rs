//! Report Store: snapshots, settings and the URL fetch cache, persisted under
//! three keys of a [`Persistence`] backend.

pub mod cache;
pub mod persistence;

pub use cache::{CACHE_CAPACITY, CacheEntry, CacheInfo, FetchCache};
pub use persistence::{FilePersistence, MemoryPersistence, Persistence};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use swiftbug_common::protocol::{
    BulkExportFile, EXPORT_VERSION, ExportFile, Snapshot, SnapshotDraft, generate_report_id,
};
use swiftbug_common::{Settings, SettingsPatch};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::CoreError;
use crate::fetch::{ReportFetcher, extract_report};

pub const REPORTS_KEY: &str = "bugReports";
pub const SETTINGS_KEY: &str = "settings";
pub const CACHE_KEY: &str = "bugReportCache";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Bug report not found: {0}")]
    NotFound(String),

    #[error("Invalid bug report format: missing required fields")]
    MissingFields,

    #[error("Invalid bug report: {0}")]
    InvalidReport(String),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImportOutcome {
    pub id: String,
    pub imported: bool,
}

/// Process-wide store. Read-modify-write operations are serialized within
/// this process; nothing coordinates with other writers of the same
/// persistence.
pub struct ReportStore {
    persistence: Arc<dyn Persistence>,
    write_lock: Mutex<()>,
}

impl ReportStore {
    pub fn new(persistence: Arc<dyn Persistence>) -> Self {
        Self {
            persistence,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryPersistence::new()))
    }

    /// Writes defaults for any key that is not yet present.
    pub async fn initialize(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if self.persistence.get(REPORTS_KEY).await?.is_none() {
            self.persistence
                .set(REPORTS_KEY, Value::Object(Map::new()))
                .await?;
        }
        if self.persistence.get(SETTINGS_KEY).await?.is_none() {
            self.persistence
                .set(SETTINGS_KEY, serde_json::to_value(Settings::default())?)
                .await?;
        }
        if self.persistence.get(CACHE_KEY).await?.is_none() {
            self.persistence
                .set(CACHE_KEY, Value::Object(Map::new()))
                .await?;
        }
        Ok(())
    }

    // ============================================================
    // Settings
    // ============================================================

    pub async fn settings(&self) -> Result<Settings, StoreError> {
        match self.persistence.get(SETTINGS_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Stored settings are invalid, using defaults: {}", e);
                Settings::default()
            })),
            None => Ok(Settings::default()),
        }
    }

    pub async fn update_settings(&self, patch: SettingsPatch) -> Result<Settings, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut settings = self.settings().await?;
        settings.merge(patch);
        self.persistence
            .set(SETTINGS_KEY, serde_json::to_value(&settings)?)
            .await?;
        info!("Settings updated");
        Ok(settings)
    }

    // ============================================================
    // Reports
    // ============================================================

    async fn load_reports(&self) -> Result<StoredReports, StoreError> {
        let Some(Value::Object(raw)) = self.persistence.get(REPORTS_KEY).await? else {
            return Ok(StoredReports::default());
        };
        let mut reports = StoredReports::default();
        for (id, value) in raw {
            match serde_json::from_value::<Snapshot>(value.clone()) {
                Ok(report) => {
                    reports.readable.insert(id, report);
                }
                Err(e) => {
                    warn!("Keeping unreadable stored report {} as is: {}", id, e);
                    reports.unreadable.insert(id, value);
                }
            }
        }
        Ok(reports)
    }

    async fn store_reports(&self, reports: StoredReports) -> Result<(), StoreError> {
        self.persistence.set(REPORTS_KEY, reports.into_value()?).await
    }

    /// Inserts (or overwrites by id) and evicts oldest-by-timestamp entries
    /// beyond the configured capacity.
    async fn insert_bounded(&self, report: Snapshot) -> Result<(), StoreError> {
        let max = self.settings().await?.max_stored_reports.max(1);
        let mut reports = self.load_reports().await?;
        if reports.contains(&report.id) {
            debug!("Report {} already exists, overwriting", report.id);
        }
        reports.insert(report);

        let evicted = evict_oldest(&mut reports.readable, max);
        if !evicted.is_empty() {
            info!("Removed {} old reports to stay within limit", evicted.len());
        }
        self.store_reports(reports).await
    }

    /// Stores a new report. Identity and creation time come from the draft
    /// when present; the URL is required.
    pub async fn save_report(&self, draft: SnapshotDraft) -> Result<Snapshot, StoreError> {
        let report = materialize(draft, false)?;
        let _guard = self.write_lock.lock().await;
        self.insert_bounded(report.clone()).await?;
        info!("Saved bug report {}", report.id);
        Ok(report)
    }

    /// Imports a raw or `{report: ...}`-wrapped snapshot, overwriting any
    /// stored report with the same id.
    pub async fn import_report(&self, data: Value) -> Result<ImportOutcome, StoreError> {
        let data = match data {
            Value::Object(mut map) if map.get("report").is_some_and(Value::is_object) => {
                map.remove("report").unwrap_or(Value::Null)
            }
            other => other,
        };
        let draft: SnapshotDraft =
            serde_json::from_value(data).map_err(|e| StoreError::InvalidReport(e.to_string()))?;
        let report = materialize(draft, true)?;
        let id = report.id.clone();

        let _guard = self.write_lock.lock().await;
        self.insert_bounded(report).await?;
        info!("Bug report imported: {}", id);
        Ok(ImportOutcome { id, imported: true })
    }

    /// Makes sure a snapshot about to be restored is in the store. Returns
    /// the snapshot with its (possibly generated) id.
    pub async fn ensure_stored(&self, draft: SnapshotDraft) -> Result<Snapshot, StoreError> {
        let report = materialize(draft, false)?;
        let _guard = self.write_lock.lock().await;
        if !self.load_reports().await?.contains(&report.id) {
            self.insert_bounded(report.clone()).await?;
            info!("Stored restored report {}", report.id);
        }
        Ok(report)
    }

    /// Newest first.
    pub async fn list_reports(&self) -> Result<Vec<Snapshot>, StoreError> {
        let mut reports: Vec<Snapshot> =
            self.load_reports().await?.readable.into_values().collect();
        reports.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(reports)
    }

    pub async fn get_report(&self, id: &str) -> Result<Option<Snapshot>, StoreError> {
        Ok(self.load_reports().await?.readable.remove(id))
    }

    /// Deleting an unknown id is a no-op. Returns whether anything was removed.
    pub async fn delete_report(&self, id: &str) -> Result<bool, StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut reports = self.load_reports().await?;
        if !reports.remove(id) {
            return Ok(false);
        }
        self.store_reports(reports).await?;
        Ok(true)
    }

    pub async fn delete_all(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.persistence
            .set(REPORTS_KEY, Value::Object(Map::new()))
            .await
    }

    pub async fn export_report(&self, id: &str) -> Result<ExportFile, StoreError> {
        let report = self
            .get_report(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        Ok(ExportFile {
            version: EXPORT_VERSION.to_string(),
            exported_at: Utc::now(),
            report,
        })
    }

    pub async fn export_all(&self) -> Result<BulkExportFile, StoreError> {
        let reports = self.list_reports().await?;
        Ok(BulkExportFile {
            version: EXPORT_VERSION.to_string(),
            exported_at: Utc::now(),
            report_count: reports.len(),
            reports,
        })
    }

    // ============================================================
    // Fetch cache
    // ============================================================

    async fn load_cache(&self) -> Result<FetchCache, StoreError> {
        match self.persistence.get(CACHE_KEY).await? {
            Some(value) => Ok(serde_json::from_value(value).unwrap_or_else(|e| {
                warn!("Fetch cache is unreadable, starting empty: {}", e);
                FetchCache::default()
            })),
            None => Ok(FetchCache::default()),
        }
    }

    pub async fn cached_report(&self, url: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.load_cache().await?.get(url).map(|e| e.data.clone()))
    }

    pub async fn cache_report(
        &self,
        url: &str,
        data: Value,
        fetched_at: i64,
    ) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let mut cache = self.load_cache().await?;
        let evicted = cache.insert(url, data, fetched_at);
        if !evicted.is_empty() {
            debug!("Evicted {} cached reports", evicted.len());
        }
        self.persistence
            .set(CACHE_KEY, serde_json::to_value(&cache)?)
            .await
    }

    pub async fn cache_info(&self) -> Result<CacheInfo, StoreError> {
        Ok(self.load_cache().await?.info())
    }

    pub async fn clear_cache(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        self.persistence
            .set(CACHE_KEY, Value::Object(Map::new()))
            .await
    }

    /// Cache-first retrieval of a shared report.
    pub async fn fetch_report_from_url(
        &self,
        url: &str,
        fetcher: &dyn ReportFetcher,
    ) -> Result<Value, CoreError> {
        if let Some(data) = self.cached_report(url).await? {
            info!("Returning cached bug report for {}", url);
            return Ok(data);
        }
        let json = fetcher.fetch_json(url).await?;
        let report = extract_report(json)?;
        self.cache_report(url, report.clone(), Utc::now().timestamp_millis())
            .await?;
        Ok(report)
    }
}

/// Stored reports. Entries that no longer parse as a [`Snapshot`] are carried
/// verbatim so a rewrite never drops them; capacity only counts readable ones.
#[derive(Debug, Default)]
struct StoredReports {
    readable: BTreeMap<String, Snapshot>,
    unreadable: Map<String, Value>,
}

impl StoredReports {
    fn contains(&self, id: &str) -> bool {
        self.readable.contains_key(id) || self.unreadable.contains_key(id)
    }

    fn insert(&mut self, report: Snapshot) {
        self.unreadable.remove(&report.id);
        self.readable.insert(report.id.clone(), report);
    }

    fn remove(&mut self, id: &str) -> bool {
        let readable = self.readable.remove(id).is_some();
        let unreadable = self.unreadable.remove(id).is_some();
        readable || unreadable
    }

    fn into_value(self) -> Result<Value, serde_json::Error> {
        let mut map = self.unreadable;
        for (id, report) in self.readable {
            map.insert(id, serde_json::to_value(report)?);
        }
        Ok(Value::Object(map))
    }
}

/// Turns a draft into a full snapshot. With `require_timestamp`, both `url`
/// and `timestamp` must be present (import); otherwise only `url` is.
pub fn materialize(draft: SnapshotDraft, require_timestamp: bool) -> Result<Snapshot, StoreError> {
    let url = draft
        .url
        .clone()
        .filter(|u| !u.is_empty())
        .ok_or(StoreError::MissingFields)?;
    if require_timestamp && draft.timestamp.is_none() {
        return Err(StoreError::MissingFields);
    }
    let id = draft
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .unwrap_or_else(generate_report_id);
    let timestamp = draft.timestamp.unwrap_or_else(Utc::now);
    Ok(draft.into_snapshot(id, timestamp, url))
}

fn evict_oldest(reports: &mut BTreeMap<String, Snapshot>, max: usize) -> Vec<String> {
    let mut evicted = Vec::new();
    while reports.len() > max {
        let oldest = reports
            .iter()
            .min_by_key(|(_, r)| r.timestamp)
            .map(|(id, _)| id.clone());
        match oldest.and_then(|id| reports.remove_entry(&id)) {
            Some((id, _)) => evicted.push(id),
            None => break,
        }
    }
    evicted
}

/// `swiftbug-report-<domain>-<YYYYMMDD>-<epoch ms>.json`, dated by the
/// report's creation time.
pub fn export_filename(report: &Snapshot, now: DateTime<Utc>) -> String {
    let domain = url::Url::parse(&report.url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    format!(
        "swiftbug-report-{}-{}-{}.json",
        domain,
        report.timestamp.format("%Y%m%d"),
        now.timestamp_millis()
    )
}

pub fn bulk_export_filename(now: DateTime<Utc>) -> String {
    format!(
        "swiftbug-reports-{}-{}.json",
        now.format("%Y%m%d"),
        now.timestamp_millis()
    )
}
