//! Message contract between the presentation layer and the core.

use chrono::Utc;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use swiftbug_common::protocol::{Request, Response, Snapshot, TabId};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::collector::DataCollector;
use crate::error::CoreError;
use crate::fetch::ReportFetcher;
use crate::restore::{PendingRestore, RestoreReport, Restorer};
use crate::store::{self, ReportStore};

pub struct MessageHandler {
    backend: Arc<dyn Backend>,
    store: Arc<ReportStore>,
    fetcher: Arc<dyn ReportFetcher>,
    restorer: Restorer,
    export_dir: PathBuf,
    restorations: Mutex<JoinSet<Result<RestoreReport, CoreError>>>,
}

impl MessageHandler {
    pub fn new(
        backend: Arc<dyn Backend>,
        store: Arc<ReportStore>,
        fetcher: Arc<dyn ReportFetcher>,
        restorer: Restorer,
        export_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            store,
            fetcher,
            restorer,
            export_dir: export_dir.into(),
            restorations: Mutex::new(JoinSet::new()),
        }
    }

    pub fn store(&self) -> &Arc<ReportStore> {
        &self.store
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    /// Never fails: errors become `success: false` responses.
    pub async fn handle(&self, request: Request) -> Response {
        let action = request.action();
        match self.dispatch(request).await {
            Ok(Some(data)) => Response::ok(data),
            Ok(None) => Response::ack(),
            Err(e) => {
                error!("{} failed: {}", action, e);
                Response::failure(e.to_string())
            }
        }
    }

    async fn dispatch(&self, request: Request) -> Result<Option<Value>, CoreError> {
        match request {
            Request::CollectPageData { tab_id } => {
                let snapshot = self.collect(tab_id.as_ref()).await?;
                Ok(Some(to_value(&snapshot)?))
            }
            Request::SaveBugReport { data } => {
                let saved = self.store.save_report(data).await?;
                Ok(Some(to_value(&saved)?))
            }
            Request::SaveBugSnapshot { tab_id } => {
                let snapshot = self.collect(tab_id.as_ref()).await?;
                let saved = self.store.save_report(snapshot.into()).await?;
                Ok(Some(json!({ "id": saved.id })))
            }
            Request::GetBugReports => Ok(Some(to_value(&self.store.list_reports().await?)?)),
            Request::DeleteBugReport { report_id } => {
                if !self.store.delete_report(&report_id).await? {
                    info!("Report {} was already absent", report_id);
                }
                Ok(None)
            }
            Request::DeleteAllBugReports => {
                self.store.delete_all().await?;
                Ok(None)
            }
            Request::ExportBugReport { report_id } => {
                let export = self.store.export_report(&report_id).await?;
                let filename = store::export_filename(&export.report, Utc::now());
                let path = self.write_export(&filename, &to_value(&export)?).await?;
                Ok(Some(json!({ "filename": filename, "path": path })))
            }
            Request::ExportAllBugReports => {
                let export = self.store.export_all().await?;
                let filename = store::bulk_export_filename(Utc::now());
                let path = self.write_export(&filename, &to_value(&export)?).await?;
                Ok(Some(
                    json!({ "filename": filename, "path": path, "reportCount": export.report_count }),
                ))
            }
            Request::ImportBugReport { data } => {
                let outcome = self.store.import_report(data).await?;
                Ok(Some(to_value(&outcome)?))
            }
            Request::FetchBugReportFromUrl { url } => Ok(Some(
                self.store
                    .fetch_report_from_url(&url, self.fetcher.as_ref())
                    .await?,
            )),
            Request::RestoreBugData { data, tab_id } => {
                let snapshot = self.store.ensure_stored(*data).await?;
                let settings = self.store.settings().await?;
                let collector = DataCollector::new(self.backend.as_ref(), &settings);
                let tab = collector.resolve_tab(tab_id.as_ref()).await?;
                let pending = self
                    .restorer
                    .begin(self.backend.as_ref(), snapshot, &tab)
                    .await?;
                Ok(Some(self.spawn_restoration(pending).await))
            }
            Request::RestoreBugDataToLocal { data } => {
                let settings = self.store.settings().await?;
                let snapshot = store::materialize(*data, false)?;
                let pending = self
                    .restorer
                    .begin_local(self.backend.as_ref(), snapshot, &settings.localhost_endpoint)
                    .await?;
                Ok(Some(self.spawn_restoration(pending).await))
            }
            Request::GetSettings => Ok(Some(to_value(&self.store.settings().await?)?)),
            Request::UpdateSettings { settings } => {
                let updated = self.store.update_settings(settings).await?;
                if let Err(e) = self.backend.apply_settings(&updated).await {
                    warn!("Could not push settings to open pages: {}", e);
                }
                Ok(Some(to_value(&updated)?))
            }
            Request::GetCacheInfo => Ok(Some(to_value(&self.store.cache_info().await?)?)),
            Request::ClearCache => {
                self.store.clear_cache().await?;
                Ok(None)
            }
        }
    }

    async fn collect(&self, tab_id: Option<&TabId>) -> Result<Snapshot, CoreError> {
        let settings = self.store.settings().await?;
        let collector = DataCollector::new(self.backend.as_ref(), &settings);
        let tab = collector.resolve_tab(tab_id).await?;
        Ok(collector.collect(&tab).await)
    }

    async fn write_export(&self, filename: &str, content: &Value) -> Result<PathBuf, CoreError> {
        tokio::fs::create_dir_all(&self.export_dir).await?;
        let path = self.export_dir.join(filename);
        let text = serde_json::to_string_pretty(content).map_err(store::StoreError::from)?;
        tokio::fs::write(&path, text).await?;
        info!("Exported to {}", path.display());
        Ok(path)
    }

    /// Acknowledges at kickoff; the injection runs in the background.
    async fn spawn_restoration(&self, pending: PendingRestore) -> Value {
        let ack = json!({
            "tabId": pending.tab_id(),
            "openedNewTab": pending.opened_new_tab(),
        });
        let backend = Arc::clone(&self.backend);
        let mut tasks = self.restorations.lock().await;
        let reaped = reap_finished(&mut tasks);
        if !reaped.is_empty() {
            debug!("Reaped {} finished restorations", reaped.len());
        }
        tasks.spawn(async move {
            let result = pending.complete(backend.as_ref()).await;
            if let Err(e) = &result {
                error!("Restoration failed: {}", e);
            }
            result
        });
        ack
    }

    /// Waits for every restoration started so far.
    pub async fn wait_restorations(&self) -> Vec<Result<RestoreReport, CoreError>> {
        let mut tasks = self.restorations.lock().await;
        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => warn!("Restoration task ended abnormally: {}", e),
            }
        }
        results
    }

    /// Results of restorations that already ended, without waiting on the rest.
    pub async fn finished_restorations(&self) -> Vec<Result<RestoreReport, CoreError>> {
        reap_finished(&mut *self.restorations.lock().await)
    }

    /// Restorations started and not yet collected.
    pub async fn restorations_in_flight(&self) -> usize {
        self.restorations.lock().await.len()
    }

    pub fn export_dir(&self) -> &Path {
        &self.export_dir
    }
}

fn reap_finished(
    tasks: &mut JoinSet<Result<RestoreReport, CoreError>>,
) -> Vec<Result<RestoreReport, CoreError>> {
    let mut results = Vec::new();
    while let Some(joined) = tasks.try_join_next() {
        match joined {
            Ok(result) => results.push(result),
            Err(e) => warn!("Restoration task ended abnormally: {}", e),
        }
    }
    results
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, CoreError> {
    serde_json::to_value(value).map_err(|e| CoreError::Store(store::StoreError::from(e)))
}
