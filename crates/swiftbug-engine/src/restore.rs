//! Restoration Engine: replays a snapshot's cookies and storage onto a tab
//! and reloads it so the page starts under the restored conditions.

use serde::Serialize;
use std::time::Duration;
use swiftbug_common::protocol::{
    Cookie, CookieQuery, SetCookieDetails, Snapshot, TabId, TabInfo, TabStatus, TabUpdate,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::backend::Backend;
use crate::error::CoreError;
use crate::script::{ClearOutcome, PageScript, WriteOutcome};

pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RestoreOptions {
    /// Pause between "load complete" and injection.
    pub settle_delay: Duration,
    /// `None` waits for completion indefinitely.
    pub load_timeout: Option<Duration>,
}

impl Default for RestoreOptions {
    fn default() -> Self {
        Self {
            settle_delay: DEFAULT_SETTLE_DELAY,
            load_timeout: None,
        }
    }
}

/// Per-step counts of one injection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub cookies_cleared: usize,
    pub cookies_clear_failed: usize,
    pub storage_cleared: bool,
    pub cookies_restored: usize,
    pub cookies_failed: usize,
    pub storage_written: usize,
    pub storage_failed: usize,
}

impl std::fmt::Display for RestoreReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} cookies ({} failed), {} storage items ({} failed)",
            self.cookies_restored, self.cookies_failed, self.storage_written, self.storage_failed
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestorePlan {
    /// The tab already shows the snapshot URL.
    InjectNow,
    /// Same origin: navigate the tab itself.
    NavigateInPlace,
    /// Different origin: open a fresh tab at the snapshot URL.
    OpenNewTab,
}

pub fn plan_restore(current_url: &str, target_url: &str) -> RestorePlan {
    if current_url == target_url {
        RestorePlan::InjectNow
    } else if same_origin(current_url, target_url) {
        RestorePlan::NavigateInPlace
    } else {
        RestorePlan::OpenNewTab
    }
}

/// Scheme, host and port (default ports made explicit) all equal. Unparsable
/// URLs never share an origin.
pub fn same_origin(a: &str, b: &str) -> bool {
    match (Url::parse(a), Url::parse(b)) {
        (Ok(a), Ok(b)) => {
            let (oa, ob) = (a.origin(), b.origin());
            oa.is_tuple() && oa == ob
        }
        _ => false,
    }
}

fn origin_of(url: &str) -> Result<String, CoreError> {
    let parsed = Url::parse(url).map_err(|e| CoreError::invalid_url(url, e))?;
    Ok(parsed.origin().ascii_serialization())
}

// ============================================================
// Load waiting
// ============================================================

/// One-shot "tab finished loading" listener.
///
/// Subscribed before the navigation it waits for, and consumed by
/// [`LoadWaiter::wait`]; dropping it is the only way to unregister, so it is
/// released exactly once on every path.
#[derive(Debug)]
pub struct LoadWaiter {
    updates: broadcast::Receiver<TabUpdate>,
    tab: Option<TabId>,
}

impl LoadWaiter {
    pub fn register(backend: &dyn Backend) -> Self {
        Self {
            updates: backend.subscribe_tab_updates(),
            tab: None,
        }
    }

    /// Sets the tab to wait for, once it is known.
    pub fn bind(mut self, tab: TabId) -> Self {
        self.tab = Some(tab);
        self
    }

    pub async fn wait(self, timeout: Option<Duration>) -> Result<(), CoreError> {
        let tab = self.tab.clone().unwrap_or_else(|| TabId(String::new()));
        match timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait_complete())
                .await
                .map_err(|_| CoreError::LoadTimeout(tab.0))?,
            None => self.wait_complete().await,
        }
    }

    async fn wait_complete(mut self) -> Result<(), CoreError> {
        let tab = self.tab.take().unwrap_or_else(|| TabId(String::new()));
        loop {
            match self.updates.recv().await {
                Ok(update) if update.tab_id == tab && update.status == TabStatus::Complete => {
                    debug!("Tab {} finished loading", tab);
                    return Ok(());
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Missed {} tab updates while waiting for {}", skipped, tab);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(CoreError::TabClosed(tab.0));
                }
            }
        }
    }
}

/// A restoration whose navigation has been started but whose injection has
/// not yet run.
#[derive(Debug)]
pub struct PendingRestore {
    snapshot: Snapshot,
    tab: TabId,
    opened_new_tab: bool,
    waiter: Option<LoadWaiter>,
    options: RestoreOptions,
}

impl PendingRestore {
    pub fn tab_id(&self) -> &TabId {
        &self.tab
    }

    pub fn opened_new_tab(&self) -> bool {
        self.opened_new_tab
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Waits for the load (if a navigation was started), settles, injects.
    pub async fn complete(self, backend: &dyn Backend) -> Result<RestoreReport, CoreError> {
        if let Some(waiter) = self.waiter {
            waiter.wait(self.options.load_timeout).await?;
            tokio::time::sleep(self.options.settle_delay).await;
        }
        inject(backend, &self.tab, &self.snapshot).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct Restorer {
    options: RestoreOptions,
}

impl Restorer {
    pub fn new(options: RestoreOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &RestoreOptions {
        &self.options
    }

    /// Routes the restoration and starts any navigation. Fails only if the
    /// target tab cannot be created or navigated.
    pub async fn begin(
        &self,
        backend: &dyn Backend,
        snapshot: Snapshot,
        tab: &TabInfo,
    ) -> Result<PendingRestore, CoreError> {
        let plan = plan_restore(&tab.url, &snapshot.url);
        info!("Restoring {} into tab {} ({:?})", snapshot.id, tab.id, plan);

        let (target, opened_new_tab, waiter) = match plan {
            RestorePlan::InjectNow => (tab.id.clone(), false, None),
            RestorePlan::NavigateInPlace => {
                let waiter = LoadWaiter::register(backend);
                backend.update_tab(&tab.id, &snapshot.url).await?;
                (tab.id.clone(), false, Some(waiter.bind(tab.id.clone())))
            }
            RestorePlan::OpenNewTab => {
                let waiter = LoadWaiter::register(backend);
                let created = backend.create_tab(&snapshot.url).await?;
                (created.id.clone(), true, Some(waiter.bind(created.id)))
            }
        };

        Ok(PendingRestore {
            snapshot,
            tab: target,
            opened_new_tab,
            waiter,
            options: self.options,
        })
    }

    /// Local replay: rewrites the snapshot onto `endpoint` and always opens a
    /// new tab.
    pub async fn begin_local(
        &self,
        backend: &dyn Backend,
        snapshot: Snapshot,
        endpoint: &str,
    ) -> Result<PendingRestore, CoreError> {
        let local = localize_snapshot(snapshot, endpoint)?;
        info!("Replaying {} against {}", local.id, local.url);

        let waiter = LoadWaiter::register(backend);
        let created = backend.create_tab(&local.url).await?;
        Ok(PendingRestore {
            snapshot: local,
            tab: created.id.clone(),
            opened_new_tab: true,
            waiter: Some(waiter.bind(created.id)),
            options: self.options,
        })
    }

    pub async fn restore(
        &self,
        backend: &dyn Backend,
        snapshot: Snapshot,
        tab: &TabInfo,
    ) -> Result<RestoreReport, CoreError> {
        self.begin(backend, snapshot, tab)
            .await?
            .complete(backend)
            .await
    }

    pub async fn restore_to_local(
        &self,
        backend: &dyn Backend,
        snapshot: Snapshot,
        endpoint: &str,
    ) -> Result<RestoreReport, CoreError> {
        self.begin_local(backend, snapshot, endpoint)
            .await?
            .complete(backend)
            .await
    }
}

/// Moves a snapshot onto the local endpoint: cookie domains become the local
/// host, `secure` is dropped for plain HTTP, and the URL keeps the original
/// path, query and fragment.
pub fn localize_snapshot(mut snapshot: Snapshot, endpoint: &str) -> Result<Snapshot, CoreError> {
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return Err(CoreError::LocalEndpointMissing);
    }
    let local = Url::parse(endpoint).map_err(|e| CoreError::invalid_url(endpoint, e))?;
    let host = local
        .host_str()
        .ok_or_else(|| CoreError::invalid_url(endpoint, "no host"))?
        .to_string();
    let plain_http = local.scheme() == "http";

    for cookie in &mut snapshot.cookies {
        cookie.domain = host.clone();
        if plain_http {
            cookie.secure = false;
        }
    }

    let original = Url::parse(&snapshot.url).map_err(|e| CoreError::invalid_url(&snapshot.url, e))?;
    let mut rewritten = format!("{}{}", local.origin().ascii_serialization(), original.path());
    if let Some(query) = original.query() {
        rewritten.push('?');
        rewritten.push_str(query);
    }
    if let Some(fragment) = original.fragment() {
        rewritten.push('#');
        rewritten.push_str(fragment);
    }
    let rewritten = Url::parse(&rewritten).map_err(|e| CoreError::invalid_url(&rewritten, e))?;
    snapshot.url = rewritten.to_string();
    Ok(snapshot)
}

// ============================================================
// Injection
// ============================================================

/// Clear, restore cookies, write storage, then reload. Only the final
/// navigation can fail the whole operation.
pub async fn inject(
    backend: &dyn Backend,
    tab: &TabId,
    snapshot: &Snapshot,
) -> Result<RestoreReport, CoreError> {
    let origin = origin_of(&snapshot.url)?;
    let mut report = RestoreReport::default();

    clear_cookies(backend, &snapshot.url, &origin, &mut report).await;
    clear_storage(backend, tab, &mut report).await;
    restore_cookies(backend, &snapshot.cookies, &origin, &mut report).await;
    write_storage(backend, tab, snapshot, &mut report).await;

    backend.update_tab(tab, &snapshot.url).await?;
    info!(
        "Restored tab {}: {} cookies set ({} failed), {} storage keys written ({} failed)",
        tab,
        report.cookies_restored,
        report.cookies_failed,
        report.storage_written,
        report.storage_failed
    );
    Ok(report)
}

async fn clear_cookies(backend: &dyn Backend, url: &str, origin: &str, report: &mut RestoreReport) {
    let existing = match backend.get_cookies(&CookieQuery::Url(url.to_string())).await {
        Ok(cookies) => cookies,
        Err(e) => {
            warn!("Error clearing existing cookies: {}", e);
            return;
        }
    };
    for cookie in existing {
        let cookie_url = format!("{}{}", origin, cookie.path);
        match backend.remove_cookie(&cookie_url, &cookie.name).await {
            Ok(()) => report.cookies_cleared += 1,
            Err(e) => {
                report.cookies_clear_failed += 1;
                warn!("Error clearing existing cookie {}: {}", cookie.name, e);
            }
        }
    }
    debug!("Cleared {} existing cookies", report.cookies_cleared);
}

async fn clear_storage(backend: &dyn Backend, tab: &TabId, report: &mut RestoreReport) {
    match backend.execute_script(tab, &PageScript::ClearStorage).await {
        Ok(value) => {
            let outcome: ClearOutcome = serde_json::from_value(value).unwrap_or_default();
            for area in &outcome.failed {
                warn!("Error clearing existing {}", area);
            }
            report.storage_cleared = outcome.failed.is_empty();
        }
        Err(e) => warn!("Error clearing existing storage data: {}", e),
    }
}

/// The network-settable form of a stored cookie, addressed through the
/// snapshot's own origin.
pub fn cookie_details(cookie: &Cookie, origin: &str) -> SetCookieDetails {
    SetCookieDetails {
        url: format!("{}{}", origin, cookie.path),
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: (!cookie.host_only).then(|| cookie.domain.clone()),
        path: cookie.path.clone(),
        secure: cookie.secure,
        http_only: cookie.http_only,
        expiration_date: if cookie.session {
            None
        } else {
            cookie.expiration_date
        },
    }
}

async fn restore_cookies(
    backend: &dyn Backend,
    cookies: &[Cookie],
    origin: &str,
    report: &mut RestoreReport,
) {
    for cookie in cookies {
        match backend.set_cookie(&cookie_details(cookie, origin)).await {
            Ok(()) => report.cookies_restored += 1,
            Err(e) => {
                report.cookies_failed += 1;
                warn!("Error setting cookie {}: {}", cookie.name, e);
            }
        }
    }
}

async fn write_storage(
    backend: &dyn Backend,
    tab: &TabId,
    snapshot: &Snapshot,
    report: &mut RestoreReport,
) {
    let script = PageScript::WriteStorage {
        local: snapshot.local_storage.clone(),
        session: snapshot.session_storage.clone(),
    };
    match backend.execute_script(tab, &script).await {
        Ok(value) => {
            let outcome: WriteOutcome = serde_json::from_value(value).unwrap_or_default();
            for key in &outcome.failed {
                warn!("Error setting storage item {}", key);
            }
            report.storage_written = outcome.written;
            report.storage_failed = outcome.failed.len();
        }
        Err(e) => {
            report.storage_failed = snapshot.local_storage.len() + snapshot.session_storage.len();
            warn!("Error injecting storage data: {}", e);
        }
    }
}
