use crate::cdp::CdpClient;
use crate::inject::run_script;
use crate::tab::{TabHandle, TabShared, attach, tab_id};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::cdp::browser_protocol::network::{
    self, CookieSameSite, DeleteCookiesParams, GetAllCookiesParams, GetCookiesParams,
    SetCookieParams, TimeSinceEpoch,
};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use swiftbug_engine::Settings;
use swiftbug_engine::bridge::PageContext;
use swiftbug_engine::backend::{Backend, BackendError};
use swiftbug_engine::config::schema::CaptureConfig;
use swiftbug_engine::protocol::{
    BridgeQuery, CapturedEvent, Cookie, CookieQuery, SetCookieDetails, TabId, TabInfo, TabUpdate,
};
use swiftbug_engine::script::PageScript;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Drives a local Chromium over the DevTools protocol.
pub struct HeadlessBackend {
    client: tokio::sync::Mutex<Option<CdpClient>>,
    tabs: tokio::sync::Mutex<BTreeMap<TabId, TabHandle>>,
    active: Mutex<Option<TabId>>,
    shared: TabShared,
    visible: bool,
}

impl HeadlessBackend {
    pub fn new(capture: CaptureConfig) -> Self {
        Self::new_with_visibility(capture, false)
    }

    pub fn new_with_visibility(capture: CaptureConfig, visible: bool) -> Self {
        Self {
            client: tokio::sync::Mutex::new(None),
            tabs: tokio::sync::Mutex::new(BTreeMap::new()),
            active: Mutex::new(None),
            shared: TabShared::new(capture),
            visible,
        }
    }

    fn active_id(&self) -> Option<TabId> {
        self.active.lock().ok().and_then(|a| a.clone())
    }

    fn set_active(&self, tab: &TabId) {
        if let Ok(mut active) = self.active.lock() {
            *active = Some(tab.clone());
        }
    }

    async fn page(&self, tab: &TabId) -> Result<Page, BackendError> {
        self.tabs
            .lock()
            .await
            .get(tab)
            .map(|handle| handle.page().clone())
            .ok_or_else(|| BackendError::TabNotFound(tab.to_string()))
    }

    /// Browser-wide commands still need a target to be sent through.
    async fn any_page(&self) -> Result<Page, BackendError> {
        if let Some(active) = self.active_id()
            && let Ok(page) = self.page(&active).await
        {
            return Ok(page);
        }
        self.tabs
            .lock()
            .await
            .values()
            .next()
            .map(|handle| handle.page().clone())
            .ok_or(BackendError::NotReady)
    }

    async fn open_page(&self, url: &str) -> Result<TabInfo, BackendError> {
        let page = {
            let client = self.client.lock().await;
            let client = client.as_ref().ok_or(BackendError::NotReady)?;
            client
                .browser
                .new_page("about:blank")
                .await
                .map_err(|e| BackendError::Navigation(e.to_string()))?
        };
        let id = tab_id(&page);
        let handle = attach(page.clone(), self.shared.clone())
            .await
            .map_err(|e| BackendError::Other(format!("Failed to attach to tab: {}", e)))?;
        self.tabs.lock().await.insert(id.clone(), handle);
        self.set_active(&id);

        if url != "about:blank" {
            info!("Opening tab {} at {}", id, url);
            page.goto(url)
                .await
                .map_err(|e| BackendError::Navigation(e.to_string()))?;
        }
        self.tab_info(&id, &page).await
    }

    async fn tab_info(&self, id: &TabId, page: &Page) -> Result<TabInfo, BackendError> {
        let url = page
            .url()
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?
            .unwrap_or_default();
        let title = page
            .get_title()
            .await
            .unwrap_or_default()
            .unwrap_or_default();
        Ok(TabInfo {
            id: id.clone(),
            window_id: None,
            url,
            title,
            active: self.active_id().as_ref() == Some(id),
        })
    }
}

impl Default for HeadlessBackend {
    fn default() -> Self {
        Self::new(CaptureConfig::default())
    }
}

/// `.example.com` and `example.com` both match `a.example.com`'s parent.
pub fn domain_matches(cookie_domain: &str, domain: &str) -> bool {
    let cookie_domain = cookie_domain.trim_start_matches('.');
    let domain = domain.trim_start_matches('.');
    cookie_domain.eq_ignore_ascii_case(domain)
        || cookie_domain
            .to_ascii_lowercase()
            .ends_with(&format!(".{}", domain.to_ascii_lowercase()))
}

pub fn to_cookie(cookie: &network::Cookie) -> Cookie {
    Cookie {
        name: cookie.name.clone(),
        value: cookie.value.clone(),
        domain: cookie.domain.clone(),
        path: cookie.path.clone(),
        secure: cookie.secure,
        http_only: cookie.http_only,
        host_only: !cookie.domain.starts_with('.'),
        session: cookie.session,
        expiration_date: (!cookie.session).then_some(cookie.expires),
        same_site: cookie.same_site.as_ref().map(|s| {
            match s {
                CookieSameSite::Strict => "strict",
                CookieSameSite::Lax => "lax",
                CookieSameSite::None => "no_restriction",
            }
            .to_string()
        }),
    }
}

#[async_trait]
impl Backend for HeadlessBackend {
    async fn launch(&mut self) -> Result<(), BackendError> {
        info!("Launching Headless Backend (Chromium)...");
        let client = CdpClient::launch(self.visible)
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        *self.client.lock().await = Some(client);
        self.open_page("about:blank").await?;
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.tabs.lock().await.clear();
        if let Some(client) = self.client.lock().await.take() {
            client
                .close()
                .await
                .map_err(|e| BackendError::Other(e.to_string()))?;
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.client.lock().await.is_some()
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, BackendError> {
        let Some(id) = self.active_id() else {
            return Ok(None);
        };
        match self.page(&id).await {
            Ok(page) => self.tab_info(&id, &page).await.map(Some),
            Err(BackendError::TabNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_tab(&self, tab: &TabId) -> Result<TabInfo, BackendError> {
        let page = self.page(tab).await?;
        self.tab_info(tab, &page).await
    }

    async fn create_tab(&self, url: &str) -> Result<TabInfo, BackendError> {
        self.open_page(url).await
    }

    async fn update_tab(&self, tab: &TabId, url: &str) -> Result<(), BackendError> {
        let page = self.page(tab).await?;
        info!("Navigating tab {} to: {}", tab, url);
        page.goto(url)
            .await
            .map_err(|e| BackendError::Navigation(e.to_string()))?;
        Ok(())
    }

    fn subscribe_tab_updates(&self) -> broadcast::Receiver<TabUpdate> {
        self.shared.updates.subscribe()
    }

    async fn execute_script(
        &self,
        tab: &TabId,
        script: &PageScript,
    ) -> Result<serde_json::Value, BackendError> {
        let page = self.page(tab).await?;
        run_script(&page, script)
            .await
            .map_err(|e| BackendError::Script(e.to_string()))
    }

    async fn get_cookies(&self, query: &CookieQuery) -> Result<Vec<Cookie>, BackendError> {
        let page = self.any_page().await?;
        let cookies = match query {
            CookieQuery::Url(url) => {
                page.execute(GetCookiesParams {
                    urls: Some(vec![url.clone()]),
                })
                .await
                .map_err(|e| BackendError::Cookie(format!("Get cookies failed: {}", e)))?
                .result
                .cookies
            }
            CookieQuery::Domain(domain) => page
                .execute(GetAllCookiesParams::default())
                .await
                .map_err(|e| BackendError::Cookie(format!("Get cookies failed: {}", e)))?
                .result
                .cookies
                .into_iter()
                .filter(|c| domain_matches(&c.domain, domain))
                .collect(),
        };
        Ok(cookies.iter().map(to_cookie).collect())
    }

    async fn set_cookie(&self, details: &SetCookieDetails) -> Result<(), BackendError> {
        let page = self.any_page().await?;
        let mut builder = SetCookieParams::builder()
            .name(details.name.clone())
            .value(details.value.clone())
            .url(details.url.clone())
            .path(details.path.clone())
            .secure(details.secure)
            .http_only(details.http_only);
        if let Some(domain) = &details.domain {
            builder = builder.domain(domain.clone());
        }
        if let Some(expires) = details.expiration_date {
            builder = builder.expires(TimeSinceEpoch::new(expires));
        }
        let params = builder
            .build()
            .map_err(|e| BackendError::Cookie(format!("Failed to build cookie: {:?}", e)))?;
        page.execute(params)
            .await
            .map_err(|e| BackendError::Cookie(format!("Set cookie {} failed: {}", details.name, e)))?;
        Ok(())
    }

    async fn remove_cookie(&self, url: &str, name: &str) -> Result<(), BackendError> {
        let page = self.any_page().await?;
        let params = DeleteCookiesParams::builder()
            .name(name)
            .url(url)
            .build()
            .map_err(|e| BackendError::Cookie(format!("Failed to build cookie: {:?}", e)))?;
        page.execute(params)
            .await
            .map_err(|e| BackendError::Cookie(format!("Remove cookie {} failed: {}", name, e)))?;
        Ok(())
    }

    async fn query_bridge(
        &self,
        tab: &TabId,
        query: BridgeQuery,
    ) -> Result<Vec<CapturedEvent>, BackendError> {
        let context = {
            let tabs = self.tabs.lock().await;
            let handle = tabs
                .get(tab)
                .ok_or_else(|| BackendError::TabNotFound(tab.to_string()))?;
            handle.context().await
        };
        context
            .query(query)
            .await
            .ok_or_else(|| BackendError::BridgeUnavailable(tab.to_string()))
    }

    async fn capture_visible_tab(&self, tab: &TabInfo) -> Result<Vec<u8>, BackendError> {
        let page = self.page(&tab.id).await?;
        page.screenshot(chromiumoxide::page::ScreenshotParams::builder().build())
            .await
            .map_err(|e| BackendError::Screenshot(e.to_string()))
    }

    async fn user_agent(&self) -> Result<String, BackendError> {
        let client = self.client.lock().await;
        let client = client.as_ref().ok_or(BackendError::NotReady)?;
        let version = client
            .browser
            .version()
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        Ok(version.user_agent)
    }

    async fn apply_settings(&self, settings: &Settings) -> Result<(), BackendError> {
        *self.shared.settings.write().await = settings.clone();
        let contexts = {
            let tabs = self.tabs.lock().await;
            let mut contexts = Vec::with_capacity(tabs.len());
            for (id, handle) in tabs.iter() {
                contexts.push((id.clone(), handle.context().await));
            }
            contexts
        };
        apply_to_contexts(contexts, settings).await;
        Ok(())
    }
}

/// Called with the tab table unlocked.
async fn apply_to_contexts(contexts: Vec<(TabId, Arc<PageContext>)>, settings: &Settings) {
    for (id, context) in contexts {
        debug!("Applying settings to tab {}", id);
        context.apply_settings(settings).await;
    }
}
