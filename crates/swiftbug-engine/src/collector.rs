//! Data Collector: gathers one snapshot of a tab from independent sources.
//!
//! Every step is best-effort. A failing source is logged and replaced by its
//! empty value; only the absence of a target tab is an error.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use std::collections::HashSet;
use swiftbug_common::Settings;
use swiftbug_common::protocol::{
    BridgeQuery, CapturedEvent, ConsoleEntry, Cookie, CookieQuery, NetworkRecord, Snapshot,
    TabId, TabInfo, Viewport, default_title, generate_report_id,
};
use tracing::{debug, warn};

use crate::backend::Backend;
use crate::error::CoreError;
use crate::script::{PageScript, RawViewport, StorageContents};

pub struct DataCollector<'a> {
    backend: &'a dyn Backend,
    settings: &'a Settings,
}

impl<'a> DataCollector<'a> {
    pub fn new(backend: &'a dyn Backend, settings: &'a Settings) -> Self {
        Self { backend, settings }
    }

    /// The given tab, or the active one.
    pub async fn resolve_tab(&self, tab: Option<&TabId>) -> Result<TabInfo, CoreError> {
        match tab {
            Some(id) => Ok(self.backend.get_tab(id).await?),
            None => self
                .backend
                .active_tab()
                .await?
                .ok_or(CoreError::NoActiveTab),
        }
    }

    pub async fn collect(&self, tab: &TabInfo) -> Snapshot {
        let url = self.page_url(tab).await;
        let cookies = self.cookies(&url).await;
        let console_log = self.console_log(&tab.id).await;
        let network_requests = if self.settings.include_network_requests {
            self.network_requests(&tab.id).await
        } else {
            Vec::new()
        };
        let storage = self.storage(&tab.id).await;
        let viewport = self.viewport(&tab.id).await;
        let screenshot = if self.settings.include_screenshot {
            self.screenshot(tab).await
        } else {
            None
        };
        let user_agent = match self.backend.user_agent().await {
            Ok(ua) => ua,
            Err(e) => {
                debug!("User agent unavailable: {}", e);
                "Unknown".to_string()
            }
        };

        Snapshot {
            id: generate_report_id(),
            timestamp: Utc::now(),
            title: if tab.title.is_empty() {
                default_title(&url)
            } else {
                tab.title.clone()
            },
            description: String::new(),
            user_agent,
            viewport,
            cookies,
            local_storage: storage.local,
            session_storage: storage.session,
            console_log,
            network_requests,
            screenshot,
            url,
        }
    }

    /// Live `location.href` (keeps the fragment), else the tab's URL.
    async fn page_url(&self, tab: &TabInfo) -> String {
        match self
            .backend
            .execute_script(&tab.id, &PageScript::LocationHref)
            .await
        {
            Ok(value) => match value.as_str() {
                Some(href) if !href.is_empty() => href.to_string(),
                _ => tab.url.clone(),
            },
            Err(e) => {
                warn!("Error getting complete URL with hash: {}", e);
                tab.url.clone()
            }
        }
    }

    async fn cookies(&self, url: &str) -> Vec<Cookie> {
        let host = match url::Url::parse(url) {
            Ok(parsed) => parsed.host_str().map(str::to_string),
            Err(e) => {
                warn!("Error collecting cookies, unparsable URL {}: {}", url, e);
                return Vec::new();
            }
        };

        let mut all = match self
            .backend
            .get_cookies(&CookieQuery::Url(url.to_string()))
            .await
        {
            Ok(c) => c,
            Err(e) => {
                warn!("Error collecting cookies for URL: {}", e);
                Vec::new()
            }
        };
        if let Some(host) = host {
            match self.backend.get_cookies(&CookieQuery::Domain(host)).await {
                Ok(c) => all.extend(c),
                Err(e) => warn!("Error collecting cookies for domain: {}", e),
            }
        }
        let unique = dedupe_cookies(all);
        debug!("Collected {} cookies", unique.len());
        unique
    }

    async fn console_log(&self, tab: &TabId) -> Vec<ConsoleEntry> {
        match self.backend.query_bridge(tab, BridgeQuery::ConsoleLog).await {
            Ok(events) => events
                .into_iter()
                .filter_map(|e| match e {
                    CapturedEvent::Console(entry) => Some(entry),
                    CapturedEvent::Network(_) => None,
                })
                .collect(),
            Err(e) => {
                warn!("Error collecting console log: {}", e);
                Vec::new()
            }
        }
    }

    async fn network_requests(&self, tab: &TabId) -> Vec<NetworkRecord> {
        match self
            .backend
            .query_bridge(tab, BridgeQuery::NetworkRequests)
            .await
        {
            Ok(events) => events
                .into_iter()
                .filter_map(|e| match e {
                    CapturedEvent::Network(record) => Some(record),
                    CapturedEvent::Console(_) => None,
                })
                .collect(),
            Err(e) => {
                warn!("Error collecting network requests: {}", e);
                Vec::new()
            }
        }
    }

    async fn storage(&self, tab: &TabId) -> StorageContents {
        let result = self
            .backend
            .execute_script(tab, &PageScript::ReadStorage)
            .await
            .map_err(|e| e.to_string())
            .and_then(|v| serde_json::from_value::<StorageContents>(v).map_err(|e| e.to_string()));
        match result {
            Ok(contents) => contents,
            Err(e) => {
                warn!("Error collecting storage data: {}", e);
                StorageContents::default()
            }
        }
    }

    async fn viewport(&self, tab: &TabId) -> Option<Viewport> {
        let result = self
            .backend
            .execute_script(tab, &PageScript::ReadViewport)
            .await
            .map_err(|e| e.to_string())
            .and_then(|v| serde_json::from_value::<RawViewport>(v).map_err(|e| e.to_string()));
        match result {
            Ok(raw) => Some(raw.into()),
            Err(e) => {
                warn!("Error collecting viewport info: {}", e);
                None
            }
        }
    }

    async fn screenshot(&self, tab: &TabInfo) -> Option<String> {
        match self.backend.capture_visible_tab(tab).await {
            Ok(png) => Some(format!("data:image/png;base64,{}", BASE64.encode(png))),
            Err(e) => {
                warn!("Error taking screenshot: {}", e);
                None
            }
        }
    }
}

/// Keeps the first cookie of each (name, domain, path) identity, in order.
pub fn dedupe_cookies(cookies: Vec<Cookie>) -> Vec<Cookie> {
    let mut seen = HashSet::new();
    cookies
        .into_iter()
        .filter(|c| seen.insert((c.name.clone(), c.domain.clone(), c.path.clone())))
        .collect()
}
