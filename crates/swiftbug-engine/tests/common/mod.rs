#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use swiftbug_engine::backend::{Backend, BackendError};
use swiftbug_engine::protocol::{
    BridgeQuery, CapturedEvent, Cookie, CookieQuery, SetCookieDetails, StorageMap, TabId, TabInfo,
    TabStatus, TabUpdate,
};
use swiftbug_engine::script::PageScript;
use tokio::sync::broadcast;

#[derive(Debug, Default, Clone)]
pub struct TabStorage {
    pub local: StorageMap,
    pub session: StorageMap,
}

/// In-memory browser: tabs, a cookie jar, per-tab storage and canned
/// bridge events. Every privileged call is appended to `calls`.
pub struct MockBackend {
    pub tabs: Mutex<BTreeMap<TabId, TabInfo>>,
    pub active: Mutex<Option<TabId>>,
    pub cookies: Mutex<Vec<Cookie>>,
    pub storage: Mutex<HashMap<TabId, TabStorage>>,
    pub events: Mutex<HashMap<TabId, Vec<CapturedEvent>>>,
    pub calls: Mutex<Vec<String>>,
    pub screenshot: Mutex<Option<Vec<u8>>>,
    /// When false, navigations never report "complete".
    pub completes_loads: Mutex<bool>,
    pub fail_scripts: Mutex<bool>,
    pub fail_bridge: Mutex<bool>,
    next_tab: Mutex<u32>,
    updates: broadcast::Sender<TabUpdate>,
}

impl Default for MockBackend {
    fn default() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self {
            tabs: Mutex::new(BTreeMap::new()),
            active: Mutex::new(None),
            cookies: Mutex::new(Vec::new()),
            storage: Mutex::new(HashMap::new()),
            events: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            screenshot: Mutex::new(Some(vec![0x89, b'P', b'N', b'G'])),
            completes_loads: Mutex::new(true),
            fail_scripts: Mutex::new(false),
            fail_bridge: Mutex::new(false),
            next_tab: Mutex::new(1),
            updates,
        }
    }
}

impl MockBackend {
    /// A backend with one active tab at `url`.
    pub fn with_tab(url: &str) -> Self {
        let backend = Self::default();
        backend.open(url);
        backend
    }

    pub fn open(&self, url: &str) -> TabInfo {
        let mut next = self.next_tab.lock().unwrap();
        let id = TabId(next.to_string());
        *next += 1;
        let tab = TabInfo {
            id: id.clone(),
            window_id: Some(1),
            url: url.to_string(),
            title: String::new(),
            active: true,
        };
        self.tabs.lock().unwrap().insert(id.clone(), tab.clone());
        *self.active.lock().unwrap() = Some(id);
        tab
    }

    pub fn tab(&self, id: &str) -> TabInfo {
        self.tabs.lock().unwrap()[&TabId::from(id)].clone()
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.lock().unwrap().len()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn storage_of(&self, id: &str) -> TabStorage {
        self.storage
            .lock()
            .unwrap()
            .get(&TabId::from(id))
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_storage(&self, id: &str, local: &[(&str, &str)], session: &[(&str, &str)]) {
        let to_map = |pairs: &[(&str, &str)]| {
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<StorageMap>()
        };
        self.storage.lock().unwrap().insert(
            TabId::from(id),
            TabStorage {
                local: to_map(local),
                session: to_map(session),
            },
        );
    }

    pub fn add_cookie(&self, cookie: Cookie) {
        self.cookies.lock().unwrap().push(cookie);
    }

    pub fn cookie_names(&self) -> Vec<String> {
        self.cookies
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.name.clone())
            .collect()
    }

    pub fn push_event(&self, id: &str, event: CapturedEvent) {
        self.events
            .lock()
            .unwrap()
            .entry(TabId::from(id))
            .or_default()
            .push(event);
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn finish_load(&self, tab: &TabId, url: &str) {
        if *self.completes_loads.lock().unwrap() {
            let _ = self.updates.send(TabUpdate {
                tab_id: tab.clone(),
                status: TabStatus::Loading,
                url: Some(url.to_string()),
            });
            let _ = self.updates.send(TabUpdate {
                tab_id: tab.clone(),
                status: TabStatus::Complete,
                url: Some(url.to_string()),
            });
        }
    }

    fn tab_url(&self, tab: &TabId) -> Result<String, BackendError> {
        self.tabs
            .lock()
            .unwrap()
            .get(tab)
            .map(|t| t.url.clone())
            .ok_or_else(|| BackendError::TabNotFound(tab.0.clone()))
    }
}

pub fn cookie(name: &str, value: &str, domain: &str) -> Cookie {
    Cookie {
        name: name.to_string(),
        value: value.to_string(),
        domain: domain.to_string(),
        path: "/".to_string(),
        secure: false,
        http_only: false,
        host_only: true,
        session: true,
        expiration_date: None,
        same_site: None,
    }
}

fn host_of(url: &str) -> String {
    url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_default()
}

fn domain_matches(cookie_domain: &str, host: &str) -> bool {
    let domain = cookie_domain.trim_start_matches('.');
    host == domain || host.ends_with(&format!(".{}", domain))
}

#[async_trait]
impl Backend for MockBackend {
    async fn launch(&mut self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        true
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, BackendError> {
        let active = self.active.lock().unwrap().clone();
        Ok(active.and_then(|id| self.tabs.lock().unwrap().get(&id).cloned()))
    }

    async fn get_tab(&self, tab: &TabId) -> Result<TabInfo, BackendError> {
        self.tabs
            .lock()
            .unwrap()
            .get(tab)
            .cloned()
            .ok_or_else(|| BackendError::TabNotFound(tab.0.clone()))
    }

    async fn create_tab(&self, url: &str) -> Result<TabInfo, BackendError> {
        self.record(format!("create_tab {}", url));
        let tab = self.open(url);
        self.finish_load(&tab.id, url);
        Ok(tab)
    }

    async fn update_tab(&self, tab: &TabId, url: &str) -> Result<(), BackendError> {
        self.record(format!("update_tab {} {}", tab, url));
        {
            let mut tabs = self.tabs.lock().unwrap();
            let info = tabs
                .get_mut(tab)
                .ok_or_else(|| BackendError::TabNotFound(tab.0.clone()))?;
            info.url = url.to_string();
        }
        self.finish_load(tab, url);
        Ok(())
    }

    fn subscribe_tab_updates(&self) -> broadcast::Receiver<TabUpdate> {
        self.updates.subscribe()
    }

    async fn execute_script(&self, tab: &TabId, script: &PageScript) -> Result<Value, BackendError> {
        self.record(format!("script {} {}", tab, script.name()));
        if *self.fail_scripts.lock().unwrap() {
            return Err(BackendError::Script("Cannot access contents of the page".into()));
        }
        let url = self.tab_url(tab)?;
        let mut storage = self.storage.lock().unwrap();
        let areas = storage.entry(tab.clone()).or_default();
        let result = match script {
            PageScript::LocationHref => json!(url),
            PageScript::ReadStorage => json!({
                "localStorage": areas.local,
                "sessionStorage": areas.session,
            }),
            PageScript::ReadViewport => {
                json!({"width": 1280.0, "height": 720.4, "scrollX": 0.0, "scrollY": 150.5})
            }
            PageScript::ClearStorage => {
                areas.local.clear();
                areas.session.clear();
                json!({"failed": []})
            }
            PageScript::WriteStorage { local, session } => {
                areas.local.extend(local.clone());
                areas.session.extend(session.clone());
                json!({"written": local.len() + session.len(), "failed": []})
            }
        };
        Ok(result)
    }

    async fn get_cookies(&self, query: &CookieQuery) -> Result<Vec<Cookie>, BackendError> {
        let host = match query {
            CookieQuery::Url(url) => host_of(url),
            CookieQuery::Domain(domain) => domain.clone(),
        };
        Ok(self
            .cookies
            .lock()
            .unwrap()
            .iter()
            .filter(|c| domain_matches(&c.domain, &host))
            .cloned()
            .collect())
    }

    async fn set_cookie(&self, details: &SetCookieDetails) -> Result<(), BackendError> {
        self.record(format!("set_cookie {}", details.name));
        let host = host_of(&details.url);
        let (domain, host_only) = match &details.domain {
            Some(d) => (d.clone(), false),
            None => (host, true),
        };
        let mut jar = self.cookies.lock().unwrap();
        jar.retain(|c| !(c.name == details.name && c.domain == domain && c.path == details.path));
        jar.push(Cookie {
            name: details.name.clone(),
            value: details.value.clone(),
            domain,
            path: details.path.clone(),
            secure: details.secure,
            http_only: details.http_only,
            host_only,
            session: details.expiration_date.is_none(),
            expiration_date: details.expiration_date,
            same_site: None,
        });
        Ok(())
    }

    async fn remove_cookie(&self, url: &str, name: &str) -> Result<(), BackendError> {
        self.record(format!("remove_cookie {}", name));
        let host = host_of(url);
        self.cookies
            .lock()
            .unwrap()
            .retain(|c| !(c.name == name && domain_matches(&c.domain, &host)));
        Ok(())
    }

    async fn query_bridge(
        &self,
        tab: &TabId,
        query: BridgeQuery,
    ) -> Result<Vec<CapturedEvent>, BackendError> {
        if *self.fail_bridge.lock().unwrap() {
            return Err(BackendError::BridgeUnavailable(tab.0.clone()));
        }
        let events = self
            .events
            .lock()
            .unwrap()
            .get(tab)
            .cloned()
            .unwrap_or_default();
        Ok(events
            .into_iter()
            .filter(|e| {
                matches!(
                    (query, e),
                    (BridgeQuery::ConsoleLog, CapturedEvent::Console(_))
                        | (BridgeQuery::NetworkRequests, CapturedEvent::Network(_))
                )
            })
            .collect())
    }

    async fn capture_visible_tab(&self, _tab: &TabInfo) -> Result<Vec<u8>, BackendError> {
        self.screenshot
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| BackendError::Screenshot("No active window".into()))
    }

    async fn user_agent(&self) -> Result<String, BackendError> {
        Ok("MockBrowser/1.0".to_string())
    }
}
