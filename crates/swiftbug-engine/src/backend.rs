use async_trait::async_trait;
pub use swiftbug_common::error::backend_error::BackendError;
use swiftbug_common::Settings;
use swiftbug_common::protocol::{
    BridgeQuery, CapturedEvent, Cookie, CookieQuery, SetCookieDetails, TabId, TabInfo, TabUpdate,
};
use tokio::sync::broadcast;

use crate::script::PageScript;

/// Privileged browser API seam shared by the headless and remote binaries.
///
/// Everything except `launch` takes `&self`, so a launched backend can be
/// shared behind an `Arc` with background restorations.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Launch the backend (start browser, wait for extension, etc.)
    async fn launch(&mut self) -> Result<(), BackendError>;

    /// Close the backend and cleanup resources.
    async fn close(&self) -> Result<(), BackendError>;

    async fn is_ready(&self) -> bool;

    /// Focused tab of the current window, if any.
    async fn active_tab(&self) -> Result<Option<TabInfo>, BackendError>;

    async fn get_tab(&self, tab: &TabId) -> Result<TabInfo, BackendError>;

    /// Open and focus a new tab at `url`.
    async fn create_tab(&self, url: &str) -> Result<TabInfo, BackendError>;

    /// Navigate an existing tab.
    async fn update_tab(&self, tab: &TabId, url: &str) -> Result<(), BackendError>;

    /// Tab lifecycle notifications. Subscribe before triggering a navigation
    /// to be sure to see its completion.
    fn subscribe_tab_updates(&self) -> broadcast::Receiver<TabUpdate>;

    async fn execute_script(
        &self,
        tab: &TabId,
        script: &PageScript,
    ) -> Result<serde_json::Value, BackendError>;

    async fn get_cookies(&self, query: &CookieQuery) -> Result<Vec<Cookie>, BackendError>;

    async fn set_cookie(&self, details: &SetCookieDetails) -> Result<(), BackendError>;

    async fn remove_cookie(&self, url: &str, name: &str) -> Result<(), BackendError>;

    /// Pull the buffered events from the tab's content bridge.
    async fn query_bridge(
        &self,
        tab: &TabId,
        query: BridgeQuery,
    ) -> Result<Vec<CapturedEvent>, BackendError>;

    /// PNG bytes of the visible viewport.
    async fn capture_visible_tab(&self, tab: &TabInfo) -> Result<Vec<u8>, BackendError>;

    async fn user_agent(&self) -> Result<String, BackendError> {
        Err(BackendError::NotSupported("user_agent".into()))
    }

    /// Push new capture settings to live page contexts.
    async fn apply_settings(&self, _settings: &Settings) -> Result<(), BackendError> {
        Ok(())
    }
}
