//! Messages exchanged with the extension over the WebSocket.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use swiftbug_engine::Settings;
use swiftbug_engine::backend::BackendError;
use swiftbug_engine::protocol::{
    BridgeQuery, CookieQuery, ScriptWorld, SetCookieDetails, TabId, TabUpdate,
};
use swiftbug_engine::script::PageScript;

/// One privileged browser call, answered by a [`Reply`] with the same id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteCommand {
    pub id: u64,
    #[serde(flatten)]
    pub call: RemoteCall,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum RemoteCall {
    ActiveTab,
    #[serde(rename_all = "camelCase")]
    GetTab { tab_id: TabId },
    CreateTab { url: String },
    #[serde(rename_all = "camelCase")]
    UpdateTab { tab_id: TabId, url: String },
    /// `code` is the ready-to-run source; `script` names it.
    #[serde(rename_all = "camelCase")]
    ExecuteScript {
        tab_id: TabId,
        world: ScriptWorld,
        code: String,
        script: PageScript,
    },
    GetCookies { query: CookieQuery },
    SetCookie { details: SetCookieDetails },
    RemoveCookie { url: String, name: String },
    #[serde(rename_all = "camelCase")]
    QueryBridge { tab_id: TabId, query: BridgeQuery },
    #[serde(rename_all = "camelCase")]
    CaptureVisibleTab {
        tab_id: TabId,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        window_id: Option<i64>,
    },
    UserAgent,
    ApplySettings { settings: Settings },
}

impl RemoteCall {
    pub fn execute_script(tab_id: TabId, script: &PageScript) -> Self {
        RemoteCall::ExecuteScript {
            tab_id,
            world: script.world(),
            code: script.source(),
            script: script.clone(),
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            RemoteCall::ActiveTab => "activeTab",
            RemoteCall::GetTab { .. } => "getTab",
            RemoteCall::CreateTab { .. } => "createTab",
            RemoteCall::UpdateTab { .. } => "updateTab",
            RemoteCall::ExecuteScript { .. } => "executeScript",
            RemoteCall::GetCookies { .. } => "getCookies",
            RemoteCall::SetCookie { .. } => "setCookie",
            RemoteCall::RemoveCookie { .. } => "removeCookie",
            RemoteCall::QueryBridge { .. } => "queryBridge",
            RemoteCall::CaptureVisibleTab { .. } => "captureVisibleTab",
            RemoteCall::UserAgent => "userAgent",
            RemoteCall::ApplySettings { .. } => "applySettings",
        }
    }
}

/// Anything the extension sends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ExtensionMessage {
    Reply(Reply),
    TabUpdate(TabUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub id: u64,
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RemoteError>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteError {
    /// Machine-readable kind, e.g. `tabNotFound`.
    #[serde(default)]
    pub code: String,
    pub message: String,
}

impl From<RemoteError> for BackendError {
    fn from(err: RemoteError) -> Self {
        match err.code.as_str() {
            "noActiveTab" => BackendError::NoActiveTab,
            "tabNotFound" => BackendError::TabNotFound(err.message),
            "navigation" => BackendError::Navigation(err.message),
            "script" => BackendError::Script(err.message),
            "cookie" => BackendError::Cookie(err.message),
            "screenshot" => BackendError::Screenshot(err.message),
            "bridgeUnavailable" => BackendError::BridgeUnavailable(err.message),
            "notSupported" => BackendError::NotSupported(err.message),
            _ => BackendError::Other(err.message),
        }
    }
}

impl Reply {
    pub fn into_result(self) -> Result<Value, BackendError> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(self.result),
        }
    }
}
