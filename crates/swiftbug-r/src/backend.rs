use crate::server::RemoteServer;
use crate::wire::{RemoteCall, RemoteCommand, Reply};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use swiftbug_engine::Settings;
use swiftbug_engine::backend::{Backend, BackendError};
use swiftbug_engine::config::schema::RemoteConfig;
use swiftbug_engine::protocol::{
    BridgeQuery, CapturedEvent, Cookie, CookieQuery, SetCookieDetails, TabId, TabInfo, TabUpdate,
};
use swiftbug_engine::script::PageScript;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type PendingReplies = Arc<Mutex<HashMap<u64, oneshot::Sender<Reply>>>>;

/// Relays every privileged call to the real extension over a WebSocket.
pub struct RemoteBackend {
    server: RemoteServer,
    link: Mutex<Option<Link>>,
    pending: PendingReplies,
    next_id: AtomicU64,
    connect_timeout: Duration,
    reply_timeout: Duration,
}

/// A started server and the task routing its replies.
struct Link {
    addr: SocketAddr,
    command_tx: broadcast::Sender<RemoteCommand>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Link {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

impl RemoteBackend {
    pub fn new(port: u16) -> Self {
        Self::with_config(&RemoteConfig {
            port,
            ..RemoteConfig::default()
        })
    }

    pub fn with_config(config: &RemoteConfig) -> Self {
        Self {
            server: RemoteServer::new(config.port),
            link: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
            reply_timeout: Duration::from_secs(config.reply_timeout_secs),
        }
    }

    /// Bound address once launched.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.link.lock().ok()?.as_ref().map(|link| link.addr)
    }

    fn command_tx(&self) -> Result<broadcast::Sender<RemoteCommand>, BackendError> {
        self.link
            .lock()
            .map_err(|_| BackendError::Other("link lock poisoned".into()))?
            .as_ref()
            .map(|link| link.command_tx.clone())
            .ok_or(BackendError::NotReady)
    }

    async fn wait_for_extension(
        &self,
        command_tx: &broadcast::Sender<RemoteCommand>,
    ) -> Result<(), BackendError> {
        if command_tx.receiver_count() > 0 {
            return Ok(());
        }
        info!("Waiting for browser extension to connect...");
        let deadline = tokio::time::Instant::now() + self.connect_timeout;
        while command_tx.receiver_count() == 0 {
            if tokio::time::Instant::now() >= deadline {
                return Err(BackendError::Timeout {
                    operation: "waiting for the extension to connect".into(),
                });
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        info!("Extension connected.");
        Ok(())
    }

    async fn call(&self, call: RemoteCall) -> Result<Value, BackendError> {
        let command_tx = self.command_tx()?;
        self.wait_for_extension(&command_tx).await?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let method = call.method();
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending_insert(id, reply_tx)?;

        if let Err(e) = command_tx.send(RemoteCommand { id, call }) {
            self.pending_remove(id);
            return Err(BackendError::Other(format!("Failed to broadcast: {}", e)));
        }

        match tokio::time::timeout(self.reply_timeout, reply_rx).await {
            Ok(Ok(reply)) => reply.into_result(),
            Ok(Err(_)) => Err(BackendError::ConnectionLost),
            Err(_) => {
                self.pending_remove(id);
                Err(BackendError::Timeout {
                    operation: method.to_string(),
                })
            }
        }
    }

    async fn call_as<T: DeserializeOwned>(&self, call: RemoteCall) -> Result<T, BackendError> {
        let value = self.call(call).await?;
        Ok(serde_json::from_value(value)?)
    }

    fn pending_insert(&self, id: u64, tx: oneshot::Sender<Reply>) -> Result<(), BackendError> {
        self.pending
            .lock()
            .map_err(|_| BackendError::Other("reply table poisoned".into()))?
            .insert(id, tx);
        Ok(())
    }

    fn pending_remove(&self, id: u64) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&id);
        }
    }
}

/// Routes each reply to the call waiting on its id.
async fn dispatch_replies(mut reply_rx: mpsc::Receiver<Reply>, pending: PendingReplies) {
    while let Some(reply) = reply_rx.recv().await {
        let waiter = pending.lock().ok().and_then(|mut p| p.remove(&reply.id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => warn!("Reply #{} matches no pending call", reply.id),
        }
    }
    debug!("Reply channel closed");
}

/// Accepts both a bare base64 payload and a `data:` URL.
pub fn decode_image(payload: &str) -> Result<Vec<u8>, BackendError> {
    let encoded = match payload.split_once(";base64,") {
        Some((_, data)) => data,
        None => payload,
    };
    BASE64
        .decode(encoded)
        .map_err(|e| BackendError::Screenshot(format!("Base64 decode failed: {}", e)))
}

#[async_trait]
impl Backend for RemoteBackend {
    async fn launch(&mut self) -> Result<(), BackendError> {
        let handle = self
            .server
            .start()
            .await
            .map_err(|e| BackendError::Other(format!("Connection failed: {}", e)))?;
        info!(
            "Remote Backend ready; connect the browser extension to ws://{}",
            handle.addr
        );

        let command_tx = handle.command_tx.clone();
        let dispatcher = tokio::spawn(dispatch_replies(handle.reply_rx, self.pending.clone()));
        let accept = handle.accept_task;
        *self
            .link
            .lock()
            .map_err(|_| BackendError::Other("link lock poisoned".into()))? = Some(Link {
            addr: handle.addr,
            command_tx,
            tasks: vec![accept, dispatcher],
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), BackendError> {
        if let Ok(mut link) = self.link.lock() {
            link.take();
        }
        if let Ok(mut pending) = self.pending.lock() {
            pending.clear();
        }
        Ok(())
    }

    async fn is_ready(&self) -> bool {
        self.link.lock().map(|l| l.is_some()).unwrap_or(false)
    }

    async fn active_tab(&self) -> Result<Option<TabInfo>, BackendError> {
        self.call_as(RemoteCall::ActiveTab).await
    }

    async fn get_tab(&self, tab: &TabId) -> Result<TabInfo, BackendError> {
        self.call_as(RemoteCall::GetTab {
            tab_id: tab.clone(),
        })
        .await
    }

    async fn create_tab(&self, url: &str) -> Result<TabInfo, BackendError> {
        self.call_as(RemoteCall::CreateTab {
            url: url.to_string(),
        })
        .await
    }

    async fn update_tab(&self, tab: &TabId, url: &str) -> Result<(), BackendError> {
        self.call(RemoteCall::UpdateTab {
            tab_id: tab.clone(),
            url: url.to_string(),
        })
        .await?;
        Ok(())
    }

    fn subscribe_tab_updates(&self) -> broadcast::Receiver<TabUpdate> {
        self.server.subscribe_updates()
    }

    async fn execute_script(&self, tab: &TabId, script: &PageScript) -> Result<Value, BackendError> {
        self.call(RemoteCall::execute_script(tab.clone(), script))
            .await
    }

    async fn get_cookies(&self, query: &CookieQuery) -> Result<Vec<Cookie>, BackendError> {
        self.call_as(RemoteCall::GetCookies {
            query: query.clone(),
        })
        .await
    }

    async fn set_cookie(&self, details: &SetCookieDetails) -> Result<(), BackendError> {
        self.call(RemoteCall::SetCookie {
            details: details.clone(),
        })
        .await?;
        Ok(())
    }

    async fn remove_cookie(&self, url: &str, name: &str) -> Result<(), BackendError> {
        self.call(RemoteCall::RemoveCookie {
            url: url.to_string(),
            name: name.to_string(),
        })
        .await?;
        Ok(())
    }

    async fn query_bridge(
        &self,
        tab: &TabId,
        query: BridgeQuery,
    ) -> Result<Vec<CapturedEvent>, BackendError> {
        self.call_as(RemoteCall::QueryBridge {
            tab_id: tab.clone(),
            query,
        })
        .await
    }

    async fn capture_visible_tab(&self, tab: &TabInfo) -> Result<Vec<u8>, BackendError> {
        let payload: String = self
            .call_as(RemoteCall::CaptureVisibleTab {
                tab_id: tab.id.clone(),
                window_id: tab.window_id,
            })
            .await?;
        decode_image(&payload)
    }

    async fn user_agent(&self) -> Result<String, BackendError> {
        self.call_as(RemoteCall::UserAgent).await
    }

    async fn apply_settings(&self, settings: &Settings) -> Result<(), BackendError> {
        // Without a connected extension there are no live pages to update.
        let command_tx = self.command_tx()?;
        if command_tx.receiver_count() == 0 {
            debug!("No extension connected, settings apply on next capture");
            return Ok(());
        }
        self.call(RemoteCall::ApplySettings {
            settings: settings.clone(),
        })
        .await?;
        Ok(())
    }
}
