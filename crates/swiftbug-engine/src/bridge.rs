//! Content-side relay: buffers events coming out of a page context and
//! answers pull queries from the coordinator.

use regex::RegexSet;
use std::sync::Arc;
use swiftbug_common::protocol::{BridgeQuery, CapturedEvent, ConsoleEntry, NetworkRecord};
use swiftbug_common::{BoundedBuffer, Settings};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::channel::{
    BridgeControl, BridgeInbox, BridgeMessage, DEFAULT_CHANNEL_CAPACITY, EventSender, page_channel,
};
use crate::interceptor::{CapturePolicy, ConsoleCapture, NetworkCapture};

/// Substrings identifying the extension's own diagnostics. Matched
/// case-insensitively anywhere in a console message.
pub const NOISE_PATTERNS: &[&str] = &[
    "[SwiftBug]",
    "SwiftBug",
    "Bug Reporter",
    "BugReporter",
    "Chrome Bug Reporter",
    "Content Script Loaded",
    "Error accessing localStorage",
    "Error accessing sessionStorage",
    "Error clearing storage",
    "Error setting localStorage item",
    "Error setting sessionStorage item",
    "Storage data restored",
];

#[derive(Debug, Clone)]
pub struct NoiseFilter {
    set: RegexSet,
}

impl Default for NoiseFilter {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl NoiseFilter {
    /// Built-in patterns plus `extra` literal substrings.
    pub fn new(extra: &[String]) -> Self {
        let patterns = NOISE_PATTERNS
            .iter()
            .map(|p| p.to_string())
            .chain(extra.iter().cloned())
            .map(|p| format!("(?i){}", regex::escape(&p)));
        let set = RegexSet::new(patterns).unwrap_or_else(|e| {
            warn!("invalid noise pattern, filtering disabled: {}", e);
            RegexSet::empty()
        });
        Self { set }
    }

    pub fn is_noise(&self, message: &str) -> bool {
        self.set.is_match(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeLimits {
    pub max_console_lines: usize,
    pub max_network_requests: usize,
}

impl Default for BridgeLimits {
    fn default() -> Self {
        Self::from(&Settings::default())
    }
}

impl From<&Settings> for BridgeLimits {
    fn from(settings: &Settings) -> Self {
        Self {
            max_console_lines: settings.max_console_lines,
            max_network_requests: settings.max_network_requests,
        }
    }
}

/// Two independent ring buffers plus the queue of events that arrived before
/// the bridge was initialised. That queue holds at most the combined console
/// and network limits; older events are dropped first.
#[derive(Debug)]
pub struct Bridge {
    console: BoundedBuffer<ConsoleEntry>,
    network: BoundedBuffer<NetworkRecord>,
    pending: BoundedBuffer<CapturedEvent>,
    ready: bool,
    noise: NoiseFilter,
}

impl Bridge {
    pub fn new(noise: NoiseFilter) -> Self {
        let limits = BridgeLimits::default();
        Self {
            console: BoundedBuffer::new(limits.max_console_lines),
            network: BoundedBuffer::new(limits.max_network_requests),
            pending: BoundedBuffer::new(pending_capacity(limits)),
            ready: false,
            noise,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn accept(&mut self, event: CapturedEvent) {
        if self.ready {
            self.insert(event);
        } else if self.pending.push(event).is_some() {
            debug!(
                "bridge not ready, dropped oldest of {} pending events",
                self.pending.capacity()
            );
        }
    }

    fn insert(&mut self, event: CapturedEvent) {
        match event {
            CapturedEvent::Console(entry) => {
                if self.noise.is_noise(&entry.message) {
                    return;
                }
                self.console.push(entry);
            }
            CapturedEvent::Network(record) => {
                self.network.push(record);
            }
        }
    }

    /// Applies the limits and drains the pending queue in arrival order.
    pub fn mark_ready(&mut self, limits: BridgeLimits) {
        self.apply_limits(limits);
        self.ready = true;
        let pending: Vec<CapturedEvent> = self.pending.drain().collect();
        if !pending.is_empty() {
            debug!("bridge ready, draining {} pending events", pending.len());
        }
        for event in pending {
            self.insert(event);
        }
    }

    pub fn apply_limits(&mut self, limits: BridgeLimits) {
        self.console.set_capacity(limits.max_console_lines);
        self.network.set_capacity(limits.max_network_requests);
        self.pending.set_capacity(pending_capacity(limits));
    }

    pub fn console_log(&self) -> Vec<ConsoleEntry> {
        self.console.to_vec()
    }

    pub fn network_requests(&self) -> Vec<NetworkRecord> {
        self.network.to_vec()
    }

    pub fn answer(&self, query: BridgeQuery) -> Vec<CapturedEvent> {
        match query {
            BridgeQuery::ConsoleLog => self
                .console
                .iter()
                .cloned()
                .map(CapturedEvent::Console)
                .collect(),
            BridgeQuery::NetworkRequests => self
                .network
                .iter()
                .cloned()
                .map(CapturedEvent::Network)
                .collect(),
        }
    }

    pub(crate) async fn run(mut self, mut inbox: BridgeInbox) {
        while let Some(message) = inbox.recv().await {
            match message {
                BridgeMessage::Event(event) => self.accept(event),
                BridgeMessage::Ready(limits) => self.mark_ready(limits),
                BridgeMessage::Limits(limits) => self.apply_limits(limits),
                BridgeMessage::Query(query, reply) => {
                    let _ = reply.send(self.answer(query));
                }
            }
        }
        debug!("bridge inbox closed");
    }
}

fn pending_capacity(limits: BridgeLimits) -> usize {
    limits
        .max_console_lines
        .saturating_add(limits.max_network_requests)
}

/// Per-page capture state: interceptors, channel and the bridge task.
///
/// Created when a page context loads and torn down with it; nothing is shared
/// between two contexts.
#[derive(Debug)]
pub struct PageContext {
    control: BridgeControl,
    events: EventSender,
    console: ConsoleCapture,
    network: Arc<NetworkCapture>,
    task: JoinHandle<()>,
}

impl PageContext {
    /// Must be called inside a tokio runtime.
    pub fn load(channel_capacity: usize, noise: NoiseFilter) -> Self {
        let (events, inbox) = page_channel(channel_capacity);
        let task = tokio::spawn(Bridge::new(noise).run(inbox));
        Self {
            control: events.control(),
            console: ConsoleCapture::new(events.clone()),
            network: Arc::new(NetworkCapture::new(CapturePolicy::default(), events.clone())),
            events,
            task,
        }
    }

    pub fn with_defaults() -> Self {
        Self::load(DEFAULT_CHANNEL_CAPACITY, NoiseFilter::default())
    }

    /// Content side finished initialising.
    pub async fn ready(&self, settings: &Settings) {
        self.network.set_policy(CapturePolicy::from(settings));
        self.control
            .send(BridgeMessage::Ready(BridgeLimits::from(settings)))
            .await;
    }

    pub async fn apply_settings(&self, settings: &Settings) {
        self.network.set_policy(CapturePolicy::from(settings));
        self.control
            .send(BridgeMessage::Limits(BridgeLimits::from(settings)))
            .await;
    }

    pub fn console(&self) -> &ConsoleCapture {
        &self.console
    }

    pub fn network(&self) -> &Arc<NetworkCapture> {
        &self.network
    }

    /// Emit-only handle for additional page-side producers.
    pub fn sender(&self) -> EventSender {
        self.events.clone()
    }

    /// `None` once the bridge is gone.
    pub async fn query(&self, query: BridgeQuery) -> Option<Vec<CapturedEvent>> {
        self.control.query(query).await
    }
}

impl Drop for PageContext {
    fn drop(&mut self) {
        self.task.abort();
    }
}
