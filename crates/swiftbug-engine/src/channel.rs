//! Typed one-way channel between a page context and its content bridge.
//!
//! The page side only ever holds an [`EventSender`]: it can emit events but
//! cannot query, configure or observe the bridge. Emission never blocks; when
//! the queue is full the event is dropped rather than stalling page code.
//! Control messages share the same FIFO so that a query is answered only after
//! every event sent before it has been applied.

use swiftbug_common::protocol::{BridgeQuery, CapturedEvent};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::bridge::BridgeLimits;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

pub(crate) enum BridgeMessage {
    Event(CapturedEvent),
    Ready(BridgeLimits),
    Limits(BridgeLimits),
    Query(BridgeQuery, oneshot::Sender<Vec<CapturedEvent>>),
}

/// Creates the page-side sender and the bridge-side inbox.
pub fn page_channel(capacity: usize) -> (EventSender, BridgeInbox) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (EventSender { tx }, BridgeInbox { rx })
}

/// Fire-and-forget emitter handed to page-context interceptors.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<BridgeMessage>,
}

impl EventSender {
    /// Returns whether the event was queued.
    pub fn emit(&self, event: CapturedEvent) -> bool {
        match self.tx.try_send(BridgeMessage::Event(event)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                debug!("page channel full, dropping event");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    pub(crate) fn control(&self) -> BridgeControl {
        BridgeControl {
            tx: self.tx.clone(),
        }
    }
}

/// Privileged side of the channel, held by the page context owner.
#[derive(Debug, Clone)]
pub(crate) struct BridgeControl {
    tx: mpsc::Sender<BridgeMessage>,
}

impl BridgeControl {
    pub(crate) async fn send(&self, message: BridgeMessage) -> bool {
        self.tx.send(message).await.is_ok()
    }

    pub(crate) async fn query(&self, query: BridgeQuery) -> Option<Vec<CapturedEvent>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if !self.send(BridgeMessage::Query(query, reply_tx)).await {
            return None;
        }
        reply_rx.await.ok()
    }
}

pub struct BridgeInbox {
    rx: mpsc::Receiver<BridgeMessage>,
}

impl BridgeInbox {
    pub(crate) async fn recv(&mut self) -> Option<BridgeMessage> {
        self.rx.recv().await
    }

    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Result<BridgeMessage, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }
}
