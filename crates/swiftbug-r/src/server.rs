use crate::wire::{ExtensionMessage, RemoteCommand, Reply};
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use swiftbug_engine::protocol::TabUpdate;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// WebSocket endpoint the extension connects to.
///
/// Commands are broadcast to every connection (normally one); replies from
/// all connections funnel into a single channel, tab updates into another.
#[derive(Clone)]
pub struct RemoteServer {
    port: u16,
    command_tx: broadcast::Sender<RemoteCommand>,
    updates: broadcast::Sender<TabUpdate>,
}

pub struct ServerHandle {
    pub addr: SocketAddr,
    pub command_tx: broadcast::Sender<RemoteCommand>,
    pub reply_rx: mpsc::Receiver<Reply>,
    pub(crate) accept_task: JoinHandle<()>,
}

impl ServerHandle {
    /// Connected extensions.
    pub fn connections(&self) -> usize {
        self.command_tx.receiver_count()
    }

    pub fn shutdown(&self) {
        self.accept_task.abort();
    }
}

impl RemoteServer {
    /// Port 0 binds an ephemeral port; see [`ServerHandle::addr`].
    pub fn new(port: u16) -> Self {
        let (command_tx, _) = broadcast::channel(100);
        let (updates, _) = broadcast::channel(256);
        Self {
            port,
            command_tx,
            updates,
        }
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<TabUpdate> {
        self.updates.subscribe()
    }

    pub async fn start(&self) -> std::io::Result<ServerHandle> {
        let addr = SocketAddr::from(([127, 0, 0, 1], self.port));
        let listener = TcpListener::bind(&addr).await?;
        let addr = listener.local_addr()?;
        info!("Remote Server listening on: {}", addr);

        let (reply_tx, reply_rx) = mpsc::channel(100);
        let command_tx = self.command_tx.clone();
        let updates = self.updates.clone();

        let accept_task = tokio::spawn(async move {
            info!("Server accept loop started");
            while let Ok((stream, peer)) = listener.accept().await {
                info!("Accepted TCP connection from: {}", peer);
                let cmd_rx = command_tx.subscribe();
                tokio::spawn(accept_connection(
                    stream,
                    cmd_rx,
                    reply_tx.clone(),
                    updates.clone(),
                ));
            }
        });

        Ok(ServerHandle {
            addr,
            command_tx: self.command_tx.clone(),
            reply_rx,
            accept_task,
        })
    }
}

async fn accept_connection(
    stream: TcpStream,
    mut cmd_rx: broadcast::Receiver<RemoteCommand>,
    reply_tx: mpsc::Sender<Reply>,
    updates: broadcast::Sender<TabUpdate>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            error!("Error during the websocket handshake occurred: {}", e);
            return;
        }
    };

    info!("New WebSocket connection: established");
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    loop {
        tokio::select! {
            // Backend -> Extension
            cmd = cmd_rx.recv() => {
                let cmd = match cmd {
                    Ok(cmd) => cmd,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("Connection lagged, {} commands dropped", n);
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let json = match serde_json::to_string(&cmd) {
                    Ok(json) => json,
                    Err(e) => {
                        error!("Failed to encode {} command: {}", cmd.call.method(), e);
                        continue;
                    }
                };
                debug!("-> #{} {}", cmd.id, cmd.call.method());
                if let Err(e) = ws_sender.send(Message::Text(json)).await {
                    error!("Failed to send message to WS: {}", e);
                    break;
                }
            }

            // Extension -> Backend
            msg = ws_receiver.next() => {
                let Some(msg) = msg else {
                    info!("WebSocket stream ended");
                    break;
                };
                match msg {
                    Ok(Message::Text(text)) => {
                        match serde_json::from_str::<ExtensionMessage>(&text) {
                            Ok(ExtensionMessage::Reply(reply)) => {
                                debug!("<- #{}", reply.id);
                                if let Err(e) = reply_tx.send(reply).await {
                                    error!("Failed to forward reply to backend: {}", e);
                                    break;
                                }
                            }
                            Ok(ExtensionMessage::TabUpdate(update)) => {
                                let _ = updates.send(update);
                            }
                            Err(e) => {
                                error!("Failed to parse message from extension: {} | Text: {}", e, text);
                            }
                        }
                    }
                    Ok(Message::Close(_)) => {
                        info!("WebSocket closed");
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}
