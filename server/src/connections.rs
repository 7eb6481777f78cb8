use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, MutexGuard, PoisonError,
    },
};

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::{TcpListener, TcpStream},
    select,
    sync::mpsc,
};
use tokio_tungstenite::tungstenite::Message as TungMsg;
use tokio_util::sync::CancellationToken;
use wss_protocol::{Envelope, Kind};

use crate::exec::Shell;

/// Every connected client's outgoing queue, by connection id.
#[derive(Default)]
pub struct Hub {
    clients: Mutex<HashMap<u64, mpsc::UnboundedSender<Vec<u8>>>>,
    next_id: AtomicU64,
}

impl Hub {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, mpsc::UnboundedSender<Vec<u8>>>> {
        self.clients.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self) -> (u64, mpsc::UnboundedReceiver<Vec<u8>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.lock().insert(id, tx);
        (id, rx)
    }

    pub fn unregister(&self, id: u64) {
        self.lock().remove(&id);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn send_to(&self, id: u64, envelope: &Envelope) -> bool {
        let frame = match wss_protocol::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Could not serialize cuz: {}", e);
                return false;
            }
        };
        match self.lock().get(&id) {
            Some(tx) => tx.send(frame).is_ok(),
            None => false,
        }
    }

    /// Relays a broadcast to everyone except `origin`, tagged with its id.
    pub fn broadcast_from(&self, origin: u64, envelope: Envelope) -> usize {
        let envelope = envelope.with_origin(origin.to_string());
        let frame = match wss_protocol::encode(&envelope) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Could not serialize cuz: {}", e);
                return 0;
            }
        };
        self.lock()
            .iter()
            .filter(|(id, _)| **id != origin)
            .filter(|(_, tx)| tx.send(frame.clone()).is_ok())
            .count()
    }

    pub fn push_all(&self, envelope: &Envelope) -> usize {
        let frame = match wss_protocol::encode(envelope) {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("Could not serialize cuz: {}", e);
                return 0;
            }
        };
        self.lock()
            .values()
            .filter(|tx| tx.send(frame.clone()).is_ok())
            .count()
    }
}

async fn run_cmd(shell: &Shell, request: &Envelope) -> Envelope {
    let command = request.body().as_text();
    log::debug!("Running: {}", command);
    match shell.run(&command).await {
        Ok(output) => request.reply(Kind::CmdResult, output),
        Err(e) => {
            log::warn!("Command '{}' failed: {}", command, e);
            request.reply(Kind::CmdError, e.output())
        }
    }
}

fn handle_frame(hub: &Arc<Hub>, shell: &Arc<Shell>, id: u64, bytes: &[u8]) {
    for decoded in wss_protocol::decode_multi(bytes) {
        let envelope = match decoded {
            Ok(envelope) => envelope,
            Err(e) => {
                log::error!("Could not deserialize a message: {}", e);
                break;
            }
        };
        match envelope.kind() {
            Kind::Cmd => {
                let hub = Arc::clone(hub);
                let shell = Arc::clone(shell);
                tokio::spawn(async move {
                    let reply = run_cmd(&shell, &envelope).await;
                    if !hub.send_to(id, &reply) {
                        log::debug!("Client {} left before its command finished", id);
                    }
                });
            }
            Kind::Broadcast => {
                let n = hub.broadcast_from(id, envelope);
                log::debug!("Relayed a broadcast from {} to {} clients", id, n);
            }
            other => log::warn!("Message not meant for the server: {}", other),
        }
    }
}

async fn handle_accept(
    tcp_stream: TcpStream,
    addr: SocketAddr,
    hub: Arc<Hub>,
    shell: Arc<Shell>,
    canceltoken: CancellationToken,
) {
    log::info!("Someone connected from: {}", addr);
    let ws = match tokio_tungstenite::accept_async(tcp_stream).await {
        Ok(s) => s,
        Err(e) => {
            log::error!("Could not create websocket stream: {}", e);
            return;
        }
    };

    let (id, mut outgoing) = hub.register();
    log::info!(
        "Websocket ready, client {} from {} ({} connected)",
        id,
        addr,
        hub.len()
    );
    let (mut sink, mut stream) = ws.split();

    loop {
        select! {
            _ = canceltoken.cancelled() => break,
            frame = outgoing.recv() => {
                let Some(frame) = frame else { break };
                if let Err(e) = sink.send(TungMsg::Binary(frame)).await {
                    log::error!("Failed to send to {}: {}", addr, e);
                    break;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(TungMsg::Binary(bytes))) => handle_frame(&hub, &shell, id, &bytes),
                Some(Ok(TungMsg::Text(_))) => log::warn!("Received a text message from {}", addr),
                Some(Ok(TungMsg::Close(_))) | None => break,
                Some(Ok(_)) => (),
                Some(Err(e)) => {
                    log::error!("Failed to read from {}: {}", addr, e);
                    break;
                }
            }
        }
    }

    hub.unregister(id);
    log::info!("Disconnecting: {}", addr);
    if let Err(e) = sink.close().await {
        log::debug!("Closing {} failed: {}", addr, e);
    }
    log::info!("Disconnected: {}", addr);
}

pub async fn connections_actor(
    bind: String,
    hub: Arc<Hub>,
    shell: Arc<Shell>,
    canceltoken: CancellationToken,
) -> anyhow::Result<()> {
    let listener = TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {}", bind))?;
    log::info!("Listening on: {}", bind);

    loop {
        let (stream, addr) = select! {
            _ = canceltoken.cancelled() => break,
            res = listener.accept() => res.context("TCP accept failed")?,
        };
        tokio::spawn(handle_accept(
            stream,
            addr,
            Arc::clone(&hub),
            Arc::clone(&shell),
            canceltoken.child_token(),
        ));
    }

    Ok(())
}
