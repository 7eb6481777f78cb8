//! The single bidirectional link to the backend. Requests are correlated to
//! their responses by `msg_id`, everything else goes to the [`Dispatcher`].

pub mod backoff;
mod dispatch;
mod registry;

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use futures_util::{SinkExt, StreamExt};
use tokio::{
    net::TcpStream,
    select,
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tokio_tungstenite::{tungstenite::Message as TungMsg, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use url::Url;
use wss_protocol::{Envelope, Kind, MessageError};

pub use backoff::{Backoff, ReconnectPolicy};
pub use dispatch::{Dispatcher, Push, Subscription};
pub use registry::{fresh_id, next_msg_id, Registry};

#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("invalid backend url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("connection lost before a response arrived")]
    Disconnected,
    #[error("gave up connecting after {0} failed attempts")]
    Failed(u32),
    #[error("channel is closed")]
    Closed,
    #[error("msg_id '{0}' is already pending")]
    DuplicateId(String),
    #[error(transparent)]
    Encode(#[from] MessageError),
    #[error("command failed: {0}")]
    Command(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connecting,
    Ready,
    Reconnecting { attempt: u32, delay: Duration },
    Failed { attempts: u32 },
    Closed,
}

struct Outgoing {
    msg_id: Option<String>,
    frame: Vec<u8>,
}

struct Shared {
    registry: Registry,
    dispatcher: Dispatcher,
    client_id: String,
}

impl Shared {
    fn handle_frame(&self, bytes: &[u8]) {
        for decoded in wss_protocol::decode_multi(bytes) {
            match decoded {
                Ok(envelope) => {
                    if let Some(unmatched) = self.registry.resolve(envelope) {
                        self.dispatcher.dispatch(unmatched, &self.client_id);
                    }
                }
                Err(e) => self
                    .dispatcher
                    .report(format!("Dropping the rest of a frame: {}", e)),
            }
        }
    }
}

pub struct Channel {
    shared: Arc<Shared>,
    outgoing: mpsc::UnboundedSender<Outgoing>,
    state: watch::Receiver<LinkState>,
    canceltoken: CancellationToken,
    actor: Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    /// Starts connecting to `url` in the background. Must be called from
    /// within a tokio runtime.
    pub fn connect(
        url: &str,
        client_id: impl Into<String>,
        policy: ReconnectPolicy,
    ) -> Result<Self, ChannelError> {
        let url = parse_url(url)?;
        let shared = Arc::new(Shared {
            registry: Registry::default(),
            dispatcher: Dispatcher::default(),
            client_id: client_id.into(),
        });
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(LinkState::Connecting);
        let canceltoken = CancellationToken::new();

        let actor = tokio::spawn(connection_actor(
            url,
            Arc::clone(&shared),
            out_rx,
            state_tx,
            policy,
            canceltoken.child_token(),
        ));

        Ok(Self {
            shared,
            outgoing: out_tx,
            state: state_rx,
            canceltoken,
            actor: Mutex::new(Some(actor)),
        })
    }

    pub fn client_id(&self) -> &str {
        &self.shared.client_id
    }

    pub fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<LinkState> {
        self.state.clone()
    }

    pub fn pending(&self) -> usize {
        self.shared.registry.len()
    }

    /// Waits until the link is up. Fails if it never will be.
    pub async fn ready(&self) -> Result<(), ChannelError> {
        let mut state = self.state.clone();
        let s = *state
            .wait_for(|s| {
                matches!(
                    s,
                    LinkState::Ready | LinkState::Failed { .. } | LinkState::Closed
                )
            })
            .await
            .map_err(|_| ChannelError::Closed)?;
        match s {
            LinkState::Ready => Ok(()),
            LinkState::Failed { attempts } => Err(ChannelError::Failed(attempts)),
            _ => Err(ChannelError::Closed),
        }
    }

    /// Sends a request and waits for the envelope carrying its `msg_id`.
    /// A fresh `msg_id` is assigned when the envelope has none.
    pub async fn send(&self, mut envelope: Envelope) -> Result<Envelope, ChannelError> {
        self.ready().await?;

        let msg_id = match envelope.msg_id() {
            Some(id) => id.to_string(),
            None => {
                let id = next_msg_id();
                envelope.set_msg_id(id.clone());
                id
            }
        };
        let frame = wss_protocol::encode(&envelope)?;
        let response = self.shared.registry.register(&msg_id)?;

        log::debug!("Sending {} with msg_id {}", envelope.type_str(), msg_id);
        if self
            .outgoing
            .send(Outgoing {
                msg_id: Some(msg_id.clone()),
                frame,
            })
            .is_err()
        {
            self.shared.registry.reject(&msg_id, ChannelError::Closed);
        }

        match response.await {
            Ok(res) => res,
            Err(_) => Err(ChannelError::Closed),
        }
    }

    /// Sends without expecting a response.
    pub async fn post(&self, mut envelope: Envelope) -> Result<(), ChannelError> {
        self.ready().await?;
        if envelope.msg_id().is_none() {
            envelope.set_msg_id(next_msg_id());
        }
        let frame = wss_protocol::encode(&envelope)?;
        self.outgoing
            .send(Outgoing {
                msg_id: None,
                frame,
            })
            .map_err(|_| ChannelError::Closed)
    }

    /// Runs a shell command on the backend and returns its output.
    pub async fn run(&self, command: impl Into<String>) -> Result<String, ChannelError> {
        let reply = self.send(Envelope::cmd(command)).await?;
        match reply.kind() {
            Kind::CmdError => Err(ChannelError::Command(reply.into_body().into_text())),
            _ => Ok(reply.into_body().into_text()),
        }
    }

    /// Relays `body` to every other connected client.
    pub async fn broadcast(&self, body: impl Into<String>) -> Result<(), ChannelError> {
        let envelope = Envelope::broadcast(body.into()).with_origin(self.client_id());
        self.post(envelope).await
    }

    pub fn subscribe(&self, kind: Kind) -> Subscription {
        self.shared.dispatcher.subscribe(kind)
    }

    pub fn subscribe_errors(&self) -> mpsc::UnboundedReceiver<String> {
        self.shared.dispatcher.subscribe_errors()
    }

    /// Closes the link and rejects everything still pending.
    pub async fn shutdown(&self) {
        self.canceltoken.cancel();
        let handle = self
            .actor
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                log::error!("Connection actor join error: {}", e);
            }
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.canceltoken.cancel();
    }
}

fn parse_url(url: &str) -> Result<Url, ChannelError> {
    let invalid = |reason: String| ChannelError::InvalidUrl {
        url: url.to_string(),
        reason,
    };
    let parsed = Url::parse(url).map_err(|e| invalid(e.to_string()))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

#[derive(Clone, Copy)]
enum SessionEnd {
    Cancelled,
    Lost,
}

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn session(
    ws: Ws,
    shared: &Shared,
    outgoing: &mut mpsc::UnboundedReceiver<Outgoing>,
    canceltoken: &CancellationToken,
) -> SessionEnd {
    let (mut sink, mut stream) = ws.split();
    loop {
        select! {
            _ = canceltoken.cancelled() => {
                if let Err(e) = sink.close().await {
                    log::debug!("Failed to close websocket cleanly: {}", e);
                }
                return SessionEnd::Cancelled;
            }
            out = outgoing.recv() => {
                let Some(out) = out else {
                    return SessionEnd::Cancelled;
                };
                if let Err(e) = sink.send(TungMsg::Binary(out.frame)).await {
                    log::error!("Failed to send: {}", e);
                    if let Some(id) = out.msg_id {
                        shared.registry.reject(&id, ChannelError::Disconnected);
                    }
                    return SessionEnd::Lost;
                }
            }
            msg = stream.next() => match msg {
                Some(Ok(TungMsg::Binary(bytes))) => shared.handle_frame(&bytes),
                Some(Ok(TungMsg::Text(text))) => {
                    log::warn!("Received a text frame, ignoring: {}", text)
                }
                Some(Ok(TungMsg::Close(frame))) => {
                    log::warn!("Websocket closed by the backend: {:?}", frame);
                    return SessionEnd::Lost;
                }
                Some(Ok(_)) => (),
                Some(Err(e)) => {
                    log::error!("Failed to read: {}", e);
                    return SessionEnd::Lost;
                }
                None => return SessionEnd::Lost,
            }
        }
    }
}

async fn connection_actor(
    url: Url,
    shared: Arc<Shared>,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
    state: watch::Sender<LinkState>,
    policy: ReconnectPolicy,
    canceltoken: CancellationToken,
) {
    let mut backoff = Backoff::new(policy);

    loop {
        let connected = select! {
            _ = canceltoken.cancelled() => break,
            res = tokio_tungstenite::connect_async(url.as_str()) => res,
        };

        match connected {
            Ok((ws, _)) => {
                log::info!("Connected to {}", url);
                backoff.reset();
                state.send_replace(LinkState::Ready);

                let end = session(ws, &shared, &mut outgoing, &canceltoken).await;
                let error = || match end {
                    SessionEnd::Cancelled => ChannelError::Closed,
                    SessionEnd::Lost => ChannelError::Disconnected,
                };

                while let Ok(out) = outgoing.try_recv() {
                    if let Some(id) = out.msg_id {
                        shared.registry.reject(&id, error());
                    }
                }
                let rejected = shared.registry.reject_all(error);

                match end {
                    SessionEnd::Cancelled => break,
                    SessionEnd::Lost => {
                        log::warn!("Disconnected, rejected {} pending requests", rejected)
                    }
                }
            }
            Err(e) => log::warn!("Failed to connect to {}: {}", url, e),
        }

        let Some(delay) = backoff.fail() else {
            let attempts = backoff.failures();
            log::error!("Giving up on {} after {} failed attempts", url, attempts);
            state.send_replace(LinkState::Failed { attempts });
            shared.registry.reject_all(|| ChannelError::Failed(attempts));
            return;
        };

        log::info!("Reconnecting in {:?}", delay);
        state.send_replace(LinkState::Reconnecting {
            attempt: backoff.failures(),
            delay,
        });
        select! {
            _ = canceltoken.cancelled() => break,
            _ = tokio::time::sleep(delay) => (),
        }
    }

    log::info!("Channel closed");
    state.send_replace(LinkState::Closed);
    shared.registry.reject_all(|| ChannelError::Closed);
}
