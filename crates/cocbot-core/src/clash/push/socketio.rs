//! Socket.IO client over a raw websocket.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::{
    net::TcpStream,
    sync::mpsc,
    time::{sleep, Instant},
};
use tokio_tungstenite::{
    tungstenite::{client::IntoClientRequest, http::HeaderValue, Message},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

use crate::{clash::error::PushError, config::ClashConfig};

use super::{
    codec::{self, Frame},
    DisconnectReason, PushChannel, PushConnection, PushEvent, PushLink,
};
use crate::clash::wire::ClashPush;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Heartbeat assumed until the server's handshake says otherwise.
const DEFAULT_PING_WINDOW: Duration = Duration::from_secs(45);
const EVENT_BUFFER: usize = 64;

#[derive(Clone, Debug)]
pub struct SocketIoChannel {
    endpoint: Arc<Endpoint>,
}

#[derive(Debug)]
struct Endpoint {
    url: Url,
    cookie: String,
    origin: String,
    reconnect_attempts: u32,
    reconnect_delay: Duration,
}

impl SocketIoChannel {
    pub fn new(cfg: &ClashConfig) -> Result<Self, PushError> {
        Ok(Self {
            endpoint: Arc::new(Endpoint {
                url: websocket_url(&cfg.push_url)?,
                cookie: cfg.credentials.cookie(),
                origin: cfg.base_url.trim_end_matches('/').to_string(),
                reconnect_attempts: cfg.reconnect_attempts,
                reconnect_delay: cfg.reconnect_delay,
            }),
        })
    }
}

/// `https://host` becomes `wss://host/socket.io/?EIO=4&transport=websocket`.
fn websocket_url(push_url: &str) -> Result<Url, PushError> {
    let mut url =
        Url::parse(push_url).map_err(|e| PushError::Connect(format!("bad push url: {e}")))?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        other => return Err(PushError::Connect(format!("unsupported scheme {other}"))),
    };
    url.set_scheme(scheme)
        .map_err(|_| PushError::Connect("cannot set websocket scheme".to_string()))?;
    url.set_path("/socket.io/");
    url.set_query(Some("EIO=4&transport=websocket"));
    Ok(url)
}

impl Endpoint {
    async fn open(&self) -> Result<WsStream, PushError> {
        let mut req = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| PushError::Connect(e.to_string()))?;
        let headers = req.headers_mut();
        headers.insert(
            "Cookie",
            HeaderValue::from_str(&self.cookie).map_err(|e| PushError::Connect(e.to_string()))?,
        );
        headers.insert(
            "Origin",
            HeaderValue::from_str(&self.origin).map_err(|e| PushError::Connect(e.to_string()))?,
        );

        let (ws, _resp) = tokio_tungstenite::connect_async(req)
            .await
            .map_err(|e| PushError::Connect(e.to_string()))?;
        Ok(ws)
    }
}

#[async_trait]
impl PushChannel for SocketIoChannel {
    async fn connect(&self) -> Result<PushConnection, PushError> {
        let ws = self.endpoint.open().await?;
        debug!(url = %self.endpoint.url, "push socket open");

        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        tokio::spawn(run(self.endpoint.clone(), ws, events_tx, cmd_rx));

        Ok(PushConnection {
            events: events_rx,
            link: Box::new(SocketIoLink { cmd_tx }),
        })
    }
}

enum Command {
    Emit(String, Value),
    Close,
}

struct SocketIoLink {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl PushLink for SocketIoLink {
    fn emit(&self, event: &str, payload: Value) {
        if self
            .cmd_tx
            .send(Command::Emit(event.to_string(), payload))
            .is_err()
        {
            debug!(event, "push channel gone; emit dropped");
        }
    }

    fn close(&self) {
        let _ = self.cmd_tx.send(Command::Close);
    }
}

/// How one websocket connection ended.
enum Ended {
    Lost,
    ServerClosed,
    ClientClosed,
}

async fn run(
    endpoint: Arc<Endpoint>,
    mut ws: WsStream,
    events: mpsc::Sender<PushEvent>,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut reconnect = false;
    loop {
        let reason = match drive(&mut ws, &events, &mut commands, reconnect).await {
            Ended::ClientClosed => DisconnectReason::ClientClosed,
            Ended::Lost => DisconnectReason::ConnectionLost,
            Ended::ServerClosed => DisconnectReason::ServerClosed,
        };
        let _ = ws.close(None).await;

        if events.send(PushEvent::Disconnected(reason)).await.is_err()
            || reason != DisconnectReason::ServerClosed
        {
            return;
        }

        match reopen(&endpoint, &mut commands).await {
            Reopen::Open(next) => {
                info!("push channel reconnected");
                ws = next;
                reconnect = true;
            }
            Reopen::Closed => {
                let _ = events
                    .send(PushEvent::Disconnected(DisconnectReason::ClientClosed))
                    .await;
                return;
            }
            Reopen::Exhausted => {
                warn!(
                    attempts = endpoint.reconnect_attempts,
                    "push channel reconnect attempts exhausted"
                );
                let _ = events
                    .send(PushEvent::Disconnected(DisconnectReason::ConnectionLost))
                    .await;
                return;
            }
        }
    }
}

enum Reopen {
    Open(WsStream),
    Closed,
    Exhausted,
}

async fn reopen(endpoint: &Endpoint, commands: &mut mpsc::UnboundedReceiver<Command>) -> Reopen {
    for attempt in 1..=endpoint.reconnect_attempts {
        let wait = sleep(endpoint.reconnect_delay);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => break,
                cmd = commands.recv() => match cmd {
                    Some(Command::Emit(event, _)) => {
                        warn!(event = %event, "push channel reconnecting; emit dropped");
                    }
                    Some(Command::Close) | None => return Reopen::Closed,
                },
            }
        }

        match endpoint.open().await {
            Ok(ws) => return Reopen::Open(ws),
            Err(e) => warn!(attempt, error = %e, "push reconnect failed"),
        }
    }
    Reopen::Exhausted
}

async fn drive(
    ws: &mut WsStream,
    events: &mpsc::Sender<PushEvent>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    reconnect: bool,
) -> Ended {
    let mut connected = false;
    let mut ping_window = DEFAULT_PING_WINDOW;
    let heartbeat = sleep(ping_window);
    tokio::pin!(heartbeat);

    loop {
        tokio::select! {
            _ = &mut heartbeat => {
                warn!("push channel missed server pings");
                return Ended::Lost;
            }
            cmd = commands.recv() => match cmd {
                Some(Command::Emit(event, payload)) => {
                    if !connected {
                        warn!(event = %event, "push channel not connected; emit dropped");
                        continue;
                    }
                    let text = codec::encode_event(&event, &payload);
                    if ws.send(Message::Text(text)).await.is_err() {
                        return Ended::Lost;
                    }
                }
                Some(Command::Close) | None => {
                    if connected {
                        let _ = ws.send(Message::Text(codec::encode_disconnect())).await;
                    }
                    return Ended::ClientClosed;
                }
            },
            msg = ws.next() => {
                let text = match msg {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Close(frame))) => {
                        debug!(?frame, "push socket closed by peer");
                        return Ended::Lost;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!(error = %e, "push socket error");
                        return Ended::Lost;
                    }
                    None => return Ended::Lost,
                };

                let frame = match codec::decode(&text) {
                    Ok(f) => f,
                    Err(e) => {
                        warn!(error = %e, frame = %text, "undecodable push frame");
                        continue;
                    }
                };

                match frame {
                    Frame::Open { ping_interval, ping_timeout } => {
                        ping_window = ping_interval + ping_timeout;
                        heartbeat.as_mut().reset(Instant::now() + ping_window);
                        if ws.send(Message::Text(codec::encode_connect())).await.is_err() {
                            return Ended::Lost;
                        }
                    }
                    Frame::Ping => {
                        heartbeat.as_mut().reset(Instant::now() + ping_window);
                        if ws.send(Message::Text(codec::PONG.to_string())).await.is_err() {
                            return Ended::Lost;
                        }
                    }
                    Frame::Connect => {
                        connected = true;
                        if events.send(PushEvent::Connected { reconnect }).await.is_err() {
                            return Ended::ClientClosed;
                        }
                    }
                    Frame::ConnectError(message) => {
                        warn!(%message, "push namespace refused");
                        return Ended::Lost;
                    }
                    Frame::Disconnect | Frame::Close => return Ended::ServerClosed,
                    Frame::Event { name, mut args } if name == "clash" => {
                        let payload = if args.is_empty() { Value::Null } else { args.swap_remove(0) };
                        match serde_json::from_value::<ClashPush>(payload) {
                            Ok(push) => {
                                if events.send(PushEvent::Clash(push)).await.is_err() {
                                    return Ended::ClientClosed;
                                }
                            }
                            Err(e) => warn!(error = %e, "malformed clash event"),
                        }
                    }
                    Frame::Event { name, .. } => debug!(event = %name, "ignoring push event"),
                    Frame::Pong | Frame::Noop | Frame::Ignored => {}
                }
            }
        }
    }
}
