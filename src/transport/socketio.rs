//! Socket.IO v4 client link over a WebSocket

use super::traits::{Link, LinkEvent, Transport};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use reqwest::Url;
use serde_json::Value;
use simiot_shared::codec::{self, EnginePacket, SocketPacket};
use simiot_shared::Session;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};

/// Default Socket.IO endpoint path
pub const DEFAULT_PATH: &str = "/socket.io/";

const ENGINE_QUERY: &str = "EIO=4&transport=websocket";

/// Connects to a Socket.IO server with the WebSocket transport only
#[derive(Debug, Clone)]
pub struct SocketIoConnector {
    base: Url,
    path: String,
}

impl SocketIoConnector {
    pub fn new(base: Url) -> Self {
        Self {
            base,
            path: DEFAULT_PATH.into(),
        }
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// WebSocket URL for the configured base, `http(s)` mapped to `ws(s)`
    pub fn socket_url(&self) -> Result<Url> {
        let mut url = self.base.clone();
        let scheme = match url.scheme() {
            "http" | "ws" => "ws",
            "https" | "wss" => "wss",
            other => return Err(anyhow!("unsupported socket scheme: {}", other)),
        };
        url.set_scheme(scheme)
            .map_err(|_| anyhow!("cannot use {} scheme for {}", scheme, self.base))?;
        url.set_path(&self.path);
        url.set_query(Some(ENGINE_QUERY));
        Ok(url)
    }
}

#[async_trait]
impl Transport for SocketIoConnector {
    async fn connect(&self, session: &Session) -> Result<Box<dyn Link>> {
        let url = self.socket_url()?;
        let mut request = url.as_str().into_client_request()?;
        request
            .headers_mut()
            .insert(COOKIE, HeaderValue::from_str(&session.cookie())?);

        debug!("Opening socket {}", url);
        let (ws, response) = connect_async(request).await?;
        debug!("Socket upgrade status: {}", response.status());

        Ok(Box::new(SocketIoLink { ws }))
    }

    fn name(&self) -> &'static str {
        "socket.io"
    }
}

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Live Socket.IO session on the default namespace
///
/// Engine.IO housekeeping (open, ping/pong) is answered here; only
/// Socket.IO level events surface through [`Link::recv`].
pub struct SocketIoLink {
    ws: WsStream,
}

impl SocketIoLink {
    async fn send_text(&mut self, frame: String) -> Result<()> {
        self.ws.send(Message::Text(frame)).await?;
        Ok(())
    }

    /// Handle one text frame; `None` means it was consumed internally
    async fn on_text(&mut self, frame: &str) -> Result<Option<LinkEvent>> {
        let packet = match EnginePacket::decode(frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!("Dropping undecodable frame {:?}: {}", frame, e);
                return Ok(None);
            }
        };

        match packet {
            EnginePacket::Open(handshake) => {
                debug!("Engine open sid={} ping_interval={}", handshake.sid, handshake.ping_interval);
                self.send_text(EnginePacket::Message(SocketPacket::Connect(None)).encode())
                    .await?;
                Ok(None)
            }
            EnginePacket::Ping(probe) => {
                self.send_text(EnginePacket::Pong(probe).encode()).await?;
                Ok(None)
            }
            EnginePacket::Close => Ok(Some(LinkEvent::Disconnected {
                reason: "transport close".into(),
            })),
            EnginePacket::Message(SocketPacket::Connect(data)) => {
                let sid = data
                    .as_ref()
                    .and_then(|d| d.get("sid"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                Ok(Some(LinkEvent::Connected { sid }))
            }
            EnginePacket::Message(SocketPacket::Event { name, args, .. }) => {
                Ok(Some(LinkEvent::Event { name, args }))
            }
            EnginePacket::Message(SocketPacket::ConnectError(data)) => {
                Ok(Some(LinkEvent::ConnectError(data)))
            }
            EnginePacket::Message(SocketPacket::Disconnect) => Ok(Some(LinkEvent::Disconnected {
                reason: "io server disconnect".into(),
            })),
            EnginePacket::Message(SocketPacket::Ack { ack_id, .. }) => {
                debug!("Ignoring ack {}", ack_id);
                Ok(None)
            }
            EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => Ok(None),
        }
    }
}

#[async_trait]
impl Link for SocketIoLink {
    async fn emit(&mut self, event: &str, data: Option<Value>) -> Result<()> {
        self.send_text(codec::event_frame(event, data)).await
    }

    async fn recv(&mut self) -> LinkEvent {
        loop {
            let message = match self.ws.next().await {
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    return LinkEvent::Disconnected {
                        reason: format!("transport error: {}", e),
                    }
                }
                None => {
                    return LinkEvent::Disconnected {
                        reason: "transport close".into(),
                    }
                }
            };

            match message {
                Message::Text(text) => match self.on_text(&text).await {
                    Ok(Some(event)) => return event,
                    Ok(None) => continue,
                    Err(e) => {
                        return LinkEvent::Disconnected {
                            reason: format!("transport error: {}", e),
                        }
                    }
                },
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.to_string())
                        .filter(|r| !r.is_empty())
                        .unwrap_or_else(|| "transport close".into());
                    return LinkEvent::Disconnected { reason };
                }
                Message::Binary(bin) => {
                    warn!("Ignoring binary frame ({} bytes)", bin.len());
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) -> Result<()> {
        // Socket.IO disconnect first, then the WebSocket close handshake
        let _ = self
            .send_text(EnginePacket::Message(SocketPacket::Disconnect).encode())
            .await;
        self.ws.close(None).await?;
        Ok(())
    }
}
