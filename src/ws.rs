//! WebSocket transport.
//!
//! The engine talks to the network through [`Transport`] and [`Dialer`];
//! [`WebSocket`] and [`WsDialer`] are the tokio-tungstenite implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, USER_AGENT};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info};
use url::Url;

use crate::config::ClientConfig;
use crate::error::Error;

type WsStream = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Code and reason of a protocol close frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseReason {
    /// Close status code.
    pub code: u16,
    /// Close reason text.
    pub reason: String,
}

impl CloseReason {
    /// Creates a close reason.
    pub fn new(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
        }
    }
}

/// One websocket frame as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    /// Protocol close frame.
    Close(Option<CloseReason>),
}

/// A connected, full-duplex socket.
///
/// `recv` and `send` may run concurrently; serializing writers is the
/// caller's job.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one frame.
    async fn send(&self, frame: Frame) -> Result<(), Error>;

    /// Receives the next frame; `None` when the stream has ended.
    async fn recv(&self) -> Result<Option<Frame>, Error>;

    /// Releases the socket without a close handshake.
    async fn shutdown(&self);
}

/// Produces connected transports.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Dials once.
    async fn dial(&self) -> Result<Arc<dyn Transport>, Error>;
}

/// WebSocket connection wrapper.
pub struct WebSocket {
    write: Mutex<SplitSink<WsStream, Message>>,
    read: Mutex<SplitStream<WsStream>>,
}

impl WebSocket {
    /// Opens a new WebSocket connection to `url` with the given headers.
    pub async fn connect(
        url: &Url,
        authorization: &str,
        user_agent: &str,
        connect_timeout: Duration,
    ) -> Result<Self, Error> {
        info!(host = ?url.host_str(), path = %url.path(), "WebSocket connecting");

        let mut request = url.as_str().into_client_request()?;
        let mut auth_header = HeaderValue::from_str(authorization)?;
        auth_header.set_sensitive(true);
        request.headers_mut().insert(AUTHORIZATION, auth_header);
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_str(user_agent)?);

        let (ws_stream, _) = timeout(connect_timeout, tokio_tungstenite::connect_async(request))
            .await
            .map_err(|_| Error::ConnectionTimeout)?
            .map_err(Error::WebSocket)?;

        info!(host = ?url.host_str(), "WebSocket connected");

        let (write, read) = ws_stream.split();

        Ok(Self {
            write: Mutex::new(write),
            read: Mutex::new(read),
        })
    }

    async fn send_message(&self, message: Message) -> Result<(), Error> {
        let mut writer = self.write.lock().await;
        writer.send(message).await.map_err(Error::WebSocket)
    }
}

#[async_trait]
impl Transport for WebSocket {
    async fn send(&self, frame: Frame) -> Result<(), Error> {
        let message = match frame {
            Frame::Text(text) => Message::Text(text),
            Frame::Binary(data) => Message::Binary(data),
            Frame::Close(reason) => Message::Close(reason.map(|r| CloseFrame {
                code: CloseCode::from(r.code),
                reason: r.reason.into(),
            })),
        };
        self.send_message(message).await
    }

    async fn recv(&self) -> Result<Option<Frame>, Error> {
        let mut reader = self.read.lock().await;
        loop {
            let msg = match reader.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(Error::WebSocket(e)),
                None => return Ok(None),
            };
            match msg {
                Message::Text(t) => return Ok(Some(Frame::Text(t))),
                Message::Binary(b) => return Ok(Some(Frame::Binary(b))),
                Message::Ping(data) => {
                    debug!("Received ping, sending pong");
                    self.send_message(Message::Pong(data)).await?;
                }
                Message::Pong(_) => {
                    debug!("Received pong");
                }
                Message::Close(frame) => {
                    debug!(frame = ?frame, "Received close");
                    return Ok(Some(Frame::Close(frame.map(|f| {
                        CloseReason::new(u16::from(f.code), f.reason.into_owned())
                    }))));
                }
                Message::Frame(_) => {
                    debug!("Received raw frame");
                }
            }
        }
    }

    async fn shutdown(&self) {
        let mut writer = self.write.lock().await;
        let _ = writer.close().await;
        info!("WebSocket closed");
    }
}

/// Dials [`WebSocket`]s to a fixed endpoint.
pub struct WsDialer {
    url: Url,
    authorization: String,
    user_agent: String,
    connect_timeout: Duration,
}

impl WsDialer {
    /// Creates a dialer for `path` with `query` under the configured host.
    pub fn new(
        config: &ClientConfig,
        path: &str,
        query: &[(String, String)],
    ) -> Result<Self, Error> {
        let url = config.endpoint(path, query)?;
        let authorization = config.authorization();
        HeaderValue::from_str(&authorization)?;
        Ok(Self {
            url,
            authorization,
            user_agent: config.user_agent.clone(),
            connect_timeout: config.connect_timeout,
        })
    }

    /// The endpoint this dialer connects to.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl std::fmt::Debug for WsDialer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WsDialer")
            .field("url", &self.url.as_str())
            .field("connect_timeout", &self.connect_timeout)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Dialer for WsDialer {
    async fn dial(&self) -> Result<Arc<dyn Transport>, Error> {
        let socket = WebSocket::connect(
            &self.url,
            &self.authorization,
            &self.user_agent,
            self.connect_timeout,
        )
        .await?;
        Ok(Arc::new(socket))
    }
}
