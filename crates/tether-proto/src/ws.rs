//! # WebSocket Transport
//!
//! Adapts a `tokio-tungstenite` stream to [`Transport`]. Used by the client
//! connector (dialing side) and by the coordinator accept loop (listening side).
//!
//! Control frames (ping/pong) are handled by tungstenite and never surface;
//! binary frames are accepted when they hold UTF-8 and skipped otherwise.

use futures_util::SinkExt;
use futures_util::StreamExt;
use futures_util::stream::SplitSink;
use futures_util::stream::SplitStream;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::MaybeTlsStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

use crate::transport;
use crate::transport::Transport;

/// Default coordinator port on the loopback interface.
pub const DEFAULT_PORT: u16 = 8347;

/// Default endpoint a client dials.
pub const DEFAULT_URL: &str = "ws://127.0.0.1:8347";

/// A [`Transport`] over one WebSocket connection.
pub struct WsTransport<S> {
    writer: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(stream: WebSocketStream<S>) -> Self {
        let (writer, reader) = stream.split();
        Self {
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        }
    }
}

/// Dials `url` and wraps the resulting stream.
pub async fn connect(url: &str) -> transport::Result<WsTransport<MaybeTlsStream<TcpStream>>> {
    tracing::debug!(url, "dialing websocket");
    let (stream, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| transport::Error::Connect(format!("{url}: {e}")))?;
    Ok(WsTransport::new(stream))
}

/// Completes the server side of the WebSocket handshake on an accepted socket.
pub async fn accept(stream: TcpStream) -> transport::Result<WsTransport<TcpStream>> {
    let stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| transport::Error::Connect(e.to_string()))?;
    Ok(WsTransport::new(stream))
}

#[async_trait::async_trait]
impl<S> Transport for WsTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, frame: &str) -> transport::Result<()> {
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(frame.to_string().into()))
            .await
            .map_err(|e| transport::Error::ConnectionLost(e.to_string()))
    }

    async fn recv(&self) -> transport::Result<Option<String>> {
        let mut reader = self.reader.lock().await;
        loop {
            let msg = match reader.next().await {
                Some(Ok(msg)) => msg,
                Some(Err(e)) => return Err(transport::Error::ConnectionLost(e.to_string())),
                None => return Ok(None),
            };

            match msg {
                Message::Text(text) => return Ok(Some(text.as_str().to_owned())),
                Message::Binary(bytes) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => return Ok(Some(text)),
                    Err(_) => {
                        tracing::warn!(len = bytes.len(), "dropping non-UTF-8 binary frame");
                        continue;
                    }
                },
                Message::Close(_) => return Ok(None),
                _ => continue,
            }
        }
    }

    async fn close(&self) {
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.close().await {
            tracing::debug!(error = %e, "websocket close failed");
        }
    }
}
