#![forbid(unsafe_code)]

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use tungstenite::protocol::Message;
use url::Url;

pub(crate) type Ws = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// One inbound transport occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
	/// A text frame.
	Frame(String),
	/// Control traffic that proves liveness but carries no payload.
	Ping,
	/// The peer closed the connection, with its close code if any.
	Closed(Option<u16>),
}

/// Protocol-agnostic view of one open socket. The engine owns protocol
/// behavior only; socket construction comes through a
/// [`TransportConnector`].
#[async_trait::async_trait]
pub trait Transport: Send {
	/// Next inbound event; `None` once the stream is exhausted.
	async fn next_event(&mut self) -> Option<TransportEvent>;

	/// Fire-and-forget text send.
	async fn send(&mut self, text: String) -> anyhow::Result<()>;

	/// Drop the connection without a close handshake.
	async fn force_close(&mut self);

	fn is_connected(&self) -> bool;
}

/// Opens transports; injectable so session machinery is testable
/// against scripted sockets.
#[async_trait::async_trait]
pub trait TransportConnector: Send + Sync {
	async fn connect(&self, url: &Url) -> anyhow::Result<Box<dyn Transport>>;
}

/// The production connector: tokio-tungstenite over TLS.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebSocketConnector;

#[async_trait::async_trait]
impl TransportConnector for WebSocketConnector {
	async fn connect(&self, url: &Url) -> anyhow::Result<Box<dyn Transport>> {
		let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str())
			.await
			.with_context(|| format!("connect_async to {url}"))?;
		Ok(Box::new(WebSocketTransport { ws, connected: true }))
	}
}

struct WebSocketTransport {
	ws: Ws,
	connected: bool,
}

#[async_trait::async_trait]
impl Transport for WebSocketTransport {
	async fn next_event(&mut self) -> Option<TransportEvent> {
		loop {
			let msg = match self.ws.next().await {
				Some(Ok(msg)) => msg,
				Some(Err(_)) | None => {
					self.connected = false;
					return None;
				}
			};

			match msg {
				Message::Text(text) => return Some(TransportEvent::Frame(text.to_string())),
				Message::Ping(payload) => {
					let _ = self.ws.send(Message::Pong(payload)).await;
					return Some(TransportEvent::Ping);
				}
				Message::Pong(_) => return Some(TransportEvent::Ping),
				Message::Close(frame) => {
					self.connected = false;
					return Some(TransportEvent::Closed(frame.map(|f| f.code.into())));
				}
				Message::Binary(_) | Message::Frame(_) => {}
			}
		}
	}

	async fn send(&mut self, text: String) -> anyhow::Result<()> {
		self.ws.send(Message::Text(text.into())).await.context("ws send")
	}

	async fn force_close(&mut self) {
		let _ = self.ws.close(None).await;
		self.connected = false;
	}

	fn is_connected(&self) -> bool {
		self.connected
	}
}
