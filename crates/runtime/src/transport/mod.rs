//! Frame transports underneath a protocol session.
//!
//! A transport is split into two halves so the session can drive them from
//! separate tasks:
//!
//! - [`Transport`] writes outbound frames.
//! - [`TransportReceiver`] reads inbound frames until the peer goes away,
//!   forwarding each decoded JSON value into an unbounded channel.
//!
//! When the receiver returns, its channel sender is dropped; the session
//! treats that as the disconnect signal.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::{Error, Result};

/// Boxed future returned by transport halves.
pub type TransportFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Write half of a transport.
pub trait Transport: Send {
	/// Sends one JSON frame.
	fn send(&mut self, message: Value) -> TransportFuture<'_, Result<()>>;

	/// Closes the write side, if the transport has one.
	fn close(&mut self) -> TransportFuture<'_, Result<()>>;
}

/// Read half of a transport.
pub trait TransportReceiver: Send {
	/// Reads frames until the peer closes or an error occurs.
	///
	/// A clean close returns `Ok(())`.
	fn run(self: Box<Self>) -> TransportFuture<'static, Result<()>>;
}

/// The pieces a session needs to run over a transport.
pub struct TransportParts {
	pub sender: Box<dyn Transport>,
	pub receiver: Box<dyn TransportReceiver>,
	/// Decoded inbound frames, fed by `receiver`.
	pub message_rx: mpsc::UnboundedReceiver<Value>,
}

/// WebSocket transport to a DevTools target.
pub struct WebSocketTransport;

impl WebSocketTransport {
	/// Opens a WebSocket to `url`, failing with [`Error::ConnectionFailed`] after `timeout`.
	pub async fn connect(url: &str, timeout: Duration) -> Result<TransportParts> {
		tracing::debug!(target = "antenna.transport", url, "connecting");
		let (stream, _response) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url))
			.await
			.map_err(|_| {
				Error::ConnectionFailed(format!(
					"timed out after {}ms connecting to {url}",
					timeout.as_millis()
				))
			})?
			.map_err(|e| Error::ConnectionFailed(format!("{url}: {e}")))?;
		Ok(Self::from_stream(stream))
	}

	/// Wraps an already established WebSocket stream.
	pub fn from_stream<S>(stream: WebSocketStream<S>) -> TransportParts
	where
		S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
	{
		let (sink, stream) = stream.split();
		let (message_tx, message_rx) = mpsc::unbounded_channel();
		TransportParts {
			sender: Box::new(WebSocketTransportSender { sink }),
			receiver: Box::new(WebSocketTransportReceiver { stream, message_tx }),
			message_rx,
		}
	}
}

/// Write half of [`WebSocketTransport`].
pub struct WebSocketTransportSender<S> {
	sink: SplitSink<WebSocketStream<S>, WsMessage>,
}

impl<S> Transport for WebSocketTransportSender<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	fn send(&mut self, message: Value) -> TransportFuture<'_, Result<()>> {
		Box::pin(async move {
			let text = serde_json::to_string(&message)?;
			self.sink
				.send(WsMessage::Text(text))
				.await
				.map_err(|e| Error::TransportError(e.to_string()))
		})
	}

	fn close(&mut self) -> TransportFuture<'_, Result<()>> {
		Box::pin(async move {
			self.sink
				.close()
				.await
				.map_err(|e| Error::TransportError(e.to_string()))
		})
	}
}

/// Read half of [`WebSocketTransport`].
pub struct WebSocketTransportReceiver<S> {
	stream: SplitStream<WebSocketStream<S>>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl<S> TransportReceiver for WebSocketTransportReceiver<S>
where
	S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
	fn run(self: Box<Self>) -> TransportFuture<'static, Result<()>> {
		let Self {
			mut stream,
			message_tx,
		} = *self;

		Box::pin(async move {
			while let Some(frame) = stream.next().await {
				let frame = frame.map_err(|e| Error::TransportError(e.to_string()))?;
				let decoded = match frame {
					WsMessage::Text(text) => serde_json::from_str::<Value>(&text),
					WsMessage::Binary(bytes) => serde_json::from_slice::<Value>(&bytes),
					WsMessage::Close(reason) => {
						tracing::debug!(target = "antenna.transport", ?reason, "peer closed");
						break;
					}
					_ => continue,
				};
				match decoded {
					Ok(value) => {
						if message_tx.send(value).is_err() {
							break;
						}
					}
					Err(e) => {
						tracing::warn!(target = "antenna.transport", error = %e, "dropping undecodable frame");
					}
				}
			}
			Ok(())
		})
	}
}

/// In-process transport over channels.
///
/// [`ChannelTransport::pair`] returns the session side plus a [`ChannelPeer`]
/// that plays the target: it sees every request the session writes and can
/// inject responses and events.
pub struct ChannelTransport;

impl ChannelTransport {
	pub fn pair() -> (TransportParts, ChannelPeer) {
		let (request_tx, request_rx) = mpsc::unbounded_channel();
		let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
		let (message_tx, message_rx) = mpsc::unbounded_channel();

		let parts = TransportParts {
			sender: Box::new(ChannelTransportSender {
				request_tx: Some(request_tx),
			}),
			receiver: Box::new(ChannelTransportReceiver {
				inbound_rx,
				message_tx,
			}),
			message_rx,
		};
		let peer = ChannelPeer {
			requests: request_rx,
			inbound_tx: Some(inbound_tx),
		};
		(parts, peer)
	}
}

struct ChannelTransportSender {
	request_tx: Option<mpsc::UnboundedSender<Value>>,
}

impl Transport for ChannelTransportSender {
	fn send(&mut self, message: Value) -> TransportFuture<'_, Result<()>> {
		let result = match &self.request_tx {
			Some(tx) => tx
				.send(message)
				.map_err(|_| Error::TransportError("peer dropped".into())),
			None => Err(Error::TransportError("transport closed".into())),
		};
		Box::pin(async move { result })
	}

	fn close(&mut self) -> TransportFuture<'_, Result<()>> {
		self.request_tx = None;
		Box::pin(async { Ok(()) })
	}
}

struct ChannelTransportReceiver {
	inbound_rx: mpsc::UnboundedReceiver<Value>,
	message_tx: mpsc::UnboundedSender<Value>,
}

impl TransportReceiver for ChannelTransportReceiver {
	fn run(self: Box<Self>) -> TransportFuture<'static, Result<()>> {
		let Self {
			mut inbound_rx,
			message_tx,
		} = *self;
		Box::pin(async move {
			while let Some(value) = inbound_rx.recv().await {
				if message_tx.send(value).is_err() {
					break;
				}
			}
			Ok(())
		})
	}
}

/// Remote end of a [`ChannelTransport`].
pub struct ChannelPeer {
	/// Frames written by the session, in order.
	pub requests: mpsc::UnboundedReceiver<Value>,
	inbound_tx: Option<mpsc::UnboundedSender<Value>>,
}

impl ChannelPeer {
	/// Delivers a frame to the session. Returns false once disconnected.
	pub fn send(&self, frame: Value) -> bool {
		self.inbound_tx
			.as_ref()
			.is_some_and(|tx| tx.send(frame).is_ok())
	}

	/// Waits for the next request the session writes.
	pub async fn next_request(&mut self) -> Option<Value> {
		self.requests.recv().await
	}

	/// Answers `request` with `result`.
	pub fn reply(&self, request: &Value, result: Value) -> bool {
		let id = request["id"].clone();
		self.send(serde_json::json!({ "id": id, "result": result }))
	}

	/// Simulates the target going away.
	pub fn disconnect(&mut self) {
		self.inbound_tx = None;
	}
}

#[cfg(test)]
mod tests;
