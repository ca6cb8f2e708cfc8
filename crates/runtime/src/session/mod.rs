//! Multiplexed DevTools protocol session.
//!
//! One [`Session`] owns one transport. Any number of callers may issue
//! [`Session::call`] concurrently; each call gets a fresh id and a pending
//! entry, and the dispatch task resolves the entry when the response with the
//! same id arrives. Frames that resolve nothing (notifications, late or
//! unknown responses) go to a broadcast event stream instead.
//!
//! # Failure model
//!
//! - A call that outlives its deadline fails with [`Error::Timeout`] and its
//!   pending entry is removed. The transport stays open; if the response shows
//!   up later it no longer matches anything and is routed to the event stream.
//! - When the transport closes, the connected flag drops first and then every
//!   pending entry is failed with [`Error::Disconnected`]. A call that raced
//!   the drain re-checks the flag after registering, so none can hang.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use antenna_protocol::{Event, Message, Request, Response, Target};
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;

use crate::error::{Error, Result};
use crate::transport::{TransportParts, WebSocketTransport};

/// Boxed future returned through the [`SessionLike`] seam.
pub type SessionFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Filtered stream of out-of-band frames.
pub type EventStream = Pin<Box<dyn Stream<Item = ProtocolEvent> + Send>>;

/// Predicate selecting which frames an [`EventStream`] yields.
pub type EventPredicate = Box<dyn Fn(&ProtocolEvent) -> bool + Send + Sync>;

const EVENT_CAPACITY: usize = 256;

/// A frame that did not resolve a pending call.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
	/// Unsolicited notification from the target.
	Notification(Event),
	/// Response whose id matched no outstanding call (late or unknown).
	Unmatched(Response),
}

impl ProtocolEvent {
	/// Method name of a notification.
	pub fn method(&self) -> Option<&str> {
		match self {
			ProtocolEvent::Notification(event) => Some(&event.method),
			ProtocolEvent::Unmatched(_) => None,
		}
	}
}

/// Interface the higher layers need from a session.
///
/// Implemented by [`Session`] and by scripted fakes in tests.
pub trait SessionLike: Send + Sync {
	/// The target this session is attached to.
	fn target(&self) -> &Target;

	/// Issues `method` and waits at most `timeout` for its response.
	fn call(&self, method: &str, params: Value, timeout: Duration)
	-> SessionFuture<'_, Result<Value>>;

	/// Whether the transport is still up.
	fn is_connected(&self) -> bool;

	/// Resolves once the session has disconnected.
	fn closed(&self) -> SessionFuture<'_, ()>;

	/// Subscribes to out-of-band frames matching `predicate`.
	fn on_event(&self, predicate: EventPredicate) -> EventStream;
}

/// Timeouts used by [`Session::attach`].
#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
	pub connect_timeout: Duration,
	pub call_timeout: Duration,
}

impl Default for SessionOptions {
	fn default() -> Self {
		Self {
			connect_timeout: Duration::from_secs(5),
			call_timeout: Duration::from_secs(5),
		}
	}
}

type PendingMap = DashMap<u64, oneshot::Sender<Result<Value>>>;

/// State shared between the session handle and its tasks.
struct Shared {
	pending: PendingMap,
	connected: AtomicBool,
	events: broadcast::Sender<ProtocolEvent>,
	closed_tx: watch::Sender<bool>,
}

impl Shared {
	fn disconnect(&self) {
		let was_connected = self.connected.swap(false, Ordering::SeqCst);

		let ids: Vec<u64> = self.pending.iter().map(|entry| *entry.key()).collect();
		let failed = ids.len();
		for id in ids {
			if let Some((_, tx)) = self.pending.remove(&id) {
				let _ = tx.send(Err(Error::Disconnected));
			}
		}

		if was_connected {
			tracing::info!(target = "antenna.session", failed, "session disconnected");
		}
		self.closed_tx.send_replace(true);
	}

	fn dispatch(&self, message: Message) {
		match message {
			Message::Response(response) => match self.pending.remove(&response.id) {
				Some((_, tx)) => {
					let result = match response.error {
						Some(error) => Err(Error::Remote {
							code: error.code,
							message: error.message,
						}),
						None => Ok(response.result.unwrap_or(Value::Null)),
					};
					let _ = tx.send(result);
				}
				None => {
					tracing::debug!(
						target = "antenna.session",
						id = response.id,
						"late or unknown response, routing to event stream"
					);
					let _ = self.events.send(ProtocolEvent::Unmatched(response));
				}
			},
			Message::Event(event) => {
				tracing::trace!(target = "antenna.session", method = %event.method, "event");
				let _ = self.events.send(ProtocolEvent::Notification(event));
			}
			Message::Unknown(value) => {
				tracing::debug!(target = "antenna.session", frame = %value, "ignoring unrecognized frame");
			}
		}
	}
}

/// Removes the pending entry if the call future is dropped or times out.
struct PendingGuard<'a> {
	id: u64,
	pending: &'a PendingMap,
	completed: bool,
}

impl PendingGuard<'_> {
	fn complete(&mut self) {
		self.completed = true;
	}
}

impl Drop for PendingGuard<'_> {
	fn drop(&mut self) {
		if !self.completed && self.pending.remove(&self.id).is_some() {
			tracing::debug!(target = "antenna.session", id = self.id, "abandoned pending call");
		}
	}
}

/// Live protocol session to one target.
pub struct Session {
	target: Target,
	last_id: AtomicU64,
	shared: Arc<Shared>,
	outbound_tx: mpsc::UnboundedSender<Value>,
	tasks: Vec<JoinHandle<()>>,
}

impl Session {
	/// Starts a session over an already connected transport.
	///
	/// Spawns the writer, reader and dispatch tasks; must be called inside a
	/// Tokio runtime.
	pub fn new(target: Target, parts: TransportParts) -> Self {
		let TransportParts {
			mut sender,
			receiver,
			mut message_rx,
		} = parts;

		let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Value>();
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		let (closed_tx, _) = watch::channel(false);
		let shared = Arc::new(Shared {
			pending: DashMap::new(),
			connected: AtomicBool::new(true),
			events,
			closed_tx,
		});

		let writer_shared = Arc::clone(&shared);
		let writer = tokio::spawn(async move {
			while let Some(message) = outbound_rx.recv().await {
				if let Err(e) = sender.send(message).await {
					tracing::warn!(target = "antenna.session", error = %e, "transport write failed");
					writer_shared.disconnect();
					break;
				}
			}
			let _ = sender.close().await;
		});

		let reader = tokio::spawn(async move {
			if let Err(e) = receiver.run().await {
				tracing::debug!(target = "antenna.session", error = %e, "transport read ended with error");
			}
		});

		let dispatch_shared = Arc::clone(&shared);
		let dispatcher = tokio::spawn(async move {
			while let Some(value) = message_rx.recv().await {
				match serde_json::from_value::<Message>(value) {
					Ok(message) => dispatch_shared.dispatch(message),
					Err(e) => {
						tracing::warn!(target = "antenna.session", error = %e, "failed to parse frame");
					}
				}
			}
			dispatch_shared.disconnect();
		});

		tracing::debug!(target = "antenna.session", id = %target.id, port = target.port, "session started");

		Self {
			target,
			last_id: AtomicU64::new(0),
			shared,
			outbound_tx,
			tasks: vec![writer, reader, dispatcher],
		}
	}

	/// Connects to the target's WebSocket and enables the domains the bridge listens to.
	pub async fn attach(target: Target, options: SessionOptions) -> Result<Self> {
		let parts = WebSocketTransport::connect(&target.ws_url, options.connect_timeout).await?;
		let session = Self::new(target, parts);
		for method in ["Runtime.enable", "Page.enable"] {
			session
				.call(method, serde_json::json!({}), options.call_timeout)
				.await?;
		}
		tracing::info!(
			target = "antenna.session",
			title = %session.target.title,
			port = session.target.port,
			"attached"
		);
		Ok(session)
	}

	pub fn target(&self) -> &Target {
		&self.target
	}

	pub fn is_connected(&self) -> bool {
		self.shared.connected.load(Ordering::SeqCst)
	}

	/// Number of calls currently awaiting a response.
	pub fn pending_count(&self) -> usize {
		self.shared.pending.len()
	}

	/// Issues `method` with `params` and waits up to `timeout` for the response.
	pub async fn call(&self, method: &str, params: Value, timeout: Duration) -> Result<Value> {
		if !self.is_connected() {
			return Err(Error::Disconnected);
		}

		let id = self.last_id.fetch_add(1, Ordering::SeqCst) + 1;
		let (tx, rx) = oneshot::channel();
		self.shared.pending.insert(id, tx);
		let mut guard = PendingGuard {
			id,
			pending: &self.shared.pending,
			completed: false,
		};

		// The drain may have run between the first check and the insert.
		if !self.is_connected() {
			return Err(Error::Disconnected);
		}

		let request = Request {
			id,
			method: method.to_string(),
			params,
			session_id: None,
		};
		let frame = serde_json::to_value(&request)?;
		if self.outbound_tx.send(frame).is_err() {
			return Err(Error::Disconnected);
		}
		tracing::debug!(target = "antenna.session", id, method, "request sent");

		match tokio::time::timeout(timeout, rx).await {
			Ok(Ok(result)) => {
				guard.complete();
				result
			}
			Ok(Err(_)) => Err(Error::Disconnected),
			Err(_) => {
				tracing::debug!(target = "antenna.session", id, method, "call timed out");
				Err(Error::Timeout {
					method: method.to_string(),
					timeout_ms: timeout.as_millis() as u64,
				})
			}
		}
	}

	/// Resolves once the session has disconnected.
	pub async fn closed(&self) {
		let mut rx = self.shared.closed_tx.subscribe();
		let _ = rx.wait_for(|closed| *closed).await;
	}

	/// Subscribes to out-of-band frames matching `predicate`.
	pub fn on_event(&self, predicate: EventPredicate) -> EventStream {
		let stream = BroadcastStream::new(self.shared.events.subscribe()).filter_map(move |item| {
			match item {
				Ok(event) if predicate(&event) => Some(event),
				Ok(_) => None,
				Err(BroadcastStreamRecvError::Lagged(skipped)) => {
					tracing::warn!(target = "antenna.session", skipped, "event subscriber lagged");
					None
				}
			}
		});
		Box::pin(stream)
	}

	/// Tears the session down, failing every outstanding call.
	pub fn close(&self) {
		self.shared.disconnect();
		for task in &self.tasks {
			task.abort();
		}
	}
}

impl Drop for Session {
	fn drop(&mut self) {
		self.close();
	}
}

impl SessionLike for Session {
	fn target(&self) -> &Target {
		Session::target(self)
	}

	fn call(
		&self,
		method: &str,
		params: Value,
		timeout: Duration,
	) -> SessionFuture<'_, Result<Value>> {
		let method = method.to_string();
		Box::pin(async move { Session::call(self, &method, params, timeout).await })
	}

	fn is_connected(&self) -> bool {
		Session::is_connected(self)
	}

	fn closed(&self) -> SessionFuture<'_, ()> {
		Box::pin(Session::closed(self))
	}

	fn on_event(&self, predicate: EventPredicate) -> EventStream {
		Session::on_event(self, predicate)
	}
}
