//! Change notifier: fans out change events to push subscribers.
//!
//! Delivery is best-effort. A subscriber whose receiving half is gone is
//! dropped on the next publish; a [`Subscription`] also unregisters itself
//! when dropped.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use antenna_protocol::PushEvent;
use parking_lot::Mutex;
use tokio::sync::mpsc;

#[derive(Debug, Default)]
pub struct ChangeNotifier {
	next_id: AtomicU64,
	subscribers: Mutex<HashMap<u64, mpsc::UnboundedSender<PushEvent>>>,
}

impl ChangeNotifier {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	pub fn subscribe(self: &Arc<Self>) -> Subscription {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let (tx, rx) = mpsc::unbounded_channel();
		self.subscribers.lock().insert(id, tx);
		tracing::debug!(target = "antenna.notifier", id, "subscriber added");
		Subscription {
			id,
			rx,
			notifier: Arc::downgrade(self),
		}
	}

	/// Sends `event` to every live subscriber and returns how many received it.
	pub fn publish(&self, event: PushEvent) -> usize {
		let mut subscribers = self.subscribers.lock();
		subscribers.retain(|id, tx| {
			let alive = tx.send(event).is_ok();
			if !alive {
				tracing::debug!(target = "antenna.notifier", id, "dropping closed subscriber");
			}
			alive
		});
		tracing::trace!(target = "antenna.notifier", ?event, delivered = subscribers.len(), "published");
		subscribers.len()
	}

	pub fn subscriber_count(&self) -> usize {
		self.subscribers.lock().len()
	}

	fn remove(&self, id: u64) {
		if self.subscribers.lock().remove(&id).is_some() {
			tracing::debug!(target = "antenna.notifier", id, "subscriber removed");
		}
	}
}

/// Receiving end of one subscriber.
#[derive(Debug)]
pub struct Subscription {
	id: u64,
	rx: mpsc::UnboundedReceiver<PushEvent>,
	notifier: Weak<ChangeNotifier>,
}

impl Subscription {
	/// Next event; `None` once the notifier is gone.
	pub async fn recv(&mut self) -> Option<PushEvent> {
		self.rx.recv().await
	}

	/// Non-blocking variant of [`Self::recv`].
	pub fn try_recv(&mut self) -> Option<PushEvent> {
		self.rx.try_recv().ok()
	}
}

impl Drop for Subscription {
	fn drop(&mut self) {
		if let Some(notifier) = self.notifier.upgrade() {
			notifier.remove(self.id);
		}
	}
}
