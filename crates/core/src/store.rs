//! Single point of mutation for everything observers read.
//!
//! The snapshot, the last [`AppState`] and the connection flag live behind
//! one lock, so a reader always sees a complete prior or current value.
//! Every transition that changes what an observer would read publishes a
//! [`PushEvent`] after the lock is released.

use std::sync::Arc;

use antenna_protocol::{AppState, ChangeScope, PushEvent, SnapshotResponse, StateResponse};
use parking_lot::RwLock;

use crate::notifier::ChangeNotifier;
use crate::snapshot::Snapshot;

/// What the snapshot slot currently holds.
#[derive(Debug, Clone, Default)]
pub enum SnapshotStatus {
	/// Nothing captured since startup.
	#[default]
	Pending,
	Ready(Arc<Snapshot>),
	NoActiveRegion,
}

#[derive(Debug, Default)]
struct StoreState {
	connected: bool,
	snapshot: SnapshotStatus,
	app_state: Option<AppState>,
}

#[derive(Debug)]
pub struct StateStore {
	state: RwLock<StoreState>,
	notifier: Arc<ChangeNotifier>,
}

impl StateStore {
	pub fn new(notifier: Arc<ChangeNotifier>) -> Self {
		Self {
			state: RwLock::new(StoreState::default()),
			notifier,
		}
	}

	fn publish(&self, scope: ChangeScope) {
		self.notifier.publish(PushEvent::changed(scope));
	}

	/// Stores a capture and returns the snapshot now held.
	///
	/// When the hash matches the held snapshot, the held `Arc` is returned
	/// and nothing is published.
	pub fn record_snapshot(&self, snapshot: Snapshot) -> Arc<Snapshot> {
		let (held, changed) = {
			let mut state = self.state.write();
			match &state.snapshot {
				SnapshotStatus::Ready(previous) if previous.hash == snapshot.hash => (previous.clone(), false),
				previous => {
					let changed = !matches!(previous, SnapshotStatus::Pending);
					let held = Arc::new(snapshot);
					state.snapshot = SnapshotStatus::Ready(held.clone());
					(held, changed)
				}
			}
		};
		if changed {
			tracing::debug!(target = "antenna.store", hash = %held.hash, "snapshot changed");
			self.publish(ChangeScope::Snapshot);
		}
		held
	}

	/// Records that the observed region is currently absent.
	pub fn record_no_region(&self) {
		let changed = {
			let mut state = self.state.write();
			let changed = matches!(state.snapshot, SnapshotStatus::Ready(_));
			state.snapshot = SnapshotStatus::NoActiveRegion;
			changed
		};
		if changed {
			tracing::debug!(target = "antenna.store", "observed region disappeared");
			self.publish(ChangeScope::Snapshot);
		}
	}

	/// Stores a fresh state read. Returns whether it differed from the last one.
	pub fn record_state(&self, app_state: AppState) -> bool {
		let (changed, first) = {
			let mut state = self.state.write();
			match &state.app_state {
				Some(previous) if *previous == app_state => (false, false),
				previous => {
					let first = previous.is_none();
					state.app_state = Some(app_state);
					(true, first)
				}
			}
		};
		if changed && !first {
			tracing::debug!(target = "antenna.store", "app state changed");
			self.publish(ChangeScope::State);
		}
		changed
	}

	/// Flips the connection flag; a change is visible in the state read.
	pub fn set_connected(&self, connected: bool) {
		let changed = {
			let mut state = self.state.write();
			let changed = state.connected != connected;
			state.connected = connected;
			changed
		};
		if changed {
			self.publish(ChangeScope::State);
		}
	}

	pub fn is_connected(&self) -> bool {
		self.state.read().connected
	}

	pub fn snapshot_status(&self) -> SnapshotStatus {
		self.state.read().snapshot.clone()
	}

	pub fn latest_snapshot(&self) -> Option<Arc<Snapshot>> {
		match &self.state.read().snapshot {
			SnapshotStatus::Ready(snapshot) => Some(snapshot.clone()),
			_ => None,
		}
	}

	pub fn app_state(&self) -> Option<AppState> {
		self.state.read().app_state.clone()
	}

	/// Snapshot read. The last ready snapshot is served even while disconnected.
	pub fn snapshot_response(&self) -> SnapshotResponse {
		let state = self.state.read();
		match &state.snapshot {
			SnapshotStatus::Ready(snapshot) => snapshot.to_response(),
			_ if !state.connected => SnapshotResponse::NotConnected,
			SnapshotStatus::Pending => SnapshotResponse::Waiting,
			SnapshotStatus::NoActiveRegion => SnapshotResponse::NoActiveRegion,
		}
	}

	pub fn state_response(&self) -> StateResponse {
		let state = self.state.read();
		StateResponse {
			connected: state.connected,
			state: state.app_state.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn store() -> (StateStore, crate::notifier::Subscription) {
		let notifier = ChangeNotifier::new();
		let subscription = notifier.subscribe();
		(StateStore::new(notifier), subscription)
	}

	fn drain(subscription: &mut crate::notifier::Subscription) -> Vec<PushEvent> {
		std::iter::from_fn(|| subscription.try_recv()).collect()
	}

	#[test]
	fn first_snapshot_is_a_silent_baseline() {
		let (store, mut events) = store();
		store.record_snapshot(Snapshot::new("<div>a</div>".into(), None));
		assert!(drain(&mut events).is_empty());
		assert!(store.latest_snapshot().is_some());
	}

	#[test]
	fn equal_hash_reuses_held_snapshot() {
		let (store, mut events) = store();
		let first = store.record_snapshot(Snapshot::new("<p>x</p>".into(), None));
		let second = store.record_snapshot(Snapshot::new("<p>x</p>".into(), None));
		assert!(Arc::ptr_eq(&first, &second));
		assert!(drain(&mut events).is_empty());
	}

	#[test]
	fn hash_sequence_publishes_once_on_change() {
		let (store, mut events) = store();
		store.record_snapshot(Snapshot::new("H1".into(), None));
		store.record_snapshot(Snapshot::new("H1".into(), None));
		assert!(drain(&mut events).is_empty());

		store.record_snapshot(Snapshot::new("H2".into(), None));
		assert_eq!(drain(&mut events), vec![PushEvent::changed(ChangeScope::Snapshot)]);
	}

	#[test]
	fn region_disappearing_and_returning_publishes() {
		let (store, mut events) = store();
		store.set_connected(true);
		drain(&mut events);

		store.record_no_region();
		assert!(drain(&mut events).is_empty());
		assert_eq!(store.snapshot_response(), SnapshotResponse::NoActiveRegion);

		store.record_snapshot(Snapshot::new("<ol></ol>".into(), None));
		store.record_no_region();
		store.record_no_region();
		assert_eq!(drain(&mut events).len(), 2);
	}

	#[test]
	fn state_changes_publish_after_first_read() {
		let (store, mut events) = store();
		let planning = AppState {
			mode: Some("Planning".into()),
			model: Some("Gemini".into()),
			busy: false,
		};
		assert!(store.record_state(planning.clone()));
		assert!(!store.record_state(planning.clone()));
		assert!(drain(&mut events).is_empty());

		assert!(store.record_state(AppState {
			busy: true,
			..planning
		}));
		assert_eq!(drain(&mut events), vec![PushEvent::changed(ChangeScope::State)]);
	}

	#[test]
	fn reads_fall_back_by_connection() {
		let (store, mut events) = store();
		assert_eq!(store.snapshot_response(), SnapshotResponse::NotConnected);

		store.set_connected(true);
		assert_eq!(store.snapshot_response(), SnapshotResponse::Waiting);
		assert!(store.state_response().connected);

		store.record_snapshot(Snapshot::new("<div/>".into(), Some("p{}".into())));
		store.set_connected(false);
		assert!(matches!(store.snapshot_response(), SnapshotResponse::Ready { .. }));
		assert!(!store.state_response().connected);
		assert_eq!(
			drain(&mut events),
			vec![
				PushEvent::changed(ChangeScope::State),
				PushEvent::changed(ChangeScope::State)
			]
		);
	}
}
