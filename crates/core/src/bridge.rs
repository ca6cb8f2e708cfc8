//! The bridge: owns the session lifecycle and exposes the query and command
//! surface to outer layers.
//!
//! [`Bridge::run`] is the supervisor loop. It locates and attaches under
//! exponential backoff, then pumps periodic and navigation-triggered
//! refreshes until the session closes, then starts over. Reads never need a
//! session: they are served from the [`StateStore`], so the last snapshot
//! and state stay available while disconnected.

use std::sync::Arc;

use antenna_protocol::{
	AppState, AttemptOutcome, CommandResult, HealthReport, ResolverReport, SnapshotResponse,
	StateResponse, TargetSummary,
};
use antenna_runtime::{
	Error as RuntimeError, Session, SessionFuture, SessionLike, SessionOptions, TargetLocator,
};
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_stream::StreamExt;

use crate::backoff::Backoff;
use crate::clock::now_ms;
use crate::config::BridgeConfig;
use crate::error::{ActionError, CaptureError, ConfigError};
use crate::executor::{Executor, Selection};
use crate::notifier::{ChangeNotifier, Subscription};
use crate::resolver::{self, Resolver};
use crate::roles::RoleRegistry;
use crate::snapshot::SnapshotEngine;
use crate::store::StateStore;

/// Events after which the page content is likely different.
const NAVIGATION_EVENTS: [&str; 3] = [
	"Page.frameNavigated",
	"Page.loadEventFired",
	"Runtime.executionContextsCleared",
];

/// Produces a live session: locate, then attach.
pub trait Connector: Send + Sync {
	fn connect(&self) -> SessionFuture<'_, antenna_runtime::Result<Arc<dyn SessionLike>>>;
}

/// [`Connector`] backed by the DevTools HTTP endpoint and a WebSocket session.
pub struct CdpConnector {
	locator: TargetLocator,
	ports: Vec<u16>,
	options: SessionOptions,
}

impl CdpConnector {
	pub fn new(config: &BridgeConfig) -> antenna_runtime::Result<Self> {
		Ok(Self {
			locator: TargetLocator::new(config.locator.options())?,
			ports: config.locator.ports.clone(),
			options: config.session.options(),
		})
	}
}

impl Connector for CdpConnector {
	fn connect(&self) -> SessionFuture<'_, antenna_runtime::Result<Arc<dyn SessionLike>>> {
		Box::pin(async move {
			let target = self.locator.locate(&self.ports).await?;
			tracing::info!(
				target = "antenna.bridge",
				port = target.port,
				title = %target.title,
				"attaching to target"
			);
			let session = Session::attach(target, self.options).await?;
			Ok(Arc::new(session) as Arc<dyn SessionLike>)
		})
	}
}

fn outcome(operation: &str, result: Result<AppState, ActionError>) -> CommandResult {
	match result {
		Ok(_) => CommandResult::success(),
		Err(e) => {
			tracing::info!(target = "antenna.bridge", operation, code = %e.code(), error = %e, "command failed");
			CommandResult::failure(e.code(), e.to_string())
		}
	}
}

pub struct Bridge {
	config: BridgeConfig,
	connector: Box<dyn Connector>,
	slot: watch::Sender<Option<Arc<dyn SessionLike>>>,
	notifier: Arc<ChangeNotifier>,
	store: Arc<StateStore>,
	snapshots: SnapshotEngine,
	resolver: Arc<Resolver>,
	roles: Arc<RoleRegistry>,
	executor: Executor,
	reconnect_lock: tokio::sync::Mutex<()>,
	health: Mutex<HealthReport>,
}

impl Bridge {
	pub fn new(config: BridgeConfig, connector: Box<dyn Connector>) -> Result<Self, ConfigError> {
		config.validate()?;
		let roles = Arc::new(RoleRegistry::new(&config.roles)?);
		let notifier = ChangeNotifier::new();
		let store = Arc::new(StateStore::new(notifier.clone()));
		let call_timeout = config.session.call_timeout();
		let resolver = Arc::new(Resolver::new(config.resolver.clone(), call_timeout));
		let snapshots = SnapshotEngine::new(config.capture.clone(), call_timeout, store.clone());
		let executor = Executor::new(
			resolver.clone(),
			roles.clone(),
			store.clone(),
			config.verify.clone(),
			call_timeout,
		);
		let (slot, _) = watch::channel(None);

		Ok(Self {
			config,
			connector,
			slot,
			notifier,
			store,
			snapshots,
			resolver,
			roles,
			executor,
			reconnect_lock: tokio::sync::Mutex::new(()),
			health: Mutex::new(HealthReport::default()),
		})
	}

	/// Locate, attach and refresh until `shutdown` flips; reconnects forever.
	pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		let mut backoff = Backoff::new(&self.config.reconnect);
		let mut hinted = false;

		while !*shutdown.borrow() {
			match self.connect_once().await {
				Ok(session) => {
					backoff.reset();
					if self.pump(session, &mut shutdown).await {
						break;
					}
				}
				Err(e) => {
					let delay = backoff.next_delay();
					self.record_failure(&e, backoff.failures());
					if matches!(e, RuntimeError::NoTargetFound { .. }) && !hinted {
						hinted = true;
						tracing::warn!(
							target = "antenna.bridge",
							"no debuggable target found; open the editor with --remote-debugging-port={}",
							self.config.locator.ports.first().copied().unwrap_or(9000)
						);
					}
					tokio::select! {
						_ = tokio::time::sleep(delay) => {}
						_ = shutdown.changed() => break,
					}
				}
			}
		}

		self.detach();
		tracing::info!(target = "antenna.bridge", "bridge stopped");
	}

	async fn connect_once(&self) -> antenna_runtime::Result<Arc<dyn SessionLike>> {
		let _guard = self.reconnect_lock.lock().await;
		let session = self.connector.connect().await?;

		let target = session.target();
		tracing::info!(
			target = "antenna.bridge",
			port = target.port,
			title = %target.title,
			"session attached"
		);
		*self.health.lock() = HealthReport {
			locator_ok: true,
			connected: true,
			target: Some(TargetSummary {
				id: target.id.clone(),
				title: target.title.clone(),
				port: target.port,
			}),
			last_attempt: Some(AttemptOutcome {
				at_ms: now_ms(),
				ok: true,
				error: None,
			}),
			consecutive_failures: 0,
			degraded: false,
		};
		self.slot.send_replace(Some(session.clone()));
		self.store.set_connected(true);
		Ok(session)
	}

	fn record_failure(&self, error: &RuntimeError, failures: u32) {
		let degraded = failures > self.config.reconnect.max_retries;
		if failures == 1 || failures == self.config.reconnect.max_retries + 1 {
			tracing::warn!(target = "antenna.bridge", failures, degraded, error = %error, "attach failed");
		} else {
			tracing::debug!(target = "antenna.bridge", failures, error = %error, "attach failed");
		}

		let mut health = self.health.lock();
		health.locator_ok = !matches!(error, RuntimeError::NoTargetFound { .. });
		health.connected = false;
		health.target = None;
		health.last_attempt = Some(AttemptOutcome {
			at_ms: now_ms(),
			ok: false,
			error: Some(error.to_string()),
		});
		health.consecutive_failures = failures;
		health.degraded = degraded;
	}

	fn detach(&self) {
		self.slot.send_replace(None);
		self.store.set_connected(false);
		let mut health = self.health.lock();
		health.connected = false;
	}

	/// Refreshes until the session closes. Returns `true` when stopped by `shutdown`.
	async fn pump(&self, session: Arc<dyn SessionLike>, shutdown: &mut watch::Receiver<bool>) -> bool {
		let mut navigation = session.on_event(Box::new(|event| {
			event
				.method()
				.is_some_and(|method| NAVIGATION_EVENTS.contains(&method))
		}));
		let mut ticker = tokio::time::interval(self.config.capture.interval());
		ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

		let stopped = loop {
			tokio::select! {
				_ = ticker.tick() => self.refresh_with(&session).await,
				Some(event) = navigation.next() => {
					tracing::debug!(target = "antenna.bridge", method = ?event.method(), "navigation");
					self.refresh_with(&session).await;
				}
				_ = session.closed() => {
					tracing::warn!(target = "antenna.bridge", "session closed; reconnecting");
					break false;
				}
				_ = shutdown.changed() => break true,
			}
		};

		self.detach();
		stopped
	}

	async fn refresh_with(&self, session: &Arc<dyn SessionLike>) {
		match self.snapshots.capture(session.clone()).await {
			Ok(_) | Err(CaptureError::NoActiveRegion) => {}
			Err(e) => tracing::debug!(target = "antenna.bridge", error = %e, "periodic capture failed"),
		}
		if let Err(e) = self.executor.read_state(session.as_ref()).await {
			tracing::debug!(target = "antenna.bridge", error = %e, "state read failed");
		}
	}

	/// The live session, waiting up to the call timeout for a reconnect.
	async fn session(&self) -> Option<Arc<dyn SessionLike>> {
		let live = |slot: &Option<Arc<dyn SessionLike>>| slot.as_ref().is_some_and(|s| s.is_connected());
		let mut rx = self.slot.subscribe();
		let budget = self.config.session.call_timeout();
		match tokio::time::timeout(budget, rx.wait_for(live)).await {
			Ok(Ok(slot)) => slot.clone(),
			_ => None,
		}
	}

	async fn action_session(&self) -> Result<Arc<dyn SessionLike>, ActionError> {
		self.session().await.ok_or(ActionError::Disconnected)
	}

	pub fn health(&self) -> HealthReport {
		self.health.lock().clone()
	}

	pub fn snapshot(&self) -> SnapshotResponse {
		self.store.snapshot_response()
	}

	/// Captures now (joining a capture in flight) and returns the result.
	pub async fn refresh(&self) -> SnapshotResponse {
		if let Some(session) = self.session().await {
			if let Err(e) = self.snapshots.capture(session).await {
				tracing::debug!(target = "antenna.bridge", error = %e, "on-demand capture failed");
			}
		}
		self.store.snapshot_response()
	}

	pub fn state(&self) -> StateResponse {
		self.store.state_response()
	}

	pub async fn send(&self, text: &str) -> CommandResult {
		if text.trim().is_empty() {
			return outcome("send", Err(ActionError::EmptyInput));
		}
		let result = match self.action_session().await {
			Ok(session) => self.executor.send(session.as_ref(), text).await,
			Err(e) => Err(e),
		};
		outcome("send", result)
	}

	pub async fn stop(&self) -> CommandResult {
		let result = match self.action_session().await {
			Ok(session) => self.executor.stop(session.as_ref()).await,
			Err(e) => Err(e),
		};
		outcome("stop", result)
	}

	async fn select(&self, selection: Selection, name: &str) -> CommandResult {
		if name.trim().is_empty() {
			return outcome("select", Err(ActionError::EmptyInput));
		}
		let result = match self.action_session().await {
			Ok(session) => self.executor.select(session.as_ref(), selection, name).await,
			Err(e) => Err(e),
		};
		outcome("select", result)
	}

	pub async fn set_mode(&self, name: &str) -> CommandResult {
		self.select(Selection::Mode, name).await
	}

	pub async fn set_model(&self, name: &str) -> CommandResult {
		self.select(Selection::Model, name).await
	}

	pub async fn remote_click(&self, role: &str, text: Option<&str>) -> CommandResult {
		let result = match self.action_session().await {
			Ok(session) => self.executor.remote_click(session.as_ref(), role, text).await,
			Err(e) => Err(e),
		};
		outcome("click", result)
	}

	/// Scores every scanned element against `role`, for diagnostics.
	pub async fn debug_resolve(&self, role: &str) -> Result<ResolverReport, ActionError> {
		let role = self.roles.require(role)?;
		let session = self.action_session().await?;
		let scan = self
			.resolver
			.scan(session.as_ref(), false)
			.await
			.map_err(ActionError::from)?;
		Ok(resolver::report(&self.resolver.rank(role, &scan), &scan))
	}

	pub fn subscribe(&self) -> Subscription {
		self.notifier.subscribe()
	}

	pub fn roles(&self) -> &RoleRegistry {
		&self.roles
	}

	pub fn config(&self) -> &BridgeConfig {
		&self.config
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use antenna_protocol::{ChangeScope, FailureCode, PushEvent};

	use super::*;
	use crate::config::{ReconnectConfig, VerifyConfig};
	use crate::testing::{FakeConnector, FakePage, FakeSession, agent_page, install_composer};

	fn config() -> BridgeConfig {
		let mut config = BridgeConfig::default();
		config.capture.interval_ms = 60_000;
		config.session.call_timeout_ms = 200;
		config.reconnect = ReconnectConfig {
			initial_delay_ms: 100,
			max_delay_ms: 400,
			multiplier: 2.0,
			max_retries: 2,
		};
		config.verify = VerifyConfig {
			attempts: 2,
			delay_ms: 10,
		};
		config
	}

	fn start(connector: FakeConnector) -> (Arc<Bridge>, watch::Sender<bool>, tokio::task::JoinHandle<()>) {
		let bridge = Arc::new(Bridge::new(config(), Box::new(connector)).unwrap());
		let (shutdown_tx, shutdown_rx) = watch::channel(false);
		let handle = tokio::spawn(bridge.clone().run(shutdown_rx));
		(bridge, shutdown_tx, handle)
	}

	async fn wait_until(mut condition: impl FnMut() -> bool) {
		for _ in 0..2000 {
			if condition() {
				return;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		panic!("condition not reached");
	}

	#[tokio::test(start_paused = true)]
	async fn reattaches_after_transport_drop() {
		let first = FakeSession::new(agent_page("Planning", "Gemini", false));
		let second = FakeSession::new(agent_page("Planning", "Gemini", false));
		let connector = FakeConnector::new();
		connector.push_failure(RuntimeError::NoTargetFound { probed: vec![9000] });
		install_composer(&first);
		install_composer(&second);
		connector.push_session(first.clone());
		connector.push_session(second.clone());
		let (bridge, _shutdown, _task) = start(connector);

		wait_until(|| bridge.state().connected).await;
		assert_eq!(bridge.health().target.unwrap().id, "fake-target");
		assert!(bridge.send("hello").await.ok);

		first.disconnect();
		wait_until(|| second.total_calls() > 0).await;
		wait_until(|| bridge.state().connected).await;

		assert!(bridge.send("again").await.ok);
		assert_eq!(second.write_count(), 2);
		assert_eq!(bridge.health().consecutive_failures, 0);
	}

	#[tokio::test(start_paused = true)]
	async fn failed_attempts_surface_in_health() {
		let connector = FakeConnector::new();
		let (bridge, _shutdown, _task) = start(connector);

		wait_until(|| bridge.health().consecutive_failures > 2).await;
		let health = bridge.health();
		assert!(!health.locator_ok);
		assert!(!health.connected);
		assert!(health.degraded);
		assert!(!health.last_attempt.unwrap().ok);
	}

	#[tokio::test(start_paused = true)]
	async fn commands_fail_fast_while_disconnected() {
		let (bridge, _shutdown, _task) = start(FakeConnector::new());

		let result = bridge.stop().await;
		assert_eq!(result.reason, Some(FailureCode::Disconnected));

		let result = bridge.send(" ").await;
		assert_eq!(result.reason, Some(FailureCode::EmptyInput));
		assert_eq!(bridge.snapshot(), SnapshotResponse::NotConnected);
	}

	#[tokio::test(start_paused = true)]
	async fn last_snapshot_survives_disconnect() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", false));
		let connector = FakeConnector::new();
		connector.push_session(session.clone());
		let (bridge, _shutdown, _task) = start(connector);

		wait_until(|| matches!(bridge.snapshot(), SnapshotResponse::Ready { .. })).await;
		let mut events = bridge.subscribe();
		session.disconnect();

		wait_until(|| !bridge.state().connected).await;
		assert!(matches!(bridge.snapshot(), SnapshotResponse::Ready { .. }));
		assert_eq!(events.recv().await, Some(PushEvent::changed(ChangeScope::State)));
	}

	#[tokio::test(start_paused = true)]
	async fn navigation_triggers_refresh() {
		let session = FakeSession::new(FakePage::with_region("<div>one</div>"));
		let connector = FakeConnector::new();
		connector.push_session(session.clone());
		let (bridge, _shutdown, _task) = start(connector);

		wait_until(|| session.capture_count() == 1).await;
		let mut events = bridge.subscribe();
		session.page().region = Some(("<div>two</div>".into(), None));
		session.emit("Page.loadEventFired");

		assert_eq!(events.recv().await, Some(PushEvent::changed(ChangeScope::Snapshot)));
		assert_eq!(session.capture_count(), 2);
	}

	#[tokio::test(start_paused = true)]
	async fn debug_resolve_reports_without_handles() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", false));
		let connector = FakeConnector::new();
		connector.push_session(session.clone());
		let (bridge, _shutdown, _task) = start(connector);
		wait_until(|| bridge.state().connected).await;

		let report = bridge.debug_resolve("send-button").await.unwrap();
		assert!(report.chosen.is_some());
		assert_eq!(session.handle_count(), 0);

		let err = bridge.debug_resolve("launch-button").await.unwrap_err();
		assert_eq!(err.code(), FailureCode::UnknownRole);
	}

	#[tokio::test(start_paused = true)]
	async fn shutdown_stops_the_loop() {
		let (bridge, shutdown, task) = start(FakeConnector::new());
		shutdown.send_replace(true);
		task.await.unwrap();
		assert!(!bridge.state().connected);
	}
}
