//! Scripted stand-ins for a live target.
//!
//! [`FakeSession`] answers the bridge's own routines by their
//! `/*antenna:...*/` markers against an in-memory [`FakePage`], and records
//! every call so tests can assert on protocol traffic (for example "no
//! write was made"). [`FakeConnector`] hands out scripted connect results.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use antenna_protocol::{Event, Target};
use antenna_runtime::{EventPredicate, EventStream, ProtocolEvent, SessionFuture, SessionLike};
use parking_lot::{Mutex, MutexGuard};
use serde_json::{Value, json};
use tokio::sync::{broadcast, watch};
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::bridge::Connector;
use crate::resolver::ElementFeatures;

/// In-memory page: scannable elements and the observed region.
#[derive(Debug, Clone, Default)]
pub struct FakePage {
	pub elements: Vec<ElementFeatures>,
	/// Serialized region and styles; `None` when no region is open.
	pub region: Option<(String, Option<String>)>,
}

impl FakePage {
	pub fn with_elements(elements: Vec<ElementFeatures>) -> Self {
		Self {
			elements,
			region: None,
		}
	}

	pub fn with_region(html: &str) -> Self {
		Self {
			elements: Vec::new(),
			region: Some((html.to_string(), None)),
		}
	}
}

/// Visible, clickable `<button>` with `text`.
pub fn button(text: &str) -> ElementFeatures {
	ElementFeatures {
		index: 0,
		tag: "button".into(),
		role: None,
		text: text.into(),
		attributes: Default::default(),
		width: 80.0,
		height: 24.0,
		visible: true,
		clickable: true,
		editable: false,
	}
}

/// Visible `<textarea>` with `text`.
pub fn editable(text: &str) -> ElementFeatures {
	ElementFeatures {
		tag: "textarea".into(),
		clickable: false,
		editable: true,
		width: 400.0,
		height: 60.0,
		..button(text)
	}
}

impl ElementFeatures {
	pub fn with_attr(mut self, name: &str, value: &str) -> Self {
		self.attributes.insert(name.into(), value.into());
		self
	}

	pub fn with_role(mut self, role: &str) -> Self {
		self.role = Some(role.into());
		self
	}

	pub fn hidden(mut self) -> Self {
		self.visible = false;
		self
	}

	pub fn sized(mut self, width: f64, height: f64) -> Self {
		self.width = width;
		self.height = height;
		self
	}
}

/// Agent panel with a composer, mode and model selectors, send button and,
/// while `busy`, a stop button.
pub fn agent_page(mode: &str, model: &str, busy: bool) -> FakePage {
	let mut elements = vec![
		button("Agent").with_role("tab"),
		editable("").with_attr("placeholder", "Ask anything, @ to mention"),
		button(mode).with_attr("aria-haspopup", "menu"),
		button(model).with_attr("aria-haspopup", "listbox"),
		button("")
			.with_attr("aria-label", "Send message")
			.with_attr("icon", "lucide lucide-arrow-up"),
	];
	if busy {
		elements.push(
			button("")
				.with_attr("aria-label", "Stop generating")
				.with_attr("icon", "lucide lucide-square"),
		);
	}
	FakePage {
		elements,
		region: Some(("<div id=\"cascade\"><p>hello</p></div>".into(), None)),
	}
}

/// Makes the mode selector (`aria-haspopup="menu"`) toggle a menu of
/// `options`; clicking an option relabels the selector and closes the menu.
pub fn install_menu(session: &FakeSession, options: &[&str]) {
	let options: Vec<String> = options.iter().map(|s| s.to_string()).collect();
	let is_opener = |element: &ElementFeatures| {
		element
			.attributes
			.get("aria-haspopup")
			.is_some_and(|v| v == "menu")
	};
	let is_option = |element: &ElementFeatures| element.role.as_deref() == Some("option");

	session.on_click(move |page, index| {
		let clicked = page.elements[index].clone();
		if is_option(&clicked) {
			page.elements.retain(|e| !is_option(e));
			if let Some(opener) = page.elements.iter_mut().find(|e| is_opener(e)) {
				opener.text = clicked.text;
			}
		} else if is_opener(&clicked) {
			if page.elements.iter().any(is_option) {
				page.elements.retain(|e| !is_option(e));
			} else {
				for option in &options {
					page.elements.push(button(option).with_role("option"));
				}
			}
		}
	});
}

/// Makes the send button behave like the real composer: clicking it clears
/// every editable element.
pub fn install_composer(session: &FakeSession) {
	session.on_click(|page, index| {
		let is_send = page.elements[index]
			.attributes
			.get("aria-label")
			.is_some_and(|label| label.starts_with("Send"));
		if is_send {
			for element in page.elements.iter_mut().filter(|e| e.editable) {
				element.attributes.remove("value");
				element.text.clear();
			}
		}
	});
}

/// One recorded input simulation.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
	Click { index: usize, label: String },
	SetText { index: usize, text: String },
}

type ClickHook = Arc<dyn Fn(&mut FakePage, usize) + Send + Sync>;

struct FakeState {
	target: Target,
	page: Mutex<FakePage>,
	calls: Mutex<Vec<(String, Value)>>,
	writes: Mutex<Vec<Write>>,
	released: Mutex<Vec<String>>,
	capture_delay: Mutex<Duration>,
	on_click: Mutex<Vec<ClickHook>>,
	throw_on: Mutex<Vec<String>>,
	connected: AtomicBool,
	closed_tx: watch::Sender<bool>,
	events: broadcast::Sender<ProtocolEvent>,
}

/// Scripted [`SessionLike`]. Clones share state.
#[derive(Clone)]
pub struct FakeSession {
	state: Arc<FakeState>,
}

fn by_value(value: Value) -> Value {
	json!({ "result": { "type": "object", "value": value } })
}

fn marker_index(source: &str, marker: &str) -> Option<usize> {
	let rest = &source[source.find(marker)? + marker.len()..];
	rest[..rest.find("*/")?].parse().ok()
}

impl FakeSession {
	pub fn new(page: FakePage) -> Self {
		let (closed_tx, _) = watch::channel(false);
		let (events, _) = broadcast::channel(64);
		Self {
			state: Arc::new(FakeState {
				target: Target {
					id: "fake-target".into(),
					title: "Fake - workbench".into(),
					url: "vscode-file://vscode-app/workbench.html".into(),
					port: 9000,
					ws_url: "ws://127.0.0.1:9000/devtools/page/fake-target".into(),
				},
				page: Mutex::new(page),
				calls: Mutex::new(Vec::new()),
				writes: Mutex::new(Vec::new()),
				released: Mutex::new(Vec::new()),
				capture_delay: Mutex::new(Duration::ZERO),
				on_click: Mutex::new(Vec::new()),
				throw_on: Mutex::new(Vec::new()),
				connected: AtomicBool::new(true),
				closed_tx,
				events,
			}),
		}
	}

	pub fn page(&self) -> MutexGuard<'_, FakePage> {
		self.state.page.lock()
	}

	pub fn set_capture_delay(&self, delay: Duration) {
		*self.state.capture_delay.lock() = delay;
	}

	/// Adds a hook run after every recorded click, with the clicked element index.
	/// Hooks run in the order they were added.
	pub fn on_click(&self, hook: impl Fn(&mut FakePage, usize) + Send + Sync + 'static) {
		self.state.on_click.lock().push(Arc::new(hook));
	}

	/// Makes every routine containing `marker` throw.
	pub fn throw_on(&self, marker: &str) {
		self.state.throw_on.lock().push(marker.to_string());
	}

	/// Drops the fake transport: calls fail and `closed()` resolves.
	pub fn disconnect(&self) {
		self.state.connected.store(false, Ordering::SeqCst);
		self.state.closed_tx.send_replace(true);
	}

	/// Emits a protocol notification.
	pub fn emit(&self, method: &str) {
		let _ = self.state.events.send(ProtocolEvent::Notification(Event {
			method: method.to_string(),
			params: json!({}),
			session_id: None,
		}));
	}

	pub fn total_calls(&self) -> usize {
		self.state.calls.lock().len()
	}

	fn count_sources(&self, marker: &str) -> usize {
		self.state
			.calls
			.lock()
			.iter()
			.filter(|(_, params)| {
				params
					.get("expression")
					.and_then(Value::as_str)
					.is_some_and(|source| source.contains(marker))
			})
			.count()
	}

	pub fn capture_count(&self) -> usize {
		self.count_sources("/*antenna:capture*/")
	}

	pub fn handle_count(&self) -> usize {
		self.count_sources("/*antenna:handle=")
	}

	/// Stashing scans whose page-side entry has not been dropped yet.
	pub fn live_stash_count(&self) -> usize {
		let stashed = self
			.state
			.calls
			.lock()
			.iter()
			.filter_map(|(_, params)| params.get("expression").and_then(Value::as_str))
			.filter(|source| source.contains("/*antenna:scan*/") && source.trim_end().ends_with("true)"))
			.count();
		stashed.saturating_sub(self.count_sources("/*antenna:forget*/"))
	}

	/// Number of input simulations (`Runtime.callFunctionOn`).
	pub fn write_count(&self) -> usize {
		self.state
			.calls
			.lock()
			.iter()
			.filter(|(method, _)| method == "Runtime.callFunctionOn")
			.count()
	}

	pub fn writes(&self) -> Vec<Write> {
		self.state.writes.lock().clone()
	}

	pub fn released_groups(&self) -> Vec<String> {
		self.state.released.lock().clone()
	}

	async fn evaluate(&self, source: &str) -> Value {
		if source.contains("/*antenna:scan*/") {
			let elements: Vec<ElementFeatures> = self
				.page()
				.elements
				.iter()
				.cloned()
				.enumerate()
				.map(|(index, mut element)| {
					element.index = index;
					element
				})
				.collect();
			return by_value(json!({ "token": "fake-scan", "elements": elements }));
		}

		if source.contains("/*antenna:capture*/") {
			let delay = *self.state.capture_delay.lock();
			if !delay.is_zero() {
				tokio::time::sleep(delay).await;
			}
			let region = self.page().region.clone();
			return by_value(match region {
				Some((html, styles)) => json!({ "status": "ok", "html": html, "styles": styles }),
				None => json!({ "status": "none" }),
			});
		}

		if let Some(index) = marker_index(source, "/*antenna:handle=") {
			let exists = index < self.page().elements.len();
			return if exists {
				json!({ "result": { "type": "object", "subtype": "node", "objectId": format!("obj-{index}") } })
			} else {
				json!({ "result": { "type": "object", "subtype": "null", "value": null } })
			};
		}

		json!({ "result": { "type": "undefined" } })
	}

	fn call_function(&self, params: &Value, source: &str) -> Value {
		let index = params["objectId"]
			.as_str()
			.and_then(|id| id.strip_prefix("obj-"))
			.and_then(|n| n.parse::<usize>().ok());
		let Some(index) = index else {
			return json!({
				"result": { "type": "object" },
				"exceptionDetails": { "text": "Could not find object with given id" }
			});
		};

		if source.contains("/*antenna:set-text*/") {
			let text = params["arguments"][0]["value"].as_str().unwrap_or_default().to_string();
			if let Some(element) = self.page().elements.get_mut(index) {
				element.attributes.insert("value".into(), text.clone());
			}
			self.state.writes.lock().push(Write::SetText { index, text });
		} else if source.contains("/*antenna:click*/") {
			let label = self
				.page()
				.elements
				.get(index)
				.map(ElementFeatures::label)
				.unwrap_or_default();
			self.state.writes.lock().push(Write::Click { index, label });
			let hooks = self.state.on_click.lock().clone();
			let mut page = self.page();
			for hook in hooks {
				if index < page.elements.len() {
					hook(&mut page, index);
				}
			}
		}
		json!({ "result": { "type": "boolean", "value": true } })
	}
}

impl SessionLike for FakeSession {
	fn target(&self) -> &Target {
		&self.state.target
	}

	fn call(
		&self,
		method: &str,
		params: Value,
		_timeout: Duration,
	) -> SessionFuture<'_, antenna_runtime::Result<Value>> {
		let method = method.to_string();
		Box::pin(async move {
			if !self.is_connected() {
				return Err(antenna_runtime::Error::Disconnected);
			}
			self.state.calls.lock().push((method.clone(), params.clone()));

			let source = params
				.get("expression")
				.or_else(|| params.get("functionDeclaration"))
				.and_then(Value::as_str)
				.unwrap_or_default()
				.to_string();
			let throws = self
				.state
				.throw_on
				.lock()
				.iter()
				.any(|marker| source.contains(marker.as_str()));
			if throws {
				return Ok(json!({
					"result": { "type": "object", "subtype": "error" },
					"exceptionDetails": {
						"text": "Uncaught",
						"exception": { "description": "Error: scripted failure" }
					}
				}));
			}

			let response = match method.as_str() {
				"Runtime.evaluate" => self.evaluate(&source).await,
				"Runtime.callFunctionOn" => self.call_function(&params, &source),
				"Runtime.releaseObjectGroup" => {
					if let Some(group) = params["objectGroup"].as_str() {
						self.state.released.lock().push(group.to_string());
					}
					json!({})
				}
				_ => json!({}),
			};
			Ok(response)
		})
	}

	fn is_connected(&self) -> bool {
		self.state.connected.load(Ordering::SeqCst)
	}

	fn closed(&self) -> SessionFuture<'_, ()> {
		let mut rx = self.state.closed_tx.subscribe();
		Box::pin(async move {
			let _ = rx.wait_for(|closed| *closed).await;
		})
	}

	fn on_event(&self, predicate: EventPredicate) -> EventStream {
		let stream = BroadcastStream::new(self.state.events.subscribe())
			.filter_map(move |item| item.ok().filter(|event| predicate(event)));
		Box::pin(stream)
	}
}

/// [`Connector`] returning scripted results in order, then `NoTargetFound`.
#[derive(Default)]
pub struct FakeConnector {
	script: Mutex<VecDeque<antenna_runtime::Result<FakeSession>>>,
	attempts: AtomicUsize,
}

impl FakeConnector {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push_session(&self, session: FakeSession) {
		self.script.lock().push_back(Ok(session));
	}

	pub fn push_failure(&self, error: antenna_runtime::Error) {
		self.script.lock().push_back(Err(error));
	}

	pub fn attempts(&self) -> usize {
		self.attempts.load(Ordering::SeqCst)
	}
}

impl Connector for FakeConnector {
	fn connect(&self) -> SessionFuture<'_, antenna_runtime::Result<Arc<dyn SessionLike>>> {
		Box::pin(async move {
			self.attempts.fetch_add(1, Ordering::SeqCst);
			let next = self.script.lock().pop_front();
			match next {
				Some(Ok(session)) => Ok(Arc::new(session) as Arc<dyn SessionLike>),
				Some(Err(e)) => Err(e),
				None => Err(antenna_runtime::Error::NoTargetFound {
					probed: vec![9000, 9001, 9002, 9003],
				}),
			}
		})
	}
}
