//! Action executor.
//!
//! Every operation resolves the roles it needs first, then drives the
//! resolved handles with input simulation (set value, dispatch click), then
//! re-reads [`AppState`] to verify. A resolution failure returns before any
//! write. Handles live in a per-action object group that is released when
//! the action ends, whatever the outcome.

use std::borrow::Cow;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use antenna_protocol::AppState;
use antenna_runtime::SessionLike;
use serde_json::json;

use crate::config::VerifyConfig;
use crate::error::{ActionError, ResolveError};
use crate::eval;
use crate::resolver::{Candidate, Resolver, Scan};
use crate::roles::{
	CHAT_INPUT, CompiledRole, MODE_SELECTOR, MODEL_SELECTOR, RoleRegistry, SEND_BUTTON, STOP_BUTTON,
	option_descriptor,
};
use crate::state;
use crate::store::StateStore;

const CLICK_FN: &str = r#"/*antenna:click*/ function () {
    this.scrollIntoView({ block: 'nearest', inline: 'nearest' });
    const rect = this.getBoundingClientRect();
    const init = {
        bubbles: true,
        cancelable: true,
        view: window,
        clientX: rect.left + rect.width / 2,
        clientY: rect.top + rect.height / 2,
    };
    this.dispatchEvent(new PointerEvent('pointerdown', init));
    this.dispatchEvent(new MouseEvent('mousedown', init));
    this.dispatchEvent(new PointerEvent('pointerup', init));
    this.dispatchEvent(new MouseEvent('mouseup', init));
    this.click();
    return true;
}"#;

const SET_TEXT_FN: &str = r#"/*antenna:set-text*/ function (text) {
    this.focus();
    if (this.isContentEditable) {
        const selection = window.getSelection();
        const range = document.createRange();
        range.selectNodeContents(this);
        selection.removeAllRanges();
        selection.addRange(range);
        if (!document.execCommand('insertText', false, text)) {
            this.textContent = text;
            this.dispatchEvent(new InputEvent('input', { bubbles: true, inputType: 'insertText', data: text }));
        }
    } else {
        const proto = this.tagName === 'TEXTAREA' ? HTMLTextAreaElement.prototype : HTMLInputElement.prototype;
        const setter = Object.getOwnPropertyDescriptor(proto, 'value').set;
        setter.call(this, text);
        this.dispatchEvent(new Event('input', { bubbles: true }));
        this.dispatchEvent(new Event('change', { bubbles: true }));
    }
    return true;
}"#;

/// Which selector a [`Executor::select`] call drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
	Mode,
	Model,
}

impl Selection {
	fn selector_role(self) -> &'static str {
		match self {
			Selection::Mode => MODE_SELECTOR,
			Selection::Model => MODEL_SELECTOR,
		}
	}

	fn kind(self) -> &'static str {
		match self {
			Selection::Mode => "mode",
			Selection::Model => "model",
		}
	}

	fn current(self, state: &AppState) -> Option<&str> {
		match self {
			Selection::Mode => state.mode.as_deref(),
			Selection::Model => state.model.as_deref(),
		}
	}
}

pub struct Executor {
	resolver: Arc<Resolver>,
	roles: Arc<RoleRegistry>,
	store: Arc<StateStore>,
	verify: VerifyConfig,
	call_timeout: Duration,
	groups: AtomicU64,
}

impl Executor {
	pub fn new(
		resolver: Arc<Resolver>,
		roles: Arc<RoleRegistry>,
		store: Arc<StateStore>,
		verify: VerifyConfig,
		call_timeout: Duration,
	) -> Self {
		Self {
			resolver,
			roles,
			store,
			verify,
			call_timeout,
			groups: AtomicU64::new(0),
		}
	}

	fn next_group(&self) -> String {
		format!("antenna-action-{}", self.groups.fetch_add(1, Ordering::Relaxed) + 1)
	}

	async fn click(&self, session: &dyn SessionLike, candidate: &Candidate) -> Result<(), ActionError> {
		tracing::debug!(
			target = "antenna.executor",
			role = %candidate.role,
			index = candidate.index,
			label = %candidate.label,
			"click"
		);
		eval::call_function_on(session, &candidate.object_id, CLICK_FN, &[], self.call_timeout).await?;
		Ok(())
	}

	async fn set_text(&self, session: &dyn SessionLike, candidate: &Candidate, text: &str) -> Result<(), ActionError> {
		tracing::debug!(target = "antenna.executor", role = %candidate.role, len = text.len(), "set text");
		eval::call_function_on(session, &candidate.object_id, SET_TEXT_FN, &[json!(text)], self.call_timeout).await?;
		Ok(())
	}

	/// Reads the state and records it in the store.
	pub async fn read_state(&self, session: &dyn SessionLike) -> Result<AppState, ActionError> {
		let state = state::read_state(session, &self.resolver, &self.roles).await?;
		self.store.record_state(state.clone());
		Ok(state)
	}

	/// Re-scans up to `verify.attempts` times until `accept` holds for the
	/// derived state and the scan it came from. Every read is recorded.
	async fn verify_scan_until<F>(&self, session: &dyn SessionLike, accept: F) -> Result<(bool, AppState), ActionError>
	where
		F: Fn(&AppState, &Scan) -> bool,
	{
		let mut last = AppState::default();
		for attempt in 0..self.verify.attempts.max(1) {
			if attempt > 0 {
				tokio::time::sleep(self.verify.delay()).await;
			}
			let scan = self.resolver.scan(session, false).await?;
			last = state::state_from_scan(&self.resolver, &self.roles, &scan)?;
			self.store.record_state(last.clone());
			if accept(&last, &scan) {
				return Ok((true, last));
			}
		}
		Ok((false, last))
	}

	async fn verify_until<F>(&self, session: &dyn SessionLike, accept: F) -> Result<(bool, AppState), ActionError>
	where
		F: Fn(&AppState) -> bool,
	{
		self.verify_scan_until(session, |state, _| accept(state)).await
	}

	/// Whether the element ranked for `input` still shows `text`.
	fn input_holds(&self, input: &CompiledRole, scan: &Scan, text: &str) -> bool {
		let Some(index) = self.resolver.rank(input, scan).chosen else {
			return false;
		};
		let Some(element) = scan.elements.iter().find(|element| element.index == index) else {
			return false;
		};
		let needle = fingerprint(text);
		fingerprint(&element.text).contains(&needle)
			|| element
				.attributes
				.get("value")
				.is_some_and(|value| fingerprint(value).contains(&needle))
	}

	async fn release(&self, session: &dyn SessionLike, group: &str) {
		eval::release_object_group(session, group, self.call_timeout).await;
	}

	/// Types `text` into the chat input and clicks send.
	pub async fn send(&self, session: &dyn SessionLike, text: &str) -> Result<AppState, ActionError> {
		if text.trim().is_empty() {
			return Err(ActionError::EmptyInput);
		}
		let group = self.next_group();
		let result = self.send_in(session, text, &group).await;
		self.release(session, &group).await;
		result
	}

	async fn send_in(&self, session: &dyn SessionLike, text: &str, group: &str) -> Result<AppState, ActionError> {
		let input_role = self.roles.require(CHAT_INPUT)?;
		let send_role = self.roles.require(SEND_BUTTON)?;
		let mut candidates = self
			.resolver
			.resolve_all(session, &[input_role, send_role], group)
			.await?
			.into_iter();
		let (Some(input), Some(send)) = (candidates.next(), candidates.next()) else {
			return Err(ActionError::NotFound {
				role: SEND_BUTTON.to_string(),
			});
		};

		self.set_text(session, &input, text).await?;
		self.click(session, &send).await?;

		// Accepted once the agent is busy or the composer no longer shows the message.
		let (accepted, state) = self
			.verify_scan_until(session, |state, scan| state.busy || !self.input_holds(input_role, scan, text))
			.await?;
		if accepted {
			Ok(state)
		} else {
			Err(ActionError::Verification {
				expected: "message to leave the input".into(),
				actual: "message still in the input".into(),
			})
		}
	}

	/// Ensures generation is stopped. Succeeds without a write when already idle.
	pub async fn stop(&self, session: &dyn SessionLike) -> Result<AppState, ActionError> {
		let stop = self.roles.require(STOP_BUTTON)?;
		let group = self.next_group();
		let result = self.stop_in(session, stop, &group).await;
		self.release(session, &group).await;
		result
	}

	async fn stop_in(&self, session: &dyn SessionLike, stop: &CompiledRole, group: &str) -> Result<AppState, ActionError> {
		match self.resolver.resolve(session, stop, group).await {
			Ok(candidate) => self.click(session, &candidate).await?,
			Err(ResolveError::NotFound { role }) => {
				let state = self.read_state(session).await?;
				if state.busy {
					return Err(ActionError::NotFound { role });
				}
				tracing::debug!(target = "antenna.executor", "already idle");
				return Ok(state);
			}
			Err(e) => return Err(e.into()),
		}

		let (idle, state) = self.verify_until(session, |state| !state.busy).await?;
		if idle {
			Ok(state)
		} else {
			Err(ActionError::Verification {
				expected: "idle".into(),
				actual: "busy".into(),
			})
		}
	}

	/// Opens the mode or model menu and picks the entry labelled `name`.
	///
	/// The click path always runs, even when `name` is already active; the
	/// verification read is what makes a repeat harmless.
	pub async fn select(
		&self,
		session: &dyn SessionLike,
		selection: Selection,
		name: &str,
	) -> Result<AppState, ActionError> {
		let name = name.trim();
		if name.is_empty() {
			return Err(ActionError::EmptyInput);
		}
		let selector = self.roles.require(selection.selector_role())?;
		let option = CompiledRole::compile(option_descriptor(selection.kind(), name))
			.map_err(|e| ActionError::Script(e.to_string()))?;

		let group = self.next_group();
		let result = self.select_in(session, selection, selector, &option, name, &group).await;
		self.release(session, &group).await;
		result
	}

	async fn select_in(
		&self,
		session: &dyn SessionLike,
		selection: Selection,
		selector: &CompiledRole,
		option: &CompiledRole,
		name: &str,
		group: &str,
	) -> Result<AppState, ActionError> {
		let opener = self.resolver.resolve(session, selector, group).await?;
		self.click(session, &opener).await?;
		tokio::time::sleep(self.verify.delay()).await;

		let entry = match self.resolver.resolve(session, option, group).await {
			Ok(entry) => entry,
			Err(ResolveError::NotFound { role }) => {
				// Close the menu again.
				if let Err(e) = self.click(session, &opener).await {
					tracing::debug!(target = "antenna.executor", error = %e, "failed to close menu");
				}
				return Err(ActionError::NotFound { role });
			}
			Err(e) => return Err(e.into()),
		};
		self.click(session, &entry).await?;

		let wanted = name.to_lowercase();
		let (applied, state) = self
			.verify_until(session, |state| {
				selection
					.current(state)
					.is_some_and(|label| label.to_lowercase().contains(&wanted))
			})
			.await?;
		if applied {
			Ok(state)
		} else {
			Err(ActionError::Verification {
				expected: name.to_string(),
				actual: selection.current(&state).unwrap_or("unknown").to_string(),
			})
		}
	}

	/// Clicks the element resolved for `role`, optionally narrowed to elements containing `text`.
	pub async fn remote_click(
		&self,
		session: &dyn SessionLike,
		role: &str,
		text: Option<&str>,
	) -> Result<AppState, ActionError> {
		let base = self.roles.require(role)?;
		let role: Cow<'_, CompiledRole> = match text.map(str::trim) {
			Some(text) if !text.is_empty() => Cow::Owned(base.narrowed(text)),
			_ => Cow::Borrowed(base),
		};

		let group = self.next_group();
		let result = self.click_in(session, &role, &group).await;
		self.release(session, &group).await;
		result
	}

	async fn click_in(&self, session: &dyn SessionLike, role: &CompiledRole, group: &str) -> Result<AppState, ActionError> {
		let (mut candidates, before) = self.resolver.resolve_scanned(session, &[role], group).await?;
		let candidate = candidates.pop().ok_or_else(|| ActionError::NotFound {
			role: role.name().to_string(),
		})?;
		self.click(session, &candidate).await?;

		let (changed, state) = self
			.verify_scan_until(session, |_, scan| scan.elements != before.elements)
			.await?;
		if changed {
			Ok(state)
		} else {
			Err(ActionError::Verification {
				expected: format!("'{}' to react to the click", candidate.label),
				actual: "no change on the page".into(),
			})
		}
	}
}

/// Whitespace-collapsed prefix used to recognise typed text in a scan.
fn fingerprint(text: &str) -> String {
	text.split_whitespace()
		.collect::<Vec<_>>()
		.join(" ")
		.chars()
		.take(64)
		.collect()
}

#[cfg(test)]
mod tests {
	use antenna_protocol::FailureCode;

	use super::*;
	use crate::config::ResolverConfig;
	use crate::notifier::ChangeNotifier;
	use crate::roles::AGENT_TAB;
	use crate::testing::{FakePage, FakeSession, Write, agent_page, button, install_composer, install_menu};

	fn executor() -> Executor {
		let store = Arc::new(StateStore::new(ChangeNotifier::new()));
		Executor::new(
			Arc::new(Resolver::new(ResolverConfig::default(), Duration::from_secs(1))),
			Arc::new(RoleRegistry::new(&[]).unwrap()),
			store,
			VerifyConfig {
				attempts: 3,
				delay_ms: 1,
			},
			Duration::from_secs(1),
		)
	}

	#[tokio::test]
	async fn send_without_send_button_makes_no_writes() {
		let mut page = agent_page("Planning", "Gemini", false);
		page.elements.retain(|element| !element.label().contains("Send"));
		let session = FakeSession::new(page);

		let err = executor().send(&session, "hello").await.unwrap_err();
		assert_eq!(err.code(), FailureCode::NotFound);
		assert_eq!(session.write_count(), 0);
	}

	#[tokio::test]
	async fn blank_text_makes_no_protocol_call() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", false));
		let err = executor().send(&session, "  \n").await.unwrap_err();
		assert!(matches!(err, ActionError::EmptyInput));
		assert_eq!(session.total_calls(), 0);
	}

	#[tokio::test]
	async fn send_types_then_clicks() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", false));
		install_composer(&session);
		executor().send(&session, "hello").await.unwrap();

		let writes = session.writes();
		assert_eq!(writes.len(), 2);
		assert!(matches!(&writes[0], Write::SetText { text, .. } if text == "hello"));
		assert!(matches!(&writes[1], Write::Click { .. }));
		assert!(session.released_groups().iter().any(|g| g.starts_with("antenna-action-")));
	}

	#[tokio::test]
	async fn send_swallowed_by_the_page_fails_verification() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", false));
		session.on_click(|_, _| {});

		let err = executor().send(&session, "hello").await.unwrap_err();
		assert!(matches!(err, ActionError::Verification { .. }), "{err:?}");
		assert_eq!(err.code(), FailureCode::VerificationFailed);
		assert_eq!(session.write_count(), 2);
	}

	#[tokio::test]
	async fn send_accepted_once_agent_is_busy() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", false));
		// The app starts generating but leaves the draft in place.
		session.on_click(|page, index| {
			if page.elements[index].attributes.get("aria-label").is_some_and(|l| l.starts_with("Send")) {
				page.elements.push(
					button("")
						.with_attr("aria-label", "Stop generating")
						.with_attr("icon", "lucide lucide-square"),
				);
			}
		});

		let state = executor().send(&session, "hello   world").await.unwrap();
		assert!(state.busy);
	}

	#[test]
	fn fingerprint_collapses_whitespace() {
		assert_eq!(fingerprint("  hello \n\t world "), "hello world");
		assert_eq!(fingerprint(&"x".repeat(500)).len(), 64);
	}

	#[tokio::test]
	async fn stop_when_idle_succeeds_without_writes() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", false));
		let state = executor().stop(&session).await.unwrap();
		assert!(!state.busy);
		assert_eq!(session.write_count(), 0);
	}

	#[tokio::test]
	async fn stop_clicks_and_waits_for_idle() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", true));
		session.on_click(|page, index| {
			if page.elements[index].label().contains("Stop") {
				page.elements.remove(index);
			}
		});

		let state = executor().stop(&session).await.unwrap();
		assert!(!state.busy);
		assert_eq!(session.write_count(), 1);
	}

	#[tokio::test]
	async fn stop_that_never_takes_effect_fails_verification() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", true));
		let err = executor().stop(&session).await.unwrap_err();
		assert_eq!(err.code(), FailureCode::VerificationFailed);
	}

	#[tokio::test]
	async fn set_mode_to_current_value_runs_click_path_once() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", false));
		install_menu(&session, &["Planning", "Fast"]);

		let state = executor().select(&session, Selection::Mode, "Planning").await.unwrap();
		assert_eq!(state.mode.as_deref(), Some("Planning"));

		let clicks: Vec<String> = session
			.writes()
			.into_iter()
			.filter_map(|write| match write {
				Write::Click { label, .. } => Some(label),
				Write::SetText { .. } => None,
			})
			.collect();
		assert_eq!(clicks.len(), 2, "selector then option: {clicks:?}");
		assert_eq!(clicks[1], "Planning");
	}

	#[tokio::test]
	async fn set_mode_switches_label() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", false));
		install_menu(&session, &["Planning", "Fast"]);

		let state = executor().select(&session, Selection::Mode, "fast").await.unwrap();
		assert_eq!(state.mode.as_deref(), Some("Fast"));
	}

	#[tokio::test]
	async fn unknown_option_closes_menu_and_reports_not_found() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", false));
		install_menu(&session, &["Planning", "Fast"]);

		let err = executor().select(&session, Selection::Mode, "Turbo").await.unwrap_err();
		assert_eq!(err.code(), FailureCode::NotFound);
		assert!(err.to_string().contains("mode-option"));
		assert_eq!(session.write_count(), 2);
	}

	#[tokio::test]
	async fn remote_click_narrows_by_text() {
		let mut page = FakePage::default();
		page.elements.push(button("Agent Manager").with_role("tab"));
		page.elements.push(button("Agent").with_role("tab"));
		let session = FakeSession::new(page);
		session.on_click(|page, index| {
			page.elements[index].attributes.insert("aria-selected".into(), "true".into());
		});

		executor().remote_click(&session, AGENT_TAB, Some("manager")).await.unwrap();
		assert!(matches!(&session.writes()[0], Write::Click { index: 0, .. }));
	}

	#[tokio::test]
	async fn remote_click_without_visible_effect_fails_verification() {
		let mut page = FakePage::default();
		page.elements.push(button("Agent").with_role("tab"));
		let session = FakeSession::new(page);

		let err = executor().remote_click(&session, AGENT_TAB, None).await.unwrap_err();
		assert_eq!(err.code(), FailureCode::VerificationFailed);
		assert_eq!(session.write_count(), 1);
		assert_eq!(session.live_stash_count(), 0);
	}

	#[tokio::test]
	async fn unknown_role_is_reported() {
		let session = FakeSession::new(FakePage::default());
		let err = executor().remote_click(&session, "launch-button", None).await.unwrap_err();
		assert_eq!(err.code(), FailureCode::UnknownRole);
		assert_eq!(session.total_calls(), 0);
	}

	#[tokio::test]
	async fn script_exception_maps_to_script_error() {
		let session = FakeSession::new(agent_page("Planning", "Gemini", false));
		session.throw_on("antenna:click");
		let err = executor().remote_click(&session, SEND_BUTTON, None).await.unwrap_err();
		assert_eq!(err.code(), FailureCode::ScriptError);
	}
}
