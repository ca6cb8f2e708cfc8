//! Query, command and push types exposed to observers.
//!
//! The push channel carries no payload. A [`PushEvent`] only says *what*
//! changed; observers pull the fresh value through the query surface.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Last known state of the observed application.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppState {
	/// Label of the active mode (e.g. "Planning"), if it could be read.
	pub mode: Option<String>,
	/// Label of the active model, if it could be read.
	pub model: Option<String>,
	/// Whether the application is currently generating.
	pub busy: bool,
}

/// Machine-readable failure reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCode {
	/// No debugger endpoint advertised a matching target.
	NoTargetFound,
	/// The protocol session is down.
	Disconnected,
	/// A protocol call did not answer in time.
	Timeout,
	/// The observed region is not present (e.g. no conversation open).
	NoActiveRegion,
	/// No element cleared the resolver threshold for the requested role.
	NotFound,
	/// Blank text was submitted.
	EmptyInput,
	/// The capture routine failed.
	CaptureError,
	/// The action ran but the follow-up read did not show the expected state.
	VerificationFailed,
	/// The requested role has no descriptor.
	UnknownRole,
	/// A routine evaluated in the target threw or returned an unexpected shape.
	ScriptError,
	/// The shared secret was missing or wrong.
	Unauthorized,
}

impl fmt::Display for FailureCode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let s = match self {
			FailureCode::NoTargetFound => "NO_TARGET_FOUND",
			FailureCode::Disconnected => "DISCONNECTED",
			FailureCode::Timeout => "TIMEOUT",
			FailureCode::NoActiveRegion => "NO_ACTIVE_REGION",
			FailureCode::NotFound => "NOT_FOUND",
			FailureCode::EmptyInput => "EMPTY_INPUT",
			FailureCode::CaptureError => "CAPTURE_ERROR",
			FailureCode::VerificationFailed => "VERIFICATION_FAILED",
			FailureCode::UnknownRole => "UNKNOWN_ROLE",
			FailureCode::ScriptError => "SCRIPT_ERROR",
			FailureCode::Unauthorized => "UNAUTHORIZED",
		};
		f.write_str(s)
	}
}

/// Outcome of a command endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
	pub ok: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub reason: Option<FailureCode>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub message: Option<String>,
}

impl CommandResult {
	pub fn success() -> Self {
		Self {
			ok: true,
			reason: None,
			message: None,
		}
	}

	pub fn failure(reason: FailureCode, message: impl Into<String>) -> Self {
		Self {
			ok: false,
			reason: Some(reason),
			message: Some(message.into()),
		}
	}
}

/// `POST /send` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendRequest {
	pub text: String,
}

/// `POST /mode` and `POST /model` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectRequest {
	pub name: String,
}

/// `POST /click` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClickRequest {
	pub role: String,
	/// Extra text the clicked element must contain.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub text: Option<String>,
}

/// Latest snapshot, or why there is none.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SnapshotResponse {
	Ready {
		hash: String,
		#[serde(rename = "capturedAtMs")]
		captured_at_ms: u64,
		html: String,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		styles: Option<String>,
	},
	/// Connected, but nothing captured yet.
	Waiting,
	NoActiveRegion,
	NotConnected,
}

/// `GET /state` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateResponse {
	pub connected: bool,
	pub state: Option<AppState>,
}

/// Identity of the attached target, as shown in health output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetSummary {
	pub id: String,
	pub title: String,
	pub port: u16,
}

/// Result of the most recent locate + attach attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptOutcome {
	pub at_ms: u64,
	pub ok: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<String>,
}

/// `GET /health` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
	/// The last locate attempt found a target.
	pub locator_ok: bool,
	/// A protocol session is live.
	pub connected: bool,
	pub target: Option<TargetSummary>,
	pub last_attempt: Option<AttemptOutcome>,
	/// Failed attempts since the last successful attach.
	pub consecutive_failures: u32,
	/// Retry budget exhausted; the bridge keeps retrying at the maximum interval.
	pub degraded: bool,
}

/// What a push event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeScope {
	Snapshot,
	State,
}

/// Message delivered on the push channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PushEvent {
	Changed { scope: ChangeScope },
}

impl PushEvent {
	pub fn changed(scope: ChangeScope) -> Self {
		PushEvent::Changed { scope }
	}
}

/// One element as seen by the resolver, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredElement {
	/// Document order of the element within the scan.
	pub index: usize,
	pub tag: String,
	pub label: String,
	pub score: f64,
	/// Signals that contributed to the score.
	pub matched: Vec<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub disqualified: Option<String>,
}

/// `GET /debug/resolve/{role}` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverReport {
	pub role: String,
	pub min_score: f64,
	/// Index of the element the action path would pick.
	pub chosen: Option<usize>,
	pub elements: Vec<ScoredElement>,
}
