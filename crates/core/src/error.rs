//! Error types for the bridge's content layer.
//!
//! Connection-layer failures come from [`antenna_runtime::Error`]; the types
//! here classify them per operation so every failure maps onto exactly one
//! [`FailureCode`].

use std::path::PathBuf;

use antenna_protocol::FailureCode;
use thiserror::Error;

/// Failure while evaluating a routine in the target.
#[derive(Debug, Error)]
pub enum EvalError {
	#[error(transparent)]
	Session(#[from] antenna_runtime::Error),

	/// The routine threw.
	#[error("Script threw: {0}")]
	Exception(String),

	/// The routine returned something other than what the caller expects.
	#[error("Unexpected script result: {0}")]
	Malformed(String),
}

impl EvalError {
	fn is_disconnected(&self) -> bool {
		matches!(self, EvalError::Session(e) if e.is_disconnected())
	}

	fn is_timeout(&self) -> bool {
		matches!(self, EvalError::Session(e) if e.is_timeout())
	}
}

/// Errors from the snapshot engine.
///
/// `Clone` because one capture result is handed to every caller sharing it.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
	/// The observed region is not present (e.g. no conversation open).
	#[error("No active region to capture")]
	NoActiveRegion,

	#[error("Protocol session disconnected")]
	Disconnected,

	#[error("Capture timed out")]
	Timeout,

	#[error("Capture routine failed: {0}")]
	Script(String),
}

impl CaptureError {
	pub fn code(&self) -> FailureCode {
		match self {
			CaptureError::NoActiveRegion => FailureCode::NoActiveRegion,
			CaptureError::Disconnected => FailureCode::Disconnected,
			CaptureError::Timeout => FailureCode::Timeout,
			CaptureError::Script(_) => FailureCode::CaptureError,
		}
	}
}

impl From<EvalError> for CaptureError {
	fn from(err: EvalError) -> Self {
		if err.is_disconnected() {
			CaptureError::Disconnected
		} else if err.is_timeout() {
			CaptureError::Timeout
		} else {
			CaptureError::Script(err.to_string())
		}
	}
}

/// Errors from the element resolver.
#[derive(Debug, Error)]
pub enum ResolveError {
	/// No element cleared the threshold.
	#[error("No element found for role '{role}'")]
	NotFound { role: String },

	#[error("Unknown role '{0}'")]
	UnknownRole(String),

	#[error(transparent)]
	Session(antenna_runtime::Error),

	#[error("Search routine failed: {0}")]
	Script(String),
}

impl From<EvalError> for ResolveError {
	fn from(err: EvalError) -> Self {
		match err {
			EvalError::Session(e) => ResolveError::Session(e),
			other => ResolveError::Script(other.to_string()),
		}
	}
}

/// Errors from the action executor.
#[derive(Debug, Error)]
pub enum ActionError {
	#[error("Text is empty")]
	EmptyInput,

	#[error("'{role}' is not available right now")]
	NotFound { role: String },

	#[error("Unknown role '{0}'")]
	UnknownRole(String),

	/// The action ran but the follow-up read disagrees.
	#[error("Expected {expected}, found {actual}")]
	Verification { expected: String, actual: String },

	#[error("Protocol session disconnected")]
	Disconnected,

	#[error("Timed out talking to the target")]
	Timeout,

	#[error("Script failed: {0}")]
	Script(String),
}

impl ActionError {
	pub fn code(&self) -> FailureCode {
		match self {
			ActionError::EmptyInput => FailureCode::EmptyInput,
			ActionError::NotFound { .. } => FailureCode::NotFound,
			ActionError::UnknownRole(_) => FailureCode::UnknownRole,
			ActionError::Verification { .. } => FailureCode::VerificationFailed,
			ActionError::Disconnected => FailureCode::Disconnected,
			ActionError::Timeout => FailureCode::Timeout,
			ActionError::Script(_) => FailureCode::ScriptError,
		}
	}
}

impl From<antenna_runtime::Error> for ActionError {
	fn from(err: antenna_runtime::Error) -> Self {
		if err.is_timeout() {
			ActionError::Timeout
		} else if err.is_disconnected() {
			ActionError::Disconnected
		} else {
			ActionError::Script(err.to_string())
		}
	}
}

impl From<EvalError> for ActionError {
	fn from(err: EvalError) -> Self {
		match err {
			EvalError::Session(e) => e.into(),
			other => ActionError::Script(other.to_string()),
		}
	}
}

impl From<ResolveError> for ActionError {
	fn from(err: ResolveError) -> Self {
		match err {
			ResolveError::NotFound { role } => ActionError::NotFound { role },
			ResolveError::UnknownRole(role) => ActionError::UnknownRole(role),
			ResolveError::Session(e) => e.into(),
			ResolveError::Script(message) => ActionError::Script(message),
		}
	}
}

/// Errors while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("Failed to read config {path}: {source}")]
	Read {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("Invalid config {path}: {source}")]
	Parse {
		path: PathBuf,
		#[source]
		source: serde_json::Error,
	},

	#[error("Role '{role}': invalid pattern '{pattern}': {source}")]
	InvalidPattern {
		role: String,
		pattern: String,
		#[source]
		source: regex::Error,
	},

	#[error("Invalid config: {0}")]
	Invalid(String),
}
