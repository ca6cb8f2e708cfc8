//! Error types for target discovery and protocol sessions.

use thiserror::Error;

/// Result type alias for runtime operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while locating, attaching to, or talking to a target.
#[derive(Debug, Error)]
pub enum Error {
	/// Every candidate endpoint was unreachable or advertised no matching target.
	#[error("No debuggable target found (probed ports: {probed:?})")]
	NoTargetFound { probed: Vec<u16> },

	/// The session's transport closed while the call was outstanding, or before it was sent.
	#[error("Protocol session disconnected")]
	Disconnected,

	/// No response arrived within the caller's deadline.
	#[error("Timeout after {timeout_ms}ms waiting for '{method}'")]
	Timeout { method: String, timeout_ms: u64 },

	/// Failed to open the WebSocket to the target.
	#[error("Failed to connect to target: {0}")]
	ConnectionFailed(String),

	/// Transport-level error (WebSocket read/write).
	#[error("Transport error: {0}")]
	TransportError(String),

	/// Malformed or unexpected frame.
	#[error("Protocol error: {0}")]
	ProtocolError(String),

	/// Error reported by the target for a specific call.
	#[error("Remote error {code}: {message}")]
	Remote { code: i64, message: String },

	/// I/O error.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// JSON serialization/deserialization error.
	#[error("JSON error: {0}")]
	Json(#[from] serde_json::Error),

	/// Discovery request failed.
	#[error("HTTP error: {0}")]
	Http(#[from] reqwest::Error),
}

impl Error {
	/// Returns true if this is a timeout error.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Error::Timeout { .. })
	}

	/// Returns true if the session is gone and the caller should wait for a reattach.
	pub fn is_disconnected(&self) -> bool {
		matches!(
			self,
			Error::Disconnected | Error::TransportError(_) | Error::ConnectionFailed(_)
		)
	}
}
