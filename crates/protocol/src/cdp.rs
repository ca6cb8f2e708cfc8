//! DevTools protocol frames.
//!
//! Every frame is a JSON object. Requests carry an `id` chosen by the client;
//! the response echoes it. Frames without an `id` are events.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Command sent to the debugged target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Correlation id, unique per session.
	pub id: u64,
	/// Domain-qualified method name, e.g. `Runtime.evaluate`.
	pub method: String,
	#[serde(default)]
	pub params: Value,
	/// Flattened child session, when commands are routed through the browser endpoint.
	#[serde(rename = "sessionId", skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Reply to a [`Request`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	pub id: u64,
	/// Success payload (mutually exclusive with `error`).
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub result: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub error: Option<ErrorPayload>,
	#[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Protocol-level error returned by the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorPayload {
	#[serde(default)]
	pub code: i64,
	pub message: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Value>,
}

/// Unsolicited notification from the target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
	pub method: String,
	#[serde(default)]
	pub params: Value,
	#[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
	pub session_id: Option<String>,
}

/// Any inbound frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Message {
	/// Has an `id` field.
	Response(Response),
	/// Has a `method` and no `id`.
	Event(Event),
	/// Forward-compatible catch-all.
	Unknown(Value),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn response_frame_parses_as_response() {
		let json = r#"{"id": 7, "result": {"result": {"type": "number", "value": 2}}}"#;
		match serde_json::from_str::<Message>(json).unwrap() {
			Message::Response(response) => {
				assert_eq!(response.id, 7);
				assert!(response.error.is_none());
				assert_eq!(response.result.unwrap()["result"]["value"], 2);
			}
			other => panic!("expected response, got {other:?}"),
		}
	}

	#[test]
	fn error_frame_keeps_code_and_message() {
		let json = r#"{"id": 3, "error": {"code": -32000, "message": "Cannot find context with specified id"}}"#;
		match serde_json::from_str::<Message>(json).unwrap() {
			Message::Response(response) => {
				let error = response.error.unwrap();
				assert_eq!(error.code, -32000);
				assert!(error.message.contains("context"));
			}
			other => panic!("expected response, got {other:?}"),
		}
	}

	#[test]
	fn event_frame_parses_as_event() {
		let json = r#"{"method": "Page.frameNavigated", "params": {"frame": {"id": "F1"}}}"#;
		match serde_json::from_str::<Message>(json).unwrap() {
			Message::Event(event) => {
				assert_eq!(event.method, "Page.frameNavigated");
				assert_eq!(event.params["frame"]["id"], "F1");
			}
			other => panic!("expected event, got {other:?}"),
		}
	}

	#[test]
	fn unknown_frame_is_kept() {
		let json = r#"{"hello": "world"}"#;
		assert!(matches!(serde_json::from_str::<Message>(json).unwrap(), Message::Unknown(_)));
	}

	#[test]
	fn request_omits_absent_session_id() {
		let request = Request {
			id: 1,
			method: "Runtime.enable".into(),
			params: serde_json::json!({}),
			session_id: None,
		};
		let value = serde_json::to_value(&request).unwrap();
		assert!(value.get("sessionId").is_none());
		assert_eq!(value["method"], "Runtime.enable");
	}
}
