//! Helpers for evaluating routines in the target's page context.
//!
//! Every routine the bridge injects starts with an `/*antenna:...*/` marker
//! comment, which shows up in the target's DevTools when debugging and lets
//! scripted sessions recognize the call.

use std::time::Duration;

use antenna_runtime::SessionLike;
use serde_json::{Value, json};

use crate::error::EvalError;

fn exception_text(details: &Value) -> String {
	details
		.get("exception")
		.and_then(|e| e.get("description"))
		.or_else(|| details.get("text"))
		.and_then(Value::as_str)
		.unwrap_or("JavaScript exception")
		.to_string()
}

fn check_exception(response: &Value) -> Result<(), EvalError> {
	match response.get("exceptionDetails") {
		Some(details) => Err(EvalError::Exception(exception_text(details))),
		None => Ok(()),
	}
}

/// Evaluates `expression` and returns its JSON value.
pub async fn evaluate_value(
	session: &dyn SessionLike,
	expression: &str,
	timeout: Duration,
) -> Result<Value, EvalError> {
	let response = session
		.call(
			"Runtime.evaluate",
			json!({
				"expression": expression,
				"returnByValue": true,
				"awaitPromise": true,
			}),
			timeout,
		)
		.await?;
	check_exception(&response)?;
	Ok(response["result"].get("value").cloned().unwrap_or(Value::Null))
}

/// Evaluates `expression` and returns a remote object id in `group`, or
/// `None` when the expression yields `null`/`undefined`.
pub async fn evaluate_handle(
	session: &dyn SessionLike,
	expression: &str,
	group: &str,
	timeout: Duration,
) -> Result<Option<String>, EvalError> {
	let response = session
		.call(
			"Runtime.evaluate",
			json!({
				"expression": expression,
				"returnByValue": false,
				"objectGroup": group,
			}),
			timeout,
		)
		.await?;
	check_exception(&response)?;

	let result = &response["result"];
	if result["subtype"] == "null" || result["type"] == "undefined" {
		return Ok(None);
	}
	match result.get("objectId").and_then(Value::as_str) {
		Some(id) => Ok(Some(id.to_string())),
		None => Err(EvalError::Malformed(format!("expected an object handle, got {result}"))),
	}
}

/// Calls `function` with `this` bound to `object_id` and returns its JSON value.
pub async fn call_function_on(
	session: &dyn SessionLike,
	object_id: &str,
	function: &str,
	arguments: &[Value],
	timeout: Duration,
) -> Result<Value, EvalError> {
	let arguments: Vec<Value> = arguments.iter().map(|value| json!({ "value": value })).collect();
	let response = session
		.call(
			"Runtime.callFunctionOn",
			json!({
				"objectId": object_id,
				"functionDeclaration": function,
				"arguments": arguments,
				"returnByValue": true,
				"awaitPromise": true,
			}),
			timeout,
		)
		.await?;
	check_exception(&response)?;
	Ok(response["result"].get("value").cloned().unwrap_or(Value::Null))
}

/// Releases every handle in `group`. Failures are logged, not returned.
pub async fn release_object_group(session: &dyn SessionLike, group: &str, timeout: Duration) {
	if let Err(e) = session
		.call("Runtime.releaseObjectGroup", json!({ "objectGroup": group }), timeout)
		.await
	{
		tracing::debug!(target = "antenna.eval", group, error = %e, "failed to release object group");
	}
}

/// Formats a JS function call `(source)(args...)` with JSON-encoded arguments.
pub fn invoke(source: &str, args: &[Value]) -> String {
	let args: Vec<String> = args.iter().map(Value::to_string).collect();
	format!("({})({})", source.trim(), args.join(", "))
}
