//! Debuggable targets as advertised by the `/json/list` discovery endpoint.

use serde::{Deserialize, Serialize};

/// One entry of the `/json/list` document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetInfo {
	pub id: String,
	#[serde(default)]
	pub title: String,
	#[serde(rename = "type", default)]
	pub kind: String,
	#[serde(default)]
	pub url: String,
	/// Absent when another debugger client is already attached.
	#[serde(default)]
	pub web_socket_debugger_url: Option<String>,
}

/// A selected target, ready to attach to.
///
/// Discovered once, never mutated, discarded on disconnect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Target {
	pub id: String,
	pub title: String,
	pub url: String,
	/// Debugger port the target was found on.
	pub port: u16,
	/// WebSocket address of the target's protocol endpoint.
	pub ws_url: String,
}

impl Target {
	/// Builds a target from a discovery entry, if the entry is attachable.
	pub fn from_info(info: &TargetInfo, port: u16) -> Option<Self> {
		let ws_url = info.web_socket_debugger_url.clone()?;
		Some(Self {
			id: info.id.clone(),
			title: info.title.clone(),
			url: info.url.clone(),
			port,
			ws_url,
		})
	}
}
