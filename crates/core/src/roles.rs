//! Semantic role descriptors.
//!
//! A role names what an element is *for* ("send-button") instead of where it
//! lives in the markup. Each descriptor carries an ordered list of signals;
//! earlier signals weigh more (see [`crate::resolver`]). Descriptors are
//! plain serde data so they can be overridden from the config file, and are
//! compiled once into [`CompiledRole`] (lowercased fragments, built regexes).

use std::collections::BTreeMap;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ResolveError};

pub const CHAT_INPUT: &str = "chat-input";
pub const SEND_BUTTON: &str = "send-button";
pub const STOP_BUTTON: &str = "stop-button";
pub const MODE_SELECTOR: &str = "mode-selector";
pub const MODEL_SELECTOR: &str = "model-selector";
pub const AGENT_TAB: &str = "agent-tab";

/// One heuristic signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Signal {
	/// Visible text, aria-label, title or placeholder contains one of the fragments.
	#[serde(rename_all = "camelCase")]
	Text {
		any_of: Vec<String>,
		/// Elements without a match are disqualified.
		#[serde(default)]
		required: bool,
	},
	/// Any match disqualifies.
	#[serde(rename_all = "camelCase")]
	ForbiddenText { any_of: Vec<String> },
	/// Attribute value matches a (case-insensitive) regex. `icon` is the
	/// class list of SVG icons inside the element.
	Attribute { name: String, pattern: String },
	/// Any match disqualifies.
	ForbiddenAttribute { name: String, pattern: String },
	/// Lowercase tag name is one of these.
	#[serde(rename_all = "camelCase")]
	Tag { any_of: Vec<String> },
	/// Explicit ARIA role is one of these.
	#[serde(rename_all = "camelCase")]
	AriaRole { any_of: Vec<String> },
	/// Looks like something you click (button, link, pointer cursor, click handler).
	Clickable,
	/// Accepts text input.
	Editable,
}

/// A semantic role and how to recognize it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleDescriptor {
	pub name: String,
	#[serde(default, skip_serializing_if = "String::is_empty")]
	pub description: String,
	/// Highest-ranked first.
	pub signals: Vec<Signal>,
	/// Minimum rendered size in CSS pixels.
	#[serde(default = "default_min_size")]
	pub min_width: f64,
	#[serde(default = "default_min_size")]
	pub min_height: f64,
	/// Overrides the resolver's global threshold.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub min_score: Option<f64>,
}

fn default_min_size() -> f64 {
	4.0
}

impl RoleDescriptor {
	fn new(name: &str, description: &str, signals: Vec<Signal>) -> Self {
		Self {
			name: name.into(),
			description: description.into(),
			signals,
			min_width: default_min_size(),
			min_height: default_min_size(),
			min_score: None,
		}
	}
}

fn text(fragments: &[&str]) -> Signal {
	Signal::Text {
		any_of: fragments.iter().map(|s| s.to_string()).collect(),
		required: false,
	}
}

fn required_text(fragments: &[&str]) -> Signal {
	Signal::Text {
		any_of: fragments.iter().map(|s| s.to_string()).collect(),
		required: true,
	}
}

fn forbidden_text(fragments: &[&str]) -> Signal {
	Signal::ForbiddenText {
		any_of: fragments.iter().map(|s| s.to_string()).collect(),
	}
}

fn attribute(name: &str, pattern: &str) -> Signal {
	Signal::Attribute {
		name: name.into(),
		pattern: pattern.into(),
	}
}

fn forbidden_attribute(name: &str, pattern: &str) -> Signal {
	Signal::ForbiddenAttribute {
		name: name.into(),
		pattern: pattern.into(),
	}
}

fn tag(tags: &[&str]) -> Signal {
	Signal::Tag {
		any_of: tags.iter().map(|s| s.to_string()).collect(),
	}
}

fn aria_role(roles: &[&str]) -> Signal {
	Signal::AriaRole {
		any_of: roles.iter().map(|s| s.to_string()).collect(),
	}
}

/// Descriptors shipped with the bridge.
pub fn builtin_descriptors() -> Vec<RoleDescriptor> {
	vec![
		RoleDescriptor::new(
			CHAT_INPUT,
			"Message composer of the agent panel",
			vec![
				Signal::Editable,
				attribute("placeholder", "ask|message|prompt|chat|anything"),
				attribute("aria-label", "ask|message|prompt|chat|input"),
				tag(&["textarea", "div"]),
				forbidden_attribute("class", "monaco|xterm|inputarea|search|find"),
				forbidden_attribute("type", "^(checkbox|radio|search|hidden)$"),
			],
		),
		RoleDescriptor::new(
			SEND_BUTTON,
			"Submits the composed message",
			vec![
				attribute("aria-label", "^send|submit"),
				text(&["send", "submit"]),
				attribute("icon", "arrow-(up|right)|send"),
				Signal::Clickable,
				tag(&["button"]),
				forbidden_text(&["stop", "cancel"]),
				forbidden_attribute("aria-label", "stop|cancel"),
			],
		),
		RoleDescriptor::new(
			STOP_BUTTON,
			"Cancels the running generation; only present while busy",
			vec![
				attribute("aria-label", "stop|cancel"),
				text(&["stop generating", "stop", "cancel"]),
				attribute("icon", "square|stop|circle-stop"),
				Signal::Clickable,
				tag(&["button"]),
				forbidden_text(&["send"]),
				forbidden_attribute("aria-label", "^send"),
			],
		),
		RoleDescriptor::new(
			MODE_SELECTOR,
			"Shows and changes the conversation mode",
			vec![
				required_text(&["planning", "fast", "mode"]),
				attribute("aria-label", "mode"),
				attribute("aria-haspopup", "."),
				Signal::Clickable,
				aria_role(&["button", "combobox"]),
				tag(&["button"]),
				forbidden_attribute("role", "^(option|menuitem|menuitemradio)$"),
			],
		),
		RoleDescriptor::new(
			MODEL_SELECTOR,
			"Shows and changes the active model",
			vec![
				required_text(&["gemini", "claude", "gpt", "sonnet", "opus", "model"]),
				attribute("aria-label", "model"),
				attribute("aria-haspopup", "."),
				Signal::Clickable,
				aria_role(&["button", "combobox"]),
				tag(&["button"]),
				forbidden_text(&["send", "stop"]),
				forbidden_attribute("role", "^(option|menuitem|menuitemradio)$"),
			],
		),
		RoleDescriptor::new(
			AGENT_TAB,
			"Tab that opens the agent panel",
			vec![
				required_text(&["agent"]),
				aria_role(&["tab"]),
				attribute("class", "tab"),
				Signal::Clickable,
			],
		),
	]
}

/// Descriptor for one entry of an open mode or model menu.
///
/// Built per call since the label is only known at call time. Elements that
/// open a popup are excluded so the selector itself (which shows the current
/// label) is never mistaken for the option.
pub fn option_descriptor(kind: &str, label: &str) -> RoleDescriptor {
	let mut descriptor = RoleDescriptor::new(
		&format!("{kind}-option"),
		"Entry of an open selection menu",
		vec![
			Signal::Text {
				any_of: vec![label.to_string()],
				required: true,
			},
			aria_role(&["option", "menuitem", "menuitemradio", "listitem"]),
			attribute("class", "option|item|cursor-pointer"),
			Signal::Clickable,
			forbidden_attribute("aria-haspopup", "."),
			forbidden_attribute("aria-expanded", "."),
		],
	);
	descriptor.min_score = Some(3.0);
	descriptor
}

/// A signal ready for scoring.
#[derive(Debug, Clone)]
pub enum CompiledSignal {
	Text { fragments: Vec<String>, required: bool },
	ForbiddenText { fragments: Vec<String> },
	Attribute { name: String, pattern: Regex },
	ForbiddenAttribute { name: String, pattern: Regex },
	Tag(Vec<String>),
	AriaRole(Vec<String>),
	Clickable,
	Editable,
}

/// A descriptor with its patterns compiled.
#[derive(Debug, Clone)]
pub struct CompiledRole {
	descriptor: RoleDescriptor,
	signals: Vec<CompiledSignal>,
}

fn lowercase_all(values: &[String]) -> Vec<String> {
	values
		.iter()
		.map(|v| v.trim().to_lowercase())
		.filter(|v| !v.is_empty())
		.collect()
}

impl CompiledRole {
	pub fn compile(descriptor: RoleDescriptor) -> Result<Self, ConfigError> {
		let build = |pattern: &str| {
			RegexBuilder::new(pattern)
				.case_insensitive(true)
				.build()
				.map_err(|source| ConfigError::InvalidPattern {
					role: descriptor.name.clone(),
					pattern: pattern.to_string(),
					source,
				})
		};

		let mut signals = Vec::with_capacity(descriptor.signals.len());
		for signal in &descriptor.signals {
			let compiled = match signal {
				Signal::Text { any_of, required } => CompiledSignal::Text {
					fragments: lowercase_all(any_of),
					required: *required,
				},
				Signal::ForbiddenText { any_of } => CompiledSignal::ForbiddenText {
					fragments: lowercase_all(any_of),
				},
				Signal::Attribute { name, pattern } => CompiledSignal::Attribute {
					name: name.to_lowercase(),
					pattern: build(pattern)?,
				},
				Signal::ForbiddenAttribute { name, pattern } => CompiledSignal::ForbiddenAttribute {
					name: name.to_lowercase(),
					pattern: build(pattern)?,
				},
				Signal::Tag { any_of } => CompiledSignal::Tag(lowercase_all(any_of)),
				Signal::AriaRole { any_of } => CompiledSignal::AriaRole(lowercase_all(any_of)),
				Signal::Clickable => CompiledSignal::Clickable,
				Signal::Editable => CompiledSignal::Editable,
			};
			signals.push(compiled);
		}

		Ok(Self { descriptor, signals })
	}

	pub fn name(&self) -> &str {
		&self.descriptor.name
	}

	pub fn descriptor(&self) -> &RoleDescriptor {
		&self.descriptor
	}

	pub fn signals(&self) -> &[CompiledSignal] {
		&self.signals
	}

	/// Copy of this role that additionally requires `text`, ranked first.
	pub fn narrowed(&self, text: &str) -> Self {
		let mut narrowed = self.clone();
		narrowed.signals.insert(
			0,
			CompiledSignal::Text {
				fragments: vec![text.trim().to_lowercase()],
				required: true,
			},
		);
		narrowed.descriptor.signals.insert(
			0,
			Signal::Text {
				any_of: vec![text.to_string()],
				required: true,
			},
		);
		narrowed
	}
}

/// All known roles, by name.
#[derive(Debug, Clone)]
pub struct RoleRegistry {
	roles: BTreeMap<String, CompiledRole>,
}

impl RoleRegistry {
	/// Built-in roles with `overrides` applied (same name replaces, new name adds).
	pub fn new(overrides: &[RoleDescriptor]) -> Result<Self, ConfigError> {
		let mut roles = BTreeMap::new();
		for descriptor in builtin_descriptors().into_iter().chain(overrides.iter().cloned()) {
			let compiled = CompiledRole::compile(descriptor)?;
			roles.insert(compiled.name().to_string(), compiled);
		}
		Ok(Self { roles })
	}

	pub fn get(&self, name: &str) -> Option<&CompiledRole> {
		self.roles.get(name)
	}

	pub fn require(&self, name: &str) -> Result<&CompiledRole, ResolveError> {
		self.get(name)
			.ok_or_else(|| ResolveError::UnknownRole(name.to_string()))
	}

	pub fn iter(&self) -> impl Iterator<Item = &CompiledRole> {
		self.roles.values()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn builtins_compile() {
		let registry = RoleRegistry::new(&[]).unwrap();
		for name in [CHAT_INPUT, SEND_BUTTON, STOP_BUTTON, MODE_SELECTOR, MODEL_SELECTOR, AGENT_TAB] {
			assert!(registry.get(name).is_some(), "missing builtin {name}");
		}
	}

	#[test]
	fn override_replaces_builtin_and_adds_new() {
		let custom = RoleDescriptor::new(SEND_BUTTON, "", vec![text(&["go"])]);
		let extra = RoleDescriptor::new("history-button", "", vec![text(&["history"]), Signal::Clickable]);
		let registry = RoleRegistry::new(&[custom, extra]).unwrap();

		assert_eq!(registry.get(SEND_BUTTON).unwrap().signals().len(), 1);
		assert!(registry.get("history-button").is_some());
	}

	#[test]
	fn invalid_pattern_names_role() {
		let broken = RoleDescriptor::new("broken", "", vec![attribute("class", "(unclosed")]);
		let err = RoleRegistry::new(&[broken]).unwrap_err();
		assert!(matches!(err, ConfigError::InvalidPattern { ref role, .. } if role == "broken"));
	}

	#[test]
	fn unknown_role_is_reported() {
		let registry = RoleRegistry::new(&[]).unwrap();
		assert!(matches!(
			registry.require("launch-button"),
			Err(ResolveError::UnknownRole(name)) if name == "launch-button"
		));
	}

	#[test]
	fn descriptors_deserialize_from_config_json() {
		let json = r#"{
			"name": "history-button",
			"signals": [
				{"kind": "text", "anyOf": ["History"], "required": true},
				{"kind": "attribute", "name": "aria-label", "pattern": "history"},
				{"kind": "clickable"}
			],
			"minScore": 2
		}"#;
		let descriptor: RoleDescriptor = serde_json::from_str(json).unwrap();
		assert_eq!(descriptor.signals.len(), 3);
		assert_eq!(descriptor.min_width, 4.0);
		assert_eq!(descriptor.min_score, Some(2.0));
	}

	#[test]
	fn narrowing_prepends_required_text() {
		let registry = RoleRegistry::new(&[]).unwrap();
		let narrowed = registry.get(AGENT_TAB).unwrap().narrowed("Review");
		match &narrowed.signals()[0] {
			CompiledSignal::Text { fragments, required } => {
				assert_eq!(fragments, &vec!["review".to_string()]);
				assert!(*required);
			}
			other => panic!("expected text signal, got {other:?}"),
		}
	}
}
