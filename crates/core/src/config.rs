//! Bridge configuration.
//!
//! Loaded from a JSON file (camelCase keys). Every field has a default, so a
//! partial file (or none at all) is valid:
//!
//! ```json
//! { "locator": { "ports": [9222] }, "resolver": { "minScore": 3.0 } }
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use antenna_runtime::{LocatorOptions, SessionOptions, TargetFilter};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::roles::RoleDescriptor;

/// Complete bridge configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeConfig {
	pub locator: LocatorConfig,
	pub session: SessionConfig,
	pub capture: CaptureConfig,
	pub reconnect: ReconnectConfig,
	pub resolver: ResolverConfig,
	pub verify: VerifyConfig,
	/// Replace built-in role descriptors with the same name, or add new ones.
	pub roles: Vec<RoleDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LocatorConfig {
	pub host: String,
	/// Probed in order; the first matching port wins.
	pub ports: Vec<u16>,
	pub probe_timeout_ms: u64,
	pub filter: FilterConfig,
}

impl Default for LocatorConfig {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".into(),
			ports: vec![9000, 9001, 9002, 9003],
			probe_timeout_ms: 1500,
			filter: FilterConfig::default(),
		}
	}
}

impl LocatorConfig {
	pub fn options(&self) -> LocatorOptions {
		LocatorOptions {
			host: self.host.clone(),
			probe_timeout: Duration::from_millis(self.probe_timeout_ms),
			filter: TargetFilter {
				types: self.filter.types.clone(),
				title_contains: self.filter.title_contains.clone(),
				url_contains: self.filter.url_contains.clone(),
				exclude_url_prefixes: self.filter.exclude_url_prefixes.clone(),
			},
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterConfig {
	pub types: Vec<String>,
	pub title_contains: Vec<String>,
	pub url_contains: Vec<String>,
	pub exclude_url_prefixes: Vec<String>,
}

impl Default for FilterConfig {
	fn default() -> Self {
		Self {
			types: vec!["page".into()],
			title_contains: Vec::new(),
			url_contains: vec!["workbench".into()],
			exclude_url_prefixes: vec!["devtools://".into()],
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionConfig {
	/// Deadline for every protocol call.
	pub call_timeout_ms: u64,
	pub connect_timeout_ms: u64,
}

impl Default for SessionConfig {
	fn default() -> Self {
		Self {
			call_timeout_ms: 5000,
			connect_timeout_ms: 5000,
		}
	}
}

impl SessionConfig {
	pub fn call_timeout(&self) -> Duration {
		Duration::from_millis(self.call_timeout_ms)
	}

	pub fn options(&self) -> SessionOptions {
		SessionOptions {
			connect_timeout: Duration::from_millis(self.connect_timeout_ms),
			call_timeout: self.call_timeout(),
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureConfig {
	/// Periodic capture interval.
	pub interval_ms: u64,
	/// Candidate selectors for the observed region, tried in order.
	pub region_selectors: Vec<String>,
	pub include_styles: bool,
	/// Upper bound on collected stylesheet text.
	pub max_style_bytes: usize,
}

impl Default for CaptureConfig {
	fn default() -> Self {
		Self {
			interval_ms: 1000,
			region_selectors: vec![
				"#cascade".into(),
				"#conversation".into(),
				"[data-testid=\"conversation\"]".into(),
				".interactive-session .interactive-list".into(),
			],
			include_styles: true,
			max_style_bytes: 512 * 1024,
		}
	}
}

impl CaptureConfig {
	pub fn interval(&self) -> Duration {
		Duration::from_millis(self.interval_ms.max(50))
	}
}

/// Exponential backoff between attach attempts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectConfig {
	pub initial_delay_ms: u64,
	pub max_delay_ms: u64,
	pub multiplier: f64,
	/// Failed attempts after which health reports degraded. Retries continue.
	pub max_retries: u32,
}

impl Default for ReconnectConfig {
	fn default() -> Self {
		Self {
			initial_delay_ms: 500,
			max_delay_ms: 10_000,
			multiplier: 2.0,
			max_retries: 10,
		}
	}
}

/// Per-signal weights used when scoring elements.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Weights {
	pub text: f64,
	pub attribute: f64,
	pub tag: f64,
	pub role: f64,
	pub clickable: f64,
	pub editable: f64,
	pub visibility: f64,
}

impl Default for Weights {
	fn default() -> Self {
		Self {
			text: 3.0,
			attribute: 2.0,
			tag: 1.0,
			role: 1.0,
			clickable: 1.0,
			editable: 2.0,
			visibility: 0.5,
		}
	}
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResolverConfig {
	pub weights: Weights,
	/// Multiplier applied per position in a role's signal list.
	pub rank_decay: f64,
	/// Elements scoring below this are never chosen.
	pub min_score: f64,
	/// Cap on elements collected per scan.
	pub max_elements: usize,
}

impl Default for ResolverConfig {
	fn default() -> Self {
		Self {
			weights: Weights::default(),
			rank_decay: 0.9,
			min_score: 2.5,
			max_elements: 2000,
		}
	}
}

/// Post-action verification polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VerifyConfig {
	pub attempts: u32,
	pub delay_ms: u64,
}

impl Default for VerifyConfig {
	fn default() -> Self {
		Self {
			attempts: 5,
			delay_ms: 150,
		}
	}
}

impl VerifyConfig {
	pub fn delay(&self) -> Duration {
		Duration::from_millis(self.delay_ms)
	}
}

impl BridgeConfig {
	/// Default config file location (`~/.config/antenna/config.json` on Linux).
	pub fn default_path() -> Option<PathBuf> {
		dirs::config_dir().map(|dir| dir.join("antenna").join("config.json"))
	}

	/// Reads `path`.
	pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
		let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;
		let config: Self = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})?;
		config.validate()?;
		Ok(config)
	}

	/// Loads `explicit` if given, else the default path if it exists, else defaults.
	pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
		if let Some(path) = explicit {
			return Self::from_file(path);
		}
		match Self::default_path() {
			Some(path) if path.is_file() => {
				tracing::debug!(target = "antenna.config", path = %path.display(), "loading config");
				Self::from_file(&path)
			}
			_ => Ok(Self::default()),
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.locator.ports.is_empty() {
			return Err(ConfigError::Invalid("locator.ports must not be empty".into()));
		}
		if self.reconnect.initial_delay_ms == 0 {
			return Err(ConfigError::Invalid("reconnect.initialDelayMs must be > 0".into()));
		}
		if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
			return Err(ConfigError::Invalid(
				"reconnect.maxDelayMs must be >= reconnect.initialDelayMs".into(),
			));
		}
		if self.reconnect.multiplier < 1.0 {
			return Err(ConfigError::Invalid("reconnect.multiplier must be >= 1.0".into()));
		}
		if self.session.call_timeout_ms == 0 {
			return Err(ConfigError::Invalid("session.callTimeoutMs must be > 0".into()));
		}
		if self.session.connect_timeout_ms == 0 {
			return Err(ConfigError::Invalid("session.connectTimeoutMs must be > 0".into()));
		}
		if self.verify.attempts == 0 {
			return Err(ConfigError::Invalid("verify.attempts must be >= 1".into()));
		}
		if !(0.0..=1.0).contains(&self.resolver.rank_decay) {
			return Err(ConfigError::Invalid("resolver.rankDecay must be within 0..=1".into()));
		}
		if self.capture.region_selectors.is_empty() {
			return Err(ConfigError::Invalid("capture.regionSelectors must not be empty".into()));
		}
		Ok(())
	}
}
