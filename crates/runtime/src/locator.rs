//! Target discovery over the DevTools HTTP endpoint.
//!
//! Each candidate port is asked for `/json/list`; the first port that answers
//! with a well-formed list containing an entry accepted by the
//! [`TargetFilter`] wins. Probe order is the order of the port list, so ties
//! go to the earlier (normally lower) port.

use std::time::Duration;

use antenna_protocol::{Target, TargetInfo};

use crate::error::{Error, Result};

/// Which entries of a target list are acceptable.
///
/// Empty lists impose no constraint. Substring checks are case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct TargetFilter {
	/// Accepted `type` values (e.g. `page`).
	pub types: Vec<String>,
	/// The title must contain one of these.
	pub title_contains: Vec<String>,
	/// The URL must contain one of these.
	pub url_contains: Vec<String>,
	/// Entries whose URL starts with one of these are skipped.
	pub exclude_url_prefixes: Vec<String>,
}

impl TargetFilter {
	pub fn matches(&self, info: &TargetInfo) -> bool {
		if !self.types.is_empty() && !self.types.iter().any(|t| t == &info.kind) {
			return false;
		}
		if self
			.exclude_url_prefixes
			.iter()
			.any(|prefix| info.url.starts_with(prefix.as_str()))
		{
			return false;
		}
		contains_any(&info.title, &self.title_contains) && contains_any(&info.url, &self.url_contains)
	}
}

fn contains_any(haystack: &str, needles: &[String]) -> bool {
	if needles.is_empty() {
		return true;
	}
	let haystack = haystack.to_lowercase();
	needles
		.iter()
		.any(|needle| haystack.contains(&needle.to_lowercase()))
}

/// Locator settings.
#[derive(Debug, Clone)]
pub struct LocatorOptions {
	pub host: String,
	pub probe_timeout: Duration,
	pub filter: TargetFilter,
}

impl Default for LocatorOptions {
	fn default() -> Self {
		Self {
			host: "127.0.0.1".into(),
			probe_timeout: Duration::from_millis(1500),
			filter: TargetFilter::default(),
		}
	}
}

/// Finds the debuggable target among a set of candidate ports.
#[derive(Debug, Clone)]
pub struct TargetLocator {
	client: reqwest::Client,
	options: LocatorOptions,
}

impl TargetLocator {
	pub fn new(options: LocatorOptions) -> Result<Self> {
		let client = reqwest::Client::builder()
			.timeout(options.probe_timeout)
			.no_proxy()
			.build()?;
		Ok(Self { client, options })
	}

	pub fn options(&self) -> &LocatorOptions {
		&self.options
	}

	/// Probes `ports` in order and returns the first matching target.
	///
	/// Unreachable ports and malformed lists are skipped. Fails with
	/// [`Error::NoTargetFound`] when nothing matches.
	pub async fn locate(&self, ports: &[u16]) -> Result<Target> {
		for &port in ports {
			let entries = match self.probe(port).await {
				Ok(entries) => entries,
				Err(e) => {
					tracing::debug!(target = "antenna.locator", port, error = %e, "probe failed");
					continue;
				}
			};

			let selected = entries
				.iter()
				.filter(|info| self.options.filter.matches(info))
				.find_map(|info| Target::from_info(info, port));

			match selected {
				Some(target) => {
					tracing::debug!(
						target = "antenna.locator",
						port,
						id = %target.id,
						title = %target.title,
						"target selected"
					);
					return Ok(target);
				}
				None => {
					tracing::debug!(
						target = "antenna.locator",
						port,
						entries = entries.len(),
						"no matching target"
					);
				}
			}
		}

		Err(Error::NoTargetFound {
			probed: ports.to_vec(),
		})
	}

	/// Fetches the raw target list from one port.
	pub async fn probe(&self, port: u16) -> Result<Vec<TargetInfo>> {
		let url = format!("http://{}:{}/json/list", self.options.host, port);
		let response = self.client.get(&url).send().await?.error_for_status()?;
		Ok(response.json::<Vec<TargetInfo>>().await?)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn info(kind: &str, title: &str, url: &str) -> TargetInfo {
		TargetInfo {
			id: title.into(),
			title: title.into(),
			kind: kind.into(),
			url: url.into(),
			web_socket_debugger_url: Some("ws://127.0.0.1:9000/devtools/page/x".into()),
		}
	}

	fn editor_filter() -> TargetFilter {
		TargetFilter {
			types: vec!["page".into()],
			title_contains: vec![],
			url_contains: vec!["workbench".into()],
			exclude_url_prefixes: vec!["devtools://".into()],
		}
	}

	#[test]
	fn filter_accepts_workbench_page() {
		let filter = editor_filter();
		assert!(filter.matches(&info("page", "project", "vscode-file://vscode-app/out/Workbench.html")));
	}

	#[test]
	fn filter_rejects_wrong_type_and_devtools() {
		let filter = editor_filter();
		assert!(!filter.matches(&info("service_worker", "sw", "vscode-file://workbench.js")));
		assert!(!filter.matches(&info("page", "DevTools", "devtools://devtools/bundled/workbench.html")));
		assert!(!filter.matches(&info("page", "blank", "about:blank")));
	}

	#[test]
	fn empty_filter_accepts_anything() {
		assert!(TargetFilter::default().matches(&info("iframe", "", "")));
	}

	#[tokio::test]
	async fn unreachable_ports_yield_no_target_found() {
		// Port 1 is privileged and never serves a debugger.
		let locator = TargetLocator::new(LocatorOptions {
			probe_timeout: Duration::from_millis(200),
			..LocatorOptions::default()
		})
		.unwrap();

		match locator.locate(&[1]).await {
			Err(Error::NoTargetFound { probed }) => assert_eq!(probed, vec![1]),
			other => panic!("expected NoTargetFound, got {other:?}"),
		}
	}
}
