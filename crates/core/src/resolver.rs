//! Element resolver.
//!
//! Resolution happens in two halves:
//!
//! 1. A scan routine runs in the page and returns plain features for every
//!    element that could plausibly be interactive (tag, ARIA role, text,
//!    attributes, size, visibility). When the caller intends to act, the
//!    scan also keeps the element references in a page-side table keyed by a
//!    scan token.
//! 2. Scoring runs here, against compiled [`CompiledRole`]s. The best element
//!    is turned into a remote object handle by looking it up in that table,
//!    and the table entry is dropped once the handles exist.
//!
//! Scoring is a weighted sum. Signal `i` of a role contributes
//! `weight(kind) * rank_decay^i`; any forbidden match, a required text
//! miss, or an element that is hidden or below the role's minimum size
//! disqualifies it. The highest score at or above the threshold wins and ties
//! go to the earliest element in document order.
//!
//! Candidates are never cached: every action scans again.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use antenna_protocol::{ResolverReport, ScoredElement};
use antenna_runtime::SessionLike;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::ResolverConfig;
use crate::error::ResolveError;
use crate::eval;
use crate::roles::{CompiledRole, CompiledSignal};

/// Collects element features; optionally stashes the elements under `token`.
const SCAN_FN: &str = r#"
/*antenna:scan*/ (token, limit, stash) => {
    const SELECTOR = [
        'button', 'a[href]', 'input', 'textarea', 'select', 'summary', 'li',
        '[role]', '[contenteditable="true"]', '[contenteditable=""]', '[tabindex]',
        '[aria-label]', '[aria-haspopup]', '[data-tooltip-id]', '[class*="cursor-pointer"]'
    ].join(', ');
    const NOT_TEXT = ['checkbox', 'radio', 'button', 'submit', 'reset', 'hidden', 'range', 'color', 'file', 'image'];
    const CLICK_TAGS = ['button', 'a', 'summary', 'option'];
    const CLICK_ROLES = ['button', 'tab', 'option', 'menuitem', 'menuitemradio', 'link', 'combobox', 'switch'];

    const clean = (s) => (s || '').replace(/\s+/g, ' ').trim();
    const nodes = Array.from(document.querySelectorAll(SELECTOR)).slice(0, limit);

    const elements = nodes.map((el, index) => {
        const rect = el.getBoundingClientRect();
        const style = window.getComputedStyle(el);
        const visible = rect.width > 0 && rect.height > 0
            && style.display !== 'none' && style.visibility !== 'hidden' && style.opacity !== '0';
        const tag = el.tagName.toLowerCase();
        const role = el.getAttribute('role');

        const attributes = {};
        for (const attr of Array.from(el.attributes)) {
            if (attr.value.length <= 200) attributes[attr.name.toLowerCase()] = attr.value;
        }
        const icons = Array.from(el.querySelectorAll('svg'))
            .map((svg) => svg.getAttribute('class') || '')
            .join(' ');
        if (clean(icons)) attributes.icon = clean(icons);
        if (typeof el.value === 'string' && el.value && !attributes.value) {
            attributes.value = el.value.slice(0, 200);
        }

        const type = (el.getAttribute('type') || '').toLowerCase();
        const editable = el.isContentEditable || tag === 'textarea'
            || (tag === 'input' && !NOT_TEXT.includes(type));
        const clickable = CLICK_TAGS.includes(tag) || CLICK_ROLES.includes(role)
            || style.cursor === 'pointer' || typeof el.onclick === 'function';

        return {
            index,
            tag,
            role,
            text: clean(el.innerText).slice(0, 200),
            attributes,
            width: rect.width,
            height: rect.height,
            visible,
            clickable,
            editable,
        };
    });

    if (stash) {
        const scans = globalThis.__antennaScans || (globalThis.__antennaScans = new Map());
        scans.set(token, nodes);
    }
    return { token, elements };
}
"#;

/// Drops a stashed scan; handles already acquired stay valid in their group.
const FORGET_FN: &str = r#"/*antenna:forget*/ (token) => {
    if (globalThis.__antennaScans) globalThis.__antennaScans.delete(token);
    return true;
}"#;

/// Features of one scanned element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementFeatures {
	/// Document order within the scan.
	pub index: usize,
	pub tag: String,
	#[serde(default)]
	pub role: Option<String>,
	#[serde(default)]
	pub text: String,
	#[serde(default)]
	pub attributes: BTreeMap<String, String>,
	#[serde(default)]
	pub width: f64,
	#[serde(default)]
	pub height: f64,
	#[serde(default)]
	pub visible: bool,
	#[serde(default)]
	pub clickable: bool,
	#[serde(default)]
	pub editable: bool,
}

const TEXT_ATTRIBUTES: [&str; 4] = ["aria-label", "title", "placeholder", "value"];

impl ElementFeatures {
	/// Lowercased text the text signals match against.
	pub fn haystack(&self) -> String {
		let mut haystack = self.text.to_lowercase();
		for name in TEXT_ATTRIBUTES {
			if let Some(value) = self.attributes.get(name) {
				haystack.push(' ');
				haystack.push_str(&value.to_lowercase());
			}
		}
		haystack
	}

	/// Short human-readable label.
	pub fn label(&self) -> String {
		let text = self.text.trim();
		let label = if !text.is_empty() {
			text
		} else {
			TEXT_ATTRIBUTES
				.iter()
				.find_map(|name| self.attributes.get(*name).map(|v| v.trim()).filter(|v| !v.is_empty()))
				.unwrap_or("")
		};
		label.chars().take(80).collect()
	}
}

/// Result of one scan routine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scan {
	pub token: String,
	pub elements: Vec<ElementFeatures>,
}

/// Score of one element for one role.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored {
	pub index: usize,
	pub score: f64,
	pub matched: Vec<String>,
	pub disqualified: Option<String>,
}

/// All scores for one role over one scan.
#[derive(Debug, Clone)]
pub struct Ranking {
	pub role: String,
	pub min_score: f64,
	pub scored: Vec<Scored>,
	/// Index of the winning element, if any cleared the threshold.
	pub chosen: Option<usize>,
}

/// A resolved element: a remote handle plus the score that selected it.
#[derive(Debug, Clone)]
pub struct Candidate {
	pub role: String,
	pub index: usize,
	pub score: f64,
	pub label: String,
	pub object_id: String,
}

fn find_fragment<'a>(fragments: &'a [String], haystack: &str) -> Option<&'a str> {
	fragments
		.iter()
		.find(|fragment| haystack.contains(fragment.as_str()))
		.map(String::as_str)
}

/// Scores `element` against `role`.
pub fn score_element(role: &CompiledRole, element: &ElementFeatures, config: &ResolverConfig) -> Scored {
	let weights = &config.weights;
	let descriptor = role.descriptor();
	let haystack = element.haystack();

	let mut score = 0.0;
	let mut matched = Vec::new();
	let mut disqualified: Option<String> = None;

	if !element.visible {
		disqualified = Some("hidden".into());
	} else if element.width < descriptor.min_width || element.height < descriptor.min_height {
		disqualified = Some(format!(
			"smaller than {}x{}",
			descriptor.min_width, descriptor.min_height
		));
	} else {
		score += weights.visibility;
		matched.push("visible".to_string());
	}

	let mut factor = 1.0;
	for signal in role.signals() {
		let contribution = match signal {
			CompiledSignal::Text { fragments, required } => match find_fragment(fragments, &haystack) {
				Some(fragment) => Some((weights.text, format!("text:{fragment}"))),
				None => {
					if *required && disqualified.is_none() {
						disqualified = Some("required text missing".into());
					}
					None
				}
			},
			CompiledSignal::ForbiddenText { fragments } => {
				if let Some(fragment) = find_fragment(fragments, &haystack) {
					disqualified = Some(format!("forbidden text '{fragment}'"));
				}
				continue;
			}
			CompiledSignal::Attribute { name, pattern } => element
				.attributes
				.get(name)
				.filter(|value| pattern.is_match(value))
				.map(|_| (weights.attribute, format!("attribute:{name}"))),
			CompiledSignal::ForbiddenAttribute { name, pattern } => {
				if element.attributes.get(name).is_some_and(|value| pattern.is_match(value)) {
					disqualified = Some(format!("forbidden attribute '{name}'"));
				}
				continue;
			}
			CompiledSignal::Tag(tags) => tags
				.iter()
				.any(|t| *t == element.tag)
				.then(|| (weights.tag, format!("tag:{}", element.tag))),
			CompiledSignal::AriaRole(roles) => element
				.role
				.as_deref()
				.filter(|r| roles.iter().any(|candidate| candidate.eq_ignore_ascii_case(r)))
				.map(|r| (weights.role, format!("role:{r}"))),
			CompiledSignal::Clickable => element
				.clickable
				.then(|| (weights.clickable, "clickable".to_string())),
			CompiledSignal::Editable => element
				.editable
				.then(|| (weights.editable, "editable".to_string())),
		};

		if let Some((weight, label)) = contribution {
			score += weight * factor;
			matched.push(label);
		}
		factor *= config.rank_decay;
	}

	Scored {
		index: element.index,
		score,
		matched,
		disqualified,
	}
}

/// Scores every element of `scan` and picks the winner.
pub fn rank(role: &CompiledRole, scan: &Scan, config: &ResolverConfig) -> Ranking {
	let min_score = role.descriptor().min_score.unwrap_or(config.min_score);
	let scored: Vec<Scored> = scan
		.elements
		.iter()
		.map(|element| score_element(role, element, config))
		.collect();

	let mut best: Option<&Scored> = None;
	for entry in &scored {
		if entry.disqualified.is_some() || entry.score < min_score {
			continue;
		}
		// Strictly greater: equal scores keep the earlier element.
		if best.is_none_or(|current| entry.score > current.score) {
			best = Some(entry);
		}
	}

	Ranking {
		role: role.name().to_string(),
		min_score,
		chosen: best.map(|entry| entry.index),
		scored,
	}
}

/// Runs scans and turns rankings into handles.
#[derive(Debug)]
pub struct Resolver {
	config: ResolverConfig,
	call_timeout: Duration,
	scans: AtomicU64,
}

impl Resolver {
	pub fn new(config: ResolverConfig, call_timeout: Duration) -> Self {
		Self {
			config,
			call_timeout,
			scans: AtomicU64::new(0),
		}
	}

	pub fn config(&self) -> &ResolverConfig {
		&self.config
	}

	/// Runs the scan routine. With `stash`, elements stay addressable for [`Self::handle`].
	pub async fn scan(&self, session: &dyn SessionLike, stash: bool) -> Result<Scan, ResolveError> {
		let token = format!("scan-{}", self.scans.fetch_add(1, Ordering::Relaxed) + 1);
		let expression = eval::invoke(
			SCAN_FN,
			&[json!(token), json!(self.config.max_elements), json!(stash)],
		);
		let value = eval::evaluate_value(session, &expression, self.call_timeout).await?;
		let mut scan: Scan = serde_json::from_value(value)
			.map_err(|e| ResolveError::Script(format!("malformed scan result: {e}")))?;
		scan.elements.sort_by_key(|element| element.index);
		tracing::trace!(target = "antenna.resolver", token = %scan.token, elements = scan.elements.len(), "scan");
		Ok(scan)
	}

	pub fn rank(&self, role: &CompiledRole, scan: &Scan) -> Ranking {
		rank(role, scan, &self.config)
	}

	/// Turns element `index` of a stashed scan into a remote handle in `group`.
	pub async fn handle(
		&self,
		session: &dyn SessionLike,
		scan: &Scan,
		index: usize,
		group: &str,
	) -> Result<Option<String>, ResolveError> {
		let expression = format!(
			"/*antenna:handle={index}*/ (() => {{ const nodes = globalThis.__antennaScans && globalThis.__antennaScans.get({token}); const el = nodes ? nodes[{index}] : null; return el && el.isConnected ? el : null; }})()",
			token = Value::String(scan.token.clone()),
		);
		Ok(eval::evaluate_handle(session, &expression, group, self.call_timeout).await?)
	}

	/// Drops the page-side table entry of a stashed scan.
	pub async fn forget(&self, session: &dyn SessionLike, scan: &Scan) {
		let expression = eval::invoke(FORGET_FN, &[json!(scan.token)]);
		if let Err(e) = eval::evaluate_value(session, &expression, self.call_timeout).await {
			tracing::debug!(target = "antenna.resolver", token = %scan.token, error = %e, "failed to drop stashed scan");
		}
	}

	/// Resolves every role from a single scan, then acquires handles.
	///
	/// Fails with [`ResolveError::NotFound`] for the first role without a
	/// winner; in that case no handle is acquired.
	pub async fn resolve_all(
		&self,
		session: &dyn SessionLike,
		roles: &[&CompiledRole],
		group: &str,
	) -> Result<Vec<Candidate>, ResolveError> {
		self.resolve_scanned(session, roles, group).await.map(|(candidates, _)| candidates)
	}

	/// [`Self::resolve_all`], also returning the scan the candidates came from.
	pub async fn resolve_scanned(
		&self,
		session: &dyn SessionLike,
		roles: &[&CompiledRole],
		group: &str,
	) -> Result<(Vec<Candidate>, Scan), ResolveError> {
		let scan = self.scan(session, true).await?;
		let result = self.acquire(session, &scan, roles, group).await;
		self.forget(session, &scan).await;
		result.map(|candidates| (candidates, scan))
	}

	async fn acquire(
		&self,
		session: &dyn SessionLike,
		scan: &Scan,
		roles: &[&CompiledRole],
		group: &str,
	) -> Result<Vec<Candidate>, ResolveError> {
		let mut chosen = Vec::with_capacity(roles.len());
		for role in roles {
			let ranking = self.rank(role, scan);
			let Some(index) = ranking.chosen else {
				tracing::debug!(target = "antenna.resolver", role = role.name(), "no candidate cleared the threshold");
				return Err(ResolveError::NotFound {
					role: role.name().to_string(),
				});
			};
			let score = ranking
				.scored
				.iter()
				.find(|entry| entry.index == index)
				.map_or(0.0, |entry| entry.score);
			chosen.push((role.name().to_string(), index, score));
		}

		let mut candidates = Vec::with_capacity(chosen.len());
		for (role, index, score) in chosen {
			let object_id = self
				.handle(session, scan, index, group)
				.await?
				.ok_or_else(|| ResolveError::NotFound { role: role.clone() })?;
			let label = scan
				.elements
				.iter()
				.find(|element| element.index == index)
				.map(ElementFeatures::label)
				.unwrap_or_default();
			tracing::debug!(target = "antenna.resolver", role = %role, index, score, label = %label, "resolved");
			candidates.push(Candidate {
				role,
				index,
				score,
				label,
				object_id,
			});
		}
		Ok(candidates)
	}

	/// Resolves one role.
	pub async fn resolve(
		&self,
		session: &dyn SessionLike,
		role: &CompiledRole,
		group: &str,
	) -> Result<Candidate, ResolveError> {
		let mut candidates = self.resolve_all(session, &[role], group).await?;
		candidates.pop().ok_or_else(|| ResolveError::NotFound {
			role: role.name().to_string(),
		})
	}

	/// Diagnostic view of a ranking; never used by the action path.
	pub async fn report(&self, session: &dyn SessionLike, role: &CompiledRole) -> Result<ResolverReport, ResolveError> {
		let scan = self.scan(session, false).await?;
		Ok(report(&self.rank(role, &scan), &scan))
	}
}

/// Builds the diagnostic report for a ranking, best scores first.
pub fn report(ranking: &Ranking, scan: &Scan) -> ResolverReport {
	let mut elements: Vec<ScoredElement> = ranking
		.scored
		.iter()
		.filter(|entry| entry.matched.len() > 1 || (entry.disqualified.is_some() && entry.score > 0.0))
		.filter_map(|entry| {
			let element = scan.elements.iter().find(|e| e.index == entry.index)?;
			Some(ScoredElement {
				index: entry.index,
				tag: element.tag.clone(),
				label: element.label(),
				score: (entry.score * 1000.0).round() / 1000.0,
				matched: entry.matched.clone(),
				disqualified: entry.disqualified.clone(),
			})
		})
		.collect();
	elements.sort_by(|a, b| b.score.total_cmp(&a.score).then(a.index.cmp(&b.index)));
	elements.truncate(50);

	ResolverReport {
		role: ranking.role.clone(),
		min_score: ranking.min_score,
		chosen: ranking.chosen,
		elements,
	}
}
