//! Snapshot engine.
//!
//! The capture routine locates the observed region, clones it and
//! serializes the clone; the live node tree is only queried, never read
//! for content or modified. Stylesheet text is collected alongside so a
//! remote renderer can reproduce the look.
//!
//! Captures are single-flight: while one is running, every other caller
//! awaits the same future and receives the same `Arc<Snapshot>`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use antenna_protocol::SnapshotResponse;
use antenna_runtime::SessionLike;
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};

use crate::clock::now_ms;
use crate::config::CaptureConfig;
use crate::error::CaptureError;
use crate::eval;
use crate::store::StateStore;

const CAPTURE_FN: &str = r#"
/*antenna:capture*/ (selectors, includeStyles, maxStyleBytes) => {
    let region = null;
    for (const selector of selectors) {
        try {
            region = document.querySelector(selector);
        } catch (e) {
            region = null;
        }
        if (region) break;
    }
    if (!region) return { status: 'none' };

    const copy = region.cloneNode(true);
    for (const node of Array.from(copy.querySelectorAll('script, noscript, template'))) {
        node.remove();
    }
    for (const node of Array.from(copy.querySelectorAll('[contenteditable]'))) {
        node.removeAttribute('contenteditable');
    }

    let styles = null;
    if (includeStyles) {
        const parts = [];
        let size = 0;
        collect: for (const sheet of Array.from(document.styleSheets)) {
            let rules;
            try {
                rules = sheet.cssRules;
            } catch (e) {
                continue;
            }
            for (const rule of Array.from(rules || [])) {
                const text = rule.cssText;
                if (size + text.length > maxStyleBytes) break collect;
                parts.push(text);
                size += text.length + 1;
            }
        }
        styles = parts.join('\n');
    }

    return { status: 'ok', html: copy.outerHTML, styles };
}
"#;

#[derive(Debug, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum CaptureOutcome {
	Ok { html: String, styles: Option<String> },
	None,
}

/// Hex sha-256 over the serialized region and styles.
pub fn content_hash(html: &str, styles: Option<&str>) -> String {
	let mut hasher = Sha256::new();
	hasher.update(html.as_bytes());
	hasher.update([0u8]);
	if let Some(styles) = styles {
		hasher.update(styles.as_bytes());
	}
	format!("{:x}", hasher.finalize())
}

/// One captured state of the observed region. Immutable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
	pub html: String,
	pub styles: Option<String>,
	pub hash: String,
	pub captured_at_ms: u64,
}

impl Snapshot {
	pub fn new(html: String, styles: Option<String>) -> Self {
		let hash = content_hash(&html, styles.as_deref());
		Self {
			html,
			styles,
			hash,
			captured_at_ms: now_ms(),
		}
	}

	pub fn to_response(&self) -> SnapshotResponse {
		SnapshotResponse::Ready {
			hash: self.hash.clone(),
			captured_at_ms: self.captured_at_ms,
			html: self.html.clone(),
			styles: self.styles.clone(),
		}
	}
}

type CaptureResult = Result<Arc<Snapshot>, CaptureError>;
type SharedCapture = Shared<BoxFuture<'static, CaptureResult>>;

struct Inner {
	config: CaptureConfig,
	call_timeout: Duration,
	store: Arc<StateStore>,
	generation: AtomicU64,
	in_flight: Mutex<Option<(u64, SharedCapture)>>,
}

impl Inner {
	async fn run_capture(&self, session: &dyn SessionLike) -> Result<Snapshot, CaptureError> {
		let expression = eval::invoke(
			CAPTURE_FN,
			&[
				json!(self.config.region_selectors),
				json!(self.config.include_styles),
				json!(self.config.max_style_bytes),
			],
		);
		let value = eval::evaluate_value(session, &expression, self.call_timeout).await?;
		let outcome: CaptureOutcome = serde_json::from_value(value)
			.map_err(|e| CaptureError::Script(format!("malformed capture result: {e}")))?;
		match outcome {
			CaptureOutcome::Ok { html, styles } => Ok(Snapshot::new(html, styles)),
			CaptureOutcome::None => Err(CaptureError::NoActiveRegion),
		}
	}

	fn finish(&self, generation: u64) {
		let mut slot = self.in_flight.lock();
		if slot.as_ref().is_some_and(|(current, _)| *current == generation) {
			*slot = None;
		}
	}
}

/// Captures snapshots and records them in the [`StateStore`].
#[derive(Clone)]
pub struct SnapshotEngine {
	inner: Arc<Inner>,
}

impl SnapshotEngine {
	pub fn new(config: CaptureConfig, call_timeout: Duration, store: Arc<StateStore>) -> Self {
		Self {
			inner: Arc::new(Inner {
				config,
				call_timeout,
				store,
				generation: AtomicU64::new(0),
				in_flight: Mutex::new(None),
			}),
		}
	}

	/// Captures the observed region, joining a capture already in flight.
	///
	/// The result is recorded in the store before any caller sees it, so a
	/// change event is published at most once per capture.
	pub async fn capture(&self, session: Arc<dyn SessionLike>) -> CaptureResult {
		let shared = {
			let mut slot = self.inner.in_flight.lock();
			match slot.as_ref() {
				Some((_, in_flight)) => {
					tracing::trace!(target = "antenna.snapshot", "joining capture in flight");
					in_flight.clone()
				}
				None => {
					let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;
					let inner = self.inner.clone();
					let capture = async move {
						let result = match inner.run_capture(session.as_ref()).await {
							Ok(snapshot) => Ok(inner.store.record_snapshot(snapshot)),
							Err(CaptureError::NoActiveRegion) => {
								inner.store.record_no_region();
								Err(CaptureError::NoActiveRegion)
							}
							Err(e) => {
								tracing::debug!(target = "antenna.snapshot", error = %e, "capture failed");
								Err(e)
							}
						};
						inner.finish(generation);
						result
					}
					.boxed()
					.shared();
					*slot = Some((generation, capture.clone()));
					capture
				}
			}
		};
		shared.await
	}

	pub fn store(&self) -> &Arc<StateStore> {
		&self.inner.store
	}
}

#[cfg(test)]
mod tests {
	use antenna_protocol::{ChangeScope, PushEvent};

	use super::*;
	use crate::notifier::ChangeNotifier;
	use crate::testing::{FakePage, FakeSession};

	fn engine() -> (SnapshotEngine, crate::notifier::Subscription) {
		let notifier = ChangeNotifier::new();
		let subscription = notifier.subscribe();
		let store = Arc::new(StateStore::new(notifier));
		(
			SnapshotEngine::new(CaptureConfig::default(), Duration::from_secs(1), store),
			subscription,
		)
	}

	#[test]
	fn styles_participate_in_hash() {
		assert_ne!(content_hash("<p/>", None), content_hash("<p/>", Some("p{color:red}")));
		assert_eq!(content_hash("<p/>", Some("")), content_hash("<p/>", None));
		assert_eq!(content_hash("abc", None).len(), 64);
	}

	#[tokio::test]
	async fn concurrent_captures_share_one_evaluation() {
		let (engine, _events) = engine();
		let fake = FakeSession::new(FakePage::with_region("<div>hi</div>"));
		fake.set_capture_delay(Duration::from_millis(50));
		let session: Arc<dyn SessionLike> = Arc::new(fake.clone());

		let captures = (0..8).map(|_| engine.capture(session.clone()));
		let results = futures::future::join_all(captures).await;

		assert_eq!(fake.capture_count(), 1);
		let first = results[0].as_ref().unwrap();
		for result in &results {
			assert!(Arc::ptr_eq(first, result.as_ref().unwrap()));
		}
	}

	#[tokio::test]
	async fn sequential_captures_each_evaluate() {
		let (engine, _events) = engine();
		let fake = FakeSession::new(FakePage::with_region("<div>hi</div>"));
		let session: Arc<dyn SessionLike> = Arc::new(fake.clone());

		let a = engine.capture(session.clone()).await.unwrap();
		let b = engine.capture(session.clone()).await.unwrap();
		assert_eq!(fake.capture_count(), 2);
		assert!(Arc::ptr_eq(&a, &b));
	}

	#[tokio::test]
	async fn unchanged_then_changed_content_publishes_once() {
		let (engine, mut events) = engine();
		let fake = FakeSession::new(FakePage::with_region("H1"));
		let session: Arc<dyn SessionLike> = Arc::new(fake.clone());

		engine.capture(session.clone()).await.unwrap();
		engine.capture(session.clone()).await.unwrap();
		assert_eq!(events.try_recv(), None);

		fake.page().region = Some(("H2".into(), None));
		engine.capture(session.clone()).await.unwrap();
		assert_eq!(events.try_recv(), Some(PushEvent::changed(ChangeScope::Snapshot)));
		assert_eq!(events.try_recv(), None);
	}

	#[tokio::test]
	async fn missing_region_is_reported() {
		let (engine, _events) = engine();
		let fake = FakeSession::new(FakePage::default());
		let session: Arc<dyn SessionLike> = Arc::new(fake);

		assert!(matches!(
			engine.capture(session).await,
			Err(CaptureError::NoActiveRegion)
		));
	}

	#[tokio::test]
	async fn disconnected_session_fails_capture() {
		let (engine, _events) = engine();
		let fake = FakeSession::new(FakePage::with_region("<p/>"));
		fake.disconnect();
		let session: Arc<dyn SessionLike> = Arc::new(fake);

		assert!(matches!(
			engine.capture(session).await,
			Err(CaptureError::Disconnected)
		));
		assert!(engine.store().latest_snapshot().is_none());
	}
}
