//! Reads the mode/model/busy triple from one resolver scan.

use antenna_protocol::AppState;
use antenna_runtime::SessionLike;

use crate::error::ResolveError;
use crate::resolver::{Resolver, Scan};
use crate::roles::{MODE_SELECTOR, MODEL_SELECTOR, RoleRegistry, STOP_BUTTON};

/// Derives [`AppState`] from an existing scan.
///
/// `busy` is the presence of the stop button; mode and model are the
/// labels of their selectors.
pub fn state_from_scan(resolver: &Resolver, roles: &RoleRegistry, scan: &Scan) -> Result<AppState, ResolveError> {
	let label_of = |name: &str| -> Result<Option<String>, ResolveError> {
		let role = roles.require(name)?;
		let label = resolver.rank(role, scan).chosen.and_then(|index| {
			scan.elements
				.iter()
				.find(|element| element.index == index)
				.map(|element| element.label())
				.filter(|label| !label.is_empty())
		});
		Ok(label)
	};

	let stop = roles.require(STOP_BUTTON)?;
	Ok(AppState {
		mode: label_of(MODE_SELECTOR)?,
		model: label_of(MODEL_SELECTOR)?,
		busy: resolver.rank(stop, scan).chosen.is_some(),
	})
}

/// Scans the page (without keeping handles) and reads the current state.
pub async fn read_state(
	session: &dyn SessionLike,
	resolver: &Resolver,
	roles: &RoleRegistry,
) -> Result<AppState, ResolveError> {
	let scan = resolver.scan(session, false).await?;
	let state = state_from_scan(resolver, roles, &scan)?;
	tracing::trace!(target = "antenna.state", ?state, "read state");
	Ok(state)
}
