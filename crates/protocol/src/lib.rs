//! Wire types for the antenna remote-debugging bridge.
//!
//! Two audiences share this crate:
//!
//! - [`cdp`] and [`target`] describe what travels between the bridge and the
//!   debugged application (DevTools protocol frames and the `/json/list`
//!   discovery document).
//! - [`api`] describes what the bridge exposes to its observers: query
//!   responses, command results and push events.
//!
//! No I/O happens here; every type is plain serde data.

pub mod api;
pub mod cdp;
pub mod target;

pub use api::{
	AppState, AttemptOutcome, ChangeScope, ClickRequest, CommandResult, FailureCode, HealthReport,
	PushEvent, ResolverReport, ScoredElement, SelectRequest, SendRequest, SnapshotResponse,
	StateResponse, TargetSummary,
};
pub use cdp::{ErrorPayload, Event, Message, Request, Response};
pub use target::{Target, TargetInfo};
