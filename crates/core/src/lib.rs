//! Antenna: mirrors a remote-debuggable application window and drives it
//! with a handful of remote commands.
//!
//! - **Snapshot engine**: clones and serializes the observed region, content-hashed
//! - **Resolver**: scores scanned elements against semantic [`roles`]
//! - **Executor**: send, stop, mode/model selection, remote click
//! - **Notifier**: fans out `changed` events; payloads are pulled
//! - **Bridge**: reconnect supervisor and the query/command surface
//!
//! ```text
//! Connector ──> SessionLike ──┬─> SnapshotEngine ──┐
//!                             ├─> Resolver ─> Executor
//!                             └─> state read ──────┴─> StateStore ─> ChangeNotifier
//! ```

pub mod backoff;
pub mod bridge;
mod clock;
pub mod config;
pub mod error;
pub mod eval;
pub mod executor;
pub mod notifier;
pub mod resolver;
pub mod roles;
pub mod snapshot;
pub mod state;
pub mod store;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::{Bridge, CdpConnector, Connector};
pub use config::BridgeConfig;
pub use error::{ActionError, CaptureError, ConfigError, ResolveError};
pub use executor::{Executor, Selection};
pub use notifier::{ChangeNotifier, Subscription};
pub use resolver::{Candidate, Resolver};
pub use roles::{RoleDescriptor, RoleRegistry, Signal};
pub use snapshot::{Snapshot, SnapshotEngine};
pub use store::StateStore;
