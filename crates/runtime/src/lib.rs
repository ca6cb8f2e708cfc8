//! Antenna runtime: target discovery and protocol sessions.
//!
//! - **Locator**: probes DevTools HTTP endpoints for a matching target
//! - **Transport**: WebSocket (and in-memory) frame transports
//! - **Session**: request-id multiplexing, per-call timeouts, event stream
//!
//! ```text
//! TargetLocator ──> Target ──> Session::attach ──> SessionLike
//!                                  │
//!                         WebSocketTransport
//! ```

pub mod error;
pub mod locator;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use locator::{LocatorOptions, TargetFilter, TargetLocator};
pub use session::{
	EventPredicate, EventStream, ProtocolEvent, Session, SessionFuture, SessionLike, SessionOptions,
};
pub use transport::{
	ChannelPeer, ChannelTransport, Transport, TransportParts, TransportReceiver, WebSocketTransport,
};
