//! HTTP and WebSocket surface over a [`Bridge`].
//!
//! Every route except `/health` requires the shared secret, given as a bearer
//! token, an `x-antenna-secret` header, or a `secret` query parameter (the
//! last one is what browsers use for `/ws`). Command routes always answer
//! `200` with a [`CommandResult`]; the failure code lives in the body.

use std::sync::Arc;

use anyhow::{Context, Result};
use antenna_core::{ActionError, Bridge, Subscription};
use antenna_protocol::{
	ClickRequest, CommandResult, FailureCode, HealthReport, ResolverReport, SelectRequest,
	SendRequest, SnapshotResponse, StateResponse,
};
use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, Request, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, info};

pub const SECRET_HEADER: &str = "x-antenna-secret";

#[derive(Clone)]
struct ServerState {
	bridge: Arc<Bridge>,
	secret: Option<Arc<str>>,
	shutdown: watch::Receiver<bool>,
}

/// Builds the router. `secret: None` disables the check.
pub fn router(bridge: Arc<Bridge>, secret: Option<String>, shutdown: watch::Receiver<bool>) -> Router {
	let state = ServerState {
		bridge,
		secret: secret.map(Arc::from),
		shutdown,
	};

	Router::new()
		.route("/snapshot", get(snapshot))
		.route("/snapshot/refresh", post(refresh))
		.route("/state", get(app_state))
		.route("/send", post(send))
		.route("/stop", post(stop))
		.route("/mode", post(set_mode))
		.route("/model", post(set_model))
		.route("/click", post(click))
		.route("/debug/resolve/{role}", get(debug_resolve))
		.route("/ws", get(changes))
		.route_layer(middleware::from_fn_with_state(state.clone(), require_secret))
		.route("/health", get(health))
		.with_state(state)
}

/// Serves `app` until `shutdown` flips to `true`.
pub async fn serve(listener: TcpListener, app: Router, mut shutdown: watch::Receiver<bool>) -> Result<()> {
	let addr = listener.local_addr().context("Failed to read listener address")?;
	info!(target = "antenna.http", %addr, "serving");
	axum::serve(listener, app)
		.with_graceful_shutdown(async move {
			let _ = shutdown.wait_for(|stop| *stop).await;
		})
		.await
		.context("HTTP server error")
}

async fn require_secret(State(state): State<ServerState>, request: Request, next: Next) -> Response {
	let Some(expected) = state.secret.as_deref() else {
		return next.run(request).await;
	};
	let presented = presented_secret(request.headers(), request.uri().query());
	match presented {
		Some(given) if constant_time_eq(given.as_bytes(), expected.as_bytes()) => next.run(request).await,
		_ => {
			debug!(target = "antenna.http", path = %request.uri().path(), "rejected request without valid secret");
			(
				StatusCode::UNAUTHORIZED,
				Json(CommandResult::failure(FailureCode::Unauthorized, "missing or invalid secret")),
			)
				.into_response()
		}
	}
}

fn presented_secret(headers: &HeaderMap, query: Option<&str>) -> Option<String> {
	if let Some(token) = headers
		.get(header::AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.and_then(|v| v.strip_prefix("Bearer "))
	{
		return Some(token.trim().to_string());
	}
	if let Some(value) = headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok()) {
		return Some(value.to_string());
	}
	query.and_then(|q| {
		url::form_urlencoded::parse(q.as_bytes())
			.find(|(key, _)| key == "secret")
			.map(|(_, value)| value.into_owned())
	})
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	if a.len() != b.len() {
		return false;
	}
	a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

async fn health(State(state): State<ServerState>) -> Json<HealthReport> {
	Json(state.bridge.health())
}

async fn snapshot(State(state): State<ServerState>) -> Json<SnapshotResponse> {
	Json(state.bridge.snapshot())
}

async fn refresh(State(state): State<ServerState>) -> Json<SnapshotResponse> {
	Json(state.bridge.refresh().await)
}

async fn app_state(State(state): State<ServerState>) -> Json<StateResponse> {
	Json(state.bridge.state())
}

async fn send(State(state): State<ServerState>, Json(body): Json<SendRequest>) -> Json<CommandResult> {
	Json(state.bridge.send(&body.text).await)
}

async fn stop(State(state): State<ServerState>) -> Json<CommandResult> {
	Json(state.bridge.stop().await)
}

async fn set_mode(State(state): State<ServerState>, Json(body): Json<SelectRequest>) -> Json<CommandResult> {
	Json(state.bridge.set_mode(&body.name).await)
}

async fn set_model(State(state): State<ServerState>, Json(body): Json<SelectRequest>) -> Json<CommandResult> {
	Json(state.bridge.set_model(&body.name).await)
}

async fn click(State(state): State<ServerState>, Json(body): Json<ClickRequest>) -> Json<CommandResult> {
	Json(state.bridge.remote_click(&body.role, body.text.as_deref()).await)
}

async fn debug_resolve(
	State(state): State<ServerState>,
	Path(role): Path<String>,
) -> Result<Json<ResolverReport>, (StatusCode, Json<CommandResult>)> {
	state.bridge.debug_resolve(&role).await.map(Json).map_err(|e| {
		let status = match e {
			ActionError::UnknownRole(_) => StatusCode::NOT_FOUND,
			ActionError::Disconnected => StatusCode::SERVICE_UNAVAILABLE,
			_ => StatusCode::INTERNAL_SERVER_ERROR,
		};
		(status, Json(CommandResult::failure(e.code(), e.to_string())))
	})
}

async fn changes(State(state): State<ServerState>, ws: WebSocketUpgrade) -> Response {
	let subscription = state.bridge.subscribe();
	let shutdown = state.shutdown.clone();
	ws.on_upgrade(move |socket| forward_changes(socket, subscription, shutdown))
}

/// Pushes `changed` events to one client until it leaves or the server stops.
async fn forward_changes(mut socket: WebSocket, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
	debug!(target = "antenna.http", "change subscriber connected");
	loop {
		tokio::select! {
			event = subscription.recv() => {
				let Some(event) = event else { break };
				let payload = match serde_json::to_string(&event) {
					Ok(payload) => payload,
					Err(_) => continue,
				};
				if socket.send(Message::Text(payload.into())).await.is_err() {
					break;
				}
			}
			incoming = socket.recv() => {
				match incoming {
					Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
					Some(Ok(_)) => {}
				}
			}
			_ = async { shutdown.wait_for(|stop| *stop).await.map(|_| ()) } => {
				let _ = socket.send(Message::Close(None)).await;
				break;
			}
		}
	}
	debug!(target = "antenna.http", "change subscriber disconnected");
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bearer_takes_precedence() {
		let mut headers = HeaderMap::new();
		headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
		headers.insert(SECRET_HEADER, "def".parse().unwrap());
		assert_eq!(presented_secret(&headers, Some("secret=ghi")).as_deref(), Some("abc"));
	}

	#[test]
	fn query_secret_is_decoded() {
		let headers = HeaderMap::new();
		assert_eq!(
			presented_secret(&headers, Some("x=1&secret=a%20b")).as_deref(),
			Some("a b")
		);
		assert_eq!(presented_secret(&headers, Some("x=1")), None);
		assert_eq!(presented_secret(&headers, None), None);
	}

	#[test]
	fn secret_comparison() {
		assert!(constant_time_eq(b"123456", b"123456"));
		assert!(!constant_time_eq(b"123456", b"123457"));
		assert!(!constant_time_eq(b"12345", b"123456"));
	}
}
