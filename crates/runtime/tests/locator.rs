//! End-to-end discovery: probe a port range served by fake DevTools endpoints,
//! then attach to the selected target over a real WebSocket.

use std::net::SocketAddr;
use std::time::Duration;

use antenna_runtime::{Error, LocatorOptions, Session, SessionOptions, TargetFilter, TargetLocator};
use axum::Json;
use axum::Router;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::routing::get;
use serde_json::{Value, json};
use tokio::net::TcpListener;

fn editor_filter() -> TargetFilter {
	TargetFilter {
		types: vec!["page".into()],
		title_contains: vec![],
		url_contains: vec!["workbench".into()],
		exclude_url_prefixes: vec!["devtools://".into()],
	}
}

fn locator() -> TargetLocator {
	TargetLocator::new(LocatorOptions {
		host: "127.0.0.1".into(),
		probe_timeout: Duration::from_millis(500),
		filter: editor_filter(),
	})
	.unwrap()
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	listener.local_addr().unwrap().port()
}

async fn answer_protocol(mut socket: WebSocket) {
	while let Some(Ok(message)) = socket.recv().await {
		let Message::Text(text) = message else {
			continue;
		};
		let request: Value = serde_json::from_str(text.as_str()).unwrap();
		let result = match request["method"].as_str() {
			Some("Runtime.evaluate") => json!({"result": {"type": "number", "value": 42}}),
			_ => json!({}),
		};
		let reply = json!({"id": request["id"], "result": result});
		if socket.send(Message::Text(reply.to_string().into())).await.is_err() {
			break;
		}
	}
}

/// Serves `/json/list` with the given entries (`{port}` in URLs is replaced) and
/// a protocol endpoint under `/devtools/page/{id}`.
async fn fake_endpoint(entries: Value) -> SocketAddr {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	let body: Value =
		serde_json::from_str(&entries.to_string().replace("{port}", &addr.port().to_string())).unwrap();

	let app = Router::new()
		.route(
			"/json/list",
			get(move || {
				let body = body.clone();
				async move { Json(body) }
			}),
		)
		.route(
			"/devtools/page/{id}",
			get(|ws: WebSocketUpgrade| async move { ws.on_upgrade(answer_protocol) }),
		);
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	addr
}

fn page(id: &str, title: &str, url: &str) -> Value {
	json!({
		"id": id,
		"title": title,
		"type": "page",
		"url": url,
		"webSocketDebuggerUrl": format!("ws://127.0.0.1:{{port}}/devtools/page/{id}"),
	})
}

#[tokio::test]
async fn attaches_to_the_only_port_with_a_matching_target() {
	let unreachable = closed_port().await;
	let devtools_only = fake_endpoint(json!([page(
		"D1",
		"DevTools",
		"devtools://devtools/bundled/workbench.html"
	)]))
	.await;
	let editor = fake_endpoint(json!([
		{"id": "W1", "title": "worker", "type": "service_worker", "url": "vscode-file://workbench.js"},
		page("E1", "project - Editor", "vscode-file://vscode-app/out/workbench.html"),
	]))
	.await;
	let later = closed_port().await;

	let ports = [unreachable, devtools_only.port(), editor.port(), later];
	let target = locator().locate(&ports).await.unwrap();
	assert_eq!(target.port, editor.port());
	assert_eq!(target.id, "E1");

	let session = Session::attach(target, SessionOptions::default()).await.unwrap();
	assert!(session.is_connected());

	let result = session
		.call(
			"Runtime.evaluate",
			json!({"expression": "6*7", "returnByValue": true}),
			Duration::from_secs(2),
		)
		.await
		.unwrap();
	assert_eq!(result["result"]["value"], 42);
	session.close();
}

#[tokio::test]
async fn first_matching_port_in_probe_order_wins() {
	let first = fake_endpoint(json!([page("A", "a", "vscode-file://workbench.html")])).await;
	let second = fake_endpoint(json!([page("B", "b", "vscode-file://workbench.html")])).await;

	let target = locator().locate(&[first.port(), second.port()]).await.unwrap();
	assert_eq!(target.id, "A");

	let target = locator().locate(&[second.port(), first.port()]).await.unwrap();
	assert_eq!(target.id, "B");
}

#[tokio::test]
async fn malformed_list_is_skipped() {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let broken = listener.local_addr().unwrap();
	let app = Router::new().route("/json/list", get(|| async { "<html>not a list</html>" }));
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	let good = fake_endpoint(json!([page("G", "g", "vscode-file://workbench.html")])).await;

	let target = locator().locate(&[broken.port(), good.port()]).await.unwrap();
	assert_eq!(target.id, "G");
}

#[tokio::test]
async fn no_match_anywhere_reports_probed_ports() {
	let website = fake_endpoint(json!([page("X", "x", "https://example.com/")])).await;
	let unreachable = closed_port().await;

	match locator().locate(&[website.port(), unreachable]).await {
		Err(Error::NoTargetFound { probed }) => assert_eq!(probed, vec![website.port(), unreachable]),
		other => panic!("expected NoTargetFound, got {other:?}"),
	}
}
