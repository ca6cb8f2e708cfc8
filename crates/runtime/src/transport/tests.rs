use futures_util::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::protocol::Role;

use super::*;

async fn websocket_pair() -> (TransportParts, WebSocketStream<DuplexStream>) {
	let (client_io, server_io) = tokio::io::duplex(64 * 1024);
	let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;
	let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
	(WebSocketTransport::from_stream(client), server)
}

#[tokio::test]
async fn test_websocket_send_writes_text_frame() {
	let (parts, mut server) = websocket_pair().await;
	let TransportParts { mut sender, .. } = parts;

	let request = serde_json::json!({"id": 1, "method": "Runtime.enable", "params": {}});
	sender.send(request.clone()).await.unwrap();

	match server.next().await.unwrap().unwrap() {
		WsMessage::Text(text) => {
			let received: Value = serde_json::from_str(&text).unwrap();
			assert_eq!(received, request);
		}
		other => panic!("expected text frame, got {other:?}"),
	}
}

#[tokio::test]
async fn test_websocket_receiver_forwards_frames_in_order() {
	let (parts, mut server) = websocket_pair().await;
	let TransportParts {
		receiver,
		mut message_rx,
		..
	} = parts;
	let read_task = tokio::spawn(receiver.run());

	let frames = vec![
		serde_json::json!({"id": 1, "result": {}}),
		serde_json::json!({"method": "Page.loadEventFired", "params": {"timestamp": 1.5}}),
		serde_json::json!({"id": 2, "result": {"result": {"value": 3}}}),
	];
	for frame in &frames {
		server.send(WsMessage::Text(frame.to_string())).await.unwrap();
	}

	for expected in &frames {
		assert_eq!(&message_rx.recv().await.unwrap(), expected);
	}

	server.close(None).await.unwrap();
	assert!(read_task.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_websocket_receiver_skips_garbage() {
	let (parts, mut server) = websocket_pair().await;
	let TransportParts {
		receiver,
		mut message_rx,
		..
	} = parts;
	let _read_task = tokio::spawn(receiver.run());

	server.send(WsMessage::Text("not json".into())).await.unwrap();
	server
		.send(WsMessage::Text(r#"{"id": 9, "result": {}}"#.into()))
		.await
		.unwrap();

	let received = message_rx.recv().await.unwrap();
	assert_eq!(received["id"], 9);
}

#[tokio::test]
async fn test_websocket_receiver_ends_when_peer_drops() {
	let (parts, server) = websocket_pair().await;
	let TransportParts {
		receiver,
		mut message_rx,
		..
	} = parts;
	let read_task = tokio::spawn(receiver.run());

	drop(server);

	let _ = read_task.await.unwrap();
	assert!(message_rx.recv().await.is_none());
}

#[tokio::test]
async fn test_channel_transport_round_trip() {
	let (parts, mut peer) = ChannelTransport::pair();
	let TransportParts {
		mut sender,
		receiver,
		mut message_rx,
	} = parts;
	let _read_task = tokio::spawn(receiver.run());

	sender
		.send(serde_json::json!({"id": 4, "method": "Runtime.evaluate"}))
		.await
		.unwrap();
	let request = peer.next_request().await.unwrap();
	assert_eq!(request["method"], "Runtime.evaluate");

	assert!(peer.reply(&request, serde_json::json!({"ok": true})));
	let response = message_rx.recv().await.unwrap();
	assert_eq!(response["id"], 4);
	assert_eq!(response["result"]["ok"], true);
}

#[tokio::test]
async fn test_channel_peer_disconnect_closes_message_channel() {
	let (parts, mut peer) = ChannelTransport::pair();
	let TransportParts {
		receiver,
		mut message_rx,
		..
	} = parts;
	let read_task = tokio::spawn(receiver.run());

	peer.disconnect();
	assert!(!peer.send(serde_json::json!({"id": 1})));

	read_task.await.unwrap().unwrap();
	assert!(message_rx.recv().await.is_none());
}
