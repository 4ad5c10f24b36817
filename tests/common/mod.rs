#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::routing::post;
use kar_sidecar::Config;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// A request as seen by the stand-in application.
#[derive(Debug, Clone)]
pub struct Received {
	pub path: &'static str,
	pub content_type: Option<String>,
	pub body: String,
}

/// Serves a small application on a free loopback port.
///
/// `/quote` answers `{"price":42}`, `/record` accepts anything, `/broken`
/// fails with 500 and `/stall` never answers. Every request is reported on
/// the returned channel.
pub async fn spawn_app() -> (SocketAddr, mpsc::UnboundedReceiver<Received>) {
	let (tx, rx) = mpsc::unbounded_channel();

	fn seen(path: &'static str, headers: &HeaderMap, body: &Bytes) -> Received {
		Received {
			path,
			content_type: headers
				.get("content-type")
				.and_then(|value| value.to_str().ok())
				.map(str::to_string),
			body: String::from_utf8_lossy(body).into_owned(),
		}
	}

	let app = Router::new()
		.route(
			"/quote",
			post(
				|State(tx): State<mpsc::UnboundedSender<Received>>, headers: HeaderMap, body: Bytes| async move {
					let _ = tx.send(seen("/quote", &headers, &body));
					r#"{"price":42}"#
				},
			),
		)
		.route(
			"/record",
			post(
				|State(tx): State<mpsc::UnboundedSender<Received>>, headers: HeaderMap, body: Bytes| async move {
					let _ = tx.send(seen("/record", &headers, &body));
					"recorded"
				},
			),
		)
		.route(
			"/broken",
			post(
				|State(tx): State<mpsc::UnboundedSender<Received>>, headers: HeaderMap, body: Bytes| async move {
					let _ = tx.send(seen("/broken", &headers, &body));
					(StatusCode::INTERNAL_SERVER_ERROR, "boom")
				},
			),
		)
		.route(
			"/stall",
			post(
				|State(tx): State<mpsc::UnboundedSender<Received>>, headers: HeaderMap, body: Bytes| async move {
					let _ = tx.send(seen("/stall", &headers, &body));
					tokio::time::sleep(Duration::from_secs(3600)).await;
					"too late"
				},
			),
		)
		.with_state(tx);

	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		axum::serve(listener, app).await.unwrap();
	});
	(addr, rx)
}

/// A loopback address nothing listens on.
pub async fn dead_addr() -> SocketAddr {
	let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
	listener.local_addr().unwrap()
}

pub fn config(service: &str, sidecar: &str, app: SocketAddr) -> Config {
	Config {
		service: service.to_string(),
		sidecar: Some(sidecar.to_string()),
		runtime_port: 0,
		app_port: app.port(),
		app_host: app.ip().to_string(),
		call_timeout_ms: None,
		app_timeout_ms: Some(2_000),
		log: "info".to_string(),
		command: Vec::new(),
	}
}

pub async fn within<F: std::future::Future>(future: F) -> F::Output {
	tokio::time::timeout(Duration::from_secs(5), future)
		.await
		.expect("timed out")
}
