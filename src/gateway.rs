//! HTTP front door of the sidecar.
//!
//! The wrapped application reaches other services through `/kar/*`, and
//! operators and peer sidecars use `/v1/system/*`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header::ACCEPT;
use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;

use crate::correlation::CorrelationTable;
use crate::dispatcher::Dispatcher;
use crate::envelope::Envelope;
use crate::envelope::LocalRequest;
use crate::envelope::RequestId;
use crate::error::GatewayError;
use crate::error::StoreError;
use crate::error::StoreResultExt as _;
use crate::placement::Instances;
use crate::placement::PlacementDirectory;
use crate::shutdown::Shutdown;
use crate::shutdown::ShutdownCause;
use crate::store::Store;
use crate::transport::Transport;

const JSON: &str = "application/json";
const TEXT: &str = "text/plain";

/// Everything the request handlers share.
pub struct GatewayState {
	pub sidecar: String,
	pub transport: Arc<dyn Transport>,
	pub store: Arc<dyn Store>,
	pub placement: PlacementDirectory,
	pub correlation: Arc<CorrelationTable>,
	pub dispatcher: Arc<Dispatcher>,
	pub shutdown: Shutdown,
	pub call_timeout: Option<Duration>,
}

pub type Gateway = Arc<GatewayState>;

pub fn router(state: Gateway) -> Router {
	Router::new()
		.route("/kar/post/{service}/{*path}", post(post_message))
		.route("/kar/call/{service}/{*path}", post(call_service))
		.route("/kar/set/{key}", post(set_key))
		.route("/kar/get/{key}", get(get_key))
		.route("/kar/del/{key}", get(del_key))
		.route("/v1/system/shutdown", post(shutdown))
		.route("/v1/system/health", get(health))
		.route("/v1/system/information/{component}", get(information))
		.route("/v1/system/post", post(peer_post))
		.with_state(state)
}

fn header(headers: &HeaderMap, name: axum::http::HeaderName) -> Option<String> {
	headers
		.get(name)
		.and_then(|value| value.to_str().ok())
		.map(str::to_string)
}

fn local_request(path: String, headers: &HeaderMap, body: &Bytes) -> LocalRequest {
	LocalRequest {
		path: format!("/{path}"),
		content_type: header(headers, CONTENT_TYPE),
		accept: header(headers, ACCEPT),
		payload: String::from_utf8_lossy(body).into_owned(),
	}
}

/// POST /kar/post/{service}/{*path} - fire-and-forget send.
async fn post_message(
	State(gateway): State<Gateway>,
	Path((service, path)): Path<(String, String)>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<&'static str, GatewayError> {
	let envelope = Envelope::Post(local_request(path, &headers, &body));
	gateway
		.transport
		.send(&service, &envelope)
		.await
		.map_err(|source| GatewayError::Send { service, source })?;
	Ok("OK")
}

/// POST /kar/call/{service}/{*path} - send and wait for the reply.
async fn call_service(
	State(gateway): State<Gateway>,
	Path((service, path)): Path<(String, String)>,
	headers: HeaderMap,
	body: Bytes,
) -> Result<String, GatewayError> {
	let id = RequestId::generate();
	let pending = gateway.correlation.register(id.clone());

	let envelope = Envelope::Call {
		request: local_request(path, &headers, &body),
		origin: gateway.sidecar.clone(),
		id,
	};
	gateway
		.transport
		.send(&service, &envelope)
		.await
		.map_err(|source| GatewayError::Send { service, source })?;

	let reply = pending.wait(&gateway.shutdown, gateway.call_timeout).await?;
	Ok(reply)
}

/// POST /kar/set/{key}
async fn set_key(
	State(gateway): State<Gateway>,
	Path(key): Path<String>,
	body: Bytes,
) -> Result<&'static str, GatewayError> {
	let value = String::from_utf8_lossy(&body);
	let result = gateway.store.set(&key, &value).await;
	match result {
		Ok(()) => Ok("OK"),
		Err(source) => Err(GatewayError::Store {
			op: "set",
			key,
			source,
		}),
	}
}

/// GET /kar/get/{key}
async fn get_key(State(gateway): State<Gateway>, Path(key): Path<String>) -> Result<String, GatewayError> {
	let result = gateway.store.get(&key).await.optional();
	match result {
		Ok(Some(value)) => Ok(value),
		Ok(None) => Err(GatewayError::NotFound),
		Err(source) => Err(GatewayError::Store {
			op: "get",
			key,
			source,
		}),
	}
}

/// GET /kar/del/{key}
async fn del_key(State(gateway): State<Gateway>, Path(key): Path<String>) -> Result<&'static str, GatewayError> {
	let result = gateway.store.del(&key).await;
	match result {
		Ok(()) => Ok("OK"),
		Err(source) => Err(GatewayError::Store {
			op: "delete",
			key,
			source,
		}),
	}
}

/// POST /v1/system/shutdown
async fn shutdown(State(gateway): State<Gateway>) -> &'static str {
	tracing::info!("Shutting down in response to shutdown request");
	gateway.shutdown.trigger(ShutdownCause::Requested);
	"OK"
}

/// GET /v1/system/health
async fn health() -> &'static str {
	"OK"
}

/// POST /v1/system/post - envelope sent directly by a peer sidecar.
async fn peer_post(State(gateway): State<Gateway>, body: Bytes) -> (StatusCode, &'static str) {
	if let Err(err) = gateway.dispatcher.process(&body).await {
		tracing::error!("Ignoring message posted by peer: {err}");
	}
	(StatusCode::ACCEPTED, "OK")
}

/// GET /v1/system/information/{component}
async fn information(
	State(gateway): State<Gateway>,
	Path(component): Path<String>,
	headers: HeaderMap,
) -> Result<Response, GatewayError> {
	let format = match header(&headers, ACCEPT).as_deref() {
		Some(JSON) => JSON,
		_ => TEXT,
	};

	let data: Result<String, StoreError> = match component.as_str() {
		"sidecars" | "Sidecars" => gateway
			.placement
			.sidecars()
			.await
			.map(|sidecars| format_sidecars(&sidecars, format)),
		"actors" | "Actors" => gateway
			.placement
			.all_instances("")
			.await
			.map(|instances| format_instances(&instances, format)),
		"sidecar_actors" => gateway
			.placement
			.instances_owned_by(&gateway.sidecar)
			.await
			.map(|instances| format_instances(&instances, format)),
		_ => return Err(GatewayError::InvalidComponent(component.clone())),
	};

	match data {
		Ok(data) => Ok(([(CONTENT_TYPE, format)], data).into_response()),
		Err(source) => Err(GatewayError::Information { component, source }),
	}
}

fn format_sidecars(sidecars: &BTreeMap<String, String>, format: &str) -> String {
	if format == JSON {
		return serde_json::to_string(sidecars).unwrap_or_default();
	}
	sidecars
		.iter()
		.map(|(sidecar, service)| format!("{sidecar}: {service}\n"))
		.collect()
}

fn format_instances(instances: &Instances, format: &str) -> String {
	if format == JSON {
		return serde_json::to_string(instances).unwrap_or_default();
	}
	instances
		.iter()
		.map(|(actor_type, ids)| {
			let ids: Vec<&str> = ids.iter().map(String::as_str).collect();
			format!("{actor_type}: [{}]\n", ids.join(", "))
		})
		.collect()
}
