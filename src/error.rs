use std::time::Duration;

use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::Response;

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
	#[error("Transport is closed")]
	Closed,

	#[error("Failed to encode envelope: {0}")]
	Encode(#[from] serde_json::Error),

	#[error("Transport unavailable: {0}")]
	Unavailable(String),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
	/// The key does not exist.
	#[error("Key does not exist")]
	Nil,

	#[error("Store unavailable: {0}")]
	Unavailable(String),

	#[error("Invalid key segment {0:?}")]
	InvalidKey(String),
}

pub trait StoreResultExt<T> {
	/// Turns a "key does not exist" report into `None`.
	fn optional(self) -> Result<Option<T>, StoreError>;
}

impl<T> StoreResultExt<T> for Result<T, StoreError> {
	fn optional(self) -> Result<Option<T>, StoreError> {
		match self {
			Ok(value) => Ok(Some(value)),
			Err(StoreError::Nil) => Ok(None),
			Err(err) => Err(err),
		}
	}
}

/// Why a pending call ended without a reply.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
	#[error("Sidecar is shutting down")]
	ShuttingDown,

	#[error("Reply timed out after {timeout:?}")]
	TimedOut { timeout: Duration },

	#[error("Reply channel was dropped")]
	Abandoned,
}

/// Failures visible to local HTTP callers of the gateway.
#[derive(thiserror::Error, Debug)]
pub enum GatewayError {
	#[error("failed to send message to service {service}: {source}")]
	Send {
		service: String,
		source: TransportError,
	},

	#[error("failed to {op} key {key}: {source}")]
	Store {
		op: &'static str,
		key: String,
		source: StoreError,
	},

	#[error("Not Found")]
	NotFound,

	#[error(transparent)]
	Call(#[from] CallError),

	#[error("Invalid information query: {0}")]
	InvalidComponent(String),

	#[error("Failed to acquire {component} information: {source}")]
	Information {
		component: String,
		source: StoreError,
	},
}

impl GatewayError {
	pub fn status(&self) -> StatusCode {
		match self {
			GatewayError::Send { .. } => StatusCode::INTERNAL_SERVER_ERROR,
			GatewayError::Store { .. } => StatusCode::INTERNAL_SERVER_ERROR,
			GatewayError::NotFound => StatusCode::NOT_FOUND,
			GatewayError::Call(CallError::TimedOut { .. }) => StatusCode::GATEWAY_TIMEOUT,
			GatewayError::Call(_) => StatusCode::SERVICE_UNAVAILABLE,
			GatewayError::InvalidComponent(_) => StatusCode::BAD_REQUEST,
			GatewayError::Information { .. } => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}
}

impl IntoResponse for GatewayError {
	fn into_response(self) -> Response {
		let status = self.status();
		let body = match &self {
			// callers only learn that the sidecar is going away
			GatewayError::Call(CallError::ShuttingDown | CallError::Abandoned) => {
				"Service Unavailable".to_string()
			}
			GatewayError::Call(CallError::TimedOut { .. }) => "Gateway Timeout".to_string(),
			other => other.to_string(),
		};
		(status, body).into_response()
	}
}
