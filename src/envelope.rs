use std::fmt;
use std::fmt::Display;

use serde::Deserialize;
use serde::Serialize;

/// Globally unique identifier linking a `call` to its `reply`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
	/// A fresh id, never handed out twice.
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().urn().to_string())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for RequestId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for RequestId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// A request to be replayed against the local application.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LocalRequest {
	pub path: String,
	pub content_type: Option<String>,
	pub accept: Option<String>,
	pub payload: String,
}

/// The unit exchanged between sidecars.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
	/// Fire-and-forget delivery to the destination application.
	Post(LocalRequest),
	/// Request whose response must be sent back to `origin` under `id`.
	Call {
		request: LocalRequest,
		origin: String,
		id: RequestId,
	},
	/// Response to an earlier `Call`.
	Reply { id: RequestId, payload: String },
}

#[derive(thiserror::Error, Debug)]
pub enum DecodeError {
	#[error("Invalid envelope: {0}")]
	Malformed(#[from] serde_json::Error),

	#[error("Envelope of kind {kind} is missing field {field}")]
	MissingField {
		kind: &'static str,
		field: &'static str,
	},

	#[error("Envelope has no kind")]
	MissingKind,

	#[error("Unknown envelope kind {0}")]
	UnknownKind(String),
}

/// Flat form used on the wire; absent keys are not applicable to the kind.
#[derive(Debug, Default, Serialize, Deserialize)]
struct WireEnvelope {
	#[serde(default, skip_serializing_if = "Option::is_none")]
	kind: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	path: Option<String>,
	#[serde(
		rename = "content-type",
		default,
		skip_serializing_if = "Option::is_none"
	)]
	content_type: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	accept: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	origin: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	id: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	payload: Option<String>,
}

impl Envelope {
	pub fn kind(&self) -> &'static str {
		match self {
			Envelope::Post(_) => "post",
			Envelope::Call { .. } => "call",
			Envelope::Reply { .. } => "reply",
		}
	}

	pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
		serde_json::to_vec(&self.to_wire())
	}

	pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
		let wire: WireEnvelope = serde_json::from_slice(bytes)?;
		Self::from_wire(wire)
	}

	fn to_wire(&self) -> WireEnvelope {
		let mut wire = WireEnvelope {
			kind: Some(self.kind().to_string()),
			..Default::default()
		};
		match self {
			Envelope::Post(request) => fill_request(&mut wire, request),
			Envelope::Call {
				request,
				origin,
				id,
			} => {
				fill_request(&mut wire, request);
				wire.origin = Some(origin.clone());
				wire.id = Some(id.to_string());
			}
			Envelope::Reply { id, payload } => {
				wire.id = Some(id.to_string());
				wire.payload = Some(payload.clone());
			}
		}
		wire
	}

	fn from_wire(wire: WireEnvelope) -> Result<Self, DecodeError> {
		let kind = wire.kind.ok_or(DecodeError::MissingKind)?;
		match kind.as_str() {
			"post" => Ok(Envelope::Post(LocalRequest {
				path: required("post", "path", wire.path)?,
				content_type: wire.content_type,
				accept: wire.accept,
				payload: wire.payload.unwrap_or_default(),
			})),
			"call" => Ok(Envelope::Call {
				request: LocalRequest {
					path: required("call", "path", wire.path)?,
					content_type: wire.content_type,
					accept: wire.accept,
					payload: wire.payload.unwrap_or_default(),
				},
				origin: required("call", "origin", wire.origin)?,
				id: required("call", "id", wire.id)?.into(),
			}),
			"reply" => Ok(Envelope::Reply {
				id: required("reply", "id", wire.id)?.into(),
				payload: wire.payload.unwrap_or_default(),
			}),
			_ => Err(DecodeError::UnknownKind(kind)),
		}
	}
}

fn fill_request(wire: &mut WireEnvelope, request: &LocalRequest) {
	wire.path = Some(request.path.clone());
	wire.content_type = request.content_type.clone();
	wire.accept = request.accept.clone();
	wire.payload = Some(request.payload.clone());
}

fn required(
	kind: &'static str,
	field: &'static str,
	value: Option<String>,
) -> Result<String, DecodeError> {
	value.ok_or(DecodeError::MissingField { kind, field })
}
