use std::sync::Arc;

use crate::app::LocalApp;
use crate::correlation::CorrelationTable;
use crate::envelope::DecodeError;
use crate::envelope::Envelope;
use crate::envelope::LocalRequest;
use crate::envelope::RequestId;
use crate::error::TransportError;
use crate::shutdown::Shutdown;
use crate::shutdown::ShutdownCause;
use crate::transport::Delivery;
use crate::transport::Inbox;
use crate::transport::Transport;

#[derive(thiserror::Error, Debug)]
pub enum DispatchError {
	#[error(transparent)]
	Decode(#[from] DecodeError),

	#[error("failed to reply to request {id} from {origin}: {source}")]
	Reply {
		id: RequestId,
		origin: String,
		source: TransportError,
	},
}

impl DispatchError {
	fn reason(&self) -> &'static str {
		match self {
			DispatchError::Decode(DecodeError::UnknownKind(_)) => "unknown_kind",
			DispatchError::Decode(_) => "malformed",
			DispatchError::Reply { .. } => "reply_failed",
		}
	}
}

/// What became of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
	/// A `post` was forwarded; `false` when the application call failed.
	Posted { delivered: bool },
	/// A `call` was forwarded and answered.
	Answered { delivered: bool },
	/// A `reply` woke its caller.
	Resolved,
	/// A `reply` nobody was waiting for.
	Discarded,
	/// Shutdown cut the application call short; no reply was sent.
	Interrupted,
}

/// The application call was abandoned because of shutdown.
struct Interrupted;

/// Routes inbound envelopes to the local application or to waiting callers.
pub struct Dispatcher {
	correlation: Arc<CorrelationTable>,
	transport: Arc<dyn Transport>,
	app: LocalApp,
	shutdown: Shutdown,
}

impl Dispatcher {
	pub fn new(
		correlation: Arc<CorrelationTable>,
		transport: Arc<dyn Transport>,
		app: LocalApp,
		shutdown: Shutdown,
	) -> Self {
		Self {
			correlation,
			transport,
			app,
			shutdown,
		}
	}

	/// Consumes `inbox` one message at a time until shutdown or until the
	/// inbox closes. The next message is not read before the previous one,
	/// including its call to the application, is done.
	///
	/// A closed inbox leaves no way to receive replies, so it brings the
	/// whole sidecar down.
	pub async fn run(self: Arc<Self>, mut inbox: Inbox) {
		loop {
			let delivery = tokio::select! {
				biased;
				reason = self.shutdown.triggered() => {
					tracing::info!(cause = ?reason.cause, "Dispatcher stopping");
					return;
				}
				delivery = inbox.recv() => delivery,
			};

			match delivery {
				Some(delivery) => self.handle(delivery).await,
				None => {
					tracing::warn!("Inbox closed, dispatcher stopping");
					self.shutdown.trigger(ShutdownCause::Failed("inbox closed".to_string()));
					return;
				}
			}
		}
	}

	async fn handle(&self, delivery: Delivery) {
		tracing::debug!(
			topic = %delivery.topic,
			partition = delivery.partition,
			offset = delivery.offset,
			"Received message"
		);

		if let Err(err) = self.process(&delivery.value).await {
			metrics::counter!("kar_dispatch_errors_total", "reason" => err.reason()).increment(1);
			tracing::error!(
				topic = %delivery.topic,
				partition = delivery.partition,
				offset = delivery.offset,
				"Ignoring message: {err}"
			);
		}
	}

	/// Handles one encoded envelope, whether it came from the bus or was
	/// posted directly by a peer.
	pub async fn process(&self, value: &[u8]) -> Result<Outcome, DispatchError> {
		let envelope = Envelope::decode(value)?;
		metrics::counter!("kar_messages_total", "kind" => envelope.kind()).increment(1);

		match envelope {
			Envelope::Post(request) => {
				let Ok(body) = self.forward(&request).await else {
					return Ok(Outcome::Interrupted);
				};
				Ok(Outcome::Posted {
					delivered: body.is_some(),
				})
			}
			Envelope::Call {
				request,
				origin,
				id,
			} => {
				let Ok(body) = self.forward(&request).await else {
					tracing::info!(%id, %origin, "Abandoning call on shutdown");
					return Ok(Outcome::Interrupted);
				};
				let delivered = body.is_some();
				let reply = Envelope::Reply {
					id: id.clone(),
					payload: body.unwrap_or_default(),
				};
				self.transport
					.send(&origin, &reply)
					.await
					.map_err(|source| DispatchError::Reply { id, origin, source })?;
				Ok(Outcome::Answered { delivered })
			}
			Envelope::Reply { id, payload } => {
				if self.correlation.resolve(&id, payload) {
					Ok(Outcome::Resolved)
				} else {
					tracing::debug!(%id, "Discarding reply without a waiter");
					Ok(Outcome::Discarded)
				}
			}
		}
	}

	/// Calls the application unless shutdown fires first. `Ok(None)` is a
	/// failed call, already logged.
	async fn forward(&self, request: &LocalRequest) -> Result<Option<String>, Interrupted> {
		let response = tokio::select! {
			biased;
			_ = self.shutdown.triggered() => return Err(Interrupted),
			response = self.app.forward(request) => response,
		};

		match response {
			Ok(body) => Ok(Some(body)),
			Err(err) => {
				tracing::error!("{err}");
				Ok(None)
			}
		}
	}
}
