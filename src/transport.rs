use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::envelope::Envelope;
use crate::error::TransportError;

/// One message as handed out by the bus.
#[derive(Debug, Clone)]
pub struct Delivery {
	pub topic: String,
	pub partition: i32,
	pub offset: i64,
	pub value: Bytes,
}

/// Receive side of a subscription.
pub type Inbox = mpsc::UnboundedReceiver<Delivery>;

/// The pub/sub bus shared by all sidecars.
pub trait Transport: Send + Sync + 'static {
	/// Publishes `envelope` to the topic named `destination`.
	fn send<'a>(
		&'a self,
		destination: &'a str,
		envelope: &'a Envelope,
	) -> BoxFuture<'a, Result<(), TransportError>>;

	/// Joins the consumer group of every topic in `topics`; all their
	/// messages arrive on the returned inbox.
	fn subscribe<'a>(&'a self, topics: &'a [String]) -> BoxFuture<'a, Result<Inbox, TransportError>>;
}

#[derive(Default)]
struct Topic {
	consumers: Vec<mpsc::UnboundedSender<Delivery>>,
	backlog: VecDeque<Delivery>,
	next_offset: i64,
	cursor: usize,
}

impl Topic {
	/// Hands `delivery` to one live consumer, round robin. Gives it back
	/// when there is none.
	fn deliver(&mut self, mut delivery: Delivery) -> Result<(), Delivery> {
		while !self.consumers.is_empty() {
			let index = self.cursor % self.consumers.len();
			match self.consumers[index].send(delivery) {
				Ok(()) => {
					self.cursor = index + 1;
					return Ok(());
				}
				Err(mpsc::error::SendError(returned)) => {
					self.consumers.swap_remove(index);
					delivery = returned;
				}
			}
		}
		Err(delivery)
	}
}

#[derive(Default)]
struct BusState {
	topics: HashMap<String, Topic>,
	closed: bool,
}

/// In-process bus with consumer-group semantics: each message of a topic
/// goes to exactly one of its subscribers, and messages sent while a topic
/// has no subscriber are kept until one arrives.
#[derive(Clone, Default)]
pub struct LocalBus {
	state: Arc<Mutex<BusState>>,
}

impl LocalBus {
	pub fn new() -> Self {
		Self::default()
	}

	/// Makes every later `send` and `subscribe` fail.
	pub fn close(&self) {
		let mut state = self.state.lock();
		state.closed = true;
		state.topics.clear();
	}

	pub fn publish(&self, topic: &str, value: Bytes) -> Result<i64, TransportError> {
		let mut state = self.state.lock();
		if state.closed {
			return Err(TransportError::Closed);
		}

		let topic_state = state.topics.entry(topic.to_string()).or_default();
		let offset = topic_state.next_offset;
		topic_state.next_offset += 1;

		let delivery = Delivery {
			topic: topic.to_string(),
			partition: 0,
			offset,
			value,
		};
		if let Err(delivery) = topic_state.deliver(delivery) {
			topic_state.backlog.push_back(delivery);
		}
		Ok(offset)
	}

	pub fn listen(&self, topics: &[String]) -> Result<Inbox, TransportError> {
		let mut state = self.state.lock();
		if state.closed {
			return Err(TransportError::Closed);
		}

		let (tx, rx) = mpsc::unbounded_channel();
		for name in topics {
			let topic = state.topics.entry(name.clone()).or_default();
			for delivery in topic.backlog.drain(..) {
				// the receiver is still in our hands
				let _ = tx.send(delivery);
			}
			topic.consumers.push(tx.clone());
		}
		Ok(rx)
	}
}

impl Transport for LocalBus {
	fn send<'a>(
		&'a self,
		destination: &'a str,
		envelope: &'a Envelope,
	) -> BoxFuture<'a, Result<(), TransportError>> {
		async move {
			let value = Bytes::from(envelope.encode()?);
			let offset = self.publish(destination, value)?;
			tracing::trace!(topic = destination, offset, kind = envelope.kind(), "Published");
			Ok(())
		}
		.boxed()
	}

	fn subscribe<'a>(&'a self, topics: &'a [String]) -> BoxFuture<'a, Result<Inbox, TransportError>> {
		futures::future::ready(self.listen(topics)).boxed()
	}
}
