use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::oneshot;

use crate::envelope::RequestId;
use crate::error::CallError;
use crate::shutdown::Shutdown;

/// Outstanding calls of this sidecar, keyed by request id.
///
/// Shared between the gateway, which registers ids before sending a `call`,
/// and the dispatcher, which resolves them when the matching `reply` arrives.
#[derive(Debug, Default)]
pub struct CorrelationTable {
	pending: DashMap<RequestId, Waiter>,
	registrations: AtomicU64,
}

#[derive(Debug)]
struct Waiter {
	registration: u64,
	tx: oneshot::Sender<String>,
}

impl CorrelationTable {
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Registers `id` and returns the waiting side. Must happen before the
	/// corresponding envelope is sent.
	pub fn register(self: &Arc<Self>, id: RequestId) -> Pending {
		let (tx, rx) = oneshot::channel();
		let registration = self.registrations.fetch_add(1, Ordering::Relaxed);
		if self.pending.insert(id.clone(), Waiter { registration, tx }).is_some() {
			tracing::warn!(%id, "Replaced a pending call with the same id");
		}
		metrics::gauge!("kar_pending_calls").set(self.pending.len() as f64);

		Pending {
			id,
			registration,
			rx: Some(rx),
			table: self.clone(),
		}
	}

	/// Delivers `payload` to the waiter of `id`. Returns `false` when nobody
	/// is waiting anymore; the entry is consumed either way.
	pub fn resolve(&self, id: &RequestId, payload: String) -> bool {
		match self.pending.remove(id) {
			Some((_, waiter)) => {
				metrics::gauge!("kar_pending_calls").set(self.pending.len() as f64);
				waiter.tx.send(payload).is_ok()
			}
			None => false,
		}
	}

	pub fn forget(&self, id: &RequestId) {
		if self.pending.remove(id).is_some() {
			metrics::gauge!("kar_pending_calls").set(self.pending.len() as f64);
		}
	}

	// leaves a later registration of the same id alone
	fn forget_registration(&self, id: &RequestId, registration: u64) {
		let removed = self
			.pending
			.remove_if(id, |_, waiter| waiter.registration == registration);
		if removed.is_some() {
			metrics::gauge!("kar_pending_calls").set(self.pending.len() as f64);
		}
	}

	pub fn contains(&self, id: &RequestId) -> bool {
		self.pending.contains_key(id)
	}

	pub fn len(&self) -> usize {
		self.pending.len()
	}

	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}
}

/// The waiting side of a registered call. Dropping it forgets the id.
#[derive(Debug)]
pub struct Pending {
	id: RequestId,
	registration: u64,
	rx: Option<oneshot::Receiver<String>>,
	table: Arc<CorrelationTable>,
}

impl Pending {
	pub fn id(&self) -> &RequestId {
		&self.id
	}

	/// Waits for the reply, the shutdown signal, or the optional timeout,
	/// whichever comes first.
	pub async fn wait(
		mut self,
		shutdown: &Shutdown,
		timeout: Option<Duration>,
	) -> Result<String, CallError> {
		let rx = self.rx.take().ok_or(CallError::Abandoned)?;
		let deadline = async {
			match timeout {
				Some(timeout) => tokio::time::sleep(timeout).await,
				None => std::future::pending().await,
			}
		};

		tokio::select! {
			biased;
			reply = rx => reply.map_err(|_| CallError::Abandoned),
			_ = shutdown.triggered() => Err(CallError::ShuttingDown),
			_ = deadline => Err(CallError::TimedOut {
				timeout: timeout.unwrap_or_default(),
			}),
		}
	}
}

impl Drop for Pending {
	fn drop(&mut self) {
		self.table.forget_registration(&self.id, self.registration);
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::shutdown::ShutdownCause;

	#[tokio::test]
	async fn resolve_wakes_waiter_once() {
		let table = CorrelationTable::new();
		let shutdown = Shutdown::new();
		let id = RequestId::from("r-1");
		let pending = table.register(id.clone());

		assert!(table.resolve(&id, "first".to_string()));
		assert!(!table.resolve(&id, "second".to_string()));

		assert_eq!(pending.wait(&shutdown, None).await.unwrap(), "first");
		assert!(table.is_empty());
	}

	#[tokio::test]
	async fn unknown_id_is_ignored() {
		let table = CorrelationTable::new();
		assert!(!table.resolve(&RequestId::from("nobody"), String::new()));
	}

	#[tokio::test]
	async fn dropping_pending_forgets_entry() {
		let table = CorrelationTable::new();
		let id = RequestId::from("r-2");
		let pending = table.register(id.clone());
		assert!(table.contains(&id));

		drop(pending);
		assert!(!table.contains(&id));
		assert!(!table.resolve(&id, "late".to_string()));
	}

	#[tokio::test]
	async fn stale_registration_does_not_forget_newer_one() {
		let table = CorrelationTable::new();
		let shutdown = Shutdown::new();
		let id = RequestId::from("dup");

		let first = table.register(id.clone());
		let second = table.register(id.clone());
		drop(first);

		assert!(table.contains(&id));
		assert!(table.resolve(&id, "answer".to_string()));
		assert_eq!(second.wait(&shutdown, None).await.unwrap(), "answer");
	}

	#[tokio::test]
	async fn shutdown_unblocks_waiter() {
		let table = CorrelationTable::new();
		let shutdown = Shutdown::new();
		let pending = table.register(RequestId::from("r-3"));

		shutdown.trigger(ShutdownCause::Requested);
		assert_eq!(
			pending.wait(&shutdown, None).await,
			Err(CallError::ShuttingDown)
		);
		assert!(table.is_empty());
	}

	#[tokio::test]
	async fn timeout_expires_waiter() {
		let table = CorrelationTable::new();
		let shutdown = Shutdown::new();
		let pending = table.register(RequestId::from("r-4"));

		let timeout = Duration::from_millis(20);
		assert_eq!(
			pending.wait(&shutdown, Some(timeout)).await,
			Err(CallError::TimedOut { timeout })
		);
		assert!(table.is_empty());
	}
}
