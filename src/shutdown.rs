use std::fmt::Debug;
use std::future::Future;
use std::panic::Location;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::watch::Receiver;
use tokio::sync::watch::Sender;
use tokio::task::JoinHandle;
use tracing::Instrument;

/// What brought the sidecar down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownCause {
	/// `POST /v1/system/shutdown`.
	Requested,
	/// The wrapped application exited, with its status code if it had one.
	ApplicationExited(Option<i32>),
	/// Ctrl-C or a termination signal.
	Interrupted,
	/// A long-running task failed.
	Failed(String),
}

#[derive(Debug, Clone)]
pub struct ShutdownReason {
	pub cause: ShutdownCause,
	pub location: &'static Location<'static>,
}

#[derive(Debug)]
enum State {
	Running,
	Stopping(ShutdownReason),
}

struct Tracked {
	name: &'static str,
	handle: JoinHandle<()>,
}

struct Inner {
	state: Sender<State>,
	tasks: Mutex<Vec<Tracked>>,
}

/// Process-wide shutdown signal plus the set of long-running tasks that
/// must stop before the process exits.
#[derive(Clone)]
pub struct Shutdown {
	inner: Arc<Inner>,
}

impl Default for Shutdown {
	fn default() -> Self {
		Self::new()
	}
}

impl Debug for Shutdown {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Shutdown")
			.field("state", &*self.inner.state.borrow())
			.field("tasks", &self.inner.tasks.lock().len())
			.finish()
	}
}

impl Shutdown {
	pub fn new() -> Self {
		Shutdown {
			inner: Arc::new(Inner {
				state: Sender::new(State::Running),
				tasks: Mutex::new(Vec::new()),
			}),
		}
	}

	/// Fires the signal. Only the first cause is kept; returns whether this
	/// call was the one that fired it.
	#[track_caller]
	pub fn trigger(&self, cause: ShutdownCause) -> bool {
		let reason = ShutdownReason {
			cause,
			location: Location::caller(),
		};

		let fired = self.inner.state.send_if_modified(|state| match state {
			State::Running => {
				*state = State::Stopping(reason.clone());
				true
			}
			// do not re-trigger
			State::Stopping(_) => false,
		});

		if fired {
			tracing::info!(
				cause = ?reason.cause,
				location = %reason.location,
				"Shutdown triggered"
			);
		}
		fired
	}

	pub fn is_triggered(&self) -> bool {
		matches!(*self.inner.state.borrow(), State::Stopping(_))
	}

	pub fn reason(&self) -> Option<ShutdownReason> {
		match &*self.inner.state.borrow() {
			State::Running => None,
			State::Stopping(reason) => Some(reason.clone()),
		}
	}

	/// Resolves once the signal has fired.
	pub fn triggered(&self) -> impl Future<Output = ShutdownReason> + Send + 'static {
		Self::wait(self.inner.state.subscribe())
	}

	async fn wait(mut recv: Receiver<State>) -> ShutdownReason {
		{
			let result = recv
				.wait_for(|state| matches!(state, State::Stopping(_)))
				.await;

			match result.as_deref() {
				Err(_) => {}
				Ok(State::Running) => unreachable!(),
				Ok(State::Stopping(reason)) => return reason.clone(),
			}
		}

		// the sender lives as long as any handle, so this only happens
		// when every handle is gone
		std::future::pending::<()>().await;
		unreachable!();
	}

	/// Spawns a long-running task that `join` will wait for.
	pub fn spawn<F>(&self, name: &'static str, future: F)
	where
		F: Future<Output = ()> + Send + 'static,
	{
		let span = tracing::info_span!("task", name);
		let handle = tokio::spawn(future.instrument(span));
		self.inner.tasks.lock().push(Tracked { name, handle });
	}

	/// Number of tracked tasks not yet joined.
	pub fn outstanding(&self) -> usize {
		self.inner.tasks.lock().len()
	}

	/// Waits until every tracked task, including ones spawned while
	/// waiting, has stopped.
	pub async fn join(&self) {
		loop {
			let tasks = std::mem::take(&mut *self.inner.tasks.lock());
			if tasks.is_empty() {
				return;
			}

			for Tracked { name, handle } in tasks {
				match handle.await {
					Ok(()) => tracing::debug!(task = name, "Task completed"),
					Err(err) if err.is_panic() => {
						tracing::error!(task = name, "Task crashed: {err:?}")
					}
					Err(err) => tracing::warn!(task = name, "Task cancelled: {err:?}"),
				}
			}
		}
	}
}
