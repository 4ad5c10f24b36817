use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use tokio::net::TcpListener;

use crate::app::LocalApp;
use crate::config::Config;
use crate::correlation::CorrelationTable;
use crate::dispatcher::Dispatcher;
use crate::gateway;
use crate::gateway::GatewayState;
use crate::launcher;
use crate::placement::PlacementDirectory;
use crate::shutdown::Shutdown;
use crate::shutdown::ShutdownCause;
use crate::store::MemoryStore;
use crate::store::Store;
use crate::transport::LocalBus;
use crate::transport::Transport;

/// A running sidecar: the dispatch loop and the HTTP server, both tracked
/// by its shutdown coordinator.
pub struct Sidecar {
	id: String,
	local_addr: SocketAddr,
	shutdown: Shutdown,
	correlation: Arc<CorrelationTable>,
	placement: PlacementDirectory,
}

impl Sidecar {
	/// Subscribes to the bus, registers the sidecar, and starts serving on
	/// `listener`.
	pub async fn start(
		config: &Config,
		listener: TcpListener,
		transport: Arc<dyn Transport>,
		store: Arc<dyn Store>,
	) -> anyhow::Result<Self> {
		let id = config.sidecar_id();
		let local_addr = listener.local_addr()?;
		let shutdown = Shutdown::new();

		let inbox = transport
			.subscribe(&[config.service.clone(), id.clone()])
			.await
			.context("failed to subscribe to the bus")?;

		let correlation = CorrelationTable::new();
		let app = LocalApp::new(config.app_url(), config.app_timeout())?;
		let dispatcher = Arc::new(Dispatcher::new(
			correlation.clone(),
			transport.clone(),
			app,
			shutdown.clone(),
		));

		let placement = PlacementDirectory::new(store.clone());
		placement
			.register_sidecar(&id, &config.service)
			.await
			.context("failed to register sidecar")?;

		shutdown.spawn("dispatcher", dispatcher.clone().run(inbox));

		let router = gateway::router(Arc::new(GatewayState {
			sidecar: id.clone(),
			transport,
			store,
			placement: placement.clone(),
			correlation: correlation.clone(),
			dispatcher,
			shutdown: shutdown.clone(),
			call_timeout: config.call_timeout(),
		}));

		shutdown.spawn("server", {
			let shutdown = shutdown.clone();
			async move {
				let drain = {
					let shutdown = shutdown.clone();
					async move {
						shutdown.triggered().await;
					}
				};
				if let Err(err) = axum::serve(listener, router).with_graceful_shutdown(drain).await {
					tracing::error!("HTTP server failed: {err}");
					shutdown.trigger(ShutdownCause::Failed(err.to_string()));
				}
			}
		});

		tracing::info!(sidecar = %id, service = %config.service, %local_addr, "Sidecar started");
		Ok(Self {
			id,
			local_addr,
			shutdown,
			correlation,
			placement,
		})
	}

	pub fn id(&self) -> &str {
		&self.id
	}

	pub fn local_addr(&self) -> SocketAddr {
		self.local_addr
	}

	pub fn shutdown(&self) -> &Shutdown {
		&self.shutdown
	}

	pub fn correlation(&self) -> &Arc<CorrelationTable> {
		&self.correlation
	}

	pub fn placement(&self) -> &PlacementDirectory {
		&self.placement
	}

	/// Waits for the shutdown signal, then for every tracked task to stop.
	pub async fn stopped(self) {
		let reason = self.shutdown.triggered().await;
		tracing::info!(cause = ?reason.cause, "Sidecar stopping");

		self.shutdown.join().await;
		if let Err(err) = self.placement.deregister_sidecar(&self.id).await {
			tracing::warn!("Failed to deregister sidecar: {err}");
		}
		tracing::info!(sidecar = %self.id, "Sidecar stopped");
	}

	/// Launches the application, if `config` names one, and waits until the
	/// sidecar stops. A failed launch stops the sidecar before the error is
	/// returned.
	pub async fn supervise(self, config: &Config) -> anyhow::Result<()> {
		let runtime_port = self.local_addr.port();
		tracing::info!("KAR_PORT={runtime_port}, KAR_APP_PORT={}", config.app_port);

		if !config.command.is_empty() {
			if let Err(err) = launcher::launch(&config.command, runtime_port, config.app_port, &self.shutdown) {
				self.shutdown.trigger(ShutdownCause::Failed(err.to_string()));
				self.stopped().await;
				return Err(err);
			}
		}

		self.shutdown.spawn("interrupt", {
			let shutdown = self.shutdown.clone();
			async move {
				tokio::select! {
					result = tokio::signal::ctrl_c() => match result {
						Ok(()) => {
							shutdown.trigger(ShutdownCause::Interrupted);
						}
						Err(err) => tracing::warn!("Cannot listen for Ctrl-C: {err}"),
					},
					_ = shutdown.triggered() => {}
				}
			}
		});

		self.stopped().await;
		Ok(())
	}
}

/// Runs one sidecar in-process with the bundled bus and store, launching
/// the application when a command is given.
pub async fn run(config: Config) -> anyhow::Result<()> {
	let listener = TcpListener::bind(("127.0.0.1", config.runtime_port))
		.await
		.with_context(|| format!("failed to listen on port {}", config.runtime_port))?;

	let transport: Arc<dyn Transport> = Arc::new(LocalBus::new());
	let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
	let sidecar = Sidecar::start(&config, listener, transport, store).await?;
	sidecar.supervise(&config).await
}
