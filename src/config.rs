use std::time::Duration;

use clap::Parser;

/// Sidecar runtime: exposes `/kar/*` to the wrapped application and moves
/// its calls over the shared bus.
#[derive(Parser, Debug, Clone)]
#[command(name = "kar", version, about)]
pub struct Config {
	/// Service fronted by this sidecar; its topic on the bus.
	#[arg(long, env = "KAR_SERVICE")]
	pub service: String,

	/// Identity of this sidecar, used as `origin` of calls. Generated when omitted.
	#[arg(long, env = "KAR_SIDECAR")]
	pub sidecar: Option<String>,

	/// Port the sidecar listens on; 0 picks a free one.
	#[arg(long, env = "KAR_RUNTIME_PORT", default_value_t = 0)]
	pub runtime_port: u16,

	/// Port the application listens on.
	#[arg(long, env = "KAR_APP_PORT", default_value_t = 8080)]
	pub app_port: u16,

	#[arg(long, env = "KAR_APP_HOST", default_value = "127.0.0.1")]
	pub app_host: String,

	/// Give up waiting for a reply after this many milliseconds. Calls wait
	/// until shutdown when unset.
	#[arg(long, env = "KAR_CALL_TIMEOUT_MS")]
	pub call_timeout_ms: Option<u64>,

	/// Timeout of requests forwarded to the application, in milliseconds.
	#[arg(long, env = "KAR_APP_TIMEOUT_MS")]
	pub app_timeout_ms: Option<u64>,

	/// Log filter, e.g. `info` or `kar_sidecar=debug`.
	#[arg(long, env = "RUST_LOG", default_value = "info")]
	pub log: String,

	/// Application command line, launched with `KAR_PORT` and `KAR_APP_PORT` set.
	#[arg(trailing_var_arg = true, allow_hyphen_values = true)]
	pub command: Vec<String>,
}

impl Config {
	pub fn sidecar_id(&self) -> String {
		match &self.sidecar {
			Some(sidecar) => sidecar.clone(),
			None => format!("{}-{}", self.service, uuid::Uuid::new_v4().simple()),
		}
	}

	pub fn app_url(&self) -> String {
		format!("http://{}:{}", self.app_host, self.app_port)
	}

	pub fn call_timeout(&self) -> Option<Duration> {
		self.call_timeout_ms.map(Duration::from_millis)
	}

	pub fn app_timeout(&self) -> Option<Duration> {
		self.app_timeout_ms.map(Duration::from_millis)
	}
}
