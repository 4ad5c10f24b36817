use std::process::Stdio;

use anyhow::Context as _;
use tokio::io::AsyncBufReadExt as _;
use tokio::io::AsyncRead;
use tokio::io::BufReader;
use tokio::process::Command;

use crate::shutdown::Shutdown;
use crate::shutdown::ShutdownCause;

/// Starts the application described by `command` with the two ports in its
/// environment, and triggers shutdown once it exits.
///
/// Output draining and the exit watcher are tracked by `shutdown`.
pub fn launch(command: &[String], runtime_port: u16, app_port: u16, shutdown: &Shutdown) -> anyhow::Result<()> {
	let (program, args) = command.split_first().context("empty application command")?;

	tracing::info!(program, "Launching application");
	let mut child = Command::new(program)
		.args(args)
		.env("KAR_PORT", runtime_port.to_string())
		.env("KAR_APP_PORT", app_port.to_string())
		.stdin(Stdio::inherit())
		.stdout(Stdio::piped())
		.stderr(Stdio::piped())
		.kill_on_drop(true)
		.spawn()
		.with_context(|| format!("failed to start {program}"))?;

	if let Some(stdout) = child.stdout.take() {
		shutdown.spawn("stdout", dump("[STDOUT]", stdout));
	}
	if let Some(stderr) = child.stderr.take() {
		shutdown.spawn("stderr", dump("[STDERR]", stderr));
	}

	shutdown.spawn("application", {
		let shutdown = shutdown.clone();
		async move {
			let exited = tokio::select! {
				status = child.wait() => Some(status),
				_ = shutdown.triggered() => None,
			};

			let code = match exited {
				Some(Ok(status)) => {
					match status.code() {
						Some(code) => tracing::info!(code, "Application exited"),
						None => tracing::info!("Application terminated by signal"),
					}
					status.code()
				}
				Some(Err(err)) => {
					tracing::error!("Failed to wait for application: {err}");
					None
				}
				None => {
					if let Err(err) = child.kill().await {
						tracing::warn!("Failed to stop application: {err}");
					}
					return;
				}
			};
			shutdown.trigger(ShutdownCause::ApplicationExited(code));
		}
	});

	Ok(())
}

async fn dump<R>(prefix: &'static str, output: R)
where
	R: AsyncRead + Unpin + Send + 'static,
{
	let mut lines = BufReader::new(output).lines();
	loop {
		match lines.next_line().await {
			Ok(Some(line)) => tracing::info!("{prefix} {line}"),
			Ok(None) => return,
			Err(err) => {
				tracing::warn!("{prefix} unreadable output: {err}");
				return;
			}
		}
	}
}
