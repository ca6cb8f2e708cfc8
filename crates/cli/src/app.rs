//! Subcommand dispatch.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use antenna_core::{Bridge, BridgeConfig, CdpConnector};
use antenna_runtime::TargetLocator;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::banner;
use crate::cli::{Cli, Command, ServeArgs};
use crate::server;

pub async fn dispatch(cli: Cli) -> Result<()> {
	let config = load_config(&cli)?;
	match cli.command {
		Command::Serve(args) => serve(config, args).await,
		Command::Probe => probe(&config).await,
		Command::Roles => roles(&config),
	}
}

/// Config file (or defaults) with `--cdp-port` overrides applied.
pub fn load_config(cli: &Cli) -> Result<BridgeConfig> {
	let mut config = BridgeConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
	if !cli.cdp_ports.is_empty() {
		config.locator.ports = cli.cdp_ports.clone();
	}
	Ok(config)
}

async fn serve(config: BridgeConfig, args: ServeArgs) -> Result<()> {
	let connector = CdpConnector::new(&config).context("Failed to build target locator")?;
	let bridge = Arc::new(Bridge::new(config, Box::new(connector)).context("Invalid configuration")?);
	let (secret, generated) = banner::resolve_secret(args.secret);

	let addr: SocketAddr = format!("{}:{}", args.bind, args.port)
		.parse()
		.with_context(|| format!("Invalid bind address: {}:{}", args.bind, args.port))?;
	let listener = TcpListener::bind(addr)
		.await
		.with_context(|| format!("Failed to bind {addr}"))?;
	let bound = listener.local_addr().context("Failed to read listener address")?;

	let (shutdown_tx, shutdown_rx) = watch::channel(false);
	let supervisor = tokio::spawn(bridge.clone().run(shutdown_rx.clone()));

	if !args.quiet {
		banner::print(bound, &secret, generated);
	}

	tokio::spawn(async move {
		wait_for_signal().await;
		info!(target = "antenna", "shutdown requested");
		let _ = shutdown_tx.send(true);
	});

	let app = server::router(bridge, Some(secret), shutdown_rx.clone());
	let served = server::serve(listener, app, shutdown_rx).await;

	if let Err(e) = supervisor.await {
		warn!(target = "antenna", error = %e, "bridge supervisor ended abnormally");
	}
	info!(target = "antenna", "stopped");
	served
}

#[cfg(unix)]
async fn wait_for_signal() {
	use tokio::signal::unix::{SignalKind, signal};

	let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
		(Ok(term), Ok(int)) => (term, int),
		_ => {
			warn!(target = "antenna", "failed to install signal handlers; falling back to ctrl-c");
			let _ = tokio::signal::ctrl_c().await;
			return;
		}
	};
	tokio::select! {
		_ = sigterm.recv() => {}
		_ = sigint.recv() => {}
	}
}

#[cfg(not(unix))]
async fn wait_for_signal() {
	let _ = tokio::signal::ctrl_c().await;
}

async fn probe(config: &BridgeConfig) -> Result<()> {
	let locator = TargetLocator::new(config.locator.options()).context("Failed to build target locator")?;
	let target = locator.locate(&config.locator.ports).await.with_context(|| {
		format!(
			"No debuggable target on ports {:?}; start the application with --remote-debugging-port",
			config.locator.ports
		)
	})?;
	println!("{}", serde_json::to_string_pretty(&target)?);
	Ok(())
}

fn roles(config: &BridgeConfig) -> Result<()> {
	let registry = antenna_core::RoleRegistry::new(&config.roles).context("Invalid role descriptors")?;
	let descriptors: Vec<_> = registry.iter().map(|role| role.descriptor()).collect();
	println!("{}", serde_json::to_string_pretty(&descriptors)?);
	Ok(())
}
