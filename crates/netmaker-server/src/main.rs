// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Netmaker server binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use netmaker_server::{init_tracing, probe_public_endpoint, App};
use netmaker_server_config::{load_config, load_config_with_file};

/// Netmaker server - overlay network control plane.
#[derive(Parser, Debug)]
#[command(name = "netmaker-server", about = "Netmaker overlay network control plane", version)]
struct Args {
	/// Config file (defaults to /etc/netmaker/server.toml)
	#[arg(short, long, env = "NETMAKER_SERVER_CONFIG")]
	config: Option<PathBuf>,

	/// Skip the startup STUN probe for the server's public endpoint
	#[arg(long)]
	no_probe: bool,

	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Load and validate the configuration, then exit
	CheckConfig,
	/// Show version information
	Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	if let Some(Command::Version) = args.command {
		println!("netmaker-server {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	let config = match &args.config {
		Some(path) => load_config_with_file(path)?,
		None => load_config()?,
	};

	if let Some(Command::CheckConfig) = args.command {
		println!("{config:#?}");
		return Ok(());
	}

	init_tracing(&config.logging)?;

	tracing::info!(
		database = %config.database.backend,
		stun_enabled = config.stun.enabled,
		"starting netmaker-server"
	);

	let app = App::start(&config).await?;

	if config.stun.enabled && !args.no_probe {
		let stun = config.stun.clone();
		tokio::spawn(async move {
			probe_public_endpoint(&stun).await;
		});
	}

	tokio::signal::ctrl_c().await?;
	tracing::info!("Received shutdown signal");
	app.shutdown().await;

	tracing::info!("Server shutdown complete");
	Ok(())
}
