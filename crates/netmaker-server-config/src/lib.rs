// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration for the netmaker server.
//!
//! Values are layered from built-in defaults, a TOML file and
//! `NETMAKER_SERVER_*` environment variables, highest precedence last.
//!
//! ```ignore
//! use netmaker_server_config::load_config;
//!
//! let config = load_config()?;
//! println!("stun on {}", config.stun.listen);
//! ```

pub mod error;
pub mod layer;
pub mod sections;
pub mod sources;

pub use error::ConfigError;
pub use layer::ServerConfigLayer;
pub use sections::*;
pub use sources::{ConfigSource, DefaultsSource, EnvSource, Precedence, TomlSource};

use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, info};

/// Fully resolved server configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
	pub database: DatabaseConfig,
	pub broker: BrokerConfig,
	pub stun: StunConfig,
	pub nodes: NodesConfig,
	pub failover: FailoverConfig,
	pub operations: OperationsConfig,
	pub logging: LoggingConfig,
}

impl ServerConfig {
	pub fn coalesce_window(&self) -> Duration {
		Duration::from_millis(self.broker.coalesce_window_ms)
	}

	pub fn pending_delete_grace(&self) -> Duration {
		Duration::from_secs(self.nodes.pending_delete_grace_secs)
	}

	pub fn default_deadline(&self) -> Duration {
		Duration::from_secs(self.operations.default_deadline_secs)
	}
}

/// Load configuration from all sources with standard precedence.
///
/// Precedence (highest to lowest):
/// 1. Environment variables (`NETMAKER_SERVER_*`)
/// 2. Config file (`/etc/netmaker/server.toml`)
/// 3. Built-in defaults
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource::new()),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(config_path: impl Into<PathBuf>) -> Result<ServerConfig, ConfigError> {
	load_from(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(config_path)),
		Box::new(EnvSource::new()),
	])
}

/// Load configuration from environment only (for testing or simple deployments).
pub fn load_config_from_env() -> Result<ServerConfig, ConfigError> {
	let mut merged = ServerConfigLayer::default();
	merged.merge(EnvSource::new().load()?);
	finalize(merged)
}

/// Merge `sources` in precedence order and finalize the result.
pub fn load_from(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<ServerConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = ServerConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	finalize(merged)
}

fn finalize(layer: ServerConfigLayer) -> Result<ServerConfig, ConfigError> {
	let config = ServerConfig {
		database: layer.database.unwrap_or_default().finalize(),
		broker: layer.broker.unwrap_or_default().finalize(),
		stun: layer.stun.unwrap_or_default().finalize(),
		nodes: layer.nodes.unwrap_or_default().finalize(),
		failover: layer.failover.unwrap_or_default().finalize(),
		operations: layer.operations.unwrap_or_default().finalize(),
		logging: layer.logging.unwrap_or_default().finalize(),
	};

	validate_config(&config)?;

	info!(
		database = %config.database.backend,
		broker_workers = config.broker.workers,
		coalesce_window_ms = config.broker.coalesce_window_ms,
		stun_enabled = config.stun.enabled,
		stun_listen = %config.stun.listen,
		"Server configuration loaded"
	);

	Ok(config)
}

/// Validate cross-field configuration rules.
fn validate_config(config: &ServerConfig) -> Result<(), ConfigError> {
	if config.broker.workers == 0 {
		return Err(ConfigError::Validation("broker.workers must be at least 1".to_string()));
	}
	if config.broker.publish_queue == 0 {
		return Err(ConfigError::Validation("broker.publish_queue must be at least 1".to_string()));
	}
	if config.database.max_connections == 0 {
		return Err(ConfigError::Validation(
			"database.max_connections must be at least 1".to_string(),
		));
	}
	if config.failover.engage_after_failures == 0 || config.failover.revert_after_successes == 0 {
		return Err(ConfigError::Validation(
			"failover thresholds must be at least 1".to_string(),
		));
	}
	if config.operations.default_deadline_secs == 0 {
		return Err(ConfigError::Validation(
			"operations.default_deadline_secs must be at least 1".to_string(),
		));
	}
	if config.nodes.finalize_interval_secs == 0 || config.nodes.expiry_check_interval_secs == 0 {
		return Err(ConfigError::Validation(
			"node maintenance intervals must be at least 1 second".to_string(),
		));
	}
	match config.database.backend {
		DatabaseBackend::Sqlite if !config.database.url.starts_with("sqlite:") => {
			Err(ConfigError::Validation(format!(
				"database.url '{}' is not a sqlite URL",
				config.database.url
			)))
		}
		DatabaseBackend::Postgres
			if !(config.database.url.starts_with("postgres://")
				|| config.database.url.starts_with("postgresql://")) =>
		{
			Err(ConfigError::Validation(
				"database.backend is postgres but database.url is not a postgres URL".to_string(),
			))
		}
		_ => Ok(()),
	}
}
