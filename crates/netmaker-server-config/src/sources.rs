// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Configuration sources: environment variables and TOML files.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, trace};

use crate::error::ConfigError;
use crate::layer::ServerConfigLayer;
use crate::sections::{
	BrokerConfigLayer, DatabaseConfigLayer, FailoverConfigLayer, LoggingConfigLayer, NodesConfigLayer,
	OperationsConfigLayer, StunConfigLayer,
};

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

/// Trait for configuration sources.
pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<ServerConfigLayer, ConfigError>;
}

/// Built-in defaults source.
pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading defaults");
		Ok(ServerConfigLayer::default())
	}
}

/// TOML file configuration source.
pub struct TomlSource {
	path: PathBuf,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/netmaker/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(ServerConfigLayer::default());
		}

		debug!(path = %self.path.display(), "loading config file");
		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;

		let layer: ServerConfigLayer = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!("parsed config layer from TOML");
		Ok(layer)
	}
}

type Lookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Environment variable source.
///
/// Convention: NETMAKER_SERVER_<SECTION>_<FIELD>
pub struct EnvSource {
	lookup: Lookup,
}

impl EnvSource {
	/// Reads the process environment.
	pub fn new() -> Self {
		Self::with_lookup(|name| std::env::var(name).ok())
	}

	/// Reads variables through `lookup` instead of the process environment.
	pub fn with_lookup(lookup: impl Fn(&str) -> Option<String> + Send + Sync + 'static) -> Self {
		Self {
			lookup: Box::new(lookup),
		}
	}

	fn var(&self, name: &str) -> Option<String> {
		(self.lookup)(name).filter(|s| !s.is_empty())
	}

	fn bool(&self, name: &str) -> Option<bool> {
		self.var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
	}

	fn parse<T>(&self, name: &str, what: &str) -> Result<Option<T>, ConfigError>
	where
		T: FromStr,
		T::Err: Display,
	{
		match self.var(name) {
			Some(v) => v.parse().map(Some).map_err(|e| ConfigError::InvalidValue {
				key: name.to_string(),
				message: format!("invalid {what} value '{v}': {e}"),
			}),
			None => Ok(None),
		}
	}

	fn list(&self, name: &str) -> Option<Vec<String>> {
		self.var(name).map(|v| {
			v.split(',')
				.map(str::trim)
				.filter(|s| !s.is_empty())
				.map(str::to_string)
				.collect()
		})
	}

	fn database(&self) -> Result<DatabaseConfigLayer, ConfigError> {
		Ok(DatabaseConfigLayer {
			backend: self.parse("NETMAKER_SERVER_DATABASE_BACKEND", "backend")?,
			url: self.var("NETMAKER_SERVER_DATABASE_URL"),
			path: self.var("NETMAKER_SERVER_DATABASE_PATH").map(PathBuf::from),
			max_connections: self.parse("NETMAKER_SERVER_DATABASE_MAX_CONNECTIONS", "u32")?,
			retry_deadline_secs: self.parse("NETMAKER_SERVER_DATABASE_RETRY_DEADLINE_SECS", "u64")?,
		})
	}

	fn broker(&self) -> Result<BrokerConfigLayer, ConfigError> {
		Ok(BrokerConfigLayer {
			coalesce_window_ms: self.parse("NETMAKER_SERVER_BROKER_COALESCE_WINDOW_MS", "u64")?,
			workers: self.parse("NETMAKER_SERVER_BROKER_WORKERS", "usize")?,
			publish_queue: self.parse("NETMAKER_SERVER_BROKER_PUBLISH_QUEUE", "usize")?,
			drain_timeout_secs: self.parse("NETMAKER_SERVER_BROKER_DRAIN_TIMEOUT_SECS", "u64")?,
		})
	}

	fn stun(&self) -> Result<StunConfigLayer, ConfigError> {
		Ok(StunConfigLayer {
			enabled: self.bool("NETMAKER_SERVER_STUN_ENABLED"),
			listen: self.parse("NETMAKER_SERVER_STUN_LISTEN", "socket address")?,
			servers: self.list("NETMAKER_SERVER_STUN_SERVERS"),
			probe_timeout_secs: self.parse("NETMAKER_SERVER_STUN_PROBE_TIMEOUT_SECS", "u64")?,
		})
	}

	fn nodes(&self) -> Result<NodesConfigLayer, ConfigError> {
		Ok(NodesConfigLayer {
			pending_delete_grace_secs: self.parse("NETMAKER_SERVER_NODES_PENDING_DELETE_GRACE_SECS", "u64")?,
			finalize_interval_secs: self.parse("NETMAKER_SERVER_NODES_FINALIZE_INTERVAL_SECS", "u64")?,
			expiry_check_interval_secs: self.parse("NETMAKER_SERVER_NODES_EXPIRY_CHECK_INTERVAL_SECS", "u64")?,
		})
	}

	fn failover(&self) -> Result<FailoverConfigLayer, ConfigError> {
		Ok(FailoverConfigLayer {
			engage_after_failures: self.parse("NETMAKER_SERVER_FAILOVER_ENGAGE_AFTER_FAILURES", "u32")?,
			revert_after_successes: self.parse("NETMAKER_SERVER_FAILOVER_REVERT_AFTER_SUCCESSES", "u32")?,
		})
	}

	fn operations(&self) -> Result<OperationsConfigLayer, ConfigError> {
		Ok(OperationsConfigLayer {
			default_deadline_secs: self.parse("NETMAKER_SERVER_OPERATIONS_DEFAULT_DEADLINE_SECS", "u64")?,
		})
	}

	fn logging(&self) -> Result<LoggingConfigLayer, ConfigError> {
		Ok(LoggingConfigLayer {
			level: self.var("NETMAKER_SERVER_LOG_LEVEL"),
			format: self.parse("NETMAKER_SERVER_LOG_FORMAT", "log format")?,
		})
	}
}

impl Default for EnvSource {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<ServerConfigLayer, ConfigError> {
		debug!("loading environment variables");
		Ok(ServerConfigLayer {
			database: Some(self.database()?),
			broker: Some(self.broker()?),
			stun: Some(self.stun()?),
			nodes: Some(self.nodes()?),
			failover: Some(self.failover()?),
			operations: Some(self.operations()?),
			logging: Some(self.logging()?),
		})
	}
}
