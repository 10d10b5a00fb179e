// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Layered configuration for the AppRole backend.
//!
//! Sources are merged in precedence order: built-in defaults, an optional
//! TOML file, then `LOOM_SERVER_APPROLE_*` environment variables.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::system::StaticSystemView;

/// 768 hours, the mount default for both lease limits.
pub const DEFAULT_LEASE_TTL_SECS: u64 = 2_764_800;
pub const DEFAULT_TIDY_INTERVAL_SECS: u64 = 60;
pub const DEFAULT_STORAGE_URL: &str = "memory";

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file {path}: {source}")]
	FileRead {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("failed to parse config file {path}: {source}")]
	TomlParse {
		path: PathBuf,
		#[source]
		source: toml::de::Error,
	},

	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },

	#[error("configuration validation failed: {0}")]
	Validation(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AppRoleConfigLayer {
	pub max_lease_ttl_secs: Option<u64>,
	pub default_lease_ttl_secs: Option<u64>,
	pub tidy_enabled: Option<bool>,
	pub tidy_interval_secs: Option<u64>,
	pub storage_url: Option<String>,
}

impl AppRoleConfigLayer {
	pub fn merge(&mut self, other: Self) {
		if other.max_lease_ttl_secs.is_some() {
			self.max_lease_ttl_secs = other.max_lease_ttl_secs;
		}
		if other.default_lease_ttl_secs.is_some() {
			self.default_lease_ttl_secs = other.default_lease_ttl_secs;
		}
		if other.tidy_enabled.is_some() {
			self.tidy_enabled = other.tidy_enabled;
		}
		if other.tidy_interval_secs.is_some() {
			self.tidy_interval_secs = other.tidy_interval_secs;
		}
		if other.storage_url.is_some() {
			self.storage_url = other.storage_url;
		}
	}

	pub fn finalize(self) -> AppRoleConfig {
		AppRoleConfig {
			max_lease_ttl_secs: self.max_lease_ttl_secs.unwrap_or(DEFAULT_LEASE_TTL_SECS),
			default_lease_ttl_secs: self
				.default_lease_ttl_secs
				.unwrap_or(DEFAULT_LEASE_TTL_SECS),
			tidy_enabled: self.tidy_enabled.unwrap_or(true),
			tidy_interval_secs: self.tidy_interval_secs.unwrap_or(DEFAULT_TIDY_INTERVAL_SECS),
			storage_url: self
				.storage_url
				.unwrap_or_else(|| DEFAULT_STORAGE_URL.to_string()),
		}
	}
}

/// Fully resolved AppRole configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppRoleConfig {
	pub max_lease_ttl_secs: u64,
	pub default_lease_ttl_secs: u64,
	pub tidy_enabled: bool,
	pub tidy_interval_secs: u64,
	/// `memory` or a `sqlite:` URL.
	pub storage_url: String,
}

impl Default for AppRoleConfig {
	fn default() -> Self {
		AppRoleConfigLayer::default().finalize()
	}
}

impl AppRoleConfig {
	pub fn system_view(&self) -> StaticSystemView {
		StaticSystemView {
			max_lease_ttl: chrono::Duration::seconds(self.max_lease_ttl_secs as i64),
			default_lease_ttl: chrono::Duration::seconds(self.default_lease_ttl_secs as i64),
		}
	}

	pub fn tidy_interval(&self) -> std::time::Duration {
		std::time::Duration::from_secs(self.tidy_interval_secs)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.max_lease_ttl_secs == 0 {
			return Err(ConfigError::Validation(
				"max_lease_ttl_secs must be greater than zero".to_string(),
			));
		}
		if self.max_lease_ttl_secs > i64::MAX as u64 / 1_000_000_000 {
			return Err(ConfigError::Validation(
				"max_lease_ttl_secs is too large".to_string(),
			));
		}
		if self.default_lease_ttl_secs > self.max_lease_ttl_secs {
			return Err(ConfigError::Validation(
				"default_lease_ttl_secs cannot exceed max_lease_ttl_secs".to_string(),
			));
		}
		if self.tidy_enabled && self.tidy_interval_secs == 0 {
			return Err(ConfigError::Validation(
				"tidy_interval_secs must be greater than zero when tidy is enabled".to_string(),
			));
		}
		if self.storage_url.trim().is_empty() {
			return Err(ConfigError::Validation("storage_url cannot be empty".to_string()));
		}
		Ok(())
	}
}

/// Source precedence levels (higher = overrides lower).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
	Defaults = 10,
	ConfigFile = 20,
	Environment = 50,
}

pub trait ConfigSource: Send + Sync {
	fn name(&self) -> &'static str;
	fn precedence(&self) -> Precedence;
	fn load(&self) -> Result<AppRoleConfigLayer, ConfigError>;
}

pub struct DefaultsSource;

impl ConfigSource for DefaultsSource {
	fn name(&self) -> &'static str {
		"defaults"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Defaults
	}

	fn load(&self) -> Result<AppRoleConfigLayer, ConfigError> {
		Ok(AppRoleConfigLayer::default())
	}
}

/// TOML file source. The settings live under an `[approle]` table; a missing
/// file contributes nothing.
pub struct TomlSource {
	path: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
struct TomlFile {
	#[serde(default)]
	approle: AppRoleConfigLayer,
}

impl TomlSource {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	pub fn system() -> Self {
		Self::new("/etc/loom/server.toml")
	}
}

impl ConfigSource for TomlSource {
	fn name(&self) -> &'static str {
		"toml-config"
	}

	fn precedence(&self) -> Precedence {
		Precedence::ConfigFile
	}

	fn load(&self) -> Result<AppRoleConfigLayer, ConfigError> {
		if !self.path.exists() {
			debug!(path = %self.path.display(), "config file not found, skipping");
			return Ok(AppRoleConfigLayer::default());
		}

		let content = std::fs::read_to_string(&self.path).map_err(|e| ConfigError::FileRead {
			path: self.path.clone(),
			source: e,
		})?;
		let file: TomlFile = toml::from_str(&content).map_err(|e| ConfigError::TomlParse {
			path: self.path.clone(),
			source: e,
		})?;

		trace!("parsed approle layer from TOML");
		Ok(file.approle)
	}
}

/// Environment variable source.
///
/// Convention: `LOOM_SERVER_APPROLE_<FIELD>`.
pub struct EnvSource;

impl ConfigSource for EnvSource {
	fn name(&self) -> &'static str {
		"environment"
	}

	fn precedence(&self) -> Precedence {
		Precedence::Environment
	}

	fn load(&self) -> Result<AppRoleConfigLayer, ConfigError> {
		Ok(AppRoleConfigLayer {
			max_lease_ttl_secs: env_u64("LOOM_SERVER_APPROLE_MAX_LEASE_TTL_SECS")?,
			default_lease_ttl_secs: env_u64("LOOM_SERVER_APPROLE_DEFAULT_LEASE_TTL_SECS")?,
			tidy_enabled: env_bool("LOOM_SERVER_APPROLE_TIDY_ENABLED"),
			tidy_interval_secs: env_u64("LOOM_SERVER_APPROLE_TIDY_INTERVAL_SECS")?,
			storage_url: env_var("LOOM_SERVER_APPROLE_STORAGE_URL"),
		})
	}
}

fn env_var(name: &str) -> Option<String> {
	std::env::var(name).ok().filter(|s| !s.is_empty())
}

fn env_bool(name: &str) -> Option<bool> {
	env_var(name).map(|v| v.eq_ignore_ascii_case("true") || v == "1")
}

fn env_u64(name: &str) -> Result<Option<u64>, ConfigError> {
	match env_var(name) {
		Some(v) => v.parse().map(Some).map_err(|_| ConfigError::InvalidValue {
			key: name.to_string(),
			message: format!("invalid u64 value '{v}'"),
		}),
		None => Ok(None),
	}
}

/// Merge `sources` in precedence order and validate the result.
pub fn load_from_sources(mut sources: Vec<Box<dyn ConfigSource>>) -> Result<AppRoleConfig, ConfigError> {
	sources.sort_by_key(|s| s.precedence());

	let mut merged = AppRoleConfigLayer::default();
	for source in sources {
		debug!(source = source.name(), "loading configuration source");
		merged.merge(source.load()?);
	}

	let config = merged.finalize();
	config.validate()?;
	info!(
		storage_url = %config.storage_url,
		max_lease_ttl_secs = config.max_lease_ttl_secs,
		tidy_enabled = config.tidy_enabled,
		"approle configuration loaded"
	);
	Ok(config)
}

/// Load configuration from defaults, the system config file and the
/// environment.
pub fn load_config() -> Result<AppRoleConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::system()),
		Box::new(EnvSource),
	])
}

/// Load configuration with a custom config file path.
pub fn load_config_with_file(path: impl Into<PathBuf>) -> Result<AppRoleConfig, ConfigError> {
	load_from_sources(vec![
		Box::new(DefaultsSource),
		Box::new(TomlSource::new(path)),
		Box::new(EnvSource),
	])
}
