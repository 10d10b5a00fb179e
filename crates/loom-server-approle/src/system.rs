// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Mount-wide settings and the process salt.

use std::fmt;

use chrono::Duration;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{AppRoleError, Result};
use crate::hmac::create_hmac;
use crate::storage::Store;

/// Storage key holding the hex-encoded salt.
pub const SALT_KEY: &str = "salt";

const SALT_BYTES: usize = 32;

/// View of the settings owned by the surrounding server.
pub trait SystemView: Send + Sync {
	fn max_lease_ttl(&self) -> Duration;

	fn default_lease_ttl(&self) -> Duration;
}

/// Fixed lease limits, typically built from [`crate::config::AppRoleConfig`].
#[derive(Debug, Clone)]
pub struct StaticSystemView {
	pub max_lease_ttl: Duration,
	pub default_lease_ttl: Duration,
}

impl SystemView for StaticSystemView {
	fn max_lease_ttl(&self) -> Duration {
		self.max_lease_ttl
	}

	fn default_lease_ttl(&self) -> Duration {
		self.default_lease_ttl
	}
}

/// Process-wide key used to derive the storage keys of accessors and the
/// RoleID index. Loaded once and never changed afterwards.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Salt {
	key: Vec<u8>,
}

impl Salt {
	pub fn from_bytes(key: Vec<u8>) -> Self {
		Self { key }
	}

	/// Salted, hex-encoded identifier for `value`.
	pub fn salt_id(&self, value: &str) -> Result<String> {
		create_hmac(&self.key, value)
	}

	/// Load the salt stored at [`SALT_KEY`], generating and persisting a new
	/// one when absent.
	pub(crate) async fn load_or_create(store: Store<'_>) -> Result<Self> {
		if let Some(encoded) = store.get_json::<String>(SALT_KEY, "salt").await? {
			let key = hex::decode(&encoded)
				.map_err(|e| AppRoleError::Internal(format!("stored salt is not valid hex: {e}")))?;
			if key.is_empty() {
				return Err(AppRoleError::Internal("stored salt is empty".to_string()));
			}
			tracing::debug!("loaded existing salt");
			return Ok(Self::from_bytes(key));
		}

		let mut key = vec![0u8; SALT_BYTES];
		rand::thread_rng().fill_bytes(&mut key);
		store.put_json(SALT_KEY, &hex::encode(&key), "salt").await?;
		tracing::info!("generated new salt");
		Ok(Self::from_bytes(key))
	}
}

impl fmt::Debug for Salt {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("Salt([REDACTED])")
	}
}
