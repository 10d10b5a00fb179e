// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Hierarchical key/value storage.
//!
//! Keys are `/` separated paths. [`Storage::list`] returns the immediate
//! children of a prefix; children that have descendants of their own are
//! returned with a trailing `/`.

mod memory;
mod sqlite;

pub use memory::InMemoryStorage;
pub use sqlite::SqliteStorage;

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::context::RequestContext;
use crate::error::{AppRoleError, Result};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
	#[error("Database error: {0}")]
	Sqlx(#[from] sqlx::Error),

	#[error("storage operation cancelled")]
	Cancelled,

	#[error("Storage backend error: {0}")]
	Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageEntry {
	pub key: String,
	pub value: Vec<u8>,
}

impl StorageEntry {
	pub fn new(key: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
		Self {
			key: key.into(),
			value: value.into(),
		}
	}

	pub fn json<T: Serialize>(key: impl Into<String>, value: &T) -> Result<Self> {
		Ok(Self::new(key, serde_json::to_vec(value)?))
	}
}

#[async_trait]
pub trait Storage: Send + Sync {
	async fn get(&self, key: &str) -> std::result::Result<Option<StorageEntry>, StorageError>;

	async fn put(&self, entry: StorageEntry) -> std::result::Result<(), StorageError>;

	/// Deleting a missing key is not an error.
	async fn delete(&self, key: &str) -> std::result::Result<(), StorageError>;

	async fn list(&self, prefix: &str) -> std::result::Result<Vec<String>, StorageError>;
}

pub type SharedStorage = Arc<dyn Storage>;

/// Open the storage driver named by `url`.
///
/// `memory` selects [`InMemoryStorage`]; `sqlite:` URLs open a
/// [`SqliteStorage`] pool.
pub async fn open_storage(url: &str) -> std::result::Result<SharedStorage, StorageError> {
	if url == "memory" {
		return Ok(Arc::new(InMemoryStorage::new()));
	}
	if url.starts_with("sqlite:") {
		let storage = SqliteStorage::connect(url).await?;
		return Ok(Arc::new(storage));
	}
	Err(StorageError::Backend(format!("unsupported storage url: {url}")))
}

/// Immediate children of `prefix` among `keys`, sorted and deduplicated.
pub(crate) fn immediate_children<'a>(prefix: &str, keys: impl Iterator<Item = &'a str>) -> Vec<String> {
	let mut out = BTreeSet::new();
	for key in keys {
		let Some(rest) = key.strip_prefix(prefix) else {
			continue;
		};
		if rest.is_empty() {
			continue;
		}
		match rest.find('/') {
			Some(idx) => out.insert(rest[..=idx].to_string()),
			None => out.insert(rest.to_string()),
		};
	}
	out.into_iter().collect()
}

/// Storage bound to a request: every call races the request's cancellation
/// token and errors are annotated with the operation they belong to.
#[derive(Clone, Copy)]
pub(crate) struct Store<'a> {
	storage: &'a dyn Storage,
	ctx: &'a RequestContext,
}

impl<'a> Store<'a> {
	pub(crate) fn new(storage: &'a dyn Storage, ctx: &'a RequestContext) -> Self {
		Self { storage, ctx }
	}

	pub(crate) fn ctx(&self) -> &'a RequestContext {
		self.ctx
	}

	pub(crate) async fn get_raw(&self, key: &str, what: &str) -> Result<Option<StorageEntry>> {
		self
			.ctx
			.guard(async {
				self
					.storage
					.get(key)
					.await
					.map_err(|e| AppRoleError::storage(format!("reading {what}"), e))
			})
			.await
	}

	/// Load and decode the JSON record at `key`. An entry that is present but
	/// empty or undecodable is an internal error.
	pub(crate) async fn get_json<T: DeserializeOwned>(&self, key: &str, what: &str) -> Result<Option<T>> {
		let Some(entry) = self.get_raw(key, what).await? else {
			return Ok(None);
		};
		if entry.value.is_empty() {
			return Err(AppRoleError::Internal(format!(
				"storage entry for {what} is present but has no content"
			)));
		}
		serde_json::from_slice(&entry.value)
			.map(Some)
			.map_err(|e| AppRoleError::Internal(format!("failed to decode {what}: {e}")))
	}

	pub(crate) async fn put_json<T: Serialize>(&self, key: &str, value: &T, what: &str) -> Result<()> {
		let entry = StorageEntry::json(key, value)?;
		self
			.ctx
			.guard(async {
				self
					.storage
					.put(entry)
					.await
					.map_err(|e| AppRoleError::storage(format!("writing {what}"), e))
			})
			.await
	}

	pub(crate) async fn delete(&self, key: &str, what: &str) -> Result<()> {
		self
			.ctx
			.guard(async {
				self
					.storage
					.delete(key)
					.await
					.map_err(|e| AppRoleError::storage(format!("deleting {what}"), e))
			})
			.await
	}

	pub(crate) async fn list(&self, prefix: &str, what: &str) -> Result<Vec<String>> {
		self
			.ctx
			.guard(async {
				self
					.storage
					.list(prefix)
					.await
					.map_err(|e| AppRoleError::storage(format!("listing {what}"), e))
			})
			.await
	}
}
