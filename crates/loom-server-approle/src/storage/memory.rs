// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{immediate_children, Storage, StorageEntry, StorageError};

/// Ordered in-process map. Used by tests and single-node deployments that do
/// not need durability.
#[derive(Debug, Default)]
pub struct InMemoryStorage {
	entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}

	pub async fn len(&self) -> usize {
		self.entries.read().await.len()
	}

	pub async fn is_empty(&self) -> bool {
		self.entries.read().await.is_empty()
	}
}

#[async_trait]
impl Storage for InMemoryStorage {
	async fn get(&self, key: &str) -> Result<Option<StorageEntry>, StorageError> {
		let entries = self.entries.read().await;
		Ok(entries
			.get(key)
			.map(|value| StorageEntry::new(key, value.clone())))
	}

	async fn put(&self, entry: StorageEntry) -> Result<(), StorageError> {
		self.entries.write().await.insert(entry.key, entry.value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.entries.write().await.remove(key);
		Ok(())
	}

	async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let entries = self.entries.read().await;
		let keys = entries
			.range(prefix.to_string()..)
			.map(|(k, _)| k.as_str())
			.take_while(|k| k.starts_with(prefix));
		Ok(immediate_children(prefix, keys))
	}
}
