// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqliteSynchronous};
use sqlx::Row;

use super::{immediate_children, Storage, StorageEntry, StorageError};

/// SQLite-backed storage holding every record in one key/value table.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
	pool: SqlitePool,
}

impl SqliteStorage {
	/// Connect to `database_url` (e.g. `sqlite:./approle.db`) with WAL
	/// journaling and create the entries table if needed.
	#[tracing::instrument(skip(database_url))]
	pub async fn connect(database_url: &str) -> Result<Self, StorageError> {
		let options = SqliteConnectOptions::from_str(database_url)
			.map_err(|e| StorageError::Backend(format!("Invalid database URL: {e}")))?
			.journal_mode(SqliteJournalMode::Wal)
			.synchronous(SqliteSynchronous::Normal)
			.create_if_missing(true);

		let pool = SqlitePool::connect_with(options).await?;
		let storage = Self::from_pool(pool).await?;

		tracing::debug!("approle storage pool created");
		Ok(storage)
	}

	pub async fn from_pool(pool: SqlitePool) -> Result<Self, StorageError> {
		sqlx::query(
			r#"
			CREATE TABLE IF NOT EXISTS approle_entries (
				key TEXT PRIMARY KEY,
				value BLOB NOT NULL
			)
			"#,
		)
		.execute(&pool)
		.await?;

		Ok(Self { pool })
	}
}

#[async_trait]
impl Storage for SqliteStorage {
	async fn get(&self, key: &str) -> Result<Option<StorageEntry>, StorageError> {
		let row = sqlx::query("SELECT value FROM approle_entries WHERE key = ?")
			.bind(key)
			.fetch_optional(&self.pool)
			.await?;

		match row {
			Some(row) => {
				let value: Vec<u8> = row.try_get("value")?;
				Ok(Some(StorageEntry::new(key, value)))
			}
			None => Ok(None),
		}
	}

	async fn put(&self, entry: StorageEntry) -> Result<(), StorageError> {
		sqlx::query(
			r#"
			INSERT INTO approle_entries (key, value) VALUES (?, ?)
			ON CONFLICT(key) DO UPDATE SET value = excluded.value
			"#,
		)
		.bind(&entry.key)
		.bind(&entry.value)
		.execute(&self.pool)
		.await?;
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		sqlx::query("DELETE FROM approle_entries WHERE key = ?")
			.bind(key)
			.execute(&self.pool)
			.await?;
		Ok(())
	}

	async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		// substr comparison keeps `_` and `%` in keys literal.
		let rows = sqlx::query(
			r#"
			SELECT key FROM approle_entries
			WHERE substr(key, 1, length(?1)) = ?1
			ORDER BY key
			"#,
		)
		.bind(prefix)
		.fetch_all(&self.pool)
		.await?;

		let mut keys = Vec::with_capacity(rows.len());
		for row in rows {
			let key: String = row.try_get("key")?;
			keys.push(key);
		}
		Ok(immediate_children(prefix, keys.iter().map(String::as_str)))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use tempfile::TempDir;

	async fn open() -> (TempDir, SqliteStorage) {
		let dir = tempfile::tempdir().unwrap();
		let url = format!("sqlite:{}", dir.path().join("approle.db").display());
		let storage = SqliteStorage::connect(&url).await.unwrap();
		(dir, storage)
	}

	#[tokio::test]
	async fn round_trips_entries() {
		let (_dir, storage) = open().await;
		storage
			.put(StorageEntry::new("role/web", br#"{"a":1}"#.to_vec()))
			.await
			.unwrap();
		storage
			.put(StorageEntry::new("role/web", br#"{"a":2}"#.to_vec()))
			.await
			.unwrap();

		let entry = storage.get("role/web").await.unwrap().unwrap();
		assert_eq!(entry.value, br#"{"a":2}"#);

		storage.delete("role/web").await.unwrap();
		assert!(storage.get("role/web").await.unwrap().is_none());
	}

	#[tokio::test]
	async fn list_treats_wildcards_literally() {
		let (_dir, storage) = open().await;
		for key in ["secret_id/a_b/1", "secret_id/axb/1", "secret_id/a_b/2", "accessor/1"] {
			storage.put(StorageEntry::new(key, b"{}".to_vec())).await.unwrap();
		}
		assert_eq!(storage.list("secret_id/a_b/").await.unwrap(), vec!["1", "2"]);
		assert_eq!(storage.list("secret_id/").await.unwrap(), vec!["a_b/", "axb/"]);
	}

	#[tokio::test]
	async fn data_survives_reconnect() {
		let dir = tempfile::tempdir().unwrap();
		let url = format!("sqlite:{}", dir.path().join("approle.db").display());
		{
			let storage = SqliteStorage::connect(&url).await.unwrap();
			storage.put(StorageEntry::new("salt", b"\"00\"".to_vec())).await.unwrap();
		}
		let storage = SqliteStorage::connect(&url).await.unwrap();
		assert!(storage.get("salt").await.unwrap().is_some());
	}
}
