// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Salted index from a public SecretID accessor to the SecretID's HMAC.

use crate::error::Result;
use crate::locks::LockTable;
use crate::storage::Store;
use crate::system::Salt;
use crate::types::AccessorRecord;

pub const ACCESSOR_PREFIX: &str = "accessor/";

/// Accessor records live at `accessor/<salt_id(accessor)>`. The salted id is
/// also the lock key, so operations that only know the salted form (tidy
/// walking storage) and those that know the plain accessor share one lock.
#[derive(Clone, Copy)]
pub struct AccessorIndex<'a> {
	salt: &'a Salt,
	locks: &'a LockTable,
}

impl<'a> AccessorIndex<'a> {
	pub fn new(salt: &'a Salt, locks: &'a LockTable) -> Self {
		Self { salt, locks }
	}

	pub fn salted(&self, accessor: &str) -> Result<String> {
		self.salt.salt_id(accessor)
	}

	pub(crate) async fn create(
		&self,
		store: Store<'_>,
		accessor: &str,
		record: &AccessorRecord,
	) -> Result<()> {
		let salted = self.salted(accessor)?;
		let _guard = store.ctx().write(self.locks.lock_for(&salted)).await?;
		store
			.put_json(&storage_key(&salted), record, "secret ID accessor")
			.await
	}

	pub(crate) async fn lookup(&self, store: Store<'_>, accessor: &str) -> Result<Option<AccessorRecord>> {
		let salted = self.salted(accessor)?;
		self.lookup_salted(store, &salted).await
	}

	pub(crate) async fn lookup_salted(
		&self,
		store: Store<'_>,
		salted: &str,
	) -> Result<Option<AccessorRecord>> {
		let _guard = store.ctx().read(self.locks.lock_for(salted)).await?;
		store
			.get_json(&storage_key(salted), "secret ID accessor")
			.await
	}

	/// Idempotent.
	pub(crate) async fn delete(&self, store: Store<'_>, accessor: &str) -> Result<()> {
		let salted = self.salted(accessor)?;
		self.delete_salted(store, &salted).await
	}

	pub(crate) async fn delete_salted(&self, store: Store<'_>, salted: &str) -> Result<()> {
		let _guard = store.ctx().write(self.locks.lock_for(salted)).await?;
		store
			.delete(&storage_key(salted), "secret ID accessor")
			.await
	}

	/// Delete the record at `salted` only if it still refers to
	/// `secret_id_hmac`. Returns whether a record was removed.
	pub(crate) async fn delete_salted_if_refers_to(
		&self,
		store: Store<'_>,
		salted: &str,
		secret_id_hmac: &str,
	) -> Result<bool> {
		let _guard = store.ctx().write(self.locks.lock_for(salted)).await?;
		let key = storage_key(salted);
		let current: Option<AccessorRecord> = store.get_json(&key, "secret ID accessor").await?;
		match current {
			Some(record) if record.secret_id_hmac == secret_id_hmac => {
				store.delete(&key, "secret ID accessor").await?;
				Ok(true)
			}
			_ => Ok(false),
		}
	}

	pub(crate) async fn list_salted(&self, store: Store<'_>) -> Result<Vec<String>> {
		store.list(ACCESSOR_PREFIX, "secret ID accessors").await
	}
}

pub fn storage_key(salted: &str) -> String {
	format!("{ACCESSOR_PREFIX}{salted}")
}
