// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! SecretID storage and its state machine.
//!
//! Records live at `secret_id/<hmac(role name)>/<hmac(secret id)>`, both HMACs
//! keyed with the role's HMAC key. The SecretID HMAC doubles as the lock key.

use chrono::{Duration, Utc};
use tracing::instrument;

use crate::accessor::AccessorIndex;
use crate::error::{AppRoleError, Result};
use crate::hmac::create_hmac;
use crate::locks::Locks;
use crate::storage::Store;
use crate::system::SystemView;
use crate::types::{AccessorRecord, HmacKey, SecretIdRecord};

pub const SECRET_ID_PREFIX: &str = "secret_id/";

pub fn role_prefix(role_hmac: &str) -> String {
	format!("{SECRET_ID_PREFIX}{role_hmac}/")
}

pub fn storage_key(role_hmac: &str, secret_id_hmac: &str) -> String {
	format!("{SECRET_ID_PREFIX}{role_hmac}/{secret_id_hmac}")
}

/// Outcome of consuming one use of a SecretID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consumed {
	/// Unlimited SecretID; nothing changed.
	Unlimited,
	/// One use was taken; this many remain.
	Decremented(i64),
	/// The last use was taken and the SecretID destroyed.
	Destroyed,
	/// The record vanished before the use could be taken.
	NotFound,
}

#[derive(Clone, Copy)]
pub struct SecretIdStore<'a> {
	locks: &'a Locks,
	accessors: AccessorIndex<'a>,
	system: &'a dyn SystemView,
}

impl<'a> SecretIdStore<'a> {
	pub fn new(locks: &'a Locks, accessors: AccessorIndex<'a>, system: &'a dyn SystemView) -> Self {
		Self {
			locks,
			accessors,
			system,
		}
	}

	pub fn accessors(&self) -> AccessorIndex<'a> {
		self.accessors
	}

	/// Expiry implied by `ttl` at mint time. Negative or over-long TTLs are
	/// capped to the mount's maximum lease TTL.
	pub fn effective_ttl(&self, ttl: Duration) -> Duration {
		let max = self.system.max_lease_ttl();
		if ttl < Duration::zero() || ttl > max {
			max
		} else {
			ttl
		}
	}

	/// Persist a new SecretID built from `template` and return it with its
	/// accessor and timestamps filled in.
	#[instrument(skip(self, store, secret_id, hmac_key, template), fields(role_name = %role_name))]
	pub(crate) async fn register(
		&self,
		store: Store<'_>,
		role_name: &str,
		secret_id: &str,
		hmac_key: &HmacKey,
		mut template: SecretIdRecord,
	) -> Result<SecretIdRecord> {
		let role_hmac = create_hmac(hmac_key.as_bytes(), role_name)?;
		let sid_hmac = create_hmac(hmac_key.as_bytes(), secret_id)?;
		let key = storage_key(&role_hmac, &sid_hmac);

		let _guard = store
			.ctx()
			.write(self.locks.secret_ids.lock_for(&sid_hmac))
			.await?;

		if store.get_raw(&key, "secret ID").await?.is_some() {
			return Err(AppRoleError::Conflict("SecretID is already registered".to_string()));
		}

		let now = Utc::now();
		template.creation_time = now;
		template.last_updated_time = now;
		template.expiration_time = if template.secret_id_ttl.is_zero() {
			None
		} else {
			Some(now + self.effective_ttl(template.secret_id_ttl))
		};
		template.secret_id_accessor = uuid::Uuid::new_v4().to_string();

		// Accessor first: an interruption leaves an orphan accessor for tidy
		// rather than a SecretID nobody can manage.
		self
			.accessors
			.create(
				store,
				&template.secret_id_accessor,
				&AccessorRecord {
					secret_id_hmac: sid_hmac.clone(),
					role_hmac: Some(role_hmac.clone()),
				},
			)
			.await?;
		store.put_json(&key, &template, "secret ID").await?;

		tracing::debug!(accessor = %template.secret_id_accessor, "secret ID registered");
		Ok(template)
	}

	/// Load a record without taking its lock. Legacy fields are upgraded in
	/// memory only.
	pub(crate) async fn load_unlocked(
		&self,
		store: Store<'_>,
		role_hmac: &str,
		sid_hmac: &str,
	) -> Result<Option<SecretIdRecord>> {
		let record: Option<SecretIdRecord> = store
			.get_json(&storage_key(role_hmac, sid_hmac), "secret ID")
			.await?;
		Ok(record.map(|mut r| {
			r.upgrade_legacy();
			r
		}))
	}

	/// Fetch a record under its read lock, rewriting legacy records under
	/// the write lock.
	pub(crate) async fn get(
		&self,
		store: Store<'_>,
		role_hmac: &str,
		sid_hmac: &str,
	) -> Result<Option<SecretIdRecord>> {
		let lock = self.locks.secret_ids.lock_for(sid_hmac);
		let key = storage_key(role_hmac, sid_hmac);
		{
			let _guard = store.ctx().read(lock).await?;
			let record: Option<SecretIdRecord> = store.get_json(&key, "secret ID").await?;
			match record {
				Some(r) if r.secret_id_num_uses_deprecated == 0 => return Ok(Some(r)),
				None => return Ok(None),
				Some(_) => {}
			}
		}

		let _guard = store.ctx().write(lock).await?;
		let record: Option<SecretIdRecord> = store.get_json(&key, "secret ID").await?;
		let Some(mut record) = record else {
			return Ok(None);
		};
		if record.upgrade_legacy() {
			store.put_json(&key, &record, "secret ID").await?;
			tracing::debug!(accessor = %record.secret_id_accessor, "upgraded legacy secret ID use count");
		}
		Ok(Some(record))
	}

	/// Take one use of the SecretID, destroying it when the last use goes.
	pub(crate) async fn consume(
		&self,
		store: Store<'_>,
		role_hmac: &str,
		sid_hmac: &str,
	) -> Result<Consumed> {
		let lock = self.locks.secret_ids.lock_for(sid_hmac);
		{
			let _guard = store.ctx().read(lock).await?;
			match self.load_unlocked(store, role_hmac, sid_hmac).await? {
				None => return Ok(Consumed::NotFound),
				Some(r) if r.secret_id_num_uses == 0 => return Ok(Consumed::Unlimited),
				Some(_) => {}
			}
		}

		let _guard = store.ctx().write(lock).await?;
		let key = storage_key(role_hmac, sid_hmac);
		let Some(mut record) = self.load_unlocked(store, role_hmac, sid_hmac).await? else {
			return Ok(Consumed::NotFound);
		};

		match record.secret_id_num_uses {
			0 => Ok(Consumed::Unlimited),
			1 => {
				self
					.accessors
					.delete(store, &record.secret_id_accessor)
					.await?;
				store.delete(&key, "secret ID").await?;
				tracing::debug!(accessor = %record.secret_id_accessor, "secret ID exhausted and destroyed");
				Ok(Consumed::Destroyed)
			}
			n => {
				record.secret_id_num_uses = n - 1;
				record.last_updated_time = Utc::now();
				store.put_json(&key, &record, "secret ID").await?;
				Ok(Consumed::Decremented(n - 1))
			}
		}
	}

	/// Remove the SecretID and its accessor. Missing records are not an
	/// error; returns whether anything was deleted.
	pub(crate) async fn destroy(
		&self,
		store: Store<'_>,
		role_hmac: &str,
		sid_hmac: &str,
	) -> Result<bool> {
		let _guard = store
			.ctx()
			.write(self.locks.secret_ids.lock_for(sid_hmac))
			.await?;
		self.destroy_locked(store, role_hmac, sid_hmac).await
	}

	/// [`Self::destroy`] for callers already holding the SecretID write lock.
	pub(crate) async fn destroy_locked(
		&self,
		store: Store<'_>,
		role_hmac: &str,
		sid_hmac: &str,
	) -> Result<bool> {
		let Some(record) = self.load_unlocked(store, role_hmac, sid_hmac).await? else {
			return Ok(false);
		};
		self
			.accessors
			.delete(store, &record.secret_id_accessor)
			.await?;
		store
			.delete(&storage_key(role_hmac, sid_hmac), "secret ID")
			.await?;
		Ok(true)
	}

	/// Destroy the SecretID identified by its plain value.
	pub(crate) async fn destroy_by_value(
		&self,
		store: Store<'_>,
		role_name: &str,
		hmac_key: &HmacKey,
		secret_id: &str,
	) -> Result<bool> {
		let role_hmac = create_hmac(hmac_key.as_bytes(), role_name)?;
		let sid_hmac = create_hmac(hmac_key.as_bytes(), secret_id)?;
		self.destroy(store, &role_hmac, &sid_hmac).await
	}

	/// Destroy every SecretID issued under the role. Entries removed
	/// concurrently (by tidy, for example) are skipped.
	#[instrument(skip(self, store, hmac_key), fields(role_name = %role_name))]
	pub(crate) async fn flush(
		&self,
		store: Store<'_>,
		role_name: &str,
		hmac_key: &HmacKey,
	) -> Result<usize> {
		let role_hmac = create_hmac(hmac_key.as_bytes(), role_name)?;
		let _listing = store.ctx().write(&self.locks.secret_id_listing).await?;

		let children = store
			.list(&role_prefix(&role_hmac), "secret IDs of role")
			.await?;
		let mut removed = 0;
		for sid_hmac in children.iter().filter(|c| !c.is_empty() && !c.ends_with('/')) {
			if self.destroy(store, &role_hmac, sid_hmac).await? {
				removed += 1;
			}
		}

		tracing::debug!(removed, "flushed secret IDs");
		Ok(removed)
	}

	/// Accessors of every SecretID issued under the role, in storage order.
	pub(crate) async fn list_accessors(
		&self,
		store: Store<'_>,
		role_name: &str,
		hmac_key: &HmacKey,
	) -> Result<Vec<String>> {
		let role_hmac = create_hmac(hmac_key.as_bytes(), role_name)?;
		let _listing = store.ctx().read(&self.locks.secret_id_listing).await?;

		let children = store
			.list(&role_prefix(&role_hmac), "secret IDs of role")
			.await?;
		let mut accessors = Vec::with_capacity(children.len());
		for sid_hmac in children.iter().filter(|c| !c.is_empty() && !c.ends_with('/')) {
			let _guard = store
				.ctx()
				.read(self.locks.secret_ids.lock_for(sid_hmac))
				.await?;
			if let Some(record) = self.load_unlocked(store, &role_hmac, sid_hmac).await? {
				accessors.push(record.secret_id_accessor);
			}
		}
		Ok(accessors)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::context::RequestContext;
	use crate::storage::InMemoryStorage;
	use crate::system::{Salt, StaticSystemView};
	use std::collections::BTreeMap;
	use std::sync::Arc;

	struct Fixture {
		storage: InMemoryStorage,
		locks: Locks,
		salt: Salt,
		system: StaticSystemView,
		ctx: RequestContext,
	}

	impl Fixture {
		fn new() -> Self {
			Self {
				storage: InMemoryStorage::new(),
				locks: Locks::new(),
				salt: Salt::from_bytes(b"test-salt".to_vec()),
				system: StaticSystemView {
					max_lease_ttl: Duration::seconds(3600),
					default_lease_ttl: Duration::seconds(3600),
				},
				ctx: RequestContext::new(),
			}
		}

		fn store(&self) -> Store<'_> {
			Store::new(&self.storage, &self.ctx)
		}

		fn secret_ids(&self) -> SecretIdStore<'_> {
			SecretIdStore::new(
				&self.locks,
				AccessorIndex::new(&self.salt, &self.locks.accessors),
				&self.system,
			)
		}
	}

	fn template(num_uses: i64, ttl_secs: i64) -> SecretIdRecord {
		SecretIdRecord::template(num_uses, Duration::seconds(ttl_secs), vec![], BTreeMap::new())
	}

	#[tokio::test]
	async fn register_writes_record_and_accessor() {
		let fx = Fixture::new();
		let key = HmacKey::new("k");
		let record = fx
			.secret_ids()
			.register(fx.store(), "role1", "s3cret", &key, template(0, 60))
			.await
			.unwrap();

		assert!(!record.secret_id_accessor.is_empty());
		let exp = record.expiration_time.unwrap();
		assert_eq!((exp - record.creation_time).num_seconds(), 60);

		let accessor = fx
			.secret_ids()
			.accessors()
			.lookup(fx.store(), &record.secret_id_accessor)
			.await
			.unwrap()
			.unwrap();
		assert_eq!(accessor.secret_id_hmac, create_hmac(key.as_bytes(), "s3cret").unwrap());
		assert_eq!(accessor.role_hmac.unwrap(), create_hmac(key.as_bytes(), "role1").unwrap());
	}

	#[tokio::test]
	async fn register_twice_conflicts() {
		let fx = Fixture::new();
		let key = HmacKey::new("k");
		let ids = fx.secret_ids();
		ids.register(fx.store(), "r", "dup", &key, template(0, 0)).await.unwrap();
		let err = ids
			.register(fx.store(), "r", "dup", &key, template(0, 0))
			.await
			.unwrap_err();
		assert!(matches!(err, AppRoleError::Conflict(_)));
	}

	#[tokio::test]
	async fn ttl_is_capped_to_max_lease() {
		let fx = Fixture::new();
		let key = HmacKey::new("k");
		let ids = fx.secret_ids();

		let long = ids.register(fx.store(), "r", "a", &key, template(0, 999_999)).await.unwrap();
		let exp = long.expiration_time.unwrap();
		assert_eq!((exp - long.creation_time).num_seconds(), 3600);
		assert_eq!(long.secret_id_ttl, Duration::seconds(999_999));

		let negative = ids.register(fx.store(), "r", "b", &key, template(0, -5)).await.unwrap();
		let exp = negative.expiration_time.unwrap();
		assert_eq!((exp - negative.creation_time).num_seconds(), 3600);

		let forever = ids.register(fx.store(), "r", "c", &key, template(0, 0)).await.unwrap();
		assert!(forever.expiration_time.is_none());
	}

	#[tokio::test]
	async fn consume_counts_down_then_destroys() {
		let fx = Fixture::new();
		let key = HmacKey::new("k");
		let ids = fx.secret_ids();
		let record = ids.register(fx.store(), "r", "s", &key, template(2, 0)).await.unwrap();
		let role_hmac = create_hmac(key.as_bytes(), "r").unwrap();
		let sid_hmac = create_hmac(key.as_bytes(), "s").unwrap();

		assert_eq!(
			ids.consume(fx.store(), &role_hmac, &sid_hmac).await.unwrap(),
			Consumed::Decremented(1)
		);
		assert_eq!(
			ids.consume(fx.store(), &role_hmac, &sid_hmac).await.unwrap(),
			Consumed::Destroyed
		);
		assert_eq!(
			ids.consume(fx.store(), &role_hmac, &sid_hmac).await.unwrap(),
			Consumed::NotFound
		);
		assert!(ids
			.accessors()
			.lookup(fx.store(), &record.secret_id_accessor)
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn unlimited_secret_id_is_untouched() {
		let fx = Fixture::new();
		let key = HmacKey::new("k");
		let ids = fx.secret_ids();
		let before = ids.register(fx.store(), "r", "s", &key, template(0, 0)).await.unwrap();
		let role_hmac = create_hmac(key.as_bytes(), "r").unwrap();
		let sid_hmac = create_hmac(key.as_bytes(), "s").unwrap();

		for _ in 0..3 {
			assert_eq!(
				ids.consume(fx.store(), &role_hmac, &sid_hmac).await.unwrap(),
				Consumed::Unlimited
			);
		}
		let after = ids.get(fx.store(), &role_hmac, &sid_hmac).await.unwrap().unwrap();
		assert_eq!(after.last_updated_time, before.last_updated_time);
	}

	#[tokio::test]
	async fn concurrent_consumers_never_exceed_use_count() {
		let fx = Arc::new(Fixture::new());
		let key = HmacKey::new("k");
		fx.secret_ids()
			.register(fx.store(), "r", "s", &key, template(3, 0))
			.await
			.unwrap();
		let role_hmac = create_hmac(key.as_bytes(), "r").unwrap();
		let sid_hmac = create_hmac(key.as_bytes(), "s").unwrap();

		let mut handles = Vec::new();
		for _ in 0..8 {
			let fx = fx.clone();
			let role_hmac = role_hmac.clone();
			let sid_hmac = sid_hmac.clone();
			handles.push(tokio::spawn(async move {
				fx.secret_ids()
					.consume(fx.store(), &role_hmac, &sid_hmac)
					.await
					.unwrap()
			}));
		}

		let mut successes = 0;
		for handle in handles {
			match handle.await.unwrap() {
				Consumed::Decremented(_) | Consumed::Destroyed => successes += 1,
				Consumed::NotFound => {}
				Consumed::Unlimited => panic!("use-capped secret ID reported unlimited"),
			}
		}
		assert_eq!(successes, 3);
	}

	#[tokio::test]
	async fn legacy_use_count_is_rewritten_on_get() {
		let fx = Fixture::new();
		let key = HmacKey::new("k");
		let ids = fx.secret_ids();
		let mut record = ids.register(fx.store(), "r", "s", &key, template(1, 0)).await.unwrap();
		let role_hmac = create_hmac(key.as_bytes(), "r").unwrap();
		let sid_hmac = create_hmac(key.as_bytes(), "s").unwrap();

		record.secret_id_num_uses_deprecated = 7;
		fx.store()
			.put_json(&storage_key(&role_hmac, &sid_hmac), &record, "secret ID")
			.await
			.unwrap();

		let upgraded = ids.get(fx.store(), &role_hmac, &sid_hmac).await.unwrap().unwrap();
		assert_eq!(upgraded.secret_id_num_uses, 7);
		assert_eq!(upgraded.secret_id_num_uses_deprecated, 0);

		let raw = fx
			.store()
			.get_json::<serde_json::Value>(&storage_key(&role_hmac, &sid_hmac), "secret ID")
			.await
			.unwrap()
			.unwrap();
		assert!(raw.get("SecretIDNumUses").is_none());
		assert_eq!(raw["secret_id_num_uses"], 7);
	}

	#[tokio::test]
	async fn destroy_is_idempotent() {
		let fx = Fixture::new();
		let key = HmacKey::new("k");
		let ids = fx.secret_ids();
		ids.register(fx.store(), "r", "s", &key, template(0, 0)).await.unwrap();

		assert!(ids.destroy_by_value(fx.store(), "r", &key, "s").await.unwrap());
		assert!(!ids.destroy_by_value(fx.store(), "r", &key, "s").await.unwrap());
		assert!(fx.storage.is_empty().await);
	}

	#[tokio::test]
	async fn flush_removes_every_secret_id_of_role() {
		let fx = Fixture::new();
		let key = HmacKey::new("k");
		let other = HmacKey::new("other");
		let ids = fx.secret_ids();
		for s in ["a", "b", "c"] {
			ids.register(fx.store(), "r", s, &key, template(0, 0)).await.unwrap();
		}
		ids.register(fx.store(), "keep", "z", &other, template(0, 0)).await.unwrap();

		let listed = ids.list_accessors(fx.store(), "r", &key).await.unwrap();
		assert_eq!(listed.len(), 3);

		assert_eq!(ids.flush(fx.store(), "r", &key).await.unwrap(), 3);
		assert!(ids.list_accessors(fx.store(), "r", &key).await.unwrap().is_empty());
		assert_eq!(ids.list_accessors(fx.store(), "keep", &other).await.unwrap().len(), 1);
		assert_eq!(ids.accessors().list_salted(fx.store()).await.unwrap().len(), 1);
	}
}
