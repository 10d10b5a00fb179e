// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Role CRUD, field-level updates, the RoleID reverse index and the
//! role-scoped SecretID management operations.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Duration;
use serde_json::{json, Value};
use tokio::sync::RwLock;
use tracing::instrument;

use crate::cidr::{join_cidr_list, normalize_cidr_list, verify_subset};
use crate::error::{AppRoleError, Result};
use crate::hmac::{create_hmac, MAX_HMAC_INPUT_LENGTH};
use crate::locks::Locks;
use crate::secret_id::SecretIdStore;
use crate::storage::Store;
use crate::system::{Salt, SystemView};
use crate::types::{HmacKey, RoleIdIndex, RoleRecord, SecretIdRecord};

pub const ROLE_PREFIX: &str = "role/";
pub const ROLE_ID_PREFIX: &str = "role_id/";
pub const DEFAULT_POLICY: &str = "default";

const MISSING_INDEX_WARNING: &str = "Role identifier was missing an index back to role name. A new index has been added. Please report this observation.";
const NO_CONSTRAINT_WARNING: &str = "Role does not have any constraints set on it. Updates to this role will require a constraint to be set";
const MAX_TTL_WARNING: &str = "token_max_ttl is greater than the backend mount's maximum TTL value; issued tokens' max TTL value will be truncated";

/// Fields supplied on a role write. `None` leaves the field untouched on
/// update and selects the default on create.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoleUpdate {
	pub role_id: Option<String>,
	pub bind_secret_id: Option<bool>,
	pub bound_cidr_list: Option<Vec<String>>,
	pub policies: Option<Vec<String>>,
	pub secret_id_num_uses: Option<i64>,
	pub secret_id_ttl: Option<Duration>,
	pub token_ttl: Option<Duration>,
	pub token_max_ttl: Option<Duration>,
	pub token_num_uses: Option<i64>,
	pub period: Option<Duration>,
}

/// A role attribute addressable as `role/<name>/<field>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoleField {
	RoleId,
	Policies,
	BindSecretId,
	BoundCidrList,
	SecretIdNumUses,
	SecretIdTtl,
	TokenTtl,
	TokenMaxTtl,
	TokenNumUses,
	Period,
}

impl RoleField {
	pub const ALL: [RoleField; 10] = [
		RoleField::RoleId,
		RoleField::Policies,
		RoleField::BindSecretId,
		RoleField::BoundCidrList,
		RoleField::SecretIdNumUses,
		RoleField::SecretIdTtl,
		RoleField::TokenTtl,
		RoleField::TokenMaxTtl,
		RoleField::TokenNumUses,
		RoleField::Period,
	];

	pub fn from_segment(segment: &str) -> Option<Self> {
		Self::ALL.into_iter().find(|f| f.segment() == segment)
	}

	/// Path segment, e.g. `bound-cidr-list`.
	pub fn segment(&self) -> &'static str {
		match self {
			RoleField::RoleId => "role-id",
			RoleField::Policies => "policies",
			RoleField::BindSecretId => "bind-secret-id",
			RoleField::BoundCidrList => "bound-cidr-list",
			RoleField::SecretIdNumUses => "secret-id-num-uses",
			RoleField::SecretIdTtl => "secret-id-ttl",
			RoleField::TokenTtl => "token-ttl",
			RoleField::TokenMaxTtl => "token-max-ttl",
			RoleField::TokenNumUses => "token-num-uses",
			RoleField::Period => "period",
		}
	}

	/// Request and response field name, e.g. `bound_cidr_list`.
	pub fn key(&self) -> &'static str {
		match self {
			RoleField::RoleId => "role_id",
			RoleField::Policies => "policies",
			RoleField::BindSecretId => "bind_secret_id",
			RoleField::BoundCidrList => "bound_cidr_list",
			RoleField::SecretIdNumUses => "secret_id_num_uses",
			RoleField::SecretIdTtl => "secret_id_ttl",
			RoleField::TokenTtl => "token_ttl",
			RoleField::TokenMaxTtl => "token_max_ttl",
			RoleField::TokenNumUses => "token_num_uses",
			RoleField::Period => "period",
		}
	}

	fn value_of(&self, role: &RoleRecord) -> Value {
		match self {
			RoleField::RoleId => json!(role.role_id),
			_ => role
				.to_response_data()
				.remove(self.key())
				.unwrap_or(Value::Null),
		}
	}

	/// Update that resets this field to its type default.
	fn reset(&self) -> Result<RoleUpdate> {
		let mut update = RoleUpdate::default();
		match self {
			RoleField::RoleId => return Err(AppRoleError::invalid("role_id cannot be deleted")),
			RoleField::Policies => update.policies = Some(Vec::new()),
			RoleField::BindSecretId => update.bind_secret_id = Some(true),
			RoleField::BoundCidrList => update.bound_cidr_list = Some(Vec::new()),
			RoleField::SecretIdNumUses => update.secret_id_num_uses = Some(0),
			RoleField::SecretIdTtl => update.secret_id_ttl = Some(Duration::zero()),
			RoleField::TokenTtl => update.token_ttl = Some(Duration::zero()),
			RoleField::TokenMaxTtl => update.token_max_ttl = Some(Duration::zero()),
			RoleField::TokenNumUses => update.token_num_uses = Some(0),
			RoleField::Period => update.period = Some(Duration::zero()),
		}
		Ok(update)
	}
}

/// A role as read back, with any warnings produced while reading it.
#[derive(Debug, Clone)]
pub struct RoleView {
	pub role: RoleRecord,
	pub warnings: Vec<String>,
}

/// Parameters for minting a SecretID.
#[derive(Debug, Clone, Default)]
pub struct MintRequest {
	/// Operator-supplied SecretID; a UUID is generated when absent.
	pub secret_id: Option<String>,
	pub cidr_list: Vec<String>,
	pub metadata: BTreeMap<String, String>,
	pub num_uses: Option<i64>,
	pub ttl: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct MintedSecretId {
	pub secret_id: String,
	pub secret_id_accessor: String,
	pub secret_id_ttl: Duration,
	pub secret_id_num_uses: i64,
}

#[derive(Clone, Copy)]
pub struct RoleStore<'a> {
	locks: &'a Locks,
	salt: &'a Salt,
	system: &'a dyn SystemView,
	secret_ids: SecretIdStore<'a>,
}

impl<'a> RoleStore<'a> {
	pub fn new(
		locks: &'a Locks,
		salt: &'a Salt,
		system: &'a dyn SystemView,
		secret_ids: SecretIdStore<'a>,
	) -> Self {
		Self {
			locks,
			salt,
			system,
			secret_ids,
		}
	}

	pub(crate) fn role_lock(&self, name: &str) -> Result<&'a RwLock<()>> {
		let key = self.salt.salt_id(&name.to_lowercase())?;
		Ok(self.locks.roles.lock_for(&key))
	}

	/// Load a role without taking its lock.
	pub(crate) async fn load(&self, store: Store<'_>, name: &str) -> Result<Option<RoleRecord>> {
		let name = name.to_lowercase();
		let role: Option<RoleRecord> = store
			.get_json(&format!("{ROLE_PREFIX}{name}"), "role")
			.await?;
		Ok(role.map(|mut r| {
			r.name = name;
			r
		}))
	}

	/// Load a role under its read lock.
	pub(crate) async fn get(&self, store: Store<'_>, name: &str) -> Result<Option<RoleRecord>> {
		validate_role_name(name)?;
		let _guard = store.ctx().read(self.role_lock(name)?).await?;
		self.load(store, name).await
	}

	async fn require(&self, store: Store<'_>, name: &str) -> Result<RoleRecord> {
		self
			.load(store, name)
			.await?
			.ok_or_else(|| AppRoleError::NotFound(format!("role {name:?} does not exist")))
	}

	/// Create the role if missing, otherwise apply `update` to it. Returns
	/// warnings for the caller.
	#[instrument(skip(self, store, update), fields(role_name = %name))]
	pub(crate) async fn create_or_update(
		&self,
		store: Store<'_>,
		name: &str,
		update: RoleUpdate,
	) -> Result<Vec<String>> {
		validate_role_name(name)?;
		let _guard = store.ctx().write(self.role_lock(name)?).await?;

		let (mut role, previous_role_id) = match self.load(store, name).await? {
			Some(role) => {
				let previous = role.role_id.clone();
				(role, Some(previous))
			}
			None => (self.new_role(name, &update), None),
		};

		apply_update(&mut role, update)?;
		let warnings = self.validate(&role)?;
		self.persist(store, &role, previous_role_id.as_deref()).await?;

		if previous_role_id.is_none() {
			tracing::info!(role_name = %role.name, "role created");
		} else {
			tracing::debug!(role_name = %role.name, "role updated");
		}
		Ok(warnings)
	}

	fn new_role(&self, name: &str, update: &RoleUpdate) -> RoleRecord {
		RoleRecord {
			name: name.to_lowercase(),
			role_id: if update.role_id.is_some() {
				String::new()
			} else {
				uuid::Uuid::new_v4().to_string()
			},
			hmac_key: HmacKey::generate(),
			policies: vec![DEFAULT_POLICY.to_string()],
			secret_id_num_uses: 0,
			secret_id_ttl: Duration::zero(),
			token_ttl: Duration::zero(),
			token_max_ttl: Duration::zero(),
			token_num_uses: 0,
			period: Duration::zero(),
			bind_secret_id: true,
			bound_cidr_list: String::new(),
		}
	}

	/// Checks that span fields. Returns non-fatal warnings.
	fn validate(&self, role: &RoleRecord) -> Result<Vec<String>> {
		let mut warnings = Vec::new();
		if role.role_id.trim().is_empty() {
			return Err(AppRoleError::invalid("invalid role_id supplied"));
		}
		if !role.has_constraint() {
			return Err(AppRoleError::invalid(
				"at least one constraint should be enabled on the role",
			));
		}
		if !role.token_ttl.is_zero() && !role.token_max_ttl.is_zero() && role.token_ttl > role.token_max_ttl {
			return Err(AppRoleError::invalid(
				"token_ttl should not be greater than token_max_ttl",
			));
		}
		let max_lease = self.system.max_lease_ttl();
		if role.period > max_lease {
			return Err(AppRoleError::invalid(format!(
				"period of {}s is greater than the backend's maximum lease TTL of {}s",
				role.period.num_seconds(),
				max_lease.num_seconds()
			)));
		}
		if role.token_max_ttl > max_lease {
			warnings.push(MAX_TTL_WARNING.to_string());
		}
		Ok(warnings)
	}

	/// Write the role and keep the RoleID index in step with it. The caller
	/// holds the role's write lock.
	///
	/// A RoleID change is two-phase: role record, then new index, then the
	/// old index. A crash in between leaves a dangling old index, which login
	/// rejects and tidy removes.
	async fn persist(
		&self,
		store: Store<'_>,
		role: &RoleRecord,
		previous_role_id: Option<&str>,
	) -> Result<()> {
		let salted = self.salt.salt_id(&role.role_id)?;
		{
			let _guard = store
				.ctx()
				.write(self.locks.role_ids.lock_for(&salted))
				.await?;
			let existing: Option<RoleIdIndex> = store
				.get_json(&index_key(&salted), "role_id index")
				.await?;
			if let Some(existing) = &existing {
				if existing.name != role.name {
					return Err(AppRoleError::Conflict("role_id already in use".to_string()));
				}
			}

			store
				.put_json(&format!("{ROLE_PREFIX}{}", role.name), role, "role")
				.await?;

			if existing.is_none() || previous_role_id != Some(role.role_id.as_str()) {
				store
					.put_json(
						&index_key(&salted),
						&RoleIdIndex {
							name: role.name.clone(),
						},
						"role_id index",
					)
					.await?;
			}
		}

		if let Some(previous) = previous_role_id {
			if previous != role.role_id {
				self.delete_index_if_owned(store, previous, &role.name).await?;
				tracing::info!(role_name = %role.name, "role_id rotated");
			}
		}
		Ok(())
	}

	async fn delete_index_if_owned(&self, store: Store<'_>, role_id: &str, name: &str) -> Result<()> {
		let salted = self.salt.salt_id(role_id)?;
		let _guard = store
			.ctx()
			.write(self.locks.role_ids.lock_for(&salted))
			.await?;
		let key = index_key(&salted);
		let existing: Option<RoleIdIndex> = store.get_json(&key, "role_id index").await?;
		if matches!(&existing, Some(index) if index.name == name) {
			store.delete(&key, "role_id index").await?;
		}
		Ok(())
	}

	/// Name of the role owning `role_id`, if indexed.
	pub(crate) async fn role_name_for_id(&self, store: Store<'_>, role_id: &str) -> Result<Option<String>> {
		let salted = self.salt.salt_id(role_id)?;
		let _guard = store
			.ctx()
			.read(self.locks.role_ids.lock_for(&salted))
			.await?;
		let index: Option<RoleIdIndex> = store
			.get_json(&index_key(&salted), "role_id index")
			.await?;
		Ok(index.map(|i| i.name))
	}

	/// Remove the index entry at `salted` unless it belongs to the current
	/// RoleID of the role it names. Returns whether it was removed.
	pub(crate) async fn remove_dangling_index(&self, store: Store<'_>, salted: &str) -> Result<bool> {
		let key = index_key(salted);
		let index: Option<RoleIdIndex> = {
			let _guard = store
				.ctx()
				.read(self.locks.role_ids.lock_for(salted))
				.await?;
			store.get_json(&key, "role_id index").await?
		};
		let Some(index) = index else {
			return Ok(false);
		};

		let _role_guard = store.ctx().read(self.role_lock(&index.name)?).await?;
		if let Some(role) = self.load(store, &index.name).await? {
			if self.salt.salt_id(&role.role_id)? == salted {
				return Ok(false);
			}
		}

		let _guard = store
			.ctx()
			.write(self.locks.role_ids.lock_for(salted))
			.await?;
		let current: Option<RoleIdIndex> = store.get_json(&key, "role_id index").await?;
		if current.as_ref() != Some(&index) {
			return Ok(false);
		}
		store.delete(&key, "role_id index").await?;
		tracing::debug!(role_name = %index.name, "removed dangling role_id index");
		Ok(true)
	}

	pub(crate) async fn list_index_keys(&self, store: Store<'_>) -> Result<Vec<String>> {
		store.list(ROLE_ID_PREFIX, "role_id indexes").await
	}

	async fn index_present(&self, store: Store<'_>, role_id: &str) -> Result<bool> {
		Ok(self.role_name_for_id(store, role_id).await?.is_some())
	}

	/// Read a role. A missing RoleID index is recreated under the role's
	/// write lock and reported as a warning.
	#[instrument(skip(self, store), fields(role_name = %name))]
	pub(crate) async fn read(&self, store: Store<'_>, name: &str) -> Result<Option<RoleView>> {
		validate_role_name(name)?;
		let lock = self.role_lock(name)?;
		let mut warnings = Vec::new();

		{
			let _guard = store.ctx().read(lock).await?;
			let Some(role) = self.load(store, name).await? else {
				return Ok(None);
			};
			if !role.has_constraint() {
				warnings.push(NO_CONSTRAINT_WARNING.to_string());
			}
			if self.index_present(store, &role.role_id).await? {
				return Ok(Some(RoleView { role, warnings }));
			}
		}

		let _guard = store.ctx().write(lock).await?;
		let Some(role) = self.load(store, name).await? else {
			return Ok(None);
		};
		if !self.index_present(store, &role.role_id).await? {
			let salted = self.salt.salt_id(&role.role_id)?;
			let _index_guard = store
				.ctx()
				.write(self.locks.role_ids.lock_for(&salted))
				.await?;
			store
				.put_json(
					&index_key(&salted),
					&RoleIdIndex {
						name: role.name.clone(),
					},
					"role_id index",
				)
				.await?;
			tracing::warn!(role_name = %role.name, "recreated missing role_id index");
			warnings.push(MISSING_INDEX_WARNING.to_string());
		}
		Ok(Some(RoleView { role, warnings }))
	}

	pub(crate) async fn exists(&self, store: Store<'_>, name: &str) -> Result<bool> {
		Ok(self.get(store, name).await?.is_some())
	}

	/// Delete the role after flushing its SecretIDs and RoleID index.
	/// Returns whether the role existed.
	#[instrument(skip(self, store), fields(role_name = %name))]
	pub(crate) async fn delete(&self, store: Store<'_>, name: &str) -> Result<bool> {
		validate_role_name(name)?;
		let _guard = store.ctx().write(self.role_lock(name)?).await?;
		let Some(role) = self.load(store, name).await? else {
			return Ok(false);
		};

		self
			.secret_ids
			.flush(store, &role.name, &role.hmac_key)
			.await?;
		self
			.delete_index_if_owned(store, &role.role_id, &role.name)
			.await?;
		store
			.delete(&format!("{ROLE_PREFIX}{}", role.name), "role")
			.await?;

		tracing::info!(role_name = %role.name, "role deleted");
		Ok(true)
	}

	pub(crate) async fn list(&self, store: Store<'_>) -> Result<Vec<String>> {
		let _listing = store.ctx().read(&self.locks.secret_id_listing).await?;
		let names = store.list(ROLE_PREFIX, "roles").await?;
		Ok(names.into_iter().filter(|n| !n.ends_with('/')).collect())
	}

	pub(crate) async fn read_field(
		&self,
		store: Store<'_>,
		name: &str,
		field: RoleField,
	) -> Result<Option<Value>> {
		Ok(self.get(store, name).await?.map(|role| field.value_of(&role)))
	}

	/// Apply a partial update to an existing role.
	#[instrument(skip(self, store, update), fields(role_name = %name))]
	pub(crate) async fn update_fields(
		&self,
		store: Store<'_>,
		name: &str,
		update: RoleUpdate,
	) -> Result<Vec<String>> {
		validate_role_name(name)?;
		let _guard = store.ctx().write(self.role_lock(name)?).await?;
		let mut role = self.require(store, name).await?;
		let previous = role.role_id.clone();

		apply_update(&mut role, update)?;
		let warnings = self.validate(&role)?;
		self.persist(store, &role, Some(&previous)).await?;
		Ok(warnings)
	}

	pub(crate) async fn reset_field(
		&self,
		store: Store<'_>,
		name: &str,
		field: RoleField,
	) -> Result<Vec<String>> {
		self.update_fields(store, name, field.reset()?).await
	}

	/// Mint a SecretID under the role.
	#[instrument(skip(self, store, request), fields(role_name = %name))]
	pub(crate) async fn mint_secret_id(
		&self,
		store: Store<'_>,
		name: &str,
		request: MintRequest,
	) -> Result<MintedSecretId> {
		validate_role_name(name)?;
		let secret_id = match request.secret_id {
			Some(s) if s.trim().is_empty() => return Err(AppRoleError::invalid("missing secret_id")),
			Some(s) => s,
			None => uuid::Uuid::new_v4().to_string(),
		};
		if secret_id.len() > MAX_HMAC_INPUT_LENGTH {
			return Err(AppRoleError::invalid(format!(
				"secret_id is longer than maximum of {MAX_HMAC_INPUT_LENGTH} bytes"
			)));
		}

		let _guard = store.ctx().read(self.role_lock(name)?).await?;
		let role = self.require(store, name).await?;
		if !role.bind_secret_id {
			return Err(AppRoleError::invalid("bind_secret_id is not set on the role"));
		}

		let cidr_list = normalize_cidr_list(&request.cidr_list)?;
		verify_subset(&cidr_list, &role.bound_cidrs())?;

		let num_uses = match request.num_uses {
			Some(n) if n < 0 => return Err(AppRoleError::invalid("num_uses cannot be negative")),
			Some(n) if role.secret_id_num_uses > 0 && (n == 0 || n > role.secret_id_num_uses) => {
				return Err(AppRoleError::invalid(
					"num_uses cannot be higher than the role's secret_id_num_uses",
				))
			}
			Some(n) => n,
			None => role.secret_id_num_uses,
		};

		let ttl = match request.ttl {
			Some(t) if role.secret_id_ttl > Duration::zero() && (t.is_zero() || t > role.secret_id_ttl) => {
				return Err(AppRoleError::invalid(
					"ttl cannot be longer than the role's secret_id_ttl",
				))
			}
			Some(t) => t,
			None => role.secret_id_ttl,
		};

		let template = SecretIdRecord::template(num_uses, ttl, cidr_list, request.metadata);
		let record = self
			.secret_ids
			.register(store, &role.name, &secret_id, &role.hmac_key, template)
			.await?;

		Ok(MintedSecretId {
			secret_id,
			secret_id_accessor: record.secret_id_accessor,
			secret_id_ttl: if ttl.is_zero() {
				ttl
			} else {
				self.secret_ids.effective_ttl(ttl)
			},
			secret_id_num_uses: record.secret_id_num_uses,
		})
	}

	/// Look up a SecretID by value. A record whose accessor has gone missing
	/// is deleted and reported as invalid.
	pub(crate) async fn lookup_secret_id(
		&self,
		store: Store<'_>,
		name: &str,
		secret_id: &str,
	) -> Result<Option<SecretIdRecord>> {
		validate_role_name(name)?;
		require_value(secret_id, "secret_id")?;
		let _guard = store.ctx().read(self.role_lock(name)?).await?;
		let role = self.require(store, name).await?;

		let role_hmac = create_hmac(role.hmac_key.as_bytes(), &role.name)?;
		let sid_hmac = create_hmac(role.hmac_key.as_bytes(), secret_id)?;

		let _sid_guard = store
			.ctx()
			.write(self.locks.secret_ids.lock_for(&sid_hmac))
			.await?;
		let Some(record) = self
			.secret_ids
			.load_unlocked(store, &role_hmac, &sid_hmac)
			.await?
		else {
			return Ok(None);
		};

		let accessors = self.secret_ids.accessors();
		if accessors
			.lookup(store, &record.secret_id_accessor)
			.await?
			.is_none()
		{
			store
				.delete(&crate::secret_id::storage_key(&role_hmac, &sid_hmac), "secret ID")
				.await?;
			tracing::warn!(role_name = %role.name, "deleted secret ID without accessor");
			return Err(AppRoleError::invalid("invalid secret id"));
		}
		Ok(Some(record))
	}

	pub(crate) async fn destroy_secret_id(
		&self,
		store: Store<'_>,
		name: &str,
		secret_id: &str,
	) -> Result<()> {
		validate_role_name(name)?;
		require_value(secret_id, "secret_id")?;
		let _guard = store.ctx().read(self.role_lock(name)?).await?;
		let role = self.require(store, name).await?;
		self
			.secret_ids
			.destroy_by_value(store, &role.name, &role.hmac_key, secret_id)
			.await?;
		Ok(())
	}

	pub(crate) async fn lookup_secret_id_accessor(
		&self,
		store: Store<'_>,
		name: &str,
		accessor: &str,
	) -> Result<Option<SecretIdRecord>> {
		validate_role_name(name)?;
		require_value(accessor, "secret_id_accessor")?;
		let _guard = store.ctx().read(self.role_lock(name)?).await?;
		let role = self.require(store, name).await?;

		let entry = self
			.secret_ids
			.accessors()
			.lookup(store, accessor)
			.await?
			.ok_or_else(|| {
				AppRoleError::NotFound(format!(
					"failed to find accessor entry for secret_id_accessor: {accessor:?}"
				))
			})?;
		let role_hmac = create_hmac(role.hmac_key.as_bytes(), &role.name)?;
		self
			.secret_ids
			.get(store, &role_hmac, &entry.secret_id_hmac)
			.await
	}

	pub(crate) async fn destroy_secret_id_accessor(
		&self,
		store: Store<'_>,
		name: &str,
		accessor: &str,
	) -> Result<()> {
		validate_role_name(name)?;
		require_value(accessor, "secret_id_accessor")?;
		let _guard = store.ctx().read(self.role_lock(name)?).await?;
		let role = self.require(store, name).await?;

		let entry = self
			.secret_ids
			.accessors()
			.lookup(store, accessor)
			.await?
			.ok_or_else(|| {
				AppRoleError::NotFound(format!(
					"failed to find accessor entry for secret_id_accessor: {accessor:?}"
				))
			})?;
		let role_hmac = create_hmac(role.hmac_key.as_bytes(), &role.name)?;
		if !self
			.secret_ids
			.destroy(store, &role_hmac, &entry.secret_id_hmac)
			.await?
		{
			return Err(AppRoleError::invalid("invalid secret id accessor"));
		}
		Ok(())
	}

	pub(crate) async fn list_secret_id_accessors(&self, store: Store<'_>, name: &str) -> Result<Vec<String>> {
		validate_role_name(name)?;
		let _guard = store.ctx().read(self.role_lock(name)?).await?;
		let role = self.require(store, name).await?;
		self
			.secret_ids
			.list_accessors(store, &role.name, &role.hmac_key)
			.await
	}
}

pub fn index_key(salted_role_id: &str) -> String {
	format!("{ROLE_ID_PREFIX}{salted_role_id}")
}

fn require_value(value: &str, field: &str) -> Result<()> {
	if value.trim().is_empty() {
		return Err(AppRoleError::invalid(format!("missing {field}")));
	}
	Ok(())
}

fn apply_update(role: &mut RoleRecord, update: RoleUpdate) -> Result<()> {
	if let Some(role_id) = update.role_id {
		let role_id = role_id.trim().to_string();
		if role_id.is_empty() {
			return Err(AppRoleError::invalid("invalid role_id supplied"));
		}
		if role_id.len() > MAX_HMAC_INPUT_LENGTH {
			return Err(AppRoleError::invalid(format!(
				"role_id is longer than maximum of {MAX_HMAC_INPUT_LENGTH} bytes"
			)));
		}
		role.role_id = role_id;
	}
	if let Some(bind) = update.bind_secret_id {
		role.bind_secret_id = bind;
	}
	if let Some(cidrs) = update.bound_cidr_list {
		role.bound_cidr_list = join_cidr_list(&normalize_cidr_list(&cidrs)?);
	}
	if let Some(policies) = update.policies {
		role.policies = sanitize_policies(policies);
	}
	if let Some(n) = update.secret_id_num_uses {
		role.secret_id_num_uses = non_negative(n, "secret_id_num_uses")?;
	}
	if let Some(ttl) = update.secret_id_ttl {
		role.secret_id_ttl = non_negative_duration(ttl, "secret_id_ttl")?;
	}
	if let Some(ttl) = update.token_ttl {
		role.token_ttl = non_negative_duration(ttl, "token_ttl")?;
	}
	if let Some(ttl) = update.token_max_ttl {
		role.token_max_ttl = non_negative_duration(ttl, "token_max_ttl")?;
	}
	if let Some(n) = update.token_num_uses {
		role.token_num_uses = non_negative(n, "token_num_uses")?;
	}
	if let Some(period) = update.period {
		role.period = non_negative_duration(period, "period")?;
	}
	Ok(())
}

fn non_negative(n: i64, field: &str) -> Result<i64> {
	if n < 0 {
		return Err(AppRoleError::invalid(format!("{field} cannot be negative")));
	}
	Ok(n)
}

fn non_negative_duration(d: Duration, field: &str) -> Result<Duration> {
	if d < Duration::zero() {
		return Err(AppRoleError::invalid(format!("{field} cannot be negative")));
	}
	Ok(d)
}

/// Trim, lower-case, drop empties, dedup and sort. `root` absorbs every
/// other policy.
pub fn sanitize_policies(policies: Vec<String>) -> Vec<String> {
	let set: BTreeSet<String> = policies
		.iter()
		.flat_map(|p| p.split(','))
		.map(|p| p.trim().to_lowercase())
		.filter(|p| !p.is_empty())
		.collect();
	if set.contains("root") {
		return vec!["root".to_string()];
	}
	set.into_iter().collect()
}

/// Role names are word characters, optionally with `.` and `-` inside.
pub fn validate_role_name(name: &str) -> Result<()> {
	if name.is_empty() {
		return Err(AppRoleError::invalid("missing role_name"));
	}
	if name.len() > MAX_HMAC_INPUT_LENGTH {
		return Err(AppRoleError::invalid(format!(
			"role_name is longer than maximum of {MAX_HMAC_INPUT_LENGTH} bytes"
		)));
	}
	let is_word = |c: char| c.is_ascii_alphanumeric() || c == '_';
	let bytes: Vec<char> = name.chars().collect();
	let first_last_ok = is_word(bytes[0]) && is_word(bytes[bytes.len() - 1]);
	let inner_ok = bytes.iter().all(|&c| is_word(c) || c == '.' || c == '-');
	if !first_last_ok || !inner_ok {
		return Err(AppRoleError::invalid(format!("invalid role_name {name:?}")));
	}
	Ok(())
}
