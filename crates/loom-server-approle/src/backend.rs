// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! The AppRole backend: one instance per mount, shared across requests.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;
use tracing::instrument;

use crate::accessor::AccessorIndex;
use crate::config::AppRoleConfig;
use crate::context::RequestContext;
use crate::error::{AppRoleError, Result};
use crate::locks::Locks;
use crate::login::{LoginRequest, RenewResult, Validator};
use crate::role::{MintRequest, MintedSecretId, RoleField, RoleStore, RoleUpdate, RoleView};
use crate::secret_id::SecretIdStore;
use crate::storage::{open_storage, SharedStorage, Store};
use crate::system::{Salt, SystemView};
use crate::tidy::{Tidy, TidyReport};
use crate::types::{AuthResult, SecretIdRecord};

pub struct AppRoleBackend {
	storage: SharedStorage,
	system: Arc<dyn SystemView>,
	salt: Salt,
	locks: Locks,
	tidy_running: AtomicBool,
}

impl std::fmt::Debug for AppRoleBackend {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("AppRoleBackend")
			.field("salt", &self.salt)
			.finish_non_exhaustive()
	}
}

impl AppRoleBackend {
	/// Build a backend over `storage`, loading the salt or creating it on
	/// first use.
	pub async fn new(storage: SharedStorage, system: Arc<dyn SystemView>) -> Result<Self> {
		let ctx = RequestContext::new();
		let salt = Salt::load_or_create(Store::new(storage.as_ref(), &ctx)).await?;
		Ok(Self {
			storage,
			system,
			salt,
			locks: Locks::new(),
			tidy_running: AtomicBool::new(false),
		})
	}

	/// Validate `config`, open the configured storage and build a backend
	/// over it.
	pub async fn from_config(config: &AppRoleConfig) -> Result<Self> {
		config.validate()?;
		let storage = open_storage(&config.storage_url)
			.await
			.map_err(|e| AppRoleError::storage("opening storage", e))?;
		Self::new(storage, Arc::new(config.system_view())).await
	}

	pub fn storage(&self) -> &SharedStorage {
		&self.storage
	}

	pub fn system(&self) -> &dyn SystemView {
		self.system.as_ref()
	}

	fn store<'a>(&'a self, ctx: &'a RequestContext) -> Store<'a> {
		Store::new(self.storage.as_ref(), ctx)
	}

	fn accessors(&self) -> AccessorIndex<'_> {
		AccessorIndex::new(&self.salt, &self.locks.accessors)
	}

	fn secret_ids(&self) -> SecretIdStore<'_> {
		SecretIdStore::new(&self.locks, self.accessors(), self.system.as_ref())
	}

	fn roles(&self) -> RoleStore<'_> {
		RoleStore::new(&self.locks, &self.salt, self.system.as_ref(), self.secret_ids())
	}

	fn validator(&self) -> Validator<'_> {
		Validator::new(&self.locks, self.roles(), self.secret_ids(), self.system.as_ref())
	}

	fn tidy(&self) -> Tidy<'_> {
		Tidy::new(&self.tidy_running, &self.locks, self.roles(), self.secret_ids())
	}

	/// Create the role or update the fields present in `update`. Returns
	/// warnings for the caller.
	pub async fn write_role(
		&self,
		ctx: &RequestContext,
		name: &str,
		update: RoleUpdate,
	) -> Result<Vec<String>> {
		self
			.roles()
			.create_or_update(self.store(ctx), name, update)
			.await
	}

	pub async fn read_role(&self, ctx: &RequestContext, name: &str) -> Result<Option<RoleView>> {
		self.roles().read(self.store(ctx), name).await
	}

	pub async fn role_exists(&self, ctx: &RequestContext, name: &str) -> Result<bool> {
		self.roles().exists(self.store(ctx), name).await
	}

	/// Delete the role with its SecretIDs and RoleID index. Deleting a
	/// missing role succeeds.
	pub async fn delete_role(&self, ctx: &RequestContext, name: &str) -> Result<()> {
		self.roles().delete(self.store(ctx), name).await?;
		Ok(())
	}

	pub async fn list_roles(&self, ctx: &RequestContext) -> Result<Vec<String>> {
		self.roles().list(self.store(ctx)).await
	}

	pub async fn read_role_field(
		&self,
		ctx: &RequestContext,
		name: &str,
		field: RoleField,
	) -> Result<Option<Value>> {
		self.roles().read_field(self.store(ctx), name, field).await
	}

	/// Update fields of an existing role; a missing role is
	/// [`AppRoleError::NotFound`].
	pub async fn update_role_fields(
		&self,
		ctx: &RequestContext,
		name: &str,
		update: RoleUpdate,
	) -> Result<Vec<String>> {
		self
			.roles()
			.update_fields(self.store(ctx), name, update)
			.await
	}

	pub async fn reset_role_field(
		&self,
		ctx: &RequestContext,
		name: &str,
		field: RoleField,
	) -> Result<Vec<String>> {
		self.roles().reset_field(self.store(ctx), name, field).await
	}

	/// Mint a SecretID. With `request.secret_id` set this is the custom
	/// SecretID operation.
	pub async fn mint_secret_id(
		&self,
		ctx: &RequestContext,
		name: &str,
		request: MintRequest,
	) -> Result<MintedSecretId> {
		self
			.roles()
			.mint_secret_id(self.store(ctx), name, request)
			.await
	}

	pub async fn list_secret_id_accessors(&self, ctx: &RequestContext, name: &str) -> Result<Vec<String>> {
		self
			.roles()
			.list_secret_id_accessors(self.store(ctx), name)
			.await
	}

	pub async fn lookup_secret_id(
		&self,
		ctx: &RequestContext,
		name: &str,
		secret_id: &str,
	) -> Result<Option<SecretIdRecord>> {
		self
			.roles()
			.lookup_secret_id(self.store(ctx), name, secret_id)
			.await
	}

	/// Idempotent: destroying an unknown SecretID succeeds.
	pub async fn destroy_secret_id(&self, ctx: &RequestContext, name: &str, secret_id: &str) -> Result<()> {
		self
			.roles()
			.destroy_secret_id(self.store(ctx), name, secret_id)
			.await
	}

	pub async fn lookup_secret_id_accessor(
		&self,
		ctx: &RequestContext,
		name: &str,
		accessor: &str,
	) -> Result<Option<SecretIdRecord>> {
		self
			.roles()
			.lookup_secret_id_accessor(self.store(ctx), name, accessor)
			.await
	}

	pub async fn destroy_secret_id_accessor(
		&self,
		ctx: &RequestContext,
		name: &str,
		accessor: &str,
	) -> Result<()> {
		self
			.roles()
			.destroy_secret_id_accessor(self.store(ctx), name, accessor)
			.await
	}

	/// Validate the presented credentials. The caller's address is taken from
	/// `ctx.remote_addr`.
	#[instrument(skip(self, ctx, request), fields(request_id = %ctx.request_id))]
	pub async fn login(&self, ctx: &RequestContext, request: LoginRequest) -> Result<AuthResult> {
		self.validator().login(self.store(ctx), request).await
	}

	pub async fn renew(
		&self,
		ctx: &RequestContext,
		auth: &AuthResult,
		increment: Option<Duration>,
	) -> Result<RenewResult> {
		self
			.validator()
			.renew(self.store(ctx), auth, increment)
			.await
	}

	/// Run one tidy sweep. Fails fast with
	/// [`AppRoleError::TidyAlreadyRunning`] if a sweep is in progress.
	pub async fn tidy_secret_ids(&self, ctx: &RequestContext) -> Result<TidyReport> {
		self.tidy().run(self.store(ctx)).await
	}
}
