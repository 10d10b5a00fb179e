// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Credential validation for login and renewal of the resulting session.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::{Duration, Utc};
use tracing::instrument;

use crate::cidr::{ip_in_cidrs, is_subset};
use crate::error::{AppRoleError, Result};
use crate::hmac::create_hmac;
use crate::locks::Locks;
use crate::role::{sanitize_policies, RoleStore};
use crate::secret_id::{Consumed, SecretIdStore};
use crate::storage::Store;
use crate::system::SystemView;
use crate::types::{AuthResult, RoleRecord};

#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
	pub role_id: String,
	pub secret_id: Option<String>,
}

/// Lease values granted on renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenewResult {
	pub ttl: Duration,
	pub max_ttl: Duration,
	pub period: Duration,
}

#[derive(Clone, Copy)]
pub struct Validator<'a> {
	locks: &'a Locks,
	roles: RoleStore<'a>,
	secret_ids: SecretIdStore<'a>,
	system: &'a dyn SystemView,
}

/// Log the specific reason and return the generic credential error.
fn reject(role_name: Option<&str>, reason: &'static str) -> AppRoleError {
	tracing::debug!(role_name = role_name.unwrap_or(""), reason, "login rejected");
	AppRoleError::InvalidCredential
}

impl<'a> Validator<'a> {
	pub fn new(
		locks: &'a Locks,
		roles: RoleStore<'a>,
		secret_ids: SecretIdStore<'a>,
		system: &'a dyn SystemView,
	) -> Self {
		Self {
			locks,
			roles,
			secret_ids,
			system,
		}
	}

	#[instrument(skip(self, store, request), fields(request_id = %store.ctx().request_id))]
	pub(crate) async fn login(&self, store: Store<'_>, request: LoginRequest) -> Result<AuthResult> {
		let role_id = request.role_id.trim();
		if role_id.is_empty() {
			return Err(reject(None, "missing role_id"));
		}

		let name = match self.roles.role_name_for_id(store, role_id).await {
			Ok(Some(name)) => name,
			Ok(None) => return Err(reject(None, "unknown role_id")),
			Err(AppRoleError::InvalidInput(_)) => return Err(reject(None, "role_id too long")),
			Err(e) => return Err(e),
		};

		let _role_guard = store.ctx().read(self.roles.role_lock(&name)?).await?;
		let Some(role) = self.roles.load(store, &name).await? else {
			return Err(reject(Some(&name), "role_id index names a missing role"));
		};
		if role.role_id != role_id {
			return Err(reject(Some(&name), "role_id index is stale"));
		}

		let remote_addr = store.ctx().remote_addr;
		let bound_cidrs = role.bound_cidrs();
		if !bound_cidrs.is_empty() {
			let Some(ip) = remote_addr else {
				return Err(reject(Some(&name), "source address unknown"));
			};
			if !ip_in_cidrs(ip, &bound_cidrs)? {
				return Err(reject(Some(&name), "source address outside role bound_cidr_list"));
			}
		}

		let mut metadata = BTreeMap::new();
		if role.bind_secret_id {
			let secret_id = request.secret_id.as_deref().map(str::trim).unwrap_or("");
			if secret_id.is_empty() {
				return Err(reject(Some(&name), "missing secret_id"));
			}
			metadata = self
				.validate_secret_id(store, &role, secret_id, remote_addr)
				.await?;
		}
		metadata.insert("role_name".to_string(), role.name.clone());

		tracing::debug!(role_name = %role.name, "login succeeded");
		Ok(AuthResult {
			policies: role.policies.clone(),
			metadata,
			ttl: if role.period > Duration::zero() {
				role.period
			} else {
				role.token_ttl
			},
			max_ttl: role.token_max_ttl,
			period: role.period,
			num_uses: role.token_num_uses,
			alias_name: role.role_id.clone(),
			issued_at: Utc::now(),
		})
	}

	/// Check the SecretID against the role and take one use. The caller holds
	/// the role's read lock.
	async fn validate_secret_id(
		&self,
		store: Store<'_>,
		role: &RoleRecord,
		secret_id: &str,
		remote_addr: Option<IpAddr>,
	) -> Result<BTreeMap<String, String>> {
		let name = Some(role.name.as_str());
		let role_hmac = create_hmac(role.hmac_key.as_bytes(), &role.name)?;
		let sid_hmac = match create_hmac(role.hmac_key.as_bytes(), secret_id) {
			Ok(h) => h,
			Err(AppRoleError::InvalidInput(_)) => return Err(reject(name, "secret_id too long")),
			Err(e) => return Err(e),
		};
		let lock = self.locks.secret_ids.lock_for(&sid_hmac);

		let record = {
			let _guard = store.ctx().read(lock).await?;
			let Some(record) = self
				.secret_ids
				.load_unlocked(store, &role_hmac, &sid_hmac)
				.await?
			else {
				return Err(reject(name, "unknown secret_id"));
			};
			record
		};

		if record.is_expired_at(Utc::now()) {
			let _guard = store.ctx().write(lock).await?;
			if let Some(current) = self
				.secret_ids
				.load_unlocked(store, &role_hmac, &sid_hmac)
				.await?
			{
				if current.is_expired_at(Utc::now()) {
					self
						.secret_ids
						.destroy_locked(store, &role_hmac, &sid_hmac)
						.await?;
					tracing::debug!(accessor = %current.secret_id_accessor, "destroyed expired secret ID");
				}
			}
			return Err(reject(name, "secret_id expired"));
		}

		if !record.cidr_list.is_empty() {
			if !is_subset(&record.cidr_list, &role.bound_cidrs())? {
				return Err(reject(name, "secret_id cidr_list no longer within role bound_cidr_list"));
			}
			let Some(ip) = remote_addr else {
				return Err(reject(name, "source address unknown"));
			};
			if !ip_in_cidrs(ip, &record.cidr_list)? {
				return Err(reject(name, "source address outside secret_id cidr_list"));
			}
		}

		match self.secret_ids.consume(store, &role_hmac, &sid_hmac).await? {
			Consumed::NotFound => Err(reject(name, "secret_id removed before use was taken")),
			Consumed::Unlimited | Consumed::Decremented(_) | Consumed::Destroyed => Ok(record.metadata),
		}
	}

	/// Renew a session issued by [`Self::login`], using the role's current
	/// settings.
	#[instrument(skip(self, store, auth), fields(role_name = auth.role_name().unwrap_or("")))]
	pub(crate) async fn renew(
		&self,
		store: Store<'_>,
		auth: &AuthResult,
		increment: Option<Duration>,
	) -> Result<RenewResult> {
		let name = auth
			.role_name()
			.ok_or_else(|| AppRoleError::invalid("role_name missing from auth metadata"))?;
		let role = self.roles.get(store, name).await?.ok_or_else(|| {
			AppRoleError::NotFound(format!("role {name:?} does not exist during renewal"))
		})?;

		if sanitize_policies(role.policies.clone()) != sanitize_policies(auth.policies.clone()) {
			return Err(AppRoleError::invalid("policies have changed, not renewing"));
		}

		if role.period > Duration::zero() {
			return Ok(RenewResult {
				ttl: role.period,
				max_ttl: role.token_max_ttl,
				period: role.period,
			});
		}

		let system_max = self.system.max_lease_ttl();
		let max_ttl = if role.token_max_ttl > Duration::zero() {
			role.token_max_ttl.min(system_max)
		} else {
			system_max
		};
		let remaining = auth.issued_at + max_ttl - Utc::now();
		if remaining <= Duration::zero() {
			return Err(AppRoleError::invalid("past the max TTL, cannot renew"));
		}

		let requested = increment
			.filter(|d| *d > Duration::zero())
			.or_else(|| Some(role.token_ttl).filter(|d| *d > Duration::zero()))
			.unwrap_or_else(|| self.system.default_lease_ttl());

		Ok(RenewResult {
			ttl: requested.min(remaining),
			max_ttl,
			period: Duration::zero(),
		})
	}
}
