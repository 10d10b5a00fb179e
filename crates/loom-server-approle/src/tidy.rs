// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Garbage collection of expired SecretIDs and orphaned index entries.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::error::{AppRoleError, Result};
use crate::locks::Locks;
use crate::role::RoleStore;
use crate::secret_id::{role_prefix, storage_key, SecretIdStore, SECRET_ID_PREFIX};
use crate::storage::Store;
use crate::types::AccessorRecord;

/// Counts of what one sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TidyReport {
	pub expired_secret_ids: usize,
	pub secret_ids_without_accessor: usize,
	pub orphan_accessors: usize,
	pub dangling_role_id_indexes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SecretIdOutcome {
	Kept,
	Expired,
	MissingAccessor,
}

/// Clears the running flag when the sweep ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}

#[derive(Clone, Copy)]
pub struct Tidy<'a> {
	running: &'a AtomicBool,
	locks: &'a Locks,
	roles: RoleStore<'a>,
	secret_ids: SecretIdStore<'a>,
}

impl<'a> Tidy<'a> {
	pub fn new(
		running: &'a AtomicBool,
		locks: &'a Locks,
		roles: RoleStore<'a>,
		secret_ids: SecretIdStore<'a>,
	) -> Self {
		Self {
			running,
			locks,
			roles,
			secret_ids,
		}
	}

	/// Run one sweep. A sweep already in progress makes this return
	/// [`AppRoleError::TidyAlreadyRunning`] immediately. Failures on single
	/// records do not stop the sweep; they are returned together as
	/// [`AppRoleError::TidyIncomplete`].
	#[instrument(skip(self, store))]
	pub(crate) async fn run(&self, store: Store<'_>) -> Result<TidyReport> {
		if self
			.running
			.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.is_err()
		{
			return Err(AppRoleError::TidyAlreadyRunning);
		}
		let _running = RunningGuard(self.running);

		let mut report = TidyReport::default();
		let mut errors = Vec::new();

		self.sweep_secret_ids(store, &mut report, &mut errors).await?;
		self.sweep_accessors(store, &mut report, &mut errors).await?;
		self.sweep_role_id_indexes(store, &mut report, &mut errors).await?;

		info!(
			expired_secret_ids = report.expired_secret_ids,
			secret_ids_without_accessor = report.secret_ids_without_accessor,
			orphan_accessors = report.orphan_accessors,
			dangling_role_id_indexes = report.dangling_role_id_indexes,
			errors = errors.len(),
			"tidy completed"
		);

		if errors.is_empty() {
			Ok(report)
		} else {
			Err(AppRoleError::TidyIncomplete(errors))
		}
	}

	async fn sweep_secret_ids(
		&self,
		store: Store<'_>,
		report: &mut TidyReport,
		errors: &mut Vec<String>,
	) -> Result<()> {
		let role_dirs = store.list(SECRET_ID_PREFIX, "secret ID roles").await?;
		for dir in role_dirs.iter().filter(|d| d.ends_with('/')) {
			let role_hmac = dir.trim_end_matches('/');
			let children = match store.list(&role_prefix(role_hmac), "secret IDs of role").await {
				Ok(children) => children,
				Err(AppRoleError::Cancelled) => return Err(AppRoleError::Cancelled),
				Err(e) => {
					errors.push(format!("listing secret IDs under {role_hmac}: {e}"));
					continue;
				}
			};

			for sid_hmac in children.iter().filter(|c| !c.ends_with('/')) {
				match self.tidy_secret_id(store, role_hmac, sid_hmac).await {
					Ok(SecretIdOutcome::Kept) => {}
					Ok(SecretIdOutcome::Expired) => report.expired_secret_ids += 1,
					Ok(SecretIdOutcome::MissingAccessor) => report.secret_ids_without_accessor += 1,
					Err(AppRoleError::Cancelled) => return Err(AppRoleError::Cancelled),
					Err(e) => {
						warn!(error = %e, "tidy failed on secret ID");
						errors.push(format!("secret ID {role_hmac}/{sid_hmac}: {e}"));
					}
				}
			}
		}
		Ok(())
	}

	async fn tidy_secret_id(
		&self,
		store: Store<'_>,
		role_hmac: &str,
		sid_hmac: &str,
	) -> Result<SecretIdOutcome> {
		let _guard = store
			.ctx()
			.write(self.locks.secret_ids.lock_for(sid_hmac))
			.await?;
		let Some(record) = self
			.secret_ids
			.load_unlocked(store, role_hmac, sid_hmac)
			.await?
		else {
			return Ok(SecretIdOutcome::Kept);
		};

		if record.is_expired_at(Utc::now()) {
			self
				.secret_ids
				.destroy_locked(store, role_hmac, sid_hmac)
				.await?;
			return Ok(SecretIdOutcome::Expired);
		}

		let accessor = self
			.secret_ids
			.accessors()
			.lookup(store, &record.secret_id_accessor)
			.await?;
		if accessor.is_none() {
			store
				.delete(&storage_key(role_hmac, sid_hmac), "secret ID")
				.await?;
			return Ok(SecretIdOutcome::MissingAccessor);
		}
		Ok(SecretIdOutcome::Kept)
	}

	async fn sweep_accessors(
		&self,
		store: Store<'_>,
		report: &mut TidyReport,
		errors: &mut Vec<String>,
	) -> Result<()> {
		let accessors = self.secret_ids.accessors();
		let salted_keys = accessors.list_salted(store).await?;
		let mut role_dirs: Option<Vec<String>> = None;

		for salted in salted_keys.iter().filter(|k| !k.ends_with('/')) {
			let entry = match accessors.lookup_salted(store, salted).await {
				Ok(Some(entry)) => entry,
				Ok(None) => continue,
				Err(AppRoleError::Cancelled) => return Err(AppRoleError::Cancelled),
				Err(e) => {
					errors.push(format!("accessor {salted}: {e}"));
					continue;
				}
			};

			if entry.role_hmac.is_none() && role_dirs.is_none() {
				match store.list(SECRET_ID_PREFIX, "secret ID roles").await {
					Ok(dirs) => role_dirs = Some(dirs),
					Err(AppRoleError::Cancelled) => return Err(AppRoleError::Cancelled),
					Err(e) => {
						warn!(error = %e, "tidy failed listing roles for legacy accessor");
						errors.push(format!("accessor {salted}: {e}"));
						continue;
					}
				}
			}
			let dirs = role_dirs.as_deref().unwrap_or(&[]);

			match self.tidy_accessor(store, salted, &entry, dirs).await {
				Ok(true) => report.orphan_accessors += 1,
				Ok(false) => {}
				Err(AppRoleError::Cancelled) => return Err(AppRoleError::Cancelled),
				Err(e) => {
					warn!(error = %e, "tidy failed on accessor");
					errors.push(format!("accessor {salted}: {e}"));
				}
			}
		}
		Ok(())
	}

	/// Remove the accessor at `salted` if no SecretID backs it. The SecretID
	/// read lock is held across the check so a registration in flight is seen
	/// complete.
	async fn tidy_accessor(
		&self,
		store: Store<'_>,
		salted: &str,
		entry: &AccessorRecord,
		role_dirs: &[String],
	) -> Result<bool> {
		let _guard = store
			.ctx()
			.read(self.locks.secret_ids.lock_for(&entry.secret_id_hmac))
			.await?;

		let referenced = match &entry.role_hmac {
			Some(role_hmac) => store
				.get_raw(&storage_key(role_hmac, &entry.secret_id_hmac), "secret ID")
				.await?
				.is_some(),
			None => {
				let mut found = false;
				for dir in role_dirs.iter().filter(|d| d.ends_with('/')) {
					let role_hmac = dir.trim_end_matches('/');
					if store
						.get_raw(&storage_key(role_hmac, &entry.secret_id_hmac), "secret ID")
						.await?
						.is_some()
					{
						found = true;
						break;
					}
				}
				found
			}
		};
		if referenced {
			return Ok(false);
		}

		self
			.secret_ids
			.accessors()
			.delete_salted_if_refers_to(store, salted, &entry.secret_id_hmac)
			.await
	}

	async fn sweep_role_id_indexes(
		&self,
		store: Store<'_>,
		report: &mut TidyReport,
		errors: &mut Vec<String>,
	) -> Result<()> {
		let keys = self.roles.list_index_keys(store).await?;
		for salted in keys.iter().filter(|k| !k.ends_with('/')) {
			match self.roles.remove_dangling_index(store, salted).await {
				Ok(true) => report.dangling_role_id_indexes += 1,
				Ok(false) => {}
				Err(AppRoleError::Cancelled) => return Err(AppRoleError::Cancelled),
				Err(e) => {
					warn!(error = %e, "tidy failed on role_id index");
					errors.push(format!("role_id index {salted}: {e}"));
				}
			}
		}
		Ok(())
	}
}
