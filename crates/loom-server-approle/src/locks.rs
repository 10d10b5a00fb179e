// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Striped reader/writer locks.
//!
//! A [`LockTable`] holds 256 slots addressed by the first two lowercase hex
//! characters of a key plus one fallback slot for every other key. Keys handed
//! to the table are HMAC or salted digests (or UUIDs), so the prefix is already
//! uniformly distributed and no further hashing is done.
//!
//! Acquisition order across tables is fixed:
//! role → SecretID listing → SecretID → accessor → RoleID index.
//! Within one table a task never holds two slots at once.

use tokio::sync::RwLock;

/// Number of hex-addressed slots.
pub const LOCK_SLOTS: usize = 256;

/// Index of the slot used for keys without a two character hex prefix.
pub const FALLBACK_SLOT: usize = LOCK_SLOTS;

pub struct LockTable {
	slots: Box<[RwLock<()>]>,
}

impl LockTable {
	pub fn new() -> Self {
		let slots = (0..=LOCK_SLOTS).map(|_| RwLock::new(())).collect();
		Self { slots }
	}

	/// The lock guarding `key`.
	pub fn lock_for(&self, key: &str) -> &RwLock<()> {
		&self.slots[slot_index(key)]
	}
}

impl Default for LockTable {
	fn default() -> Self {
		Self::new()
	}
}

/// Slot for `key`: the value of its first two characters when both are
/// lowercase hex digits, the fallback slot otherwise.
pub fn slot_index(key: &str) -> usize {
	let bytes = key.as_bytes();
	if bytes.len() < 2 {
		return FALLBACK_SLOT;
	}
	match (hex_value(bytes[0]), hex_value(bytes[1])) {
		(Some(hi), Some(lo)) => usize::from(hi << 4 | lo),
		_ => FALLBACK_SLOT,
	}
}

fn hex_value(b: u8) -> Option<u8> {
	match b {
		b'0'..=b'9' => Some(b - b'0'),
		b'a'..=b'f' => Some(b - b'a' + 10),
		_ => None,
	}
}

/// All lock tables used by the backend, one per record category.
#[derive(Default)]
pub struct Locks {
	pub roles: LockTable,
	pub role_ids: LockTable,
	pub secret_ids: LockTable,
	pub accessors: LockTable,
	/// Held for read while enumerating a role's SecretIDs and for write while
	/// flushing them.
	pub secret_id_listing: RwLock<()>,
}

impl Locks {
	pub fn new() -> Self {
		Self::default()
	}
}
