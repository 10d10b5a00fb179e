// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! HMAC-SHA256 index derivation.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{AppRoleError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Longest value accepted as HMAC input, in bytes. Role names and SecretIDs
/// share this limit.
pub const MAX_HMAC_INPUT_LENGTH: usize = 4096;

/// Hex-encoded HMAC-SHA256 of `value` under `key`.
pub fn create_hmac(key: &[u8], value: &str) -> Result<String> {
	if key.is_empty() {
		return Err(AppRoleError::Internal("invalid HMAC key".to_string()));
	}
	if value.len() > MAX_HMAC_INPUT_LENGTH {
		return Err(AppRoleError::invalid(format!(
			"value is longer than maximum of {MAX_HMAC_INPUT_LENGTH} bytes"
		)));
	}
	let mut mac = HmacSha256::new_from_slice(key)
		.map_err(|e| AppRoleError::Internal(format!("failed to initialise HMAC: {e}")))?;
	mac.update(value.as_bytes());
	Ok(hex::encode(mac.finalize().into_bytes()))
}
