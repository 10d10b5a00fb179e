// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persisted records and the authentication result handed to token issuance.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::cidr::split_cidr_list;

/// Per-role key for the HMACs that locate the role's SecretIDs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct HmacKey(String);

impl HmacKey {
	pub fn generate() -> Self {
		Self(uuid::Uuid::new_v4().to_string())
	}

	pub fn new(key: impl Into<String>) -> Self {
		Self(key.into())
	}

	pub fn as_bytes(&self) -> &[u8] {
		self.0.as_bytes()
	}
}

impl fmt::Debug for HmacKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("HmacKey([REDACTED])")
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
	/// Lower-cased role name. Derived from the storage key, not persisted.
	#[serde(skip)]
	pub name: String,

	pub role_id: String,

	pub hmac_key: HmacKey,

	#[serde(default)]
	pub policies: Vec<String>,

	#[serde(default)]
	pub secret_id_num_uses: i64,

	#[serde(default = "zero_duration", with = "duration_nanos")]
	pub secret_id_ttl: Duration,

	#[serde(default = "zero_duration", with = "duration_nanos")]
	pub token_ttl: Duration,

	#[serde(default = "zero_duration", with = "duration_nanos")]
	pub token_max_ttl: Duration,

	#[serde(default)]
	pub token_num_uses: i64,

	#[serde(default = "zero_duration", with = "duration_nanos")]
	pub period: Duration,

	#[serde(default)]
	pub bind_secret_id: bool,

	/// Comma-joined canonical CIDR blocks.
	#[serde(default)]
	pub bound_cidr_list: String,
}

impl RoleRecord {
	pub fn bound_cidrs(&self) -> Vec<String> {
		split_cidr_list(&self.bound_cidr_list)
	}

	/// A role must require a SecretID or restrict source addresses.
	pub fn has_constraint(&self) -> bool {
		self.bind_secret_id || !self.bound_cidr_list.trim().is_empty()
	}

	/// External view: durations in seconds, CIDRs as a list.
	pub fn to_response_data(&self) -> Map<String, Value> {
		let mut data = Map::new();
		data.insert("bind_secret_id".into(), json!(self.bind_secret_id));
		data.insert("bound_cidr_list".into(), json!(self.bound_cidrs()));
		data.insert("policies".into(), json!(self.policies));
		data.insert("secret_id_num_uses".into(), json!(self.secret_id_num_uses));
		data.insert("secret_id_ttl".into(), json!(self.secret_id_ttl.num_seconds()));
		data.insert("token_ttl".into(), json!(self.token_ttl.num_seconds()));
		data.insert("token_max_ttl".into(), json!(self.token_max_ttl.num_seconds()));
		data.insert("token_num_uses".into(), json!(self.token_num_uses));
		data.insert("period".into(), json!(self.period.num_seconds()));
		data
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretIdRecord {
	pub secret_id_accessor: String,

	#[serde(default)]
	pub secret_id_num_uses: i64,

	#[serde(default = "zero_duration", with = "duration_nanos")]
	pub secret_id_ttl: Duration,

	pub creation_time: DateTime<Utc>,

	pub last_updated_time: DateTime<Utc>,

	#[serde(default, with = "zero_time")]
	pub expiration_time: Option<DateTime<Utc>>,

	#[serde(default)]
	pub cidr_list: Vec<String>,

	#[serde(default)]
	pub metadata: BTreeMap<String, String>,

	/// Use count written by older releases.
	#[serde(rename = "SecretIDNumUses", default, skip_serializing_if = "is_zero")]
	pub secret_id_num_uses_deprecated: i64,
}

impl SecretIdRecord {
	/// A fresh, unregistered SecretID carrying the given constraints.
	pub fn template(
		num_uses: i64,
		ttl: Duration,
		cidr_list: Vec<String>,
		metadata: BTreeMap<String, String>,
	) -> Self {
		let now = Utc::now();
		Self {
			secret_id_accessor: String::new(),
			secret_id_num_uses: num_uses,
			secret_id_ttl: ttl,
			creation_time: now,
			last_updated_time: now,
			expiration_time: None,
			cidr_list,
			metadata,
			secret_id_num_uses_deprecated: 0,
		}
	}

	pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
		matches!(self.expiration_time, Some(exp) if exp <= now)
	}

	/// Fold the legacy use count into the canonical field. Returns true when
	/// the record changed and must be rewritten.
	pub fn upgrade_legacy(&mut self) -> bool {
		if self.secret_id_num_uses_deprecated == 0 {
			return false;
		}
		self.secret_id_num_uses = self
			.secret_id_num_uses
			.max(self.secret_id_num_uses_deprecated);
		self.secret_id_num_uses_deprecated = 0;
		true
	}

	pub fn to_response_data(&self) -> Map<String, Value> {
		let mut data = Map::new();
		data.insert("secret_id_accessor".into(), json!(self.secret_id_accessor));
		data.insert("secret_id_num_uses".into(), json!(self.secret_id_num_uses));
		data.insert("secret_id_ttl".into(), json!(self.secret_id_ttl.num_seconds()));
		data.insert("creation_time".into(), json!(format_time(self.creation_time)));
		data.insert(
			"expiration_time".into(),
			json!(self.expiration_time.map_or_else(|| ZERO_TIME.to_string(), format_time)),
		);
		data.insert(
			"last_updated_time".into(),
			json!(format_time(self.last_updated_time)),
		);
		data.insert("metadata".into(), json!(self.metadata));
		data.insert("cidr_list".into(), json!(self.cidr_list));
		data
	}
}

/// Public handle for a SecretID, stored under the salted accessor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessorRecord {
	pub secret_id_hmac: String,

	/// Absent on records written before the owning role was tracked.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub role_hmac: Option<String>,
}

/// Reverse index from a salted RoleID to its role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleIdIndex {
	pub name: String,
}

/// Outcome of a successful login, handed to token issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthResult {
	pub policies: Vec<String>,
	pub metadata: BTreeMap<String, String>,
	#[serde(with = "duration_nanos")]
	pub ttl: Duration,
	#[serde(with = "duration_nanos")]
	pub max_ttl: Duration,
	#[serde(with = "duration_nanos")]
	pub period: Duration,
	pub num_uses: i64,
	pub alias_name: String,
	pub issued_at: DateTime<Utc>,
}

impl AuthResult {
	pub fn role_name(&self) -> Option<&str> {
		self.metadata.get("role_name").map(String::as_str)
	}

	pub fn to_response_data(&self) -> Map<String, Value> {
		let mut data = Map::new();
		data.insert("policies".into(), json!(self.policies));
		data.insert("metadata".into(), json!(self.metadata));
		data.insert("ttl".into(), json!(self.ttl.num_seconds()));
		data.insert("max_ttl".into(), json!(self.max_ttl.num_seconds()));
		data.insert("period".into(), json!(self.period.num_seconds()));
		data.insert("num_uses".into(), json!(self.num_uses));
		data.insert("alias_name".into(), json!(self.alias_name));
		data
	}
}

/// Wire form of an unset timestamp.
pub const ZERO_TIME: &str = "0001-01-01T00:00:00Z";

fn format_time(t: DateTime<Utc>) -> String {
	t.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

fn is_zero(v: &i64) -> bool {
	*v == 0
}

fn zero_duration() -> Duration {
	Duration::zero()
}

/// `chrono::Duration` as signed integer nanoseconds.
pub(crate) mod duration_nanos {
	use chrono::Duration;
	use serde::ser::Error as _;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
		let nanos = d
			.num_nanoseconds()
			.ok_or_else(|| S::Error::custom("duration does not fit in i64 nanoseconds"))?;
		s.serialize_i64(nanos)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
		Ok(Duration::nanoseconds(i64::deserialize(d)?))
	}
}

/// Optional timestamp whose absence is written as [`super::ZERO_TIME`].
pub(crate) mod zero_time {
	use chrono::{DateTime, Utc};
	use serde::{Deserialize, Deserializer, Serializer};

	use super::{format_time, ZERO_TIME};

	pub fn serialize<S: Serializer>(t: &Option<DateTime<Utc>>, s: S) -> Result<S::Ok, S::Error> {
		match t {
			Some(t) => s.serialize_str(&format_time(*t)),
			None => s.serialize_str(ZERO_TIME),
		}
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<DateTime<Utc>>, D::Error> {
		let Some(raw) = Option::<String>::deserialize(d)? else {
			return Ok(None);
		};
		if raw.is_empty() || raw == ZERO_TIME {
			return Ok(None);
		}
		let parsed = DateTime::parse_from_rfc3339(&raw).map_err(serde::de::Error::custom)?;
		let parsed = parsed.with_timezone(&Utc);
		if parsed.timestamp() <= zero_timestamp() {
			return Ok(None);
		}
		Ok(Some(parsed))
	}

	fn zero_timestamp() -> i64 {
		DateTime::parse_from_rfc3339(ZERO_TIME)
			.map(|t| t.timestamp())
			.unwrap_or(i64::MIN)
	}
}
