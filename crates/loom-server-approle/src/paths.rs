// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Logical path routing.
//!
//! Requests address the backend as `(operation, path, fields)`. Durations are
//! given in seconds (or as `30s`, `5m`, `2h`, `1d`), lists as arrays or
//! comma-separated strings.

use std::collections::BTreeMap;

use chrono::Duration;
use serde_json::{json, Map, Value};
use tracing::instrument;

use crate::backend::AppRoleBackend;
use crate::context::RequestContext;
use crate::error::{AppRoleError, Result};
use crate::login::LoginRequest;
use crate::role::{MintRequest, MintedSecretId, RoleField, RoleUpdate};
use crate::types::AuthResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
	Create,
	Update,
	Read,
	Delete,
	List,
	Exists,
}

#[derive(Debug, Clone)]
pub struct Request {
	pub operation: Operation,
	pub path: String,
	pub data: Map<String, Value>,
}

impl Request {
	pub fn new(operation: Operation, path: impl Into<String>) -> Self {
		Self {
			operation,
			path: path.into(),
			data: Map::new(),
		}
	}

	pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
		self.data.insert(key.to_string(), value.into());
		self
	}
}

#[derive(Debug, Clone, Default)]
pub struct Response {
	pub data: Map<String, Value>,
	pub warnings: Vec<String>,
	pub auth: Option<AuthResult>,
}

impl Response {
	fn data(data: Map<String, Value>) -> Self {
		Self {
			data,
			..Default::default()
		}
	}

	fn warnings(warnings: Vec<String>) -> Self {
		Self {
			warnings,
			..Default::default()
		}
	}

	fn keys(keys: Vec<String>) -> Self {
		let mut data = Map::new();
		data.insert("keys".into(), json!(keys));
		Self::data(data)
	}
}

/// Dispatch `request` to the backend. `Ok(None)` means nothing was found at
/// the path (or the operation has no response body).
#[instrument(skip(backend, ctx, request), fields(path = %request.path, operation = ?request.operation))]
pub async fn handle(
	backend: &AppRoleBackend,
	ctx: &RequestContext,
	request: Request,
) -> Result<Option<Response>> {
	let Request {
		operation,
		path,
		data,
	} = request;
	let fields = FieldData::new(data);
	let segments: Vec<&str> = path.trim_matches('/').split('/').collect();

	match (segments.as_slice(), operation) {
		(["role"], Operation::List) => Ok(Some(Response::keys(backend.list_roles(ctx).await?))),
		(["role", name], op) => handle_role(backend, ctx, name, op, &fields).await,
		(["role", name, "secret-id"], Operation::Update) => {
			let minted = backend
				.mint_secret_id(ctx, name, mint_request(&fields, None)?)
				.await?;
			Ok(Some(minted_response(minted)))
		}
		(["role", name, "secret-id"], Operation::List) => Ok(Some(Response::keys(
			backend.list_secret_id_accessors(ctx, name).await?,
		))),
		(["role", name, "custom-secret-id"], Operation::Update) => {
			let secret_id = fields
				.get_string("secret_id")?
				.ok_or_else(|| AppRoleError::invalid("missing secret_id"))?;
			let minted = backend
				.mint_secret_id(ctx, name, mint_request(&fields, Some(secret_id))?)
				.await?;
			Ok(Some(minted_response(minted)))
		}
		(["role", name, "secret-id", "lookup"], Operation::Update) => {
			let secret_id = fields.get_string("secret_id")?.unwrap_or_default();
			Ok(backend
				.lookup_secret_id(ctx, name, &secret_id)
				.await?
				.map(|record| Response::data(record.to_response_data())))
		}
		(["role", name, "secret-id", "destroy"], Operation::Update | Operation::Delete) => {
			let secret_id = fields.get_string("secret_id")?.unwrap_or_default();
			backend.destroy_secret_id(ctx, name, &secret_id).await?;
			Ok(None)
		}
		(["role", name, "secret-id-accessor", "lookup"], Operation::Update) => {
			let accessor = fields.get_string("secret_id_accessor")?.unwrap_or_default();
			Ok(backend
				.lookup_secret_id_accessor(ctx, name, &accessor)
				.await?
				.map(|record| Response::data(record.to_response_data())))
		}
		(["role", name, "secret-id-accessor", "destroy"], Operation::Update | Operation::Delete) => {
			let accessor = fields.get_string("secret_id_accessor")?.unwrap_or_default();
			backend.destroy_secret_id_accessor(ctx, name, &accessor).await?;
			Ok(None)
		}
		(["role", name, segment], op) => match RoleField::from_segment(segment) {
			Some(field) => handle_role_field(backend, ctx, name, field, op, &fields).await,
			None => Err(unsupported(&path, op)),
		},
		(["login"], Operation::Update) => {
			let request = LoginRequest {
				role_id: fields.get_string("role_id")?.unwrap_or_default(),
				secret_id: fields.get_string("secret_id")?,
			};
			let auth = backend.login(ctx, request).await?;
			Ok(Some(Response {
				data: auth.to_response_data(),
				auth: Some(auth),
				..Default::default()
			}))
		}
		(["tidy", "secret-id"], Operation::Update) => {
			let report = backend.tidy_secret_ids(ctx).await?;
			let data = match serde_json::to_value(report)? {
				Value::Object(map) => map,
				_ => Map::new(),
			};
			Ok(Some(Response::data(data)))
		}
		(_, op) => Err(unsupported(&path, op)),
	}
}

async fn handle_role(
	backend: &AppRoleBackend,
	ctx: &RequestContext,
	name: &str,
	operation: Operation,
	fields: &FieldData,
) -> Result<Option<Response>> {
	match operation {
		Operation::Create | Operation::Update => {
			let warnings = backend.write_role(ctx, name, role_update(fields)?).await?;
			Ok(Some(Response::warnings(warnings)))
		}
		Operation::Read => Ok(backend.read_role(ctx, name).await?.map(|view| Response {
			data: view.role.to_response_data(),
			warnings: view.warnings,
			auth: None,
		})),
		Operation::Delete => {
			backend.delete_role(ctx, name).await?;
			Ok(None)
		}
		Operation::Exists => {
			let mut data = Map::new();
			data.insert("exists".into(), json!(backend.role_exists(ctx, name).await?));
			Ok(Some(Response::data(data)))
		}
		Operation::List => Err(unsupported(&format!("role/{name}"), operation)),
	}
}

async fn handle_role_field(
	backend: &AppRoleBackend,
	ctx: &RequestContext,
	name: &str,
	field: RoleField,
	operation: Operation,
	fields: &FieldData,
) -> Result<Option<Response>> {
	match operation {
		Operation::Read => Ok(backend
			.read_role_field(ctx, name, field)
			.await?
			.map(|value| {
				let mut data = Map::new();
				data.insert(field.key().into(), value);
				Response::data(data)
			})),
		Operation::Update => {
			let update = field_update(fields, field)?;
			let warnings = backend.update_role_fields(ctx, name, update).await?;
			Ok(Some(Response::warnings(warnings)))
		}
		Operation::Delete if field != RoleField::RoleId => {
			let warnings = backend.reset_role_field(ctx, name, field).await?;
			Ok(Some(Response::warnings(warnings)))
		}
		op => Err(unsupported(&format!("role/{name}/{}", field.segment()), op)),
	}
}

fn unsupported(path: &str, operation: Operation) -> AppRoleError {
	AppRoleError::invalid(format!("unsupported operation {operation:?} on path {path:?}"))
}

fn minted_response(minted: MintedSecretId) -> Response {
	let mut data = Map::new();
	data.insert("secret_id".into(), json!(minted.secret_id));
	data.insert("secret_id_accessor".into(), json!(minted.secret_id_accessor));
	data.insert("secret_id_ttl".into(), json!(minted.secret_id_ttl.num_seconds()));
	data.insert("secret_id_num_uses".into(), json!(minted.secret_id_num_uses));
	Response::data(data)
}

fn role_update(fields: &FieldData) -> Result<RoleUpdate> {
	Ok(RoleUpdate {
		role_id: fields.get_string("role_id")?,
		bind_secret_id: fields.get_bool("bind_secret_id")?,
		bound_cidr_list: fields.get_string_list("bound_cidr_list")?,
		policies: fields.get_string_list("policies")?,
		secret_id_num_uses: fields.get_int("secret_id_num_uses")?,
		secret_id_ttl: fields.get_duration("secret_id_ttl")?,
		token_ttl: fields.get_duration("token_ttl")?,
		token_max_ttl: fields.get_duration("token_max_ttl")?,
		token_num_uses: fields.get_int("token_num_uses")?,
		period: fields.get_duration("period")?,
	})
}

/// Update touching only `field`, which must be present in the request.
fn field_update(fields: &FieldData, field: RoleField) -> Result<RoleUpdate> {
	let update = role_update(fields)?;
	let picked = match field {
		RoleField::RoleId => RoleUpdate {
			role_id: update.role_id,
			..Default::default()
		},
		RoleField::Policies => RoleUpdate {
			policies: update.policies,
			..Default::default()
		},
		RoleField::BindSecretId => RoleUpdate {
			bind_secret_id: update.bind_secret_id,
			..Default::default()
		},
		RoleField::BoundCidrList => RoleUpdate {
			bound_cidr_list: update.bound_cidr_list,
			..Default::default()
		},
		RoleField::SecretIdNumUses => RoleUpdate {
			secret_id_num_uses: update.secret_id_num_uses,
			..Default::default()
		},
		RoleField::SecretIdTtl => RoleUpdate {
			secret_id_ttl: update.secret_id_ttl,
			..Default::default()
		},
		RoleField::TokenTtl => RoleUpdate {
			token_ttl: update.token_ttl,
			..Default::default()
		},
		RoleField::TokenMaxTtl => RoleUpdate {
			token_max_ttl: update.token_max_ttl,
			..Default::default()
		},
		RoleField::TokenNumUses => RoleUpdate {
			token_num_uses: update.token_num_uses,
			..Default::default()
		},
		RoleField::Period => RoleUpdate {
			period: update.period,
			..Default::default()
		},
	};
	if picked == RoleUpdate::default() {
		return Err(AppRoleError::invalid(format!("missing {}", field.key())));
	}
	Ok(picked)
}

fn mint_request(fields: &FieldData, secret_id: Option<String>) -> Result<MintRequest> {
	Ok(MintRequest {
		secret_id,
		cidr_list: fields.get_string_list("cidr_list")?.unwrap_or_default(),
		metadata: fields.get_metadata("metadata")?,
		num_uses: fields.get_int("num_uses")?,
		ttl: fields.get_duration("ttl")?,
	})
}

/// Typed access to request fields.
#[derive(Debug, Clone, Default)]
pub struct FieldData {
	raw: Map<String, Value>,
}

impl FieldData {
	pub fn new(raw: Map<String, Value>) -> Self {
		Self { raw }
	}

	fn present(&self, key: &str) -> Option<&Value> {
		self.raw.get(key).filter(|v| !v.is_null())
	}

	pub fn get_string(&self, key: &str) -> Result<Option<String>> {
		match self.present(key) {
			None => Ok(None),
			Some(Value::String(s)) => Ok(Some(s.clone())),
			Some(Value::Number(n)) => Ok(Some(n.to_string())),
			Some(Value::Bool(b)) => Ok(Some(b.to_string())),
			Some(_) => Err(field_error(key, "expected a string")),
		}
	}

	pub fn get_int(&self, key: &str) -> Result<Option<i64>> {
		match self.present(key) {
			None => Ok(None),
			Some(Value::Number(n)) => n
				.as_i64()
				.map(Some)
				.ok_or_else(|| field_error(key, "expected an integer")),
			Some(Value::String(s)) => s
				.trim()
				.parse()
				.map(Some)
				.map_err(|_| field_error(key, "expected an integer")),
			Some(_) => Err(field_error(key, "expected an integer")),
		}
	}

	pub fn get_bool(&self, key: &str) -> Result<Option<bool>> {
		match self.present(key) {
			None => Ok(None),
			Some(Value::Bool(b)) => Ok(Some(*b)),
			Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
				"true" | "1" => Ok(Some(true)),
				"false" | "0" => Ok(Some(false)),
				_ => Err(field_error(key, "expected a boolean")),
			},
			Some(Value::Number(n)) => match n.as_i64() {
				Some(1) => Ok(Some(true)),
				Some(0) => Ok(Some(false)),
				_ => Err(field_error(key, "expected a boolean")),
			},
			Some(_) => Err(field_error(key, "expected a boolean")),
		}
	}

	/// Array of strings or a comma-separated string.
	pub fn get_string_list(&self, key: &str) -> Result<Option<Vec<String>>> {
		match self.present(key) {
			None => Ok(None),
			Some(Value::String(s)) => Ok(Some(
				s.split(',')
					.map(|p| p.trim().to_string())
					.filter(|p| !p.is_empty())
					.collect(),
			)),
			Some(Value::Array(items)) => items
				.iter()
				.map(|item| match item {
					Value::String(s) => Ok(s.trim().to_string()),
					_ => Err(field_error(key, "expected a list of strings")),
				})
				.collect::<Result<Vec<_>>>()
				.map(|v| Some(v.into_iter().filter(|p| !p.is_empty()).collect())),
			Some(_) => Err(field_error(key, "expected a list of strings")),
		}
	}

	/// Integer seconds or a string with an `s`, `m`, `h` or `d` suffix.
	pub fn get_duration(&self, key: &str) -> Result<Option<Duration>> {
		match self.present(key) {
			None => Ok(None),
			Some(Value::Number(n)) => n
				.as_i64()
				.and_then(duration_from_secs)
				.map(Some)
				.ok_or_else(|| field_error(key, "expected a duration in seconds")),
			Some(Value::String(s)) => parse_duration(s)
				.map(Some)
				.ok_or_else(|| field_error(key, "expected a duration")),
			Some(_) => Err(field_error(key, "expected a duration")),
		}
	}

	/// A JSON object, a JSON object encoded as a string, or `k=v,k2=v2`.
	pub fn get_metadata(&self, key: &str) -> Result<BTreeMap<String, String>> {
		match self.present(key) {
			None => Ok(BTreeMap::new()),
			Some(Value::Object(map)) => object_to_metadata(key, map),
			Some(Value::String(s)) if s.trim().is_empty() => Ok(BTreeMap::new()),
			Some(Value::String(s)) if s.trim_start().starts_with('{') => {
				match serde_json::from_str::<Map<String, Value>>(s) {
					Ok(map) => object_to_metadata(key, &map),
					Err(_) => Err(field_error(key, "invalid JSON object")),
				}
			}
			Some(Value::String(s)) => s
				.split(',')
				.filter(|pair| !pair.trim().is_empty())
				.map(|pair| -> Result<(String, String)> {
					let (k, v) = pair
						.split_once('=')
						.ok_or_else(|| field_error(key, "expected key=value pairs"))?;
					Ok((k.trim().to_string(), v.trim().to_string()))
				})
				.collect(),
			Some(_) => Err(field_error(key, "expected an object")),
		}
	}
}

fn object_to_metadata(key: &str, map: &Map<String, Value>) -> Result<BTreeMap<String, String>> {
	map.iter()
		.map(|(k, v)| match v {
			Value::String(s) => Ok((k.clone(), s.clone())),
			Value::Number(_) | Value::Bool(_) => Ok((k.clone(), v.to_string())),
			_ => Err(field_error(key, "metadata values must be strings")),
		})
		.collect()
}

fn field_error(key: &str, message: &str) -> AppRoleError {
	AppRoleError::invalid(format!("{key}: {message}"))
}

fn parse_duration(input: &str) -> Option<Duration> {
	let input = input.trim();
	if input.is_empty() {
		return None;
	}
	if let Ok(secs) = input.parse::<i64>() {
		return duration_from_secs(secs);
	}
	let unit_len = input.chars().last()?.len_utf8();
	let (number, unit) = input.split_at(input.len() - unit_len);
	let n: i64 = number.parse().ok()?;
	let scale = match unit {
		"s" => 1,
		"m" => 60,
		"h" => 3600,
		"d" => 86_400,
		_ => return None,
	};
	n.checked_mul(scale).and_then(duration_from_secs)
}

/// Longest duration, in seconds, that fits the nanosecond form records are
/// stored in.
const MAX_DURATION_SECS: i64 = i64::MAX / 1_000_000_000;

fn duration_from_secs(secs: i64) -> Option<Duration> {
	secs.checked_abs()
		.filter(|abs| *abs <= MAX_DURATION_SECS)
		.map(|_| Duration::seconds(secs))
}

#[cfg(test)]
mod tests {
	use super::*;

	fn fields(value: Value) -> FieldData {
		match value {
			Value::Object(map) => FieldData::new(map),
			_ => panic!("expected object"),
		}
	}

	#[test]
	fn durations() {
		assert_eq!(parse_duration("90"), Some(Duration::seconds(90)));
		assert_eq!(parse_duration("5m"), Some(Duration::minutes(5)));
		assert_eq!(parse_duration("2h"), Some(Duration::hours(2)));
		assert_eq!(parse_duration("1d"), Some(Duration::days(1)));
		assert_eq!(parse_duration("abc"), None);
		assert_eq!(parse_duration("5x"), None);
		assert_eq!(parse_duration("5é"), None);
		assert_eq!(
			parse_duration(&MAX_DURATION_SECS.to_string()),
			Some(Duration::seconds(MAX_DURATION_SECS))
		);
		assert_eq!(parse_duration(&(MAX_DURATION_SECS + 1).to_string()), None);
		assert_eq!(parse_duration("200000000000m"), None);

		let data = fields(json!({"ttl": 30, "max": "1h", "bad": [1]}));
		assert_eq!(data.get_duration("ttl").unwrap(), Some(Duration::seconds(30)));
		assert_eq!(data.get_duration("max").unwrap(), Some(Duration::hours(1)));
		assert!(data.get_duration("bad").is_err());
		assert_eq!(data.get_duration("missing").unwrap(), None);

		let data = fields(json!({"huge": 10_000_000_000i64}));
		assert!(matches!(data.get_duration("huge"), Err(AppRoleError::InvalidInput(_))));
	}

	#[test]
	fn string_lists() {
		let data = fields(json!({
			"a": "10.0.0.0/8, 192.168.0.0/16",
			"b": ["x", " y "],
			"c": 5,
		}));
		assert_eq!(
			data.get_string_list("a").unwrap().unwrap(),
			vec!["10.0.0.0/8", "192.168.0.0/16"]
		);
		assert_eq!(data.get_string_list("b").unwrap().unwrap(), vec!["x", "y"]);
		assert!(data.get_string_list("c").is_err());
	}

	#[test]
	fn metadata_forms() {
		let data = fields(json!({
			"obj": {"env": "prod", "n": 3},
			"json": "{\"env\":\"dev\"}",
			"pairs": "env=stage, team=core",
			"broken": "nope",
		}));
		assert_eq!(data.get_metadata("obj").unwrap()["n"], "3");
		assert_eq!(data.get_metadata("json").unwrap()["env"], "dev");
		let pairs = data.get_metadata("pairs").unwrap();
		assert_eq!(pairs["env"], "stage");
		assert_eq!(pairs["team"], "core");
		assert!(data.get_metadata("broken").is_err());
		assert!(data.get_metadata("missing").unwrap().is_empty());
	}

	#[test]
	fn bools_and_ints() {
		let data = fields(json!({"b": "true", "i": "42", "n": 7, "bad": "maybe"}));
		assert_eq!(data.get_bool("b").unwrap(), Some(true));
		assert_eq!(data.get_int("i").unwrap(), Some(42));
		assert_eq!(data.get_int("n").unwrap(), Some(7));
		assert!(data.get_bool("bad").is_err());
	}

	#[test]
	fn field_update_requires_the_field() {
		let data = fields(json!({"token_ttl": 60}));
		let update = field_update(&data, RoleField::TokenTtl).unwrap();
		assert_eq!(update.token_ttl, Some(Duration::seconds(60)));
		assert!(field_update(&data, RoleField::Period).is_err());
	}
}
