// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

#![allow(dead_code)]

use std::sync::Arc;

use chrono::Duration;
use loom_server_approle::{
	handle, AppRoleBackend, InMemoryStorage, Operation, Request, RequestContext, Response, Result,
	SharedStorage, StaticSystemView, Storage, StorageEntry,
};
use serde_json::Value;

pub fn system() -> Arc<StaticSystemView> {
	Arc::new(StaticSystemView {
		max_lease_ttl: Duration::hours(24),
		default_lease_ttl: Duration::hours(1),
	})
}

pub async fn setup() -> Arc<AppRoleBackend> {
	setup_with(Arc::new(InMemoryStorage::new())).await
}

pub async fn setup_with(storage: SharedStorage) -> Arc<AppRoleBackend> {
	Arc::new(AppRoleBackend::new(storage, system()).await.unwrap())
}

/// Issue a request through the path router with a fresh context.
pub async fn call(
	backend: &AppRoleBackend,
	operation: Operation,
	path: &str,
	data: Value,
) -> Result<Option<Response>> {
	call_with(backend, &RequestContext::new(), operation, path, data).await
}

pub async fn call_with(
	backend: &AppRoleBackend,
	ctx: &RequestContext,
	operation: Operation,
	path: &str,
	data: Value,
) -> Result<Option<Response>> {
	let mut request = Request::new(operation, path);
	if let Value::Object(map) = data {
		request.data = map;
	}
	handle(backend, ctx, request).await
}

pub async fn create_role(backend: &AppRoleBackend, name: &str, data: Value) -> Vec<String> {
	call(backend, Operation::Create, &format!("role/{name}"), data)
		.await
		.unwrap()
		.unwrap()
		.warnings
}

pub async fn role_id(backend: &AppRoleBackend, name: &str) -> String {
	let response = call(
		backend,
		Operation::Read,
		&format!("role/{name}/role-id"),
		Value::Null,
	)
	.await
	.unwrap()
	.unwrap();
	response.data["role_id"].as_str().unwrap().to_string()
}

/// Mint a SecretID; returns `(secret_id, accessor)`.
pub async fn mint(backend: &AppRoleBackend, name: &str, data: Value) -> (String, String) {
	let response = call(
		backend,
		Operation::Update,
		&format!("role/{name}/secret-id"),
		data,
	)
	.await
	.unwrap()
	.unwrap();
	(
		response.data["secret_id"].as_str().unwrap().to_string(),
		response.data["secret_id_accessor"].as_str().unwrap().to_string(),
	)
}

pub async fn login(backend: &AppRoleBackend, role_id: &str, secret_id: &str) -> Result<Option<Response>> {
	login_from(backend, &RequestContext::new(), role_id, secret_id).await
}

pub async fn login_from(
	backend: &AppRoleBackend,
	ctx: &RequestContext,
	role_id: &str,
	secret_id: &str,
) -> Result<Option<Response>> {
	call_with(
		backend,
		ctx,
		Operation::Update,
		"login",
		serde_json::json!({ "role_id": role_id, "secret_id": secret_id }),
	)
	.await
}

/// Leaf keys stored directly under `prefix`.
pub async fn leaf_keys(storage: &SharedStorage, prefix: &str) -> Vec<String> {
	storage
		.list(prefix)
		.await
		.unwrap()
		.into_iter()
		.filter(|k| !k.ends_with('/'))
		.collect()
}

/// Full storage keys of every SecretID record.
pub async fn secret_id_keys(storage: &SharedStorage) -> Vec<String> {
	let mut keys = Vec::new();
	for dir in storage.list("secret_id/").await.unwrap() {
		for leaf in leaf_keys(storage, &format!("secret_id/{dir}")).await {
			keys.push(format!("secret_id/{dir}{leaf}"));
		}
	}
	keys
}

pub async fn read_json(storage: &SharedStorage, key: &str) -> Value {
	let entry = storage.get(key).await.unwrap().unwrap();
	serde_json::from_slice(&entry.value).unwrap()
}

pub async fn write_json(storage: &SharedStorage, key: &str, value: &Value) {
	storage
		.put(StorageEntry::new(key, serde_json::to_vec(value).unwrap()))
		.await
		.unwrap();
}
