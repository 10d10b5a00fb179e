// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Integration tests for the role and SecretID management paths.

mod common;

use std::sync::Arc;

use common::*;
use loom_server_approle::{AppRoleError, Operation, SqliteStorage, Storage};
use serde_json::{json, Value};

#[tokio::test]
async fn test_role_crud() {
	let backend = setup().await;
	let warnings = create_role(
		&backend,
		"Web",
		json!({ "policies": ["b", "A"], "token_ttl": 60, "token_max_ttl": "2m" }),
	)
	.await;
	assert!(warnings.is_empty());

	let role = call(&backend, Operation::Read, "role/web", Value::Null)
		.await
		.unwrap()
		.unwrap();
	assert_eq!(role.data["policies"], json!(["a", "b"]));
	assert_eq!(role.data["token_ttl"], json!(60));
	assert_eq!(role.data["token_max_ttl"], json!(120));
	assert_eq!(role.data["bind_secret_id"], json!(true));
	assert!(role.data.get("role_id").is_none());

	let exists = call(&backend, Operation::Exists, "role/web", Value::Null)
		.await
		.unwrap()
		.unwrap();
	assert_eq!(exists.data["exists"], json!(true));

	let list = call(&backend, Operation::List, "role", Value::Null)
		.await
		.unwrap()
		.unwrap();
	assert_eq!(list.data["keys"], json!(["web"]));

	call(&backend, Operation::Delete, "role/web", Value::Null)
		.await
		.unwrap();
	assert!(call(&backend, Operation::Read, "role/web", Value::Null)
		.await
		.unwrap()
		.is_none());
	// Deleting again is fine.
	call(&backend, Operation::Delete, "role/web", Value::Null)
		.await
		.unwrap();
}

#[tokio::test]
async fn test_role_validation() {
	let backend = setup().await;

	let err = call(
		&backend,
		Operation::Create,
		"role/open",
		json!({ "bind_secret_id": false }),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, AppRoleError::InvalidInput(_)));

	let err = call(
		&backend,
		Operation::Create,
		"role/ttl",
		json!({ "token_ttl": 120, "token_max_ttl": 60 }),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, AppRoleError::InvalidInput(_)));

	let err = call(
		&backend,
		Operation::Create,
		"role/bad!name",
		json!({}),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, AppRoleError::InvalidInput(_)));

	let err = call(
		&backend,
		Operation::Create,
		"role/cidr",
		json!({ "bound_cidr_list": "not-a-cidr" }),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, AppRoleError::InvalidInput(_)));

	let list = call(&backend, Operation::List, "role", Value::Null)
		.await
		.unwrap()
		.unwrap();
	assert_eq!(list.data["keys"], json!([]));
}

#[tokio::test]
async fn test_max_ttl_above_mount_maximum_warns() {
	let backend = setup().await;
	let warnings = create_role(&backend, "long", json!({ "token_max_ttl": "30d" })).await;
	assert_eq!(warnings.len(), 1);
	assert!(warnings[0].contains("token_max_ttl"));
}

#[tokio::test]
async fn test_durations_beyond_storage_range_are_rejected() {
	let backend = setup().await;

	let err = call(
		&backend,
		Operation::Create,
		"role/web",
		json!({ "token_max_ttl": 10_000_000_000i64 }),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, AppRoleError::InvalidInput(_)));
	assert!(call(&backend, Operation::Read, "role/web", Value::Null)
		.await
		.unwrap()
		.is_none());

	let largest = i64::MAX / 1_000_000_000;
	create_role(&backend, "web", json!({ "token_max_ttl": largest })).await;
	let role = call(&backend, Operation::Read, "role/web", Value::Null)
		.await
		.unwrap()
		.unwrap();
	assert_eq!(role.data["token_max_ttl"], json!(largest));
}

#[tokio::test]
async fn test_role_id_uniqueness() {
	let backend = setup().await;
	create_role(&backend, "a", json!({ "role_id": "shared" })).await;

	let err = call(
		&backend,
		Operation::Create,
		"role/b",
		json!({ "role_id": "shared" }),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, AppRoleError::Conflict(_)));
	assert!(call(&backend, Operation::Read, "role/b", Value::Null)
		.await
		.unwrap()
		.is_none());

	create_role(&backend, "b", json!({})).await;
	let err = call(
		&backend,
		Operation::Update,
		"role/b/role-id",
		json!({ "role_id": "shared" }),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, AppRoleError::Conflict(_)));
	assert_ne!(role_id(&backend, "b").await, "shared");
	assert_eq!(role_id(&backend, "a").await, "shared");
}

#[tokio::test]
async fn test_missing_index_self_heals_on_read() {
	let backend = setup().await;
	create_role(&backend, "web", json!({})).await;
	let role_id = role_id(&backend, "web").await;
	let (secret_id, _) = mint(&backend, "web", json!({})).await;

	let storage = backend.storage();
	let index_keys = leaf_keys(storage, "role_id/").await;
	assert_eq!(index_keys.len(), 1);
	storage
		.delete(&format!("role_id/{}", index_keys[0]))
		.await
		.unwrap();

	let err = login(&backend, &role_id, &secret_id).await.unwrap_err();
	assert!(matches!(err, AppRoleError::InvalidCredential));

	let read = call(&backend, Operation::Read, "role/web", Value::Null)
		.await
		.unwrap()
		.unwrap();
	assert!(read.warnings.iter().any(|w| w.contains("missing an index")));
	assert_eq!(leaf_keys(storage, "role_id/").await, index_keys);

	assert!(login(&backend, &role_id, &secret_id).await.is_ok());
}

#[tokio::test]
async fn test_field_endpoints() {
	let backend = setup().await;
	create_role(&backend, "web", json!({ "policies": "a", "secret_id_num_uses": 5 })).await;

	let read = call(&backend, Operation::Read, "role/web/policies", Value::Null)
		.await
		.unwrap()
		.unwrap();
	assert_eq!(read.data["policies"], json!(["a"]));

	call(
		&backend,
		Operation::Update,
		"role/web/bound-cidr-list",
		json!({ "bound_cidr_list": "10.0.0.0/8,10.0.0.0/8" }),
	)
	.await
	.unwrap();
	let read = call(&backend, Operation::Read, "role/web/bound-cidr-list", Value::Null)
		.await
		.unwrap()
		.unwrap();
	assert_eq!(read.data["bound_cidr_list"], json!(["10.0.0.0/8"]));

	call(&backend, Operation::Delete, "role/web/secret-id-num-uses", Value::Null)
		.await
		.unwrap();
	let read = call(&backend, Operation::Read, "role/web/secret-id-num-uses", Value::Null)
		.await
		.unwrap()
		.unwrap();
	assert_eq!(read.data["secret_id_num_uses"], json!(0));

	// The field must be supplied on update.
	let err = call(&backend, Operation::Update, "role/web/token-ttl", json!({}))
		.await
		.unwrap_err();
	assert!(matches!(err, AppRoleError::InvalidInput(_)));

	// Field updates do not create roles.
	let err = call(
		&backend,
		Operation::Update,
		"role/missing/policies",
		json!({ "policies": "a" }),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, AppRoleError::NotFound(_)));

	let err = call(&backend, Operation::Delete, "role/web/role-id", Value::Null)
		.await
		.unwrap_err();
	assert!(matches!(err, AppRoleError::InvalidInput(_)));

	// Clearing the last constraint is refused.
	let result = call(
		&backend,
		Operation::Update,
		"role/web/bind-secret-id",
		json!({ "bind_secret_id": false }),
	)
	.await;
	assert!(result.is_ok(), "CIDR binding still constrains the role");
	let err = call(&backend, Operation::Delete, "role/web/bound-cidr-list", Value::Null)
		.await
		.unwrap_err();
	assert!(matches!(err, AppRoleError::InvalidInput(_)));
}

#[tokio::test]
async fn test_secret_id_listing_lookup_and_destroy() {
	let backend = setup().await;
	create_role(&backend, "web", json!({})).await;
	let (first, first_accessor) = mint(&backend, "web", json!({ "metadata": { "host": "a" } })).await;
	let (_, second_accessor) = mint(&backend, "web", json!({})).await;

	let list = call(&backend, Operation::List, "role/web/secret-id", Value::Null)
		.await
		.unwrap()
		.unwrap();
	let mut keys: Vec<String> = serde_json::from_value(list.data["keys"].clone()).unwrap();
	keys.sort();
	let mut expected = vec![first_accessor.clone(), second_accessor.clone()];
	expected.sort();
	assert_eq!(keys, expected);

	let lookup = call(
		&backend,
		Operation::Update,
		"role/web/secret-id/lookup",
		json!({ "secret_id": first }),
	)
	.await
	.unwrap()
	.unwrap();
	assert_eq!(lookup.data["secret_id_accessor"], json!(first_accessor));
	assert_eq!(lookup.data["metadata"], json!({ "host": "a" }));
	assert_eq!(lookup.data["expiration_time"], json!("0001-01-01T00:00:00Z"));

	for _ in 0..2 {
		call(
			&backend,
			Operation::Delete,
			"role/web/secret-id/destroy",
			json!({ "secret_id": first }),
		)
		.await
		.unwrap();
	}
	assert!(call(
		&backend,
		Operation::Update,
		"role/web/secret-id/lookup",
		json!({ "secret_id": first }),
	)
	.await
	.unwrap()
	.is_none());

	call(
		&backend,
		Operation::Update,
		"role/web/secret-id-accessor/destroy",
		json!({ "secret_id_accessor": second_accessor }),
	)
	.await
	.unwrap();
	let err = call(
		&backend,
		Operation::Update,
		"role/web/secret-id-accessor/destroy",
		json!({ "secret_id_accessor": second_accessor }),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, AppRoleError::NotFound(_)));

	let list = call(&backend, Operation::List, "role/web/secret-id", Value::Null)
		.await
		.unwrap()
		.unwrap();
	assert_eq!(list.data["keys"], json!([]));
}

#[tokio::test]
async fn test_custom_secret_id() {
	let backend = setup().await;
	create_role(&backend, "web", json!({})).await;
	let role_id = role_id(&backend, "web").await;

	let response = call(
		&backend,
		Operation::Update,
		"role/web/custom-secret-id",
		json!({ "secret_id": "my-own-secret" }),
	)
	.await
	.unwrap()
	.unwrap();
	assert_eq!(response.data["secret_id"], json!("my-own-secret"));

	let err = call(
		&backend,
		Operation::Update,
		"role/web/custom-secret-id",
		json!({ "secret_id": "my-own-secret" }),
	)
	.await
	.unwrap_err();
	assert!(matches!(err, AppRoleError::Conflict(_)));

	let err = call(&backend, Operation::Update, "role/web/custom-secret-id", json!({}))
		.await
		.unwrap_err();
	assert!(matches!(err, AppRoleError::InvalidInput(_)));

	assert!(login(&backend, &role_id, "my-own-secret").await.is_ok());
}

#[tokio::test]
async fn test_delete_role_flushes_secret_ids() {
	let backend = setup().await;
	create_role(&backend, "web", json!({})).await;
	mint(&backend, "web", json!({})).await;
	mint(&backend, "web", json!({})).await;
	create_role(&backend, "other", json!({})).await;
	mint(&backend, "other", json!({})).await;

	call(&backend, Operation::Delete, "role/web", Value::Null)
		.await
		.unwrap();

	let storage = backend.storage();
	assert_eq!(secret_id_keys(storage).await.len(), 1);
	assert_eq!(leaf_keys(storage, "accessor/").await.len(), 1);
	assert_eq!(leaf_keys(storage, "role_id/").await.len(), 1);
	assert_eq!(leaf_keys(storage, "role/").await, vec!["other"]);
}

#[tokio::test]
async fn test_legacy_use_count_is_upgraded() {
	let backend = setup().await;
	create_role(&backend, "web", json!({})).await;
	let role_id = role_id(&backend, "web").await;
	let (secret_id, accessor) = mint(&backend, "web", json!({})).await;

	let storage = backend.storage();
	let key = secret_id_keys(storage).await.remove(0);
	let mut record = read_json(storage, &key).await;
	record["secret_id_num_uses"] = json!(0);
	record["SecretIDNumUses"] = json!(5);
	write_json(storage, &key, &record).await;

	let lookup = call(
		&backend,
		Operation::Update,
		"role/web/secret-id-accessor/lookup",
		json!({ "secret_id_accessor": accessor }),
	)
	.await
	.unwrap()
	.unwrap();
	assert_eq!(lookup.data["secret_id_num_uses"], json!(5));

	let stored = read_json(storage, &key).await;
	assert_eq!(stored["secret_id_num_uses"], json!(5));
	assert!(stored.get("SecretIDNumUses").is_none());

	login(&backend, &role_id, &secret_id).await.unwrap();
	let stored = read_json(storage, &key).await;
	assert_eq!(stored["secret_id_num_uses"], json!(4));
}

#[tokio::test]
async fn test_unsupported_paths() {
	let backend = setup().await;
	for (operation, path) in [
		(Operation::Read, "role"),
		(Operation::Read, "role/web/unknown"),
		(Operation::Read, "nothing/here"),
		(Operation::Read, "login"),
	] {
		let err = call(&backend, operation, path, Value::Null).await.unwrap_err();
		assert!(matches!(err, AppRoleError::InvalidInput(_)), "{path}");
	}
}

#[tokio::test]
async fn test_sqlite_storage_persists_across_restarts() {
	let dir = tempfile::tempdir().unwrap();
	let url = format!("sqlite:{}", dir.path().join("approle.db").display());

	let (role_id, secret_id) = {
		let backend = setup_with(Arc::new(SqliteStorage::connect(&url).await.unwrap())).await;
		create_role(&backend, "web", json!({ "secret_id_num_uses": 2 })).await;
		let (secret_id, _) = mint(&backend, "web", json!({})).await;
		(role_id(&backend, "web").await, secret_id)
	};

	let backend = setup_with(Arc::new(SqliteStorage::connect(&url).await.unwrap())).await;
	assert!(login(&backend, &role_id, &secret_id).await.is_ok());
	assert!(login(&backend, &role_id, &secret_id).await.is_ok());
	let err = login(&backend, &role_id, &secret_id).await.unwrap_err();
	assert!(matches!(err, AppRoleError::InvalidCredential));
}
