// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! AppRole machine authentication backend for Loom server.
//!
//! A role is a named policy bundle with a RoleID (public identifier) and, when
//! `bind_secret_id` is set, any number of SecretIDs (private credentials). A
//! client logs in by presenting both; successful logins consume SecretID uses
//! and yield an [`AuthResult`] for token issuance.
//!
//! # Usage
//!
//! ```ignore
//! use loom_server_approle::{AppRoleBackend, LoginRequest, MintRequest, RequestContext, RoleUpdate};
//!
//! let backend = AppRoleBackend::from_config(&load_config()?).await?;
//! let ctx = RequestContext::new();
//! backend.write_role(&ctx, "ci", RoleUpdate::default()).await?;
//! let minted = backend.mint_secret_id(&ctx, "ci", MintRequest::default()).await?;
//! ```

pub mod accessor;
pub mod backend;
pub mod cidr;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod hmac;
pub mod locks;
pub mod login;
pub mod paths;
pub mod role;
pub mod secret_id;
pub mod storage;
pub mod system;
pub mod tidy;
pub mod types;

pub use backend::AppRoleBackend;
pub use config::{load_config, load_config_with_file, AppRoleConfig, AppRoleConfigLayer, ConfigError};
pub use context::RequestContext;
pub use dispatcher::{HealthState, TidyDispatcher, TidyHealthStatus};
pub use error::{AppRoleError, Result};
pub use login::{LoginRequest, RenewResult};
pub use paths::{handle, Operation, Request, Response};
pub use role::{MintRequest, MintedSecretId, RoleField, RoleUpdate, RoleView};
pub use storage::{open_storage, InMemoryStorage, SharedStorage, SqliteStorage, Storage, StorageEntry, StorageError};
pub use system::{StaticSystemView, SystemView};
pub use tidy::TidyReport;
pub use types::{AuthResult, RoleRecord, SecretIdRecord};
