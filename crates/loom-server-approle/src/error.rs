// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use crate::config::ConfigError;
use crate::storage::StorageError;

/// Errors surfaced by the AppRole backend.
///
/// Login failures always collapse into [`AppRoleError::InvalidCredential`] so
/// that callers cannot tell which of RoleID, SecretID or CIDR was rejected.
#[derive(Debug, thiserror::Error)]
pub enum AppRoleError {
	#[error("Invalid input: {0}")]
	InvalidInput(String),

	#[error("invalid role or secret ID")]
	InvalidCredential,

	#[error("Conflict: {0}")]
	Conflict(String),

	#[error("Not found: {0}")]
	NotFound(String),

	#[error("Storage error while {context}: {source}")]
	Storage {
		context: String,
		#[source]
		source: StorageError,
	},

	#[error("Internal: {0}")]
	Internal(String),

	#[error("tidy operation already in progress")]
	TidyAlreadyRunning,

	#[error("tidy finished with {} error(s): {}", .0.len(), .0.join("; "))]
	TidyIncomplete(Vec<String>),

	#[error("request cancelled")]
	Cancelled,

	#[error("Serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("Configuration error: {0}")]
	Config(#[from] ConfigError),
}

impl AppRoleError {
	pub(crate) fn storage(context: impl Into<String>, source: StorageError) -> Self {
		match source {
			StorageError::Cancelled => Self::Cancelled,
			source => Self::Storage {
				context: context.into(),
				source,
			},
		}
	}

	pub(crate) fn invalid(message: impl Into<String>) -> Self {
		Self::InvalidInput(message.into())
	}

	/// Returns true for management-plane errors caused by the caller's input.
	pub fn is_user_error(&self) -> bool {
		matches!(
			self,
			Self::InvalidInput(_) | Self::InvalidCredential | Self::Conflict(_) | Self::NotFound(_)
		)
	}
}

pub type Result<T> = std::result::Result<T, AppRoleError>;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn invalid_credential_message_is_generic() {
		let message = AppRoleError::InvalidCredential.to_string();
		assert!(!message.contains("cidr"));
		assert!(!message.contains("expired"));
	}

	#[test]
	fn cancelled_storage_errors_stay_cancelled() {
		let err = AppRoleError::storage("reading role", StorageError::Cancelled);
		assert!(matches!(err, AppRoleError::Cancelled));
	}

	#[test]
	fn storage_errors_carry_context() {
		let err = AppRoleError::storage("reading role", StorageError::Backend("disk".to_string()));
		assert_eq!(
			err.to_string(),
			"Storage error while reading role: Storage backend error: disk"
		);
		assert!(!err.is_user_error());
	}

	#[test]
	fn tidy_incomplete_lists_failures() {
		let err = AppRoleError::TidyIncomplete(vec!["a".to_string(), "b".to_string()]);
		assert_eq!(err.to_string(), "tidy finished with 2 error(s): a; b");
	}
}
