// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use std::future::Future;
use std::net::IpAddr;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

use crate::error::{AppRoleError, Result};

/// Per-request state carried through every backend operation.
///
/// Every lock wait and storage call made on behalf of the request races the
/// cancellation token; a cancelled request observes [`AppRoleError::Cancelled`].
#[derive(Debug, Clone)]
pub struct RequestContext {
	pub request_id: String,
	pub remote_addr: Option<IpAddr>,
	pub cancellation_token: CancellationToken,
}

impl RequestContext {
	pub fn new() -> Self {
		Self {
			request_id: uuid::Uuid::new_v4().to_string(),
			remote_addr: None,
			cancellation_token: CancellationToken::new(),
		}
	}

	pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
		self.remote_addr = Some(addr);
		self
	}

	pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
		self.cancellation_token = token;
		self
	}

	pub fn is_cancelled(&self) -> bool {
		self.cancellation_token.is_cancelled()
	}

	/// Drive `fut` to completion unless the request is cancelled first.
	pub(crate) async fn guard<F, T>(&self, fut: F) -> Result<T>
	where
		F: Future<Output = Result<T>>,
	{
		tokio::select! {
			biased;
			_ = self.cancellation_token.cancelled() => Err(AppRoleError::Cancelled),
			res = fut => res,
		}
	}

	pub(crate) async fn read<'a>(&self, lock: &'a RwLock<()>) -> Result<RwLockReadGuard<'a, ()>> {
		tokio::select! {
			biased;
			_ = self.cancellation_token.cancelled() => Err(AppRoleError::Cancelled),
			guard = lock.read() => Ok(guard),
		}
	}

	pub(crate) async fn write<'a>(&self, lock: &'a RwLock<()>) -> Result<RwLockWriteGuard<'a, ()>> {
		tokio::select! {
			biased;
			_ = self.cancellation_token.cancelled() => Err(AppRoleError::Cancelled),
			guard = lock.write() => Ok(guard),
		}
	}
}

impl Default for RequestContext {
	fn default() -> Self {
		Self::new()
	}
}
