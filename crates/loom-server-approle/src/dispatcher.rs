// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Periodic tidy scheduling and its health reporting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::backend::AppRoleBackend;
use crate::config::AppRoleConfig;
use crate::context::RequestContext;
use crate::error::{AppRoleError, Result};
use crate::tidy::TidyReport;

const DEGRADED_AFTER_FAILURES: u32 = 1;
const UNHEALTHY_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
	Healthy,
	Degraded,
	Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct LastTidyRun {
	pub started_at: DateTime<Utc>,
	pub duration_ms: i64,
	pub report: Option<TidyReport>,
	pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TidyHealthStatus {
	pub status: HealthState,
	pub last_run: Option<LastTidyRun>,
	pub consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct RunHistory {
	last_run: Option<LastTidyRun>,
	consecutive_failures: u32,
}

/// Runs [`AppRoleBackend::tidy_secret_ids`] on a fixed interval until shut
/// down.
pub struct TidyDispatcher {
	backend: Arc<AppRoleBackend>,
	interval: Duration,
	shutdown: CancellationToken,
	history: Arc<Mutex<RunHistory>>,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl TidyDispatcher {
	pub fn new(backend: Arc<AppRoleBackend>, interval: Duration) -> Self {
		Self {
			backend,
			interval,
			shutdown: CancellationToken::new(),
			history: Arc::new(Mutex::new(RunHistory::default())),
			handle: Mutex::new(None),
		}
	}

	/// Dispatcher running at the configured interval, or `None` when tidy
	/// is disabled.
	pub fn from_config(backend: Arc<AppRoleBackend>, config: &AppRoleConfig) -> Option<Self> {
		if !config.tidy_enabled {
			debug!("periodic tidy disabled by configuration");
			return None;
		}
		Some(Self::new(backend, config.tidy_interval()))
	}

	pub fn interval(&self) -> Duration {
		self.interval
	}

	/// Spawn the periodic loop. Calling this twice is a no-op.
	#[instrument(skip(self), fields(interval_secs = self.interval.as_secs()))]
	pub async fn start(&self) {
		let mut handle = self.handle.lock().await;
		if handle.is_some() {
			return;
		}

		let backend = Arc::clone(&self.backend);
		let history = Arc::clone(&self.history);
		let shutdown = self.shutdown.clone();
		let interval = self.interval;

		*handle = Some(tokio::spawn(async move {
			loop {
				tokio::select! {
					_ = tokio::time::sleep(interval) => {
						let _ = run_once(&backend, &history, &shutdown).await;
					}
					_ = shutdown.cancelled() => {
						info!("Shutting down tidy dispatcher");
						break;
					}
				}
			}
		}));

		info!("Tidy dispatcher started");
	}

	/// Run a sweep now, outside the schedule.
	pub async fn trigger(&self) -> Result<TidyReport> {
		run_once(&self.backend, &self.history, &self.shutdown).await
	}

	pub async fn health_status(&self) -> TidyHealthStatus {
		let history = self.history.lock().await;
		TidyHealthStatus {
			status: determine_health_state(history.consecutive_failures),
			last_run: history.last_run.clone(),
			consecutive_failures: history.consecutive_failures,
		}
	}

	/// Stop the loop and cancel any sweep it is running.
	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		self.shutdown.cancel();
		if let Some(handle) = self.handle.lock().await.take() {
			let _ = handle.await;
		}
		info!("Tidy dispatcher shut down");
	}
}

async fn run_once(
	backend: &AppRoleBackend,
	history: &Mutex<RunHistory>,
	shutdown: &CancellationToken,
) -> Result<TidyReport> {
	let ctx = RequestContext::new().with_cancellation(shutdown.child_token());
	let started_at = Utc::now();
	let started = Instant::now();

	let result = backend.tidy_secret_ids(&ctx).await;
	let duration_ms = started.elapsed().as_millis() as i64;

	match &result {
		Err(AppRoleError::TidyAlreadyRunning) => {
			debug!("tidy already running, skipping");
			return result;
		}
		Err(AppRoleError::Cancelled) => {
			debug!("tidy cancelled");
			return result;
		}
		_ => {}
	}

	let mut history = history.lock().await;
	match &result {
		Ok(report) => {
			history.consecutive_failures = 0;
			history.last_run = Some(LastTidyRun {
				started_at,
				duration_ms,
				report: Some(report.clone()),
				error: None,
			});
		}
		Err(e) => {
			history.consecutive_failures += 1;
			warn!(
				error = %e,
				consecutive_failures = history.consecutive_failures,
				"tidy run failed"
			);
			history.last_run = Some(LastTidyRun {
				started_at,
				duration_ms,
				report: None,
				error: Some(e.to_string()),
			});
		}
	}
	result
}

fn determine_health_state(consecutive_failures: u32) -> HealthState {
	if consecutive_failures >= UNHEALTHY_AFTER_FAILURES {
		HealthState::Unhealthy
	} else if consecutive_failures >= DEGRADED_AFTER_FAILURES {
		HealthState::Degraded
	} else {
		HealthState::Healthy
	}
}
