// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use async_trait::async_trait;
use netmaker_server_overlay::{CancellationToken, OverlayError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

const BASE_RETRY_DELAY_SECS: u64 = 1;
const MAX_RETRY_DELAY_SECS: u64 = 60;
const RETRY_FACTOR: f64 = 2.0;
const MAX_RETRIES: u32 = 3;

#[derive(Debug, Error)]
pub enum JobError {
	#[error("job failed: {message}")]
	Failed { message: String, retryable: bool },

	#[error("job cancelled")]
	Cancelled,

	#[error("job not found: {0}")]
	NotFound(String),
}

impl From<OverlayError> for JobError {
	fn from(e: OverlayError) -> Self {
		JobError::Failed {
			retryable: e.is_retriable(),
			message: e.to_string(),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutput {
	pub message: String,
	/// Number of entities the run acted on.
	pub affected: usize,
}

pub struct JobContext {
	pub run_id: String,
	pub attempt: u32,
	pub cancellation_token: CancellationToken,
}

#[async_trait]
pub trait Job: Send + Sync {
	fn id(&self) -> &str;
	fn name(&self) -> &str;
	async fn run(&self, ctx: &JobContext) -> Result<JobOutput, JobError>;
}

struct RegisteredJob {
	job: Arc<dyn Job>,
	interval: Duration,
	cancellation_token: CancellationToken,
}

/// Runs registered jobs on fixed intervals until shut down.
pub struct JobScheduler {
	jobs: HashMap<String, RegisteredJob>,
	shutdown_tx: broadcast::Sender<()>,
	handles: Mutex<Vec<JoinHandle<()>>>,
}

impl JobScheduler {
	pub fn new() -> Self {
		let (shutdown_tx, _) = broadcast::channel(1);
		Self {
			jobs: HashMap::new(),
			shutdown_tx,
			handles: Mutex::new(Vec::new()),
		}
	}

	pub fn register_periodic(&mut self, job: Arc<dyn Job>, interval: Duration) {
		let id = job.id().to_string();
		self.jobs.insert(
			id,
			RegisteredJob {
				job,
				interval,
				cancellation_token: CancellationToken::new(),
			},
		);
	}

	#[instrument(skip(self))]
	pub async fn start(&self) {
		let mut handles = self.handles.lock().await;

		for (job_id, registered) in &self.jobs {
			let job = Arc::clone(&registered.job);
			let interval = registered.interval;
			let mut shutdown_rx = self.shutdown_tx.subscribe();
			let cancellation_token = registered.cancellation_token.clone();
			let job_id = job_id.clone();

			let handle = tokio::spawn(async move {
				loop {
					tokio::select! {
						_ = tokio::time::sleep(interval) => {
							if cancellation_token.is_cancelled() {
								continue;
							}
							let _ = run_job_with_retry(&job, &cancellation_token).await;
						}
						_ = shutdown_rx.recv() => {
							info!(job_id = %job_id, "Shutting down periodic job");
							break;
						}
					}
				}
			});

			handles.push(handle);
		}

		info!(job_count = handles.len(), "Job scheduler started");
	}

	/// Runs a job once, outside its schedule.
	#[instrument(skip(self))]
	pub async fn trigger_job(&self, job_id: &str) -> Result<JobOutput, JobError> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		run_job_with_retry(&registered.job, &registered.cancellation_token).await
	}

	pub fn cancel_job(&self, job_id: &str) -> Result<(), JobError> {
		let registered = self
			.jobs
			.get(job_id)
			.ok_or_else(|| JobError::NotFound(job_id.to_string()))?;

		registered.cancellation_token.cancel();
		Ok(())
	}

	#[instrument(skip(self))]
	pub async fn shutdown(&self) {
		for registered in self.jobs.values() {
			registered.cancellation_token.cancel();
		}
		let _ = self.shutdown_tx.send(());

		let mut handles = self.handles.lock().await;
		for handle in handles.drain(..) {
			let _ = handle.await;
		}

		info!("Job scheduler shut down");
	}

	pub fn job_ids(&self) -> Vec<String> {
		self.jobs.keys().cloned().collect()
	}
}

impl Default for JobScheduler {
	fn default() -> Self {
		Self::new()
	}
}

async fn run_job_with_retry(job: &Arc<dyn Job>, cancellation_token: &CancellationToken) -> Result<JobOutput, JobError> {
	let run_id = uuid::Uuid::new_v4().to_string();
	let mut attempt = 0u32;

	loop {
		let ctx = JobContext {
			run_id: run_id.clone(),
			attempt,
			cancellation_token: cancellation_token.clone(),
		};

		match job.run(&ctx).await {
			Ok(output) => {
				if output.affected > 0 {
					info!(job_id = %job.id(), run_id = %run_id, affected = output.affected, "{}", output.message);
				} else {
					debug!(job_id = %job.id(), run_id = %run_id, "Job completed, nothing to do");
				}
				return Ok(output);
			}
			Err(JobError::Failed { message, retryable }) if retryable && attempt < MAX_RETRIES => {
				attempt += 1;
				let delay = calculate_backoff_delay(attempt);
				warn!(
					job_id = %job.id(),
					run_id = %run_id,
					attempt,
					delay_ms = delay.as_millis() as u64,
					error = %message,
					"Job failed, retrying"
				);
				tokio::time::sleep(delay).await;
				if cancellation_token.is_cancelled() {
					return Err(JobError::Cancelled);
				}
			}
			Err(e) => {
				warn!(job_id = %job.id(), run_id = %run_id, error = %e, "Job failed");
				return Err(e);
			}
		}
	}
}

fn base_backoff_secs(attempt: u32) -> u64 {
	let delay = BASE_RETRY_DELAY_SECS as f64 * RETRY_FACTOR.powi(attempt as i32 - 1);
	(delay as u64).min(MAX_RETRY_DELAY_SECS)
}

/// Exponential backoff with up to 25% jitter so jobs started together
/// don't retry in lockstep.
pub(crate) fn calculate_backoff_delay(attempt: u32) -> Duration {
	let base = Duration::from_secs(base_backoff_secs(attempt));
	let jitter_ms = fastrand::u64(0..=base.as_millis() as u64 / 4);
	base + Duration::from_millis(jitter_ms)
}
