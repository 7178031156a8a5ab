//! # Metadata Client
//!
//! This module defines how version metadata is obtained from a remote index.
//!
//! ## Architecture
//!
//! - [`QueryIndex`] performs exactly one attempt against the index and classifies
//!   its failure. It is the seam that tests replace with in-memory indices.
//! - [`Retrying`] wraps any [`QueryIndex`] with bounded retries, exponential
//!   backoff, a shared concurrency ceiling and cancellation. Transient failures
//!   never escape it except as a final [`FetchError`].
//! - [`http::HttpIndex`] is the production implementation over HTTP(S).
//!
//! ## Key Concepts
//!
//! **Attempts and permits**: every attempt, including the first, must hold a
//! permit from the shared semaphore while its request is in flight. The permit
//! is released before backing off, so a task waiting to retry never occupies a
//! slot another task could use.
//!
//! **Empty is not an error**: a package with zero published versions is a
//! successful, empty answer and is returned immediately.

pub mod http;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use semver::Version;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::catalog::{CoreRelease, FileEntry};
use crate::name::PackageName;


//================================================================================================
// Constants
//================================================================================================

/// The subject reported for failures of the core runtime index.
pub const CORE_SUBJECT: &str = "core";

//================================================================================================
// Types
//================================================================================================

/// Why an attempt, or a whole fetch, failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchCause {
    /// A single request exceeded its timeout.
    #[error("request timed out")]
    Timeout,
    /// The index answered with an unexpected HTTP status.
    #[error("index responded with status {0}")]
    Status(u16),
    /// The connection failed or broke mid-transfer.
    #[error("transport failure: {0}")]
    Transport(String),
    /// The index does not know the package.
    #[error("not found on the index")]
    NotFound,
    /// The response could not be understood.
    #[error("malformed response: {0}")]
    Decode(String),
    /// The batch was cancelled before the fetch could complete.
    #[error("cancelled")]
    Cancelled,
    /// The fetch, retries included, exceeded its time budget.
    #[error("exceeded the per-task time budget")]
    TaskTimeout,
}

/// The terminal failure of a fetch after retries were exhausted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to fetch `{subject}` after {attempts} attempt(s): {cause}{}", StatusTrail(.statuses))]
pub struct FetchError {
    /// The package name, or [`CORE_SUBJECT`].
    pub subject: String,
    /// The cause of the last attempt.
    pub cause: FetchCause,
    /// How many attempts were made.
    pub attempts: u32,
    /// Every HTTP status observed across attempts, in order.
    pub statuses: Vec<u16>,
}

/// Bounds applied to the attempts of one logical fetch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of attempts, including the first. Zero is treated as one.
    pub max_attempts: u32,
    /// The first backoff interval; later intervals grow by a factor of 1.5.
    pub initial_backoff: Duration,
    /// The budget for a whole fetch, retries and backoff included.
    pub task_timeout: Duration,
}

/// Shared state handed to every fetch of a batch.
#[derive(Clone, Debug)]
pub struct FetchContext {
    /// The concurrency ceiling shared by all attempts.
    pub permits: Arc<Semaphore>,
    /// The batch-wide cancellation signal.
    pub cancel: CancellationToken,
    /// Retry bounds.
    pub policy: RetryPolicy,
}

/// A [`QueryIndex`] with retries, backoff, bounded concurrency and cancellation.
#[derive(Debug)]
pub struct Retrying<I> {
    inner: I,
}

struct StatusTrail<'a>(&'a [u16]);

//================================================================================================
// Traits
//================================================================================================

/// A single attempt against a remote index.
///
/// Implementations classify failures through [`FetchCause`]; they must not retry.
pub trait QueryIndex: Send + Sync + 'static {
    /// The published versions of a package, in any order.
    fn versions(
        &self,
        name: &PackageName,
    ) -> impl Future<Output = Result<Vec<Version>, FetchCause>> + Send;

    /// The releases of the core runtime, in any order.
    fn core_releases(&self) -> impl Future<Output = Result<Vec<CoreRelease>, FetchCause>> + Send;

    /// The file manifest recorded in the artifact of `name` at `version`.
    fn artifact_files(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> impl Future<Output = Result<Vec<FileEntry>, FetchCause>> + Send;
}

//================================================================================================
// Impls
//================================================================================================

impl FetchCause {
    /// Whether a later attempt might succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchCause::Timeout | FetchCause::Transport(_) => true,
            FetchCause::Status(status) => *status >= 500 || *status == 429,
            FetchCause::NotFound
            | FetchCause::Decode(_)
            | FetchCause::Cancelled
            | FetchCause::TaskTimeout => false,
        }
    }
}

impl FetchError {
    /// A failure that never reached the index.
    pub fn without_attempts(subject: impl Into<String>, cause: FetchCause) -> Self {
        FetchError {
            subject: subject.into(),
            cause,
            attempts: 0,
            statuses: Vec::new(),
        }
    }
}

impl fmt::Display for StatusTrail<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        f.write_str(" (statuses seen: ")?;
        for (i, status) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{status}")?;
        }
        f.write_str(")")
    }
}

impl RetryPolicy {
    fn backoff(&self) -> backoff::ExponentialBackoff {
        ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_backoff)
            .with_multiplier(1.5)
            .with_randomization_factor(0.5)
            .with_max_interval(self.task_timeout)
            .with_max_elapsed_time(None)
            .build()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            task_timeout: Duration::from_secs(300),
        }
    }
}

impl FetchContext {
    /// A fresh context with `concurrency` permits. Zero is treated as one.
    pub fn new(concurrency: usize, policy: RetryPolicy, cancel: CancellationToken) -> Self {
        FetchContext {
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            cancel,
            policy,
        }
    }
}

impl<I: QueryIndex> Retrying<I> {
    /// Wraps a single-attempt index.
    pub fn new(inner: I) -> Self {
        Retrying { inner }
    }

    /// The wrapped index.
    pub fn inner(&self) -> &I {
        &self.inner
    }

    /// The published versions of `name`.
    pub async fn fetch_versions(
        &self,
        name: &PackageName,
        ctx: &FetchContext,
    ) -> Result<Vec<Version>, FetchError> {
        self.with_retries(name.as_str(), ctx, || self.inner.versions(name))
            .await
    }

    /// The releases of the core runtime.
    pub async fn fetch_core(&self, ctx: &FetchContext) -> Result<Vec<CoreRelease>, FetchError> {
        self.with_retries(CORE_SUBJECT, ctx, || self.inner.core_releases())
            .await
    }

    /// The artifact file manifest of `name` at `version`.
    pub async fn fetch_artifact_files(
        &self,
        name: &PackageName,
        version: &Version,
        ctx: &FetchContext,
    ) -> Result<Vec<FileEntry>, FetchError> {
        self.with_retries(name.as_str(), ctx, || {
            self.inner.artifact_files(name, version)
        })
        .await
    }

    async fn with_retries<T, F, Fut>(
        &self,
        subject: &str,
        ctx: &FetchContext,
        mut attempt: F,
    ) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, FetchCause>>,
    {
        let max_attempts = ctx.policy.max_attempts.max(1);
        let mut backoff = ctx.policy.backoff();
        let mut statuses = Vec::new();
        let mut attempts = 0;

        loop {
            let permit = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => None,
                permit = ctx.permits.acquire() => permit.ok(),
            };
            let Some(permit) = permit else {
                return Err(FetchError {
                    subject: subject.to_owned(),
                    cause: FetchCause::Cancelled,
                    attempts,
                    statuses,
                });
            };

            attempts += 1;
            let result = attempt().await;
            drop(permit);

            let cause = match result {
                Ok(value) => return Ok(value),
                Err(cause) => cause,
            };
            if let FetchCause::Status(status) = cause {
                statuses.push(status);
            }

            if !cause.is_transient() || attempts >= max_attempts {
                tracing::debug!(subject, attempts, %cause, "giving up on fetch");
                return Err(FetchError {
                    subject: subject.to_owned(),
                    cause,
                    attempts,
                    statuses,
                });
            }

            let delay = backoff
                .next_backoff()
                .unwrap_or(ctx.policy.initial_backoff);
            tracing::debug!(
                subject,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                %cause,
                "transient failure, backing off"
            );

            tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => {
                    return Err(FetchError {
                        subject: subject.to_owned(),
                        cause: FetchCause::Cancelled,
                        attempts,
                        statuses,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
