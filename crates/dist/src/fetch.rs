//! # Bounded Fetch Scheduler
//!
//! Runs one fetch task per package on a tokio [`JoinSet`], never letting more
//! than the configured number of index requests be in flight at once. The
//! ceiling is enforced by the semaphore in [`FetchContext`], which every attempt
//! of every task must hold while it talks to the index.
//!
//! Results are gathered as they complete and written into a fresh
//! [`VersionCatalog`]; completion order is irrelevant because the catalog is keyed
//! and every version list is sorted before insertion.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use semver::Version;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::catalog::{CatalogEntry, CoreRelease, VersionCatalog};
use crate::index::{CORE_SUBJECT, FetchCause, FetchContext, FetchError, QueryIndex, Retrying, RetryPolicy};
use crate::name::PackageName;

#[cfg(test)]
mod test;

//================================================================================================
// Types
//================================================================================================

/// The explicit bounds a scheduler runs under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FetchSettings {
    /// The maximum number of index requests in flight.
    pub concurrency: usize,
    /// Per-task retry bounds.
    pub policy: RetryPolicy,
}

/// Dispatches index queries for whole package sets.
#[derive(Debug)]
pub struct Scheduler<I> {
    client: Arc<Retrying<I>>,
    settings: FetchSettings,
}

/// A batch stopped by its cancellation signal.
///
/// Whatever completed before the signal, including failures, is kept in `partial`.
#[derive(thiserror::Error, Debug)]
#[error("fetch batch was cancelled with {} package slot(s) completed", .partial.len())]
pub struct Cancelled {
    /// The slots that completed before cancellation.
    pub partial: VersionCatalog,
}

enum Slot {
    Package(PackageName, Result<Vec<Version>, FetchError>),
    Core(Result<Vec<CoreRelease>, FetchError>),
}

//================================================================================================
// Impls
//================================================================================================

impl Default for FetchSettings {
    fn default() -> Self {
        FetchSettings {
            concurrency: 8,
            policy: RetryPolicy::default(),
        }
    }
}

impl<I: QueryIndex> Scheduler<I> {
    /// A scheduler over `client` with the given bounds.
    pub fn new(client: I, settings: FetchSettings) -> Self {
        Scheduler {
            client: Arc::new(Retrying::new(client)),
            settings,
        }
    }

    /// The bounds this scheduler runs under.
    pub fn settings(&self) -> FetchSettings {
        self.settings
    }

    /// The retrying client shared by all tasks.
    pub fn client(&self) -> &Arc<Retrying<I>> {
        &self.client
    }

    /// Fetches the versions of every package in `names`, plus the core runtime.
    ///
    /// Individual failures are recorded in the catalog and never abort siblings.
    /// If `cancel` fires, no further tasks are started, tasks already running are
    /// awaited, and the batch returns [`Cancelled`].
    pub async fn fetch_all(
        &self,
        names: impl IntoIterator<Item = PackageName>,
        cancel: &CancellationToken,
    ) -> Result<VersionCatalog, Cancelled> {
        let names: BTreeSet<PackageName> = names.into_iter().collect();
        let ctx = self.context(cancel);

        let span = crate::log::batch_span("versions", "fetching version metadata", names.len() + 1);

        async move {
            let mut tasks = JoinSet::new();
            let timeout = ctx.policy.task_timeout;

            {
                let client = Arc::clone(&self.client);
                let ctx = ctx.clone();
                tasks.spawn(async move {
                    let result = bounded(timeout, CORE_SUBJECT, client.fetch_core(&ctx)).await;
                    Slot::Core(result)
                });
            }

            for name in names {
                if cancel.is_cancelled() {
                    tracing::warn!(next = %name, "cancellation requested, not dispatching further fetches");
                    break;
                }
                let client = Arc::clone(&self.client);
                let ctx = ctx.clone();
                tasks.spawn(async move {
                    let result =
                        bounded(timeout, name.as_str(), client.fetch_versions(&name, &ctx)).await;
                    Slot::Package(name, result)
                });
            }

            let mut catalog = VersionCatalog::default();
            while let Some(res) = tasks.join_next().await {
                match res {
                    Ok(Slot::Package(name, result)) => {
                        if let Err(e) = &result {
                            tracing::warn!(package = %name, error = %e, "version fetch failed");
                        }
                        catalog.insert(name, CatalogEntry::from_fetch(result));
                    },
                    Ok(Slot::Core(result)) => {
                        if let Err(e) = &result {
                            tracing::warn!(error = %e, "core release fetch failed");
                        }
                        catalog.set_core(CatalogEntry::from_fetch(result));
                    },
                    Err(e) => tracing::error!(error = %e, "fetch task did not complete"),
                }
                crate::log::tick();
            }

            if cancel.is_cancelled() {
                Err(Cancelled { partial: catalog })
            } else {
                Ok(catalog)
            }
        }
        .instrument(span)
        .await
    }

    pub(crate) fn context(&self, cancel: &CancellationToken) -> FetchContext {
        FetchContext::new(self.settings.concurrency, self.settings.policy, cancel.clone())
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Applies the per-task time budget to one logical fetch.
pub(crate) async fn bounded<T>(
    budget: Duration,
    subject: &str,
    fetch: impl Future<Output = Result<T, FetchError>>,
) -> Result<T, FetchError> {
    match tokio::time::timeout(budget, fetch).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(subject, budget_secs = budget.as_secs(), "fetch exceeded its time budget");
            Err(FetchError::without_attempts(subject, FetchCause::TaskTimeout))
        },
    }
}
