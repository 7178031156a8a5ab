//! Tests for the bounded fetch scheduler.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::*;
use crate::catalog::FileEntry;
use crate::index::FetchCause;
use crate::version::ReleaseId;

//================================================================================================
// Types
//================================================================================================

/// An in-memory index that records how many requests overlap.
struct SlowIndex {
    answers: BTreeMap<String, Result<Vec<Version>, FetchCause>>,
    delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

//================================================================================================
// Impls
//================================================================================================

impl SlowIndex {
    fn new(delay: Duration) -> Self {
        SlowIndex {
            answers: BTreeMap::new(),
            delay,
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }

    fn answer(mut self, name: &str, answer: Result<Vec<Version>, FetchCause>) -> Self {
        self.answers.insert(name.to_owned(), answer);
        self
    }

    async fn enter(&self) {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl QueryIndex for SlowIndex {
    async fn versions(&self, name: &PackageName) -> Result<Vec<Version>, FetchCause> {
        self.enter().await;
        self.answers
            .get(name.as_str())
            .cloned()
            .unwrap_or(Ok(vec![Version::new(1, 0, 0)]))
    }

    async fn core_releases(&self) -> Result<Vec<CoreRelease>, FetchCause> {
        self.enter().await;
        Ok(vec![CoreRelease {
            version: ReleaseId::new(2, 15, 0),
            requires_runtime: Some(">=3.9".into()),
        }])
    }

    async fn artifact_files(
        &self,
        _: &PackageName,
        _: &Version,
    ) -> Result<Vec<FileEntry>, FetchCause> {
        self.enter().await;
        Ok(Vec::new())
    }
}

//================================================================================================
// Functions
//================================================================================================

fn settings(concurrency: usize) -> FetchSettings {
    FetchSettings {
        concurrency,
        policy: RetryPolicy {
            max_attempts: 2,
            initial_backoff: Duration::ZERO,
            task_timeout: Duration::from_secs(10),
        },
    }
}

fn names(count: usize) -> Vec<PackageName> {
    (0..count)
        .map(|i| format!("ns.pkg{i}").parse().expect("valid name"))
        .collect()
}

#[tokio::test]
async fn concurrency_never_exceeds_the_ceiling() -> anyhow::Result<()> {
    let scheduler = Scheduler::new(SlowIndex::new(Duration::from_millis(10)), settings(3));

    let catalog = scheduler
        .fetch_all(names(20), &CancellationToken::new())
        .await?;

    assert_eq!(catalog.len(), 20);
    let peak = scheduler.client().inner().peak.load(Ordering::SeqCst);
    assert!(peak <= 3, "observed {peak} concurrent requests");
    assert!(peak >= 1);
    Ok(())
}

#[tokio::test]
async fn one_failure_does_not_affect_siblings() -> anyhow::Result<()> {
    let index = SlowIndex::new(Duration::ZERO)
        .answer("ns.a", Ok(vec![Version::new(1, 0, 0), Version::new(1, 2, 0)]))
        .answer("ns.b", Err(FetchCause::Status(500)))
        .answer("ns.c", Ok(Vec::new()));
    let scheduler = Scheduler::new(index, settings(2));
    let names: Vec<PackageName> = ["ns.a", "ns.b", "ns.c"]
        .into_iter()
        .map(str::parse)
        .collect::<Result<_, _>>()?;

    let catalog = scheduler
        .fetch_all(names.clone(), &CancellationToken::new())
        .await?;

    assert_eq!(
        catalog.get(&names[0]),
        Some(&CatalogEntry::Available(vec![
            Version::new(1, 2, 0),
            Version::new(1, 0, 0)
        ]))
    );
    let failure = catalog
        .get(&names[1])
        .and_then(CatalogEntry::failure)
        .expect("b failed");
    assert_eq!(failure.attempts, 2);
    assert_eq!(catalog.get(&names[2]), Some(&CatalogEntry::NoVersionsFound));
    assert_eq!(catalog.failures().count(), 1);
    assert!(matches!(catalog.core(), Some(CatalogEntry::Available(v)) if v.len() == 1));
    Ok(())
}

#[tokio::test]
async fn cancellation_is_a_distinct_outcome() {
    let scheduler = Scheduler::new(SlowIndex::new(Duration::from_millis(200)), settings(1));
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let Err(Cancelled { partial }) = scheduler.fetch_all(names(5), &cancel).await else {
        panic!("a cancelled batch must not report completion");
    };
    assert!(
        partial
            .failures()
            .any(|e| e.cause == FetchCause::Cancelled)
    );
}

#[tokio::test]
async fn cancelled_batches_dispatch_nothing() {
    let scheduler = Scheduler::new(SlowIndex::new(Duration::ZERO), settings(4));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let Err(Cancelled { partial }) = scheduler.fetch_all(names(5), &cancel).await else {
        panic!("a cancelled batch must not report completion");
    };
    assert!(partial.is_empty());
    assert_eq!(scheduler.client().inner().peak.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn artifact_manifests_go_through_the_scheduler() -> anyhow::Result<()> {
    use crate::validate::ArtifactSource;

    let scheduler = Scheduler::new(SlowIndex::new(Duration::ZERO), settings(2));
    let files = scheduler
        .artifact_files(&"ns.a".parse()?, &Version::new(1, 0, 0))
        .await?;

    assert!(files.is_empty());
    assert_eq!(scheduler.client().inner().peak.load(Ordering::SeqCst), 1);
    Ok(())
}
