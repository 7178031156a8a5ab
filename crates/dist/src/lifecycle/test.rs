use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tempfile::TempDir;

use super::*;
use crate::catalog::{CoreRelease, FileEntry};
use crate::fetch::FetchSettings;
use crate::index::{FetchCause, RetryPolicy};
use crate::manifest::DigestStatus;

//================================================================================================
// Types
//================================================================================================

/// An index answering from fixed tables.
#[derive(Default)]
struct StaticIndex {
    versions: BTreeMap<String, Vec<Version>>,
}

/// A builder that only counts its invocations.
#[derive(Default)]
struct Counting(AtomicUsize);

//================================================================================================
// Impls
//================================================================================================

impl StaticIndex {
    fn with(mut self, name: &str, versions: &[&str]) -> Self {
        self.versions.insert(
            name.to_owned(),
            versions
                .iter()
                .map(|v| Version::parse(v).expect("valid test version"))
                .collect(),
        );
        self
    }
}

impl QueryIndex for StaticIndex {
    async fn versions(&self, name: &PackageName) -> Result<Vec<Version>, FetchCause> {
        self.versions
            .get(name.as_str())
            .cloned()
            .ok_or(FetchCause::NotFound)
    }

    async fn core_releases(&self) -> Result<Vec<CoreRelease>, FetchCause> {
        Ok(["2.15.0", "2.15.2", "2.16.0"]
            .into_iter()
            .map(|id| CoreRelease {
                version: id.parse().expect("valid release id"),
                requires_runtime: Some(">=3.9".into()),
            })
            .collect())
    }

    async fn artifact_files(
        &self,
        _: &PackageName,
        _: &Version,
    ) -> Result<Vec<FileEntry>, FetchCause> {
        Ok(Vec::new())
    }
}

impl ArtifactBuilder for Counting {
    async fn build(&self, _: &BuildPlan, plan_path: &Path) -> Result<(), BuildError> {
        assert!(plan_path.exists());
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

//================================================================================================
// Functions
//================================================================================================

fn lifecycle(index: StaticIndex) -> anyhow::Result<(TempDir, Lifecycle<StaticIndex>)> {
    let dir = tempfile::tempdir()?;
    let lifecycle = lifecycle_at(dir.path(), index);
    Ok((dir, lifecycle))
}

fn lifecycle_at(root: &Path, index: StaticIndex) -> Lifecycle<StaticIndex> {
    let settings = FetchSettings {
        concurrency: 4,
        policy: RetryPolicy {
            max_attempts: 1,
            initial_backoff: Duration::ZERO,
            task_timeout: Duration::from_secs(5),
        },
    };
    Lifecycle::new(Layout::new(root), Scheduler::new(index, settings))
}

fn index() -> StaticIndex {
    StaticIndex::default()
        .with("ns.a", &["1.0.0", "1.1.0", "1.5.0", "2.0.0"])
        .with("ns.b", &["0.3.0", "0.4.1"])
}

fn draft(lifecycle: &Lifecycle<StaticIndex>, packages: &str) -> anyhow::Result<()> {
    let path = lifecycle.layout().build_file(8);
    std::fs::write(
        path,
        format!("track = 8\ncore = \">=2.15.0,<2.16.0\"\n[packages]\n{packages}"),
    )?;
    Ok(())
}

fn name(s: &str) -> PackageName {
    s.parse().expect("valid test name")
}

fn release(s: &str) -> ReleaseId {
    s.parse().expect("valid release id")
}

//================================================================================================
// Tests
//================================================================================================

#[tokio::test]
async fn tracks_are_drafted_once() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    let cancel = CancellationToken::new();
    let seed = Seed::Empty {
        core: ">=2.15.0,<2.16.0".parse::<VersionRange>()?.into(),
        runtime: Some(">=3.9".into()),
    };

    assert_eq!(lifecycle.state(&release("8.0.0a1")), ReleaseState::Uninitialized);
    lifecycle.new_release(8, seed.clone(), false, &cancel).await?;
    assert_eq!(lifecycle.state(&release("8.0.0a1")), ReleaseState::Drafted);

    let again = lifecycle.new_release(8, seed.clone(), false, &cancel).await;
    assert!(matches!(again, Err(LifecycleError::AlreadyDrafted(_))));
    lifecycle.new_release(8, seed, true, &cancel).await?;

    let copied = lifecycle
        .new_release(9, Seed::CopyPrior(8), false, &cancel)
        .await?;
    assert_eq!(copied.track, 9);
    assert_eq!(ConstraintManifest::read(lifecycle.layout().build_file(9))?, copied);
    Ok(())
}

#[tokio::test]
async fn latest_seeds_follow_the_major_line() -> anyhow::Result<()> {
    let index = StaticIndex::default()
        .with("ns.a", &["1.0.0", "1.2.3", "2.0.0-rc.1"])
        .with("ns.b", &["3.0.0-beta.1"]);
    let (_dir, lifecycle) = lifecycle(index)?;
    let core: VersionConstraint = ">=2.15.0,<2.16.0".parse::<VersionRange>()?.into();

    let manifest = lifecycle
        .new_release(
            1,
            Seed::Latest {
                packages: vec![name("ns.a"), name("ns.b")],
                core: core.clone(),
                runtime: None,
            },
            false,
            &CancellationToken::new(),
        )
        .await?;

    assert_eq!(manifest.packages[&name("ns.a")].to_string(), ">=1.2.0,<2.0.0");
    assert_eq!(
        manifest.packages[&name("ns.b")].to_string(),
        ">=3.0.0-beta.1,<4.0.0"
    );

    let failed = lifecycle
        .new_release(
            2,
            Seed::Latest {
                packages: vec![name("ns.a"), name("ns.missing")],
                core,
                runtime: None,
            },
            false,
            &CancellationToken::new(),
        )
        .await;
    let Err(LifecycleError::Resolution(err)) = failed else {
        panic!("a failed fetch must abort seeding");
    };
    assert_eq!(err.blockers.len(), 1);
    assert_eq!(err.blockers[0].reason.code(), "fetch_failed");
    assert!(!lifecycle.layout().build_file(2).exists());
    Ok(())
}

#[tokio::test]
async fn prepare_pins_and_stays_stable() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    draft(&lifecycle, "\"ns.a\" = \">=1.0.0,<2.0.0\"\n\"ns.b\" = \">=0.3.0\"\n")?;
    let id = release("8.1.0");

    let first = lifecycle.prepare(&id, PrepareOptions::default()).await?;
    assert_eq!(first.manifest.packages[&name("ns.a")], Version::new(1, 5, 0));
    assert_eq!(first.manifest.packages[&name("ns.b")], Version::new(0, 4, 1));
    assert_eq!(first.manifest.core.to_string(), "2.15.2");
    assert!(first.diff.is_empty());
    assert_eq!(lifecycle.state(&id), ReleaseState::Pinned);

    let second = lifecycle.prepare(&id, PrepareOptions::default()).await?;
    assert_eq!(second.manifest, first.manifest);
    assert!(second.diff.is_empty());
    Ok(())
}

#[tokio::test]
async fn feature_freeze_narrows_before_resolving() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    draft(&lifecycle, "\"ns.a\" = \">=1.0.0,<2.0.0\"\n")?;

    let rc = lifecycle
        .prepare(&release("8.0.0rc1"), PrepareOptions::default())
        .await?;
    assert_eq!(rc.manifest.packages[&name("ns.a")], Version::new(1, 0, 0));

    let beta = lifecycle
        .prepare(&release("8.0.0b1"), PrepareOptions::default())
        .await?;
    assert_eq!(beta.manifest.packages[&name("ns.a")], Version::new(1, 5, 0));
    Ok(())
}

#[tokio::test]
async fn missing_build_files_are_reported() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    let err = lifecycle
        .prepare(&release("8.1.0"), PrepareOptions::default())
        .await;
    assert!(matches!(err, Err(LifecycleError::NotDrafted(_))));
    Ok(())
}

#[tokio::test]
async fn edited_deps_files_are_refused() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    draft(&lifecycle, "\"ns.a\" = \">=1.0.0,<2.0.0\"\n")?;
    let id = release("8.1.0");
    lifecycle.prepare(&id, PrepareOptions::default()).await?;

    let path = lifecycle.layout().deps_file(&id);
    let edited = std::fs::read_to_string(&path)?.replace("1.5.0", "1.1.0");
    std::fs::write(&path, edited)?;
    assert_eq!(PinnedManifest::read_checked(&path)?.1, DigestStatus::Edited);

    let prepare = lifecycle.prepare(&id, PrepareOptions::default()).await;
    assert!(matches!(
        prepare,
        Err(LifecycleError::Diff(StructuralDiffError::ManualEdit { .. }))
    ));

    let builder = Counting::default();
    let rebuild = lifecycle.rebuild(&id, &builder, false).await;
    assert!(matches!(
        rebuild,
        Err(LifecycleError::Diff(StructuralDiffError::ManualEdit { .. }))
    ));
    assert_eq!(builder.0.load(Ordering::SeqCst), 0);

    let plan = lifecycle.rebuild(&id, &builder, true).await?;
    assert_eq!(plan.listing(), vec!["core==2.15.2", "ns.a==1.1.0"]);
    Ok(())
}

#[tokio::test]
async fn rebuilds_are_reproducible() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    draft(&lifecycle, "\"ns.b\" = \">=0.3.0\"\n\"ns.a\" = \">=1.0.0,<2.0.0\"\n")?;
    let id = release("8.1.0");
    lifecycle.prepare(&id, PrepareOptions::default()).await?;
    let builder = Counting::default();

    let first = lifecycle.rebuild(&id, &builder, false).await?;
    let first_bytes = std::fs::read(lifecycle.layout().plan_file(&id))?;
    let second = lifecycle.rebuild(&id, &builder, false).await?;
    let second_bytes = std::fs::read(lifecycle.layout().plan_file(&id))?;

    assert_eq!(first, second);
    assert_eq!(first_bytes, second_bytes);
    assert_eq!(first.listing(), vec!["core==2.15.2", "ns.a==1.5.0", "ns.b==0.4.1"]);
    assert_eq!(builder.0.load(Ordering::SeqCst), 2);
    assert_eq!(lifecycle.state(&id), ReleaseState::Built);
    Ok(())
}

#[tokio::test]
async fn frozen_constraint_edits_need_confirmation() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    draft(&lifecycle, "\"ns.a\" = \">=1.0.0,<2.0.0\"\n")?;
    let current = ConstraintManifest::read(lifecycle.layout().build_file(8))?;

    let mut narrowed = current.clone();
    narrowed.packages.insert(
        name("ns.a"),
        ">=1.1.0,<2.0.0".parse::<VersionRange>()?.into(),
    );
    let changes = lifecycle.accept_constraint_edit(8, &narrowed, ReleasePhase::Rc, false)?;
    assert_eq!(changes.len(), 1);

    let mut widened = narrowed.clone();
    widened.packages.insert(
        name("ns.a"),
        ">=1.1.0,<3.0.0".parse::<VersionRange>()?.into(),
    );
    let refused = lifecycle.accept_constraint_edit(8, &widened, ReleasePhase::Rc, false);
    assert!(matches!(
        refused,
        Err(LifecycleError::Diff(StructuralDiffError::NeedsConfirmation { .. }))
    ));
    assert_eq!(
        ConstraintManifest::read(lifecycle.layout().build_file(8))?,
        narrowed
    );

    lifecycle.accept_constraint_edit(8, &widened, ReleasePhase::Rc, true)?;
    assert_eq!(
        ConstraintManifest::read(lifecycle.layout().build_file(8))?,
        widened
    );
    Ok(())
}

#[tokio::test]
async fn releases_can_be_compared() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    draft(&lifecycle, "\"ns.a\" = \">=1.0.0,<2.0.0\"\n")?;
    let pins = Pins::from([(name("ns.a"), Version::new(1, 1, 0))]);
    lifecycle
        .prepare(&release("8.0.1"), PrepareOptions {
            pins,
            ..Default::default()
        })
        .await?;
    lifecycle
        .prepare(&release("8.1.0"), PrepareOptions::default())
        .await?;

    let changes = lifecycle.diff_releases(&release("8.0.1"), &release("8.1.0"))?;
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].to_string(), "ns.a: version-bump (1.1.0 -> 1.5.0)");

    assert!(matches!(
        lifecycle.diff_releases(&release("8.0.1"), &release("8.2.0")),
        Err(LifecycleError::NotPinned(_))
    ));
    Ok(())
}

#[tokio::test]
async fn sweeps_report_everything_at_once() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    draft(
        &lifecycle,
        "\"ns.a\" = \">=1.0.0,<2.0.0\"\n\"ns.b\" = \">=1.0.0\"\n\"ns.gone\" = \">=1.0.0\"\n",
    )?;

    let report = lifecycle
        .sweep(&release("8.1.0"), &CancellationToken::new())
        .await?;

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].subject, "ns.gone");
    assert_eq!(report.resolution.packages.len(), 1);
    let codes: Vec<_> = report
        .resolution
        .blockers
        .iter()
        .map(|b| b.reason.code())
        .collect();
    assert_eq!(codes, vec!["no_satisfying_version", "fetch_failed"]);
    assert_eq!(lifecycle.state(&release("8.1.0")), ReleaseState::Drafted);
    Ok(())
}

#[tokio::test]
async fn frozen_releases_keep_their_pins() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    draft(&lifecycle, "\"ns.a\" = \">=1.0.0,<2.0.0\"\n")?;
    let id = release("8.0.1");
    let pins = Pins::from([(name("ns.a"), Version::new(1, 1, 0))]);

    let first = lifecycle
        .prepare(&id, PrepareOptions {
            pins,
            ..Default::default()
        })
        .await?;
    assert_eq!(first.manifest.packages[&name("ns.a")], Version::new(1, 1, 0));

    // moving up inside the range needs no confirmation
    let second = lifecycle.prepare(&id, PrepareOptions::default()).await?;
    assert_eq!(second.manifest.packages[&name("ns.a")], Version::new(1, 5, 0));
    assert_eq!(
        second.diff.iter().map(ToString::to_string).collect::<Vec<_>>(),
        ["ns.a: version-bump (1.1.0 -> 1.5.0)"]
    );

    let bytes = std::fs::read(lifecycle.layout().deps_file(&id))?;
    let third = lifecycle.prepare(&id, PrepareOptions::default()).await?;
    assert_eq!(third.manifest, second.manifest);
    assert!(third.diff.is_empty());
    assert_eq!(std::fs::read(lifecycle.layout().deps_file(&id))?, bytes);
    Ok(())
}

#[tokio::test]
async fn frozen_downgrades_need_confirmation() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    draft(&lifecycle, "\"ns.a\" = \">=1.0.0,<2.0.0\"\n")?;
    let id = release("8.0.1");
    lifecycle.prepare(&id, PrepareOptions::default()).await?;
    let path = lifecycle.layout().deps_file(&id);
    let pinned = std::fs::read(&path)?;

    let down = || PrepareOptions {
        pins: Pins::from([(name("ns.a"), Version::new(1, 1, 0))]),
        ..Default::default()
    };
    let refused = lifecycle.prepare(&id, down()).await;
    let Err(LifecycleError::Diff(StructuralDiffError::NeedsConfirmation { changes })) = refused else {
        panic!("a frozen downgrade must be refused");
    };
    assert_eq!(changes.len(), 1);
    assert_eq!(changes[0].to_string(), "ns.a: version-downgrade (1.5.0 -> 1.1.0)");
    assert_eq!(std::fs::read(&path)?, pinned);

    let confirmed = lifecycle
        .prepare(&id, PrepareOptions {
            confirm: true,
            ..down()
        })
        .await?;
    assert_eq!(confirmed.manifest.packages[&name("ns.a")], Version::new(1, 1, 0));
    assert_eq!(confirmed.diff[0].kind.to_string(), "version-downgrade");
    assert_eq!(PinnedManifest::read_checked(&path)?.1, DigestStatus::Intact);
    Ok(())
}

#[tokio::test]
async fn frozen_releases_never_move_below_their_pins() -> anyhow::Result<()> {
    let (dir, lifecycle) = lifecycle(index())?;
    draft(&lifecycle, "\"ns.a\" = \">=1.0.0,<2.0.0\"\n")?;
    let id = release("8.0.1");
    lifecycle.prepare(&id, PrepareOptions::default()).await?;
    let pinned = std::fs::read(lifecycle.layout().deps_file(&id))?;

    // 1.5.0 was pulled from the index after the release was pinned
    let yanked = lifecycle_at(
        dir.path(),
        StaticIndex::default().with("ns.a", &["1.0.0", "1.1.0", "2.0.0"]),
    );
    let refused = yanked
        .prepare(&id, PrepareOptions {
            confirm: true,
            ..Default::default()
        })
        .await;
    let Err(LifecycleError::Resolution(err)) = refused else {
        panic!("a frozen release must not regress");
    };
    assert_eq!(err.blockers.len(), 1);
    assert_eq!(err.blockers[0].reason.code(), "frozen_regression");
    assert_eq!(std::fs::read(yanked.layout().deps_file(&id))?, pinned);
    Ok(())
}

#[tokio::test]
async fn frozen_removals_need_confirmation() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    draft(&lifecycle, "\"ns.a\" = \">=1.0.0,<2.0.0\"\n\"ns.b\" = \">=0.3.0\"\n")?;
    let id = release("8.0.1");
    lifecycle.prepare(&id, PrepareOptions::default()).await?;
    let path = lifecycle.layout().deps_file(&id);
    let pinned = std::fs::read(&path)?;

    draft(&lifecycle, "\"ns.a\" = \">=1.0.0,<2.0.0\"\n")?;
    let refused = lifecycle.prepare(&id, PrepareOptions::default()).await;
    let Err(LifecycleError::Resolution(err)) = refused else {
        panic!("a frozen removal must be refused");
    };
    assert_eq!(err.blockers.len(), 1);
    assert_eq!(err.blockers[0].subject.to_string(), "ns.b");
    assert_eq!(err.blockers[0].reason.code(), "removed_after_freeze");
    assert_eq!(std::fs::read(&path)?, pinned);

    let confirmed = lifecycle
        .prepare(&id, PrepareOptions {
            confirm: true,
            ..Default::default()
        })
        .await?;
    assert!(!confirmed.manifest.packages.contains_key(&name("ns.b")));
    assert_eq!(
        confirmed.diff.iter().map(ToString::to_string).collect::<Vec<_>>(),
        ["ns.b: removal (was 0.4.1)"]
    );
    Ok(())
}

#[tokio::test]
async fn track_phase_follows_the_newest_deps_file() -> anyhow::Result<()> {
    let (_dir, lifecycle) = lifecycle(index())?;
    draft(&lifecycle, "\"ns.a\" = \">=1.0.0,<2.0.0\"\n")?;
    assert_eq!(lifecycle.current_phase(8)?, ReleasePhase::Alpha);

    lifecycle
        .prepare(&release("8.0.0b1"), PrepareOptions::default())
        .await?;
    assert_eq!(lifecycle.current_phase(8)?, ReleasePhase::BetaFirst);

    lifecycle
        .prepare(&release("8.0.1"), PrepareOptions::default())
        .await?;
    lifecycle
        .prepare(&release("8.0.0rc1"), PrepareOptions::default())
        .await?;
    assert_eq!(lifecycle.current_phase(8)?, ReleasePhase::Patch);
    assert_eq!(lifecycle.current_phase(9)?, ReleasePhase::Alpha);
    Ok(())
}
