use std::collections::BTreeMap;
use std::sync::Arc;

use semver::Version;

use super::*;
use crate::index::FetchCause;
use crate::sources::Source;

/// Tags and trees held in memory, keyed by repository.
#[derive(Default)]
struct MemoryTags {
    tags: BTreeMap<String, Vec<String>>,
    trees: BTreeMap<(String, String), Vec<TreeFile>>,
}

/// Artifact manifests held in memory; anything absent is a 404.
#[derive(Default)]
struct MemoryArtifacts {
    files: BTreeMap<(PackageName, Version), Vec<FileEntry>>,
}

impl TagSource for MemoryTags {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, TagError> {
        Ok(self.tags.get(repository).cloned().unwrap_or_default())
    }

    async fn tree(
        &self,
        repository: &str,
        tag: &str,
        _directory: Option<&str>,
    ) -> Result<Vec<TreeFile>, TagError> {
        self.trees
            .get(&(repository.to_owned(), tag.to_owned()))
            .cloned()
            .ok_or_else(|| TagError::NoTag(tag.to_owned()))
    }
}

impl ArtifactSource for MemoryArtifacts {
    async fn artifact_files(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<Vec<FileEntry>, FetchError> {
        self.files
            .get(&(name.to_owned(), version.to_owned()))
            .cloned()
            .ok_or_else(|| FetchError {
                subject: name.to_string(),
                cause: FetchCause::Status(404),
                attempts: 1,
                statuses: vec![404],
            })
    }
}

fn file(path: &str, sha256: Option<&str>) -> FileEntry {
    FileEntry {
        path: path.into(),
        kind: FileKind::File,
        sha256: sha256.map(Into::into),
    }
}

fn dir(path: &str) -> FileEntry {
    FileEntry {
        path: path.into(),
        kind: FileKind::Dir,
        sha256: None,
    }
}

fn tree_file(path: &str, sha256: Option<&str>) -> TreeFile {
    TreeFile {
        path: path.into(),
        sha256: sha256.map(Into::into),
    }
}

fn pinned(packages: &[(&str, &str)]) -> anyhow::Result<PinnedManifest> {
    let body: String = packages
        .iter()
        .map(|(name, version)| format!("\"{name}\" = \"{version}\"\n"))
        .collect();
    Ok(format!(
        "release = \"8.0.0\"\ncore = \"2.15.0\"\nruntime = \">=3.9\"\n[packages]\n{body}"
    )
    .parse()?)
}

fn sources(repos: &[(&str, &str)]) -> anyhow::Result<SourceMap> {
    let mut map = SourceMap::default();
    for (name, repository) in repos {
        map.insert(
            name.parse()?,
            Source {
                repository: (*repository).into(),
                directory: None,
            },
        );
    }
    Ok(map)
}

fn validator(
    artifacts: MemoryArtifacts,
    tags: MemoryTags,
    sources: SourceMap,
) -> Validator<MemoryArtifacts, MemoryTags> {
    Validator::new(Arc::new(artifacts), Arc::new(tags), sources, 4)
}

fn kinds(report: &ValidationReport) -> Vec<String> {
    report.iter().map(|m| m.kind.to_string()).collect()
}

#[tokio::test]
async fn file_only_in_tag_is_missing_from_artifact() -> anyhow::Result<()> {
    let name: PackageName = "ns.a".parse()?;
    let version = Version::new(1, 0, 0);

    let mut artifacts = MemoryArtifacts::default();
    artifacts.files.insert(
        (name.clone(), version.clone()),
        vec![dir("plugins"), file("a.py", None)],
    );
    let mut tags = MemoryTags::default();
    tags.tags.insert("repo-a".into(), vec!["1.0.0".into()]);
    tags.trees.insert(
        ("repo-a".into(), "1.0.0".into()),
        vec![tree_file("a.py", None), tree_file("b.py", None)],
    );

    let report = validator(artifacts, tags, sources(&[("ns.a", "repo-a")])?)
        .validate(&pinned(&[("ns.a", "1.0.0")])?)
        .await;

    assert!(!report.is_pass());
    assert_eq!(report.len(), 1);
    insta::assert_snapshot!(report.to_string().trim_end(), @"ns.a 1.0.0: missing_from_artifact(b.py)");
    Ok(())
}

#[tokio::test]
async fn leading_v_tags_match_and_identical_trees_pass() -> anyhow::Result<()> {
    let name: PackageName = "ns.a".parse()?;
    let mut artifacts = MemoryArtifacts::default();
    artifacts.files.insert(
        (name, Version::new(2, 1, 0)),
        vec![file("a.py", Some("ABCD")), file("docs/x.md", None)],
    );
    let mut tags = MemoryTags::default();
    tags.tags
        .insert("repo-a".into(), vec!["v2.0.0".into(), "v2.1.0".into()]);
    tags.trees.insert(
        ("repo-a".into(), "v2.1.0".into()),
        vec![tree_file("a.py", Some("abcd")), tree_file("docs/x.md", Some("ff"))],
    );

    let report = validator(artifacts, tags, sources(&[("ns.a", "repo-a")])?)
        .validate(&pinned(&[("ns.a", "2.1.0")])?)
        .await;

    assert!(report.is_pass(), "{report}");
    Ok(())
}

#[tokio::test]
async fn disagreements_are_reported_per_kind_in_order() -> anyhow::Result<()> {
    let mut artifacts = MemoryArtifacts::default();
    artifacts.files.insert(
        ("ns.a".parse()?, Version::new(1, 0, 0)),
        vec![
            file("same.py", Some("11")),
            file("changed.py", Some("22")),
            file("extra.py", None),
        ],
    );
    artifacts.files.insert(
        ("ns.b".parse()?, Version::new(0, 1, 0)),
        vec![file("x.py", None)],
    );
    let mut tags = MemoryTags::default();
    tags.tags.insert("repo-a".into(), vec!["1.0.0".into()]);
    tags.trees.insert(
        ("repo-a".into(), "1.0.0".into()),
        vec![
            tree_file("same.py", Some("11")),
            tree_file("changed.py", Some("33")),
        ],
    );
    tags.tags.insert("repo-b".into(), vec!["0.2.0".into()]);

    let report = validator(
        artifacts,
        tags,
        sources(&[("ns.a", "repo-a"), ("ns.b", "repo-b")])?,
    )
    .validate(&pinned(&[("ns.b", "0.1.0"), ("ns.a", "1.0.0"), ("ns.c", "3.0.0")])?)
    .await;

    let codes: Vec<_> = report
        .iter()
        .map(|m| (m.package.to_string(), m.kind.code()))
        .collect();
    assert_eq!(
        codes,
        vec![
            ("ns.a".to_owned(), "missing_from_tag"),
            ("ns.a".to_owned(), "checksum_mismatch"),
            ("ns.b".to_owned(), "tag_not_found"),
            ("ns.c".to_owned(), "tag_not_found"),
            ("ns.c".to_owned(), "artifact_unavailable"),
        ]
    );
    assert_eq!(
        kinds(&report)[..2],
        ["missing_from_tag(extra.py)", "checksum_mismatch(changed.py)"]
    );
    assert!(kinds(&report)[3].contains("no source repository configured"));
    Ok(())
}

#[test]
fn tags_are_normalized_once() -> anyhow::Result<()> {
    assert_eq!(normalize_tag("v1.2.3"), "1.2.3");
    assert_eq!(normalize_tag("1.2.3"), "1.2.3");
    assert_eq!(normalize_tag("vv1.2.3"), "v1.2.3");

    let tags = vec!["release-1.2.3".to_owned(), "v1.2.3".to_owned()];
    assert_eq!(matching_tag(&tags, &Version::parse("1.2.3")?), Some("v1.2.3"));
    assert_eq!(matching_tag(&tags, &Version::parse("1.2.4")?), None);
    Ok(())
}

#[test]
fn directories_and_unknown_checksums_are_not_compared() {
    let files = vec![dir("plugins"), file("plugins/a.py", None)];
    let tree = vec![tree_file("plugins/a.py", Some("00"))];
    assert!(compare(&files, &tree).is_empty());
}
