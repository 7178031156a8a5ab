//! Tag access over git, built on `gix`.
//!
//! Listing tags only performs the ref advertisement of the remote and never
//! downloads objects. Reading a tree fetches that single tag into a bare cache
//! repository and walks the tree it points at. All `gix` work is blocking and
//! runs on tokio's blocking pool.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use bstr::ByteSlice;
use gix::ThreadSafeRepository;
use gix::create::{Kind, Options};
use gix::protocol::handshake::Ref;
use gix::remote::Direction;
use sha2::{Digest, Sha256};
use thiserror::Error;

use super::{TagSource, TreeFile};

//================================================================================================
// Constants
//================================================================================================

const TAG_PREFIX: &str = "refs/tags/";
/// Fetch refspecs need a pattern on both sides.
const TAG_REFSPEC: &str = "refs/tags/*:refs/tags/*";

//================================================================================================
// Types
//================================================================================================

/// Errors raised while reading tags from a repository.
#[derive(Error, Debug)]
pub enum TagError {
    /// A transparent wrapper for a [`Box<gix::init::Error>`]
    #[error(transparent)]
    Init(#[from] Box<gix::init::Error>),
    /// A transparent wrapper for a [`gix::url::parse::Error`]
    #[error(transparent)]
    Url(#[from] gix::url::parse::Error),
    /// A transparent wrapper for a [`gix::protocol::transport::client::connect::Error`]
    #[error(transparent)]
    Connection(#[from] gix::protocol::transport::client::connect::Error),
    /// A transparent wrapper for a [`gix::config::credential_helpers::Error`]
    #[error(transparent)]
    Creds(#[from] gix::config::credential_helpers::Error),
    /// A transparent wrapper for a [`gix::config::file::init::from_paths::Error`]
    #[error(transparent)]
    File(#[from] gix::config::file::init::from_paths::Error),
    /// A transparent wrapper for a [`Box<gix::protocol::handshake::Error>`]
    #[error(transparent)]
    Handshake(#[from] Box<gix::protocol::handshake::Error>),
    /// A transparent wrapper for a [`gix::protocol::fetch::refmap::init::Error`]
    #[error(transparent)]
    Refmap(#[from] gix::protocol::fetch::refmap::init::Error),
    /// A transparent wrapper for a [`Box<gix::refspec::parse::Error>`]
    #[error(transparent)]
    Refspec(#[from] Box<gix::refspec::parse::Error>),
    /// A transparent wrapper for a [`gix::remote::init::Error`]
    #[error(transparent)]
    RemoteInit(#[from] gix::remote::init::Error),
    /// A transparent wrapper for a [`Box<gix::remote::connect::Error>`]
    #[error(transparent)]
    Connect(#[from] Box<gix::remote::connect::Error>),
    /// A transparent wrapper for a [`Box<gix::remote::fetch::prepare::Error>`]
    #[error(transparent)]
    Prepare(#[from] Box<gix::remote::fetch::prepare::Error>),
    /// A transparent wrapper for a [`Box<gix::remote::fetch::Error>`]
    #[error(transparent)]
    Fetch(#[from] Box<gix::remote::fetch::Error>),
    /// The fetch completed without the requested tag.
    #[error("tag `{0}` was not received from the remote")]
    NoTag(String),
    /// A transparent wrapper for a [`gix::object::find::existing::Error`]
    #[error(transparent)]
    Find(#[from] gix::object::find::existing::Error),
    /// A transparent wrapper for a [`gix::object::peel::to_kind::Error`]
    #[error(transparent)]
    Peel(#[from] gix::object::peel::to_kind::Error),
    /// A transparent wrapper for a [`gix::object::try_into::Error`]
    #[error(transparent)]
    TryObject(#[from] gix::object::try_into::Error),
    /// A transparent wrapper for a [`gix::traverse::tree::breadthfirst::Error`]
    #[error(transparent)]
    Traverse(#[from] gix::traverse::tree::breadthfirst::Error),
    /// A transparent wrapper for a [`std::io::Error`]
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// A blocking git task panicked or was aborted.
    #[error(transparent)]
    Join(#[from] tokio::task::JoinError),
}

/// Reads tags through `gix`, caching fetched objects in a bare repository.
#[derive(Clone)]
pub struct GitTags {
    repo: ThreadSafeRepository,
    path: PathBuf,
}

//================================================================================================
// Impls
//================================================================================================

impl std::fmt::Debug for GitTags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitTags").field("path", &self.path).finish()
    }
}

impl GitTags {
    /// Opens the bare cache repository under `cache_root`, creating it if needed.
    pub fn open(cache_root: impl AsRef<Path>) -> Result<Self, TagError> {
        let path = cache_root.as_ref().join("git");
        let repo = ThreadSafeRepository::open(&path)
            .or_else(|_| {
                ThreadSafeRepository::init(
                    &path,
                    Kind::Bare,
                    Options {
                        destination_must_be_empty: true,
                        ..Default::default()
                    },
                )
            })
            .map_err(Box::new)?;
        Ok(GitTags { repo, path })
    }

    /// The location of the cache repository.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl TagSource for GitTags {
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>, TagError> {
        let url = gix::url::parse(repository.as_bytes().as_bstr())?;
        tokio::task::spawn_blocking(move || ls_remote_tags(&url)).await?
    }

    async fn tree(
        &self,
        repository: &str,
        tag: &str,
        directory: Option<&str>,
    ) -> Result<Vec<TreeFile>, TagError> {
        let url = gix::url::parse(repository.as_bytes().as_bstr())?;
        let repo = self.repo.clone();
        let tag = tag.to_owned();
        let directory = directory.map(|d| d.trim_matches('/').to_owned());
        tokio::task::spawn_blocking(move || {
            let id = fetch_tag(&repo, &url, &tag)?;
            walk_tree(&repo, id, directory.as_deref())
        })
        .await?
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Lists `refs/tags/*` on the remote without downloading any objects.
fn ls_remote_tags(url: &gix::Url) -> Result<Vec<String>, TagError> {
    use gix::open::permissions::Environment;
    use gix::protocol::fetch::refmap::init::Options as RefOptions;
    use gix::protocol::fetch::{Context, RefMap};
    use gix::protocol::transport::client::connect::Options as ConnectOptions;
    use gix::refspec::RefSpec;
    use gix::refspec::parse::Operation;
    use gix::sec::Permission;

    let mut transport = gix::protocol::transport::connect(url.to_owned(), ConnectOptions::default())?;

    let config = gix::config::File::from_globals()?;
    let (mut cascade, _, prompt_opts) = gix::config::credential_helpers(
        url.to_owned(),
        &config,
        true,
        gix::config::section::is_trusted,
        Environment {
            xdg_config_home: Permission::Allow,
            home: Permission::Allow,
            http_transport: Permission::Allow,
            identity: Permission::Allow,
            objects: Permission::Allow,
            git_prefix: Permission::Allow,
            ssh_prefix: Permission::Allow,
        },
        false,
    )?;
    let authenticate = Box::new(move |action| cascade.invoke(action, prompt_opts.clone()));

    let mut handshake = gix::protocol::fetch::handshake(
        &mut transport,
        authenticate,
        Vec::new(),
        &mut prodash::progress::Discard,
    )
    .map_err(|e| {
        tracing::error!(%url, "couldn't establish a handshake with the remote");
        Box::new(e)
    })?;

    let spec = gix::refspec::parse(TAG_REFSPEC.as_bytes().as_bstr(), Operation::Fetch)
        .map(RefSpec::from)
        .map_err(Box::new)?;

    let context = Context {
        handshake: &mut handshake,
        transport: &mut transport,
        user_agent: ("agent", Some(gix::env::agent().into())),
        trace_packetlines: false,
    };
    let refmap = RefMap::new(
        prodash::progress::Discard,
        std::slice::from_ref(&spec),
        context,
        RefOptions::default(),
    )?;

    let tags: Vec<String> = refmap
        .remote_refs
        .iter()
        .filter_map(tag_name)
        .collect();
    tracing::debug!(%url, count = tags.len(), "listed remote tags");
    Ok(tags)
}

/// The short tag name of an advertised ref, if it is a tag.
fn tag_name(r: &Ref) -> Option<String> {
    let (name, ..) = r.unpack();
    let name = name.to_str().ok()?.strip_prefix(TAG_PREFIX)?;
    if name.ends_with("^{}") {
        return None;
    }
    Some(name.to_owned())
}

/// A stable remote name for `url` inside the cache repository.
fn remote_key(url: &gix::Url) -> String {
    let digest = Sha256::digest(url.to_bstring().as_slice());
    hex::encode(&digest[..10])
}

/// Fetches the single `tag` of `url` into the cache, returning the object it names.
fn fetch_tag(
    repo: &ThreadSafeRepository,
    url: &gix::Url,
    tag: &str,
) -> Result<gix::ObjectId, TagError> {
    use gix::remote::fetch::Tags;
    use gix::remote::ref_map::Options as MapOptions;

    let repo = repo.to_thread_local();
    let key = remote_key(url);
    let spec = format!("{TAG_PREFIX}{tag}:refs/curate/{key}/tags/{tag}");

    let remote = repo
        .remote_at(url.to_owned())?
        .with_fetch_tags(Tags::None)
        .with_refspecs(Some(spec.as_bytes().as_bstr()), Direction::Fetch)
        .map_err(Box::new)?;

    tracing::debug!(%url, %tag, "fetching tag into cache");
    let outcome = remote
        .connect(Direction::Fetch)
        .map_err(Box::new)?
        .prepare_fetch(prodash::progress::Discard, MapOptions::default())
        .map_err(Box::new)?
        .with_write_packed_refs_only(true)
        .receive(prodash::progress::Discard, &AtomicBool::new(false))
        .map_err(Box::new)?;

    outcome
        .ref_map
        .remote_refs
        .iter()
        .find(|r| tag_name(r).as_deref() == Some(tag))
        .and_then(|r| {
            let (_, target, peeled) = r.unpack();
            peeled.or(target).map(ToOwned::to_owned)
        })
        .ok_or_else(|| TagError::NoTag(tag.to_owned()))
}

/// Records every file under `directory` in the tree `id` points at.
fn walk_tree(
    repo: &ThreadSafeRepository,
    id: gix::ObjectId,
    directory: Option<&str>,
) -> Result<Vec<TreeFile>, TagError> {
    use gix::objs::tree::EntryKind;
    use gix::traverse::tree::Recorder;

    let repo = repo.to_thread_local();
    let tree = repo.find_object(id)?.peel_to_tree()?;
    let mut record = Recorder::default();
    tree.traverse().depthfirst(&mut record)?;

    let prefix = directory.filter(|d| !d.is_empty()).map(|d| format!("{d}/"));
    let mut files = Vec::new();
    for entry in record.records {
        let Ok(full) = entry.filepath.to_str() else {
            tracing::warn!(path = %entry.filepath, "skipping non utf-8 path");
            continue;
        };
        let path = match &prefix {
            Some(prefix) => match full.strip_prefix(prefix.as_str()) {
                Some(rest) => rest,
                None => continue,
            },
            None => full,
        };
        match entry.mode.kind() {
            EntryKind::Blob | EntryKind::BlobExecutable => {
                let blob = repo.find_object(entry.oid)?.try_into_blob()?;
                files.push(TreeFile {
                    path: path.to_owned(),
                    sha256: Some(hex::encode(Sha256::digest(&blob.data))),
                });
            },
            EntryKind::Link => files.push(TreeFile {
                path: path.to_owned(),
                sha256: None,
            }),
            EntryKind::Tree => {},
            EntryKind::Commit => {
                tracing::warn!(%path, "submodules are not part of a tag's files")
            },
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use gix::objs::Tree;
    use gix::objs::tree::{Entry, EntryKind};
    use gix::refs::transaction::PreviousValue;

    use super::*;

    fn blob(repo: &gix::Repository, name: &str, content: &str) -> anyhow::Result<Entry> {
        Ok(Entry {
            mode: EntryKind::Blob.into(),
            filename: name.into(),
            oid: repo.write_blob(content.as_bytes())?.detach(),
        })
    }

    /// Commits `entries` as a root commit and points a lightweight tag at it.
    fn tag(repo: &gix::Repository, name: &str, entries: Vec<Entry>) -> anyhow::Result<()> {
        let tree = repo.write_object(Tree { entries })?.detach();
        let signature = gix::actor::Signature {
            name: "curate".into(),
            email: "curate@example.com".into(),
            time: gix::date::Time::new(0, 0),
        };
        let commit = gix::objs::Commit {
            tree,
            parents: Default::default(),
            author: signature.clone(),
            committer: signature,
            encoding: None,
            message: format!("release {name}").into(),
            extra_headers: Vec::new(),
        };
        let id = repo.write_object(commit)?.detach();
        repo.reference(
            format!("{TAG_PREFIX}{name}").as_str(),
            id,
            PreviousValue::MustNotExist,
            "tag",
        )?;
        Ok(())
    }

    /// An upstream repository with tags `v1.0.0` and `1.1.0`.
    fn upstream(dir: &Path) -> anyhow::Result<()> {
        let repo = gix::init_bare(dir)?;

        let sub = repo
            .write_object(Tree {
                entries: vec![blob(&repo, "b.py", "print('b')\n")?],
            })?
            .detach();
        tag(&repo, "v1.0.0", vec![
            blob(&repo, "a.py", "print('a')\n")?,
            Entry {
                mode: EntryKind::Tree.into(),
                filename: "collection".into(),
                oid: sub,
            },
        ])?;
        tag(&repo, "1.1.0", vec![blob(&repo, "a.py", "print('a2')\n")?])?;
        Ok(())
    }

    fn sha256(content: &str) -> Option<String> {
        Some(hex::encode(Sha256::digest(content.as_bytes())))
    }

    #[test]
    fn tag_refspec_parses() -> anyhow::Result<()> {
        use gix::refspec::parse::Operation;
        gix::refspec::parse(TAG_REFSPEC.as_bytes().as_bstr(), Operation::Fetch)?;
        Ok(())
    }

    #[tokio::test]
    async fn tags_and_trees_are_read_from_a_repository() -> anyhow::Result<()> {
        let remote = tempfile::tempdir()?;
        upstream(remote.path())?;
        let url = remote.path().display().to_string();

        let cache = tempfile::tempdir()?;
        let tags = GitTags::open(cache.path())?;

        let mut listed = tags.list_tags(&url).await?;
        listed.sort();
        assert_eq!(listed, ["1.1.0", "v1.0.0"]);

        let whole = tags.tree(&url, "v1.0.0", None).await?;
        assert_eq!(whole, vec![
            TreeFile {
                path: "a.py".into(),
                sha256: sha256("print('a')\n"),
            },
            TreeFile {
                path: "collection/b.py".into(),
                sha256: sha256("print('b')\n"),
            },
        ]);

        let scoped = tags.tree(&url, "v1.0.0", Some("/collection/")).await?;
        assert_eq!(scoped, vec![TreeFile {
            path: "b.py".into(),
            sha256: sha256("print('b')\n"),
        }]);

        // a second tag of the same remote goes through the cached repository
        let next = tags.tree(&url, "1.1.0", None).await?;
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].sha256, sha256("print('a2')\n"));
        Ok(())
    }

    #[tokio::test]
    async fn unknown_tags_fail_to_fetch() -> anyhow::Result<()> {
        let remote = tempfile::tempdir()?;
        upstream(remote.path())?;
        let cache = tempfile::tempdir()?;
        let tags = GitTags::open(cache.path())?;

        let url = remote.path().display().to_string();
        assert!(tags.tree(&url, "9.9.9", None).await.is_err());
        Ok(())
    }

    #[test]
    fn tag_refs_are_shortened() -> anyhow::Result<()> {
        let id = gix::ObjectId::null(gix::hash::Kind::Sha1);
        let direct = Ref::Direct {
            full_ref_name: "refs/tags/v1.2.0".into(),
            object: id,
        };
        let branch = Ref::Direct {
            full_ref_name: "refs/heads/main".into(),
            object: id,
        };
        assert_eq!(tag_name(&direct).as_deref(), Some("v1.2.0"));
        assert_eq!(tag_name(&branch), None);
        Ok(())
    }

    #[test]
    fn remote_keys_are_stable_per_url() -> anyhow::Result<()> {
        let a = gix::url::parse("https://example.com/a.git".into())?;
        let b = gix::url::parse("https://example.com/b.git".into())?;
        assert_eq!(remote_key(&a), remote_key(&a));
        assert_ne!(remote_key(&a), remote_key(&b));
        assert_eq!(remote_key(&a).len(), 20);
        Ok(())
    }

    #[tokio::test]
    async fn cache_repository_is_created_bare() -> anyhow::Result<()> {
        let tmp = tempfile::tempdir()?;
        let tags = GitTags::open(tmp.path())?;
        assert!(tags.path().join("HEAD").exists());
        // reopening finds the existing repository
        GitTags::open(tmp.path())?;
        Ok(())
    }
}
