//! The HTTP(S) index client.
//!
//! Member package versions are listed page by page under
//! `api/v2/collections/{namespace}/{name}/versions/`, artifact file manifests
//! under `.../versions/{version}/files/`, and core runtime releases under
//! `pypi/{package}/json` on a separate index.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use reqwest::StatusCode;
use semver::Version;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use url::Url;

use super::{FetchCause, QueryIndex};
use crate::catalog::{CoreRelease, FileEntry};
use crate::name::PackageName;
use crate::version::ReleaseId;

//================================================================================================
// Types
//================================================================================================

/// Where and how to reach the remote indices.
#[derive(Clone, Debug)]
pub struct IndexSettings {
    /// Base url of the package index.
    pub url: Url,
    /// Base url of the core runtime index.
    pub core_url: Url,
    /// Name of the core runtime package on the core index.
    pub core_package: String,
    /// Timeout of a single request.
    pub request_timeout: Duration,
}

/// A [`QueryIndex`] backed by `reqwest`.
#[derive(Clone, Debug)]
pub struct HttpIndex {
    client: reqwest::Client,
    base: Url,
    core_base: Url,
    core_package: String,
}

#[derive(Deserialize)]
struct VersionPage {
    results: Vec<VersionItem>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Deserialize)]
struct VersionItem {
    version: String,
}

#[derive(Deserialize)]
struct FileListing {
    files: Vec<FileEntry>,
}

#[derive(Deserialize)]
struct CoreProject {
    releases: BTreeMap<String, Vec<CoreFile>>,
}

#[derive(Deserialize)]
struct CoreFile {
    #[serde(default)]
    requires_python: Option<String>,
}

//================================================================================================
// Impls
//================================================================================================

impl HttpIndex {
    /// Builds a client for the given indices.
    pub fn new(settings: IndexSettings) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(concat!("curate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(HttpIndex {
            client,
            base: with_trailing_slash(settings.url),
            core_base: with_trailing_slash(settings.core_url),
            core_package: settings.core_package,
        })
    }

    fn collection_url(&self, name: &PackageName, rest: &str) -> Result<Url, FetchCause> {
        self.base
            .join(&format!(
                "api/v2/collections/{}/{}/versions/{}",
                name.namespace(),
                name.name(),
                rest
            ))
            .map_err(|e| FetchCause::Decode(e.to_string()))
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, FetchCause> {
        tracing::trace!(%url, "querying index");
        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(FetchCause::NotFound),
            status if !status.is_success() => Err(FetchCause::Status(status.as_u16())),
            _ => Ok(response.json::<T>().await?),
        }
    }
}

impl QueryIndex for HttpIndex {
    async fn versions(&self, name: &PackageName) -> Result<Vec<Version>, FetchCause> {
        let mut url = self.collection_url(name, "")?;
        url.query_pairs_mut().append_pair("format", "json");

        let mut seen = BTreeSet::new();
        let mut versions = Vec::new();
        loop {
            seen.insert(url.to_string());
            let page: VersionPage = self.get_json(url).await?;
            for item in page.results {
                match Version::parse(&item.version) {
                    Ok(v) => versions.push(v),
                    Err(e) => tracing::warn!(
                        message = "skipping unparsable version",
                        package = %name,
                        version = %item.version,
                        error = %e
                    ),
                }
            }
            let Some(next) = page.next else { break };
            url = self
                .base
                .join(&next)
                .map_err(|e| FetchCause::Decode(e.to_string()))?;
            if seen.contains(url.as_str()) {
                tracing::warn!(package = %name, %url, "index pagination loops, stopping");
                break;
            }
        }
        Ok(versions)
    }

    async fn core_releases(&self) -> Result<Vec<CoreRelease>, FetchCause> {
        let url = self
            .core_base
            .join(&format!("pypi/{}/json", self.core_package))
            .map_err(|e| FetchCause::Decode(e.to_string()))?;
        let project: CoreProject = self.get_json(url).await?;
        Ok(project
            .releases
            .into_iter()
            .filter_map(|(version, files)| {
                let version = version.parse::<ReleaseId>().ok()?;
                let requires_runtime = files
                    .into_iter()
                    .filter_map(|f| f.requires_python)
                    .find(|r| !r.trim().is_empty());
                Some(CoreRelease {
                    version,
                    requires_runtime,
                })
            })
            .collect())
    }

    async fn artifact_files(
        &self,
        name: &PackageName,
        version: &Version,
    ) -> Result<Vec<FileEntry>, FetchCause> {
        let url = self.collection_url(name, &format!("{version}/files/"))?;
        let listing: FileListing = self.get_json(url).await?;
        Ok(listing.files)
    }
}

impl From<reqwest::Error> for FetchCause {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchCause::Timeout
        } else if e.is_decode() {
            FetchCause::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            FetchCause::Status(status.as_u16())
        } else {
            FetchCause::Transport(e.to_string())
        }
    }
}

//================================================================================================
// Functions
//================================================================================================

fn with_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
