//! Build plans and the builders that consume them.

use std::future::Future;
use std::path::Path;
use std::process::ExitStatus;

use semver::Version;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::manifest::PinnedManifest;
use crate::name::PackageName;
use crate::version::ReleaseId;

//================================================================================================
// Types
//================================================================================================

/// Everything an artifact builder needs, derived from a deps file alone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildPlan {
    /// The release being built.
    pub release: ReleaseId,
    /// The pinned core runtime release.
    pub core: ReleaseId,
    /// The runtime-language requirement.
    pub runtime: String,
    /// Every member package, sorted by name.
    pub packages: Vec<PlannedPackage>,
}

/// One member package of a [`BuildPlan`].
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlannedPackage {
    /// The package name.
    pub name: PackageName,
    /// The pinned version.
    pub version: Version,
}

/// Errors raised while producing an artifact.
#[derive(Error, Debug)]
pub enum BuildError {
    /// The plan could not be written, or the builder could not be started.
    #[error(transparent)]
    Io(#[from] std::io::Error),
    /// The plan could not be serialized.
    #[error(transparent)]
    Encode(#[from] serde_json::Error),
    /// The build command exited unsuccessfully.
    #[error("build command `{program}` failed: {status}")]
    Failed {
        /// The program that was run.
        program: String,
        /// How it exited.
        status: ExitStatus,
    },
}

/// Runs a configured command with the plan file as its last argument.
///
/// The release identifier is exported as `CURATE_RELEASE`.
#[derive(Clone, Debug, Default)]
pub struct CommandBuilder {
    argv: Vec<String>,
}

//================================================================================================
// Traits
//================================================================================================

/// Produces the distribution artifact from a plan.
pub trait ArtifactBuilder: Sync {
    /// Builds the artifact described by `plan`, already written to `plan_path`.
    fn build(
        &self,
        plan: &BuildPlan,
        plan_path: &Path,
    ) -> impl Future<Output = Result<(), BuildError>> + Send;
}

//================================================================================================
// Impls
//================================================================================================

impl BuildPlan {
    /// The `name==version` requirement lines of the release, core first.
    pub fn listing(&self) -> Vec<String> {
        std::iter::once(format!("core=={}", self.core))
            .chain(
                self.packages
                    .iter()
                    .map(|p| format!("{}=={}", p.name, p.version)),
            )
            .collect()
    }

    /// The plan as pretty printed JSON, newline terminated.
    pub fn render(&self) -> Result<String, serde_json::Error> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }
}

impl From<&PinnedManifest> for BuildPlan {
    fn from(pinned: &PinnedManifest) -> Self {
        BuildPlan {
            release: pinned.release.clone(),
            core: pinned.core.clone(),
            runtime: pinned.runtime.clone(),
            packages: pinned
                .packages
                .iter()
                .map(|(name, version)| PlannedPackage {
                    name: name.clone(),
                    version: version.clone(),
                })
                .collect(),
        }
    }
}

impl CommandBuilder {
    /// A builder running `argv`. An empty `argv` only reports the plan.
    pub fn new(argv: Vec<String>) -> Self {
        CommandBuilder { argv }
    }
}

impl ArtifactBuilder for CommandBuilder {
    async fn build(&self, plan: &BuildPlan, plan_path: &Path) -> Result<(), BuildError> {
        let Some((program, args)) = self.argv.split_first() else {
            tracing::info!(
                release = %plan.release,
                plan = %plan_path.display(),
                "no build command configured, plan written"
            );
            return Ok(());
        };

        tracing::info!(release = %plan.release, %program, "running build command");
        let status = tokio::process::Command::new(program)
            .args(args)
            .arg(plan_path)
            .env("CURATE_RELEASE", plan.release.to_string())
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(BuildError::Failed {
                program: program.to_owned(),
                status,
            })
        }
    }
}
