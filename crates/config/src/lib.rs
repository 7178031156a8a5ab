//! Manages application configuration by loading settings from standard locations.
//!
//! This crate provides a unified configuration object (`Config`) that aggregates
//! settings from files and environment variables, making them accessible
//! globally via a lazily initialized static reference (`CONFIG`).
//!
//! Library code never reads `CONFIG` directly; the binary extracts the values it
//! needs and passes them down explicitly.

use std::path::PathBuf;
use std::sync::LazyLock;

use etcetera::BaseStrategy;
use figment::providers::{Env, Format, Toml};
use figment::{Figment, Metadata, Provider};
use serde::{Deserialize, Serialize};

/// The default configuration values
const DEFAULT_TOML_CONFIG: &str = include_str!("./curate.default.toml");

/// The file name looked up in the user config directory and the working directory.
const CONFIG_FILE: &str = "curate.toml";


//================================================================================================
// Statics
//================================================================================================

/// Provides a lazily instantiated static reference to the application `Config`.
///
/// This static variable ensures that configuration is parsed only once from
/// canonical locations and then made immutably available throughout the
/// application's lifecycle.
pub static CONFIG: LazyLock<Config> = LazyLock::new(load_config);

//================================================================================================
// Types
//================================================================================================

/// Defines cache-related configuration settings.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct CacheConfig {
    /// The root directory for storing cached data.
    pub root: PathBuf,
}

/// Locations of the remote version indices.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct IndexConfig {
    /// Base url of the package index serving member package versions and file manifests.
    pub url: String,
    /// Base url of the index serving the core runtime releases.
    pub core_url: String,
    /// Name of the core runtime package on the core index.
    pub core_package: String,
}

/// Bounds applied to every network fetch.
#[derive(Deserialize, Serialize, Debug, Clone, Copy)]
#[serde(default)]
pub struct FetchConfig {
    /// The maximum number of fetches in flight at any moment.
    pub concurrency: usize,
    /// The maximum number of attempts per request, including the first.
    pub max_attempts: u32,
    /// The wall clock budget for one logical fetch, retries included.
    pub task_timeout_secs: u64,
    /// The timeout of a single HTTP request.
    pub request_timeout_secs: u64,
    /// The initial backoff interval between attempts.
    pub backoff_ms: u64,
}

/// Where manifests and auxiliary files live.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(default)]
pub struct DataConfig {
    /// The directory holding build, deps and plan files.
    pub dir: PathBuf,
    /// The per-package repository map, relative to `dir` unless absolute.
    pub sources: PathBuf,
}

/// The external packaging backend.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
#[serde(default)]
pub struct BuildConfig {
    /// The argv used to invoke the backend; the plan path is appended.
    pub command: Vec<String>,
}

/// Represents the application's primary configuration structure.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct Config {
    /// Remote index locations.
    #[serde(default)]
    pub index: IndexConfig,
    /// Fetch concurrency and retry bounds.
    #[serde(default)]
    pub fetch: FetchConfig,
    /// Cache-related settings.
    #[serde(default)]
    pub cache: CacheConfig,
    /// Manifest locations.
    #[serde(default)]
    pub data: DataConfig,
    /// Packaging backend settings.
    #[serde(default)]
    pub build: BuildConfig,
}

//================================================================================================
// Impls
//================================================================================================

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: get_cache_dir(),
        }
    }
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: "https://galaxy.ansible.com".into(),
            core_url: "https://pypi.org".into(),
            core_package: "ansible-core".into(),
        }
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            max_attempts: 5,
            task_timeout_secs: 300,
            request_timeout_secs: 20,
            backoff_ms: 500,
        }
    }
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("."),
            sources: PathBuf::from("sources.toml"),
        }
    }
}

impl DataConfig {
    /// The resolved path of the source map.
    pub fn sources_path(&self) -> PathBuf {
        self.dir.join(&self.sources)
    }
}

impl Config {
    /// Constructs a `Figment` instance for configuration loading.
    ///
    /// This method builds a configuration provider by layering default settings,
    /// user-specific configuration files, a file in the working directory, and
    /// environment variables (`CURATE_FETCH__CONCURRENCY=4`).
    pub fn figment() -> Figment {
        let mut fig = Figment::from(Config::default()).merge(Toml::string(DEFAULT_TOML_CONFIG));

        if let Ok(c) = etcetera::choose_base_strategy() {
            let config = c.config_dir().join(CONFIG_FILE);
            fig = fig.admerge(Toml::file(config));
        }

        fig.admerge(Toml::file(CONFIG_FILE))
            .admerge(Env::prefixed("CURATE_").split("__"))
    }

    /// Creates a `Config` instance from a given provider.
    pub fn from<T: Provider>(provider: T) -> Result<Config, Box<figment::Error>> {
        Figment::from(provider).extract().map_err(Box::new)
    }
}

impl Provider for Config {
    fn metadata(&self) -> figment::Metadata {
        Metadata::named("Curate CLI Config")
    }

    fn data(
        &self,
    ) -> Result<figment::value::Map<figment::Profile, figment::value::Dict>, figment::Error> {
        figment::providers::Serialized::defaults(self).data()
    }
}

//================================================================================================
// Functions
//================================================================================================

/// Determines the appropriate cache directory based on the operating system.
fn get_cache_dir() -> PathBuf {
    if let Ok(c) = etcetera::choose_base_strategy() {
        c.cache_dir().join("curate")
    } else {
        std::env::temp_dir().join("curate")
    }
}

/// Loads the application configuration using the default `Figment` provider.
///
/// This function is used to initialize the `CONFIG` static variable.
fn load_config() -> Config {
    Config::figment().extract().unwrap_or_else(|e| {
        tracing::error!(error = %e, "problem loading config from default sources, falling back to built-in defaults");
        Config::default()
    })
}
