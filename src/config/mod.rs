//! Site configuration management for `kosh.toml`.
//!
//! # Sections
//!
//! | Section      | Purpose                                        |
//! |--------------|------------------------------------------------|
//! | `[base]`     | Site metadata (title, description, base URL)   |
//! | `[build]`    | Build paths, drafts, worker count              |
//! | `[features]` | Optional pipeline features                     |
//! | `[[versions]]` | Versioned docs snapshots (`v1.2`, ...)       |
//!
//! # Example
//!
//! ```toml
//! [base]
//! title = "My Blog"
//! url = "https://example.com"
//!
//! [build]
//! content = "content"
//! output = "public"
//!
//! [features]
//! raw_markdown = true
//!
//! [[versions]]
//! name = "v1.2"
//! latest = true
//! ```

mod defaults;
mod error;

pub use error::ConfigError;

use anyhow::Result;
use educe::Educe;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::LazyLock,
};

/// Version path segments look like `v1` or `v1.2` even when not listed
/// in `[[versions]]`.
static VERSION_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^v\d+(\.\d+)*$").expect("valid version regex"));

// ============================================================================
// Root Configuration
// ============================================================================

/// Root configuration structure representing kosh.toml
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct SiteConfig {
    /// Absolute path to the config file (set after loading)
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Basic site information
    pub base: BaseConfig,

    /// Build settings
    pub build: BuildConfig,

    /// Optional pipeline features
    pub features: FeaturesConfig,

    /// Versioned docs snapshots
    pub versions: Vec<VersionConfig>,
}

/// `[base]` section - site metadata.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct BaseConfig {
    #[serde(default = "defaults::base::title")]
    #[educe(Default = defaults::base::title())]
    pub title: String,

    pub description: String,

    /// Base URL without trailing slash (e.g. `https://example.com`).
    #[serde(default = "defaults::base::url")]
    #[educe(Default = defaults::base::url())]
    pub url: String,
}

/// `[build]` section - build pipeline configuration.
#[derive(Debug, Clone, Educe, Serialize, Deserialize)]
#[educe(Default)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Project root directory (usually set via CLI `--root`).
    #[serde(default = "defaults::build::root")]
    #[educe(Default = defaults::build::root())]
    pub root: Option<PathBuf>,

    /// Content source directory (Markdown files).
    #[serde(default = "defaults::build::content")]
    #[educe(Default = defaults::build::content())]
    pub content: PathBuf,

    /// Build output directory.
    #[serde(default = "defaults::build::output")]
    #[educe(Default = defaults::build::output())]
    pub output: PathBuf,

    /// Page template directory (watched for re-render triggers).
    #[serde(default = "defaults::build::templates")]
    #[educe(Default = defaults::build::templates())]
    pub templates: PathBuf,

    /// Static assets directory (CSS, JS, images).
    #[serde(default = "defaults::build::static_dir")]
    #[educe(Default = defaults::build::static_dir())]
    pub static_dir: PathBuf,

    /// Durable cache directory.
    #[serde(default = "defaults::build::cache_dir")]
    #[educe(Default = defaults::build::cache_dir())]
    pub cache_dir: PathBuf,

    /// Include draft posts in the build.
    #[serde(default = "defaults::r#false")]
    #[educe(Default = false)]
    pub drafts: bool,

    /// Worker pool width override (default: `max(2, cpus)`).
    #[serde(default = "defaults::build::workers")]
    #[educe(Default = defaults::build::workers())]
    pub workers: Option<usize>,
}

/// `[features]` section - optional pipeline features.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FeaturesConfig {
    /// Mirror raw `.md` sources next to rendered pages.
    pub raw_markdown: bool,

    /// Rewrite raster image references in rendered HTML to `.webp`.
    pub compress_images: bool,
}

/// One `[[versions]]` entry - a frozen docs snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VersionConfig {
    /// Version name, matching the first path segment (e.g. `v1.2`).
    pub name: String,

    /// The version served as the main feed.
    #[serde(rename = "latest")]
    pub is_latest: bool,
}

impl SiteConfig {
    /// Parse configuration from TOML string
    pub fn from_str(content: &str) -> Result<Self> {
        let config: SiteConfig = toml::from_str(content).map_err(ConfigError::Toml)?;
        Ok(config)
    }

    /// Load configuration from file path
    pub fn from_path(path: &Path) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|err| ConfigError::Io(path.to_path_buf(), err))?;
        let mut config = Self::from_str(&content)?;
        config.config_path = path.to_path_buf();
        Ok(config)
    }

    /// Get the root directory path
    pub fn get_root(&self) -> &Path {
        self.build.root.as_deref().unwrap_or(Path::new("./"))
    }

    /// Set the root directory path
    pub fn set_root(&mut self, path: &Path) {
        self.build.root = Some(path.to_path_buf());
    }

    pub fn content_dir(&self) -> PathBuf {
        self.get_root().join(&self.build.content)
    }

    pub fn output_dir(&self) -> PathBuf {
        self.get_root().join(&self.build.output)
    }

    pub fn templates_dir(&self) -> PathBuf {
        self.get_root().join(&self.build.templates)
    }

    pub fn static_dir(&self) -> PathBuf {
        self.get_root().join(&self.build.static_dir)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.get_root().join(&self.build.cache_dir)
    }

    /// Worker pool width: configured override or `max(2, cpus)`.
    pub fn worker_count(&self) -> usize {
        self.build
            .workers
            .filter(|w| *w > 0)
            .unwrap_or_else(crate::util::worker_count)
    }

    /// Validate config state before building.
    ///
    /// A missing content directory or an ambiguous `latest` marker is
    /// fatal (exit code 2).
    pub fn validate(&self) -> Result<()> {
        let latest: Vec<&str> = self
            .versions
            .iter()
            .filter(|v| v.is_latest)
            .map(|v| v.name.as_str())
            .collect();
        if latest.len() > 1 {
            return Err(ConfigError::DuplicateLatest(latest.join(", ")).into());
        }

        let content = self.content_dir();
        if !content.is_dir() {
            return Err(ConfigError::Validation(format!(
                "content directory not found: {}",
                content.display()
            ))
            .into());
        }
        Ok(())
    }

    /// Resolve a `--version-tag` argument to its canonical form.
    ///
    /// Accepts any configured snapshot name (case-insensitive) or a
    /// `vN.M`-style segment; anything else is a config error.
    pub fn resolve_version_tag(&self, tag: &str) -> Result<String, ConfigError> {
        if let Some(v) = self
            .versions
            .iter()
            .find(|v| v.name.eq_ignore_ascii_case(tag))
        {
            return Ok(v.name.clone());
        }
        if VERSION_SEGMENT.is_match(tag) {
            return Ok(tag.to_string());
        }
        Err(ConfigError::UnknownVersionTag {
            tag: tag.to_string(),
            known: self.versions.iter().map(|v| v.name.clone()).collect(),
        })
    }

    /// Extract the version tag from a content-relative path.
    ///
    /// The first path segment counts as a version when it is listed in
    /// `[[versions]]` or matches the `vN.M` pattern. Unversioned posts
    /// get the empty tag.
    pub fn version_from_path(&self, rel_path: &str) -> String {
        let Some(first) = rel_path.split('/').next() else {
            return String::new();
        };
        let is_configured = self
            .versions
            .iter()
            .any(|v| v.name.eq_ignore_ascii_case(first));
        if is_configured || VERSION_SEGMENT.is_match(first) {
            first.to_string()
        } else {
            String::new()
        }
    }

    /// Whether posts with this version tag belong to the main feed.
    ///
    /// Unversioned posts always do. With versions configured, only the
    /// entry marked `latest` does; if no entry is marked, `""` is
    /// treated as latest (deployments without versioning).
    pub fn is_main_feed(&self, version: &str) -> bool {
        if version.is_empty() {
            return true;
        }
        self.versions
            .iter()
            .any(|v| v.is_latest && v.name.eq_ignore_ascii_case(version))
    }
}
