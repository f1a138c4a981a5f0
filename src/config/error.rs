//! Configuration error types.
//!
//! All of these are fatal: they abort the run before any build phase
//! and map to exit code 2 at the CLI boundary.

use std::path::PathBuf;
use thiserror::Error;

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config `{0}`")]
    Io(PathBuf, #[source] std::io::Error),

    #[error("invalid kosh.toml")]
    Toml(#[from] toml::de::Error),

    #[error("config validation failed: {0}")]
    Validation(String),

    /// A `--version-tag` that is neither a configured snapshot nor a
    /// `vN.M`-style segment.
    #[error("unknown version tag `{tag}` (configured versions: {})", format_known(.known))]
    UnknownVersionTag { tag: String, known: Vec<String> },

    /// More than one `[[versions]]` entry marked `latest = true`.
    #[error("multiple versions marked latest: {0}")]
    DuplicateLatest(String),
}

fn format_known(known: &[String]) -> String {
    if known.is_empty() {
        "none".to_string()
    } else {
        known.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_io_error_names_the_file() {
        let err = ConfigError::Io(
            PathBuf::from("sites/blog/kosh.toml"),
            Error::new(ErrorKind::PermissionDenied, "denied"),
        );
        assert!(format!("{err}").contains("sites/blog/kosh.toml"));
    }

    #[test]
    fn test_unknown_version_tag_lists_configured() {
        let err = ConfigError::UnknownVersionTag {
            tag: "v9".into(),
            known: vec!["v1.0".into(), "v1.1".into()],
        };
        let display = format!("{err}");
        assert!(display.contains("`v9`"));
        assert!(display.contains("v1.0, v1.1"));
    }

    #[test]
    fn test_unknown_version_tag_without_versions() {
        let err = ConfigError::UnknownVersionTag {
            tag: "nightly".into(),
            known: Vec::new(),
        };
        assert!(format!("{err}").contains("none"));
    }

    #[test]
    fn test_duplicate_latest_display() {
        let err = ConfigError::DuplicateLatest("v1.0, v2.0".into());
        let display = format!("{err}");
        assert!(display.contains("latest"));
        assert!(display.contains("v1.0, v2.0"));
    }
}
