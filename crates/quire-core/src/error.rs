//! Error types for quire-core.
//!
//! Only run-level (infrastructure) failures travel as `Err`. Per-document,
//! per-chapter and per-unit problems are collected as data and end up in the
//! report.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type for quire-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that abort a pipeline stage.
#[derive(Debug, Error)]
pub enum Error {
    /// IO error without further context.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// IO error on a specific path.
    #[error("failed to {action} {}: {source}", path.display())]
    FileIo {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Serialization of a persisted artifact failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration is semantically invalid.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Configuration file could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// Dialect pattern failed to compile.
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// No dialect is registered under this name.
    #[error("unknown dialect: {0}")]
    UnknownDialect(String),

    /// Toolchain is missing or misconfigured.
    #[error("toolchain error: {0}")]
    Toolchain(String),

    /// Persisted pipeline state is missing or inconsistent.
    #[error("index error: {0}")]
    Index(String),

    /// The run was cancelled.
    #[error("run cancelled")]
    Cancelled,
}

impl Error {
    pub(crate) fn file_io(action: &'static str, path: &Path, source: std::io::Error) -> Self {
        Error::FileIo {
            action,
            path: path.to_path_buf(),
            source,
        }
    }

    /// Render the error with a recovery hint for the command line.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::Toolchain(_) => Some(
                "check that the toolchain binary is on PATH or set `bin` in the [[toolchains]] entry",
            ),
            Error::Index(_) => Some("run `quire extract` and `quire resolve` before this command"),
            Error::Config(_) | Error::ConfigParse(_) => {
                Some("quire.toml accepts [scan], [language], [classify], [validate], [[toolchains]] and [chapters.<id>]; see `quire --help`")
            }
            Error::UnknownDialect(_) => Some("supported dialects: zig"),
            Error::FileIo { .. } => Some("check that the output directory is writable"),
            _ => None,
        };

        match hint {
            Some(hint) => format!("{self}\n  hint: {hint}"),
            None => self.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hint_for_toolchain() {
        let err = Error::Toolchain("zig-0.14.0 not found".to_string());
        let rendered = err.with_hint();
        assert!(rendered.contains("zig-0.14.0 not found"));
        assert!(rendered.contains("hint:"));
    }

    #[test]
    fn test_config_hint_names_sections() {
        let rendered = Error::Config("[scan] fence must not be empty".to_string()).with_hint();
        assert!(rendered.contains("[[toolchains]]"));
        assert!(rendered.contains("quire --help"));
        assert!(!rendered.contains(".md"));
    }

    #[test]
    fn test_no_hint_for_cancel() {
        assert_eq!(Error::Cancelled.with_hint(), "run cancelled");
    }
}
