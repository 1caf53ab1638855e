//! LSC-prefixed error types with structured error codes.

#![allow(missing_docs)]

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Shared `Result` alias for the project.
pub type Result<T> = std::result::Result<T, LscError>;

/// Top-level error type for the status core.
#[derive(Debug, Error)]
pub enum LscError {
    #[error("[LSC-1001] invalid configuration: {details}")]
    InvalidConfig { details: String },

    #[error("[LSC-1002] missing configuration file: {path}")]
    MissingConfig { path: PathBuf },

    #[error("[LSC-1003] configuration parse failure in {context}: {details}")]
    ConfigParse {
        context: &'static str,
        details: String,
    },

    #[error("[LSC-1004] invalid scenario: {details}")]
    InvalidScenario { details: String },

    #[error("[LSC-2001] {store} fetch failed: {details}")]
    StoreFetch {
        store: &'static str,
        details: String,
    },

    #[error("[LSC-2002] {store} fetch did not complete within {timeout_ms}ms")]
    FetchTimeout { store: &'static str, timeout_ms: u64 },

    #[error("[LSC-2003] {action} failed: {details}")]
    ActionFailed {
        action: &'static str,
        details: String,
    },

    #[error("[LSC-2101] serialization failure in {context}: {details}")]
    Serialization {
        context: &'static str,
        details: String,
    },

    #[error("[LSC-3002] IO failure at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("[LSC-3003] channel closed in component {component}")]
    ChannelClosed { component: &'static str },

    #[error("[LSC-3900] runtime failure: {details}")]
    Runtime { details: String },
}

impl LscError {
    /// Stable machine-parseable error code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "LSC-1001",
            Self::MissingConfig { .. } => "LSC-1002",
            Self::ConfigParse { .. } => "LSC-1003",
            Self::InvalidScenario { .. } => "LSC-1004",
            Self::StoreFetch { .. } => "LSC-2001",
            Self::FetchTimeout { .. } => "LSC-2002",
            Self::ActionFailed { .. } => "LSC-2003",
            Self::Serialization { .. } => "LSC-2101",
            Self::Io { .. } => "LSC-3002",
            Self::ChannelClosed { .. } => "LSC-3003",
            Self::Runtime { .. } => "LSC-3900",
        }
    }

    /// Convenience constructor for IO errors with a known path.
    #[must_use]
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Convenience constructor for a failed store read.
    #[must_use]
    pub fn store(store: &'static str, details: impl Into<String>) -> Self {
        Self::StoreFetch {
            store,
            details: details.into(),
        }
    }
}

impl From<serde_json::Error> for LscError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization {
            context: "serde_json",
            details: value.to_string(),
        }
    }
}

impl From<toml::de::Error> for LscError {
    fn from(value: toml::de::Error) -> Self {
        Self::ConfigParse {
            context: "toml",
            details: value.to_string(),
        }
    }
}
