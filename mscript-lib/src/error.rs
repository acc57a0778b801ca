use std::path::PathBuf;
use thiserror::Error;

/// Problems with what the step was asked to do, detected before any side effect.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Script not found: {0}")]
    ScriptNotFound(String),

    #[error("No workspace available, can't run script '{0}'")]
    MissingWorkspace(String),
}

#[derive(Debug, Error)]
#[error("Failed to expand argument '{raw}': {reason}")]
pub struct ExpansionError {
    pub raw: String,
    pub reason: String,
}

impl ExpansionError {
    pub fn new(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            raw: raw.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum HostError {
    #[error("Cannot create temporary script in {}: {source}", dir.display())]
    CreateTemp {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot remove temporary script file '{}': {source}", path.display())]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot launch '{executable}': {reason}")]
    Launch { executable: String, reason: String },
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Cannot read script store {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot write script store {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed script store {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Script already exists: {0}")]
    Duplicate(String),

    #[error("Invalid filter pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
}

/// Everything that can abort a single script execution.
///
/// A script that runs and exits non-zero is not an error; it is reported
/// through [`crate::engine::ExecutionResult`].
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Expansion(#[from] ExpansionError),

    #[error("Cannot create temporary script for '{name}': {source}")]
    Materialize {
        name: String,
        #[source]
        source: HostError,
    },

    #[error("Cannot run script '{name}': {source}")]
    Launch {
        name: String,
        #[source]
        source: HostError,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}
