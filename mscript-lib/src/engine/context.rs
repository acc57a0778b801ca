use std::collections::HashMap;
use std::path::PathBuf;

/// What the surrounding job provides to a build step.
#[derive(Debug, Clone, Default)]
pub struct BuildContext {
    /// Working directory of the step; `None` when the job has no workspace.
    pub workspace: Option<PathBuf>,
    /// Job-provided variables, layered over the process environment when spawning.
    pub env: HashMap<String, String>,
}

impl BuildContext {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: Some(workspace.into()),
            env: HashMap::new(),
        }
    }

    pub fn without_workspace() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Job variables win over the process environment.
    pub fn var(&self, name: &str) -> Option<String> {
        self.env
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }
}

/// Parses `KEY=VALUE` pairs as given on the command line.
pub fn parse_env_pair(pair: &str) -> Option<(String, String)> {
    let (key, value) = pair.split_once('=')?;
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    Some((key.to_string(), value.to_string()))
}
