use crate::engine::{CleanupPolicy, EngineOptions};
use crate::host::LogSink;
use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CoreConfig {
    /// Interpreter for shell scripts without a shebang line.
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_store")]
    pub store: String,

    /// Directory for temporary scripts instead of the workspace.
    #[serde(default)]
    pub temp_dir: Option<String>,

    #[serde(default)]
    pub cleanup: CleanupPolicy,

    #[serde(default)]
    pub tokenize: bool,

    /// Script output is appended here instead of the terminal.
    #[serde(default)]
    pub log_file: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            store: default_store(),
            temp_dir: None,
            cleanup: CleanupPolicy::default(),
            tokenize: false,
            log_file: None,
        }
    }
}

/// One config file as written. Only the keys it sets take part in the merge.
#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigLayer {
    #[serde(default)]
    core: CoreLayer,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct CoreLayer {
    shell: Option<String>,
    store: Option<String>,
    temp_dir: Option<String>,
    cleanup: Option<CleanupPolicy>,
    tokenize: Option<bool>,
    log_file: Option<String>,
}

impl Config {
    pub fn load_with_override(config_path: Option<PathBuf>) -> Result<Self> {
        Self::load_cascading(config_path)
    }

    fn load_cascading(override_path: Option<PathBuf>) -> Result<Self> {
        let mut config = Self::default();

        // Global config
        if let Some(global_config_path) = Self::get_global_config_path() {
            if global_config_path.exists() {
                let global_config = Self::load_from_file(&global_config_path)?;
                config = config.merge_with(global_config);
            }
        }

        // Project-local config
        if let Some(project_config_path) = Self::find_project_config()? {
            let project_config = Self::load_from_file(&project_config_path)?;
            config = config.merge_with(project_config);
        }

        // Explicit override
        if let Some(override_path) = override_path {
            if override_path.exists() {
                let override_config = Self::load_from_file(&override_path)?;
                config = config.merge_with(override_config);
            } else {
                return Err(anyhow!("Config file not found: {}", override_path.display()));
            }
        }

        // Environment variables (highest precedence)
        config.apply_env_overrides(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    fn get_global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("mscript").join("mscript.toml"))
    }

    fn find_project_config() -> Result<Option<PathBuf>> {
        let current_dir = std::env::current_dir()?;
        let mut dir = current_dir.as_path();

        loop {
            let config_path = dir.join(".mscript.toml");
            if config_path.exists() {
                return Ok(Some(config_path));
            }

            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }

        Ok(None)
    }

    fn load_from_file(path: &Path) -> Result<ConfigLayer> {
        let content = std::fs::read_to_string(path)?;
        let layer: ConfigLayer = toml::from_str(&content)
            .map_err(|e| anyhow!("Invalid config {}: {}", path.display(), e))?;
        Ok(layer)
    }

    /// Every key the layer sets wins, including ones set back to the default.
    fn merge_with(mut self, layer: ConfigLayer) -> Self {
        let core = layer.core;
        if let Some(shell) = core.shell {
            self.core.shell = shell;
        }
        if let Some(store) = core.store {
            self.core.store = store;
        }
        if core.temp_dir.is_some() {
            self.core.temp_dir = core.temp_dir;
        }
        if let Some(cleanup) = core.cleanup {
            self.core.cleanup = cleanup;
        }
        if let Some(tokenize) = core.tokenize {
            self.core.tokenize = tokenize;
        }
        if core.log_file.is_some() {
            self.core.log_file = core.log_file;
        }
        self
    }

    fn apply_env_overrides<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = var("MSCRIPT_SHELL") {
            if !val.trim().is_empty() {
                self.core.shell = val;
            }
        }

        if let Some(val) = var("MSCRIPT_STORE") {
            self.core.store = val;
        }

        if let Some(val) = var("MSCRIPT_CLEANUP") {
            self.core.cleanup = CleanupPolicy::parse(&val)
                .ok_or_else(|| anyhow!("MSCRIPT_CLEANUP must be 'warn' or 'fail', got '{}'", val))?;
        }

        if let Some(val) = var("MSCRIPT_TOKENIZE") {
            self.core.tokenize = val
                .parse()
                .map_err(|_| anyhow!("MSCRIPT_TOKENIZE must be 'true' or 'false', got '{}'", val))?;
        }

        Ok(())
    }

    pub fn store_path(&self) -> Result<PathBuf> {
        self.expand_path(&self.core.store)
    }

    pub fn log_sink(&self) -> Result<LogSink> {
        match &self.core.log_file {
            Some(path) => Ok(LogSink::File(self.expand_path(path)?)),
            None => Ok(LogSink::Inherit),
        }
    }

    pub fn engine_options(&self) -> Result<EngineOptions> {
        let temp_dir = self
            .core
            .temp_dir
            .as_deref()
            .map(|dir| self.expand_path(dir))
            .transpose()?;

        Ok(EngineOptions {
            default_shell: self.core.shell.clone(),
            temp_dir,
            cleanup: self.core.cleanup,
        })
    }

    pub fn expand_path(&self, path_str: &str) -> Result<PathBuf> {
        if path_str == "~" || path_str.starts_with("~/") {
            let home = dirs::home_dir()
                .ok_or_else(|| anyhow!("Cannot expand ~: home directory not found"))?;
            Ok(home.join(path_str.trim_start_matches('~').trim_start_matches('/')))
        } else {
            Ok(PathBuf::from(path_str))
        }
    }
}

fn default_shell() -> String {
    "/bin/sh".to_string()
}

fn default_store() -> String {
    "~/.local/share/mscript/store.json".to_string()
}
