pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod store;

pub use config::Config;
pub use engine::{
    BuildContext, Coordinator, EnvExpander, ExecutionRequest, ExecutionResult, ExitCode,
};
pub use error::ExecutionError;
pub use host::{LocalHost, LogSink};
pub use store::{DeclaredArg, ScriptDocument, ScriptKind, ScriptStore, TemplateStore};

use anyhow::Result;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Context {
    pub config: Config,
    pub store_path: PathBuf,
}

impl Context {
    pub fn new(config_override: Option<PathBuf>) -> Result<Self> {
        let config = Config::load_with_override(config_override)?;
        let store_path = config.store_path()?;

        Ok(Self { config, store_path })
    }

    pub fn open_store(&self) -> Result<ScriptStore> {
        Ok(ScriptStore::open(&self.store_path)?)
    }

    /// A coordinator over the local machine, owning a freshly loaded store.
    pub fn local_coordinator(&self) -> Result<Coordinator<ScriptStore, LocalHost, EnvExpander>> {
        let store = self.open_store()?;
        let host = LocalHost::new(self.config.log_sink()?);
        Ok(Coordinator::new(
            store,
            host,
            EnvExpander,
            self.config.engine_options()?,
        ))
    }
}
