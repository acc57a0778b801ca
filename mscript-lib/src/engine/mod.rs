pub mod args;
pub mod context;
pub mod coordinator;
pub mod materialize;
pub mod strategy;

pub use args::{expand_args, EnvExpander, TokenExpander};
pub use context::BuildContext;
pub use coordinator::{
    CleanupPolicy, CommandPreview, Coordinator, EngineOptions, ExecutionRequest, ExecutionResult,
};
pub use materialize::{ExecutionHost, SpawnSpec, TempScript};
pub use strategy::{strategy_for, Platform, PlatformStrategy, ResolvedInterpreter};

use crate::error::{ConfigurationError, ExecutionError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    StepFailed = 1,
    CliUsageError = 64,
    ConfigurationError = 78,
    LaunchFailed = 126,
    ScriptNotFound = 127,
}

impl From<ExitCode> for i32 {
    fn from(code: ExitCode) -> Self {
        code as i32
    }
}

impl From<&ExecutionResult> for ExitCode {
    fn from(result: &ExecutionResult) -> Self {
        if result.succeeded {
            ExitCode::Success
        } else {
            ExitCode::StepFailed
        }
    }
}

impl From<&ExecutionError> for ExitCode {
    fn from(err: &ExecutionError) -> Self {
        match err {
            ExecutionError::Configuration(ConfigurationError::ScriptNotFound(_)) => {
                ExitCode::ScriptNotFound
            }
            ExecutionError::Configuration(ConfigurationError::MissingWorkspace(_)) => {
                ExitCode::ConfigurationError
            }
            ExecutionError::Launch { .. } => ExitCode::LaunchFailed,
            ExecutionError::Expansion(_)
            | ExecutionError::Materialize { .. }
            | ExecutionError::Store(_) => ExitCode::StepFailed,
        }
    }
}
