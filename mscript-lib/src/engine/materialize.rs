use crate::error::HostError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const TEMP_PREFIX: &str = "build_step_template";

/// Everything needed to start the interpreter process.
#[derive(Debug, Clone, Copy)]
pub struct SpawnSpec<'a> {
    pub argv: &'a [String],
    /// Added on top of the host's own environment.
    pub env: &'a HashMap<String, String>,
    pub cwd: &'a Path,
}

/// The machine a materialized script runs on.
pub trait ExecutionHost {
    fn create_temp_file(
        &self,
        dir: &Path,
        prefix: &str,
        suffix: &str,
        content: &str,
    ) -> Result<PathBuf, HostError>;

    /// `Ok(false)` when there was nothing to delete.
    fn delete_file(&self, path: &Path) -> Result<bool, HostError>;

    /// Runs to completion and returns the exit code.
    fn spawn(&self, launch: &SpawnSpec<'_>) -> Result<i32, HostError>;
}

/// A script written to the host for the duration of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TempScript {
    pub path: PathBuf,
    pub extension: &'static str,
}

impl TempScript {
    pub fn path_str(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// Writes `content` verbatim to a new uniquely named file in `dir`.
pub fn materialize<H>(
    host: &H,
    dir: &Path,
    content: &str,
    extension: &'static str,
) -> Result<TempScript, HostError>
where
    H: ExecutionHost + ?Sized,
{
    let path = host.create_temp_file(dir, TEMP_PREFIX, extension, content)?;
    Ok(TempScript { path, extension })
}

/// Deletes the temporary script. Safe to call when the file is already gone.
pub fn release<H>(host: &H, handle: &TempScript) -> Result<bool, HostError>
where
    H: ExecutionHost + ?Sized,
{
    host.delete_file(&handle.path)
}
