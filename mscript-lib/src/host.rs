use crate::engine::materialize::{ExecutionHost, SpawnSpec};
use crate::error::HostError;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tempfile::Builder;

/// Where the script's stdout and stderr end up.
#[derive(Debug, Clone, Default)]
pub enum LogSink {
    #[default]
    Inherit,
    /// Appended to, both streams interleaved.
    File(PathBuf),
}

impl LogSink {
    fn stdio_pair(&self) -> io::Result<(Stdio, Stdio)> {
        match self {
            LogSink::Inherit => Ok((Stdio::inherit(), Stdio::inherit())),
            LogSink::File(path) => {
                let out = OpenOptions::new().create(true).append(true).open(path)?;
                let err = out.try_clone()?;
                Ok((Stdio::from(out), Stdio::from(err)))
            }
        }
    }
}

/// Runs scripts on the local machine.
#[derive(Debug, Clone, Default)]
pub struct LocalHost {
    sink: LogSink,
}

impl LocalHost {
    pub fn new(sink: LogSink) -> Self {
        Self { sink }
    }
}

impl ExecutionHost for LocalHost {
    fn create_temp_file(
        &self,
        dir: &Path,
        prefix: &str,
        suffix: &str,
        content: &str,
    ) -> Result<PathBuf, HostError> {
        let create_err = |source: io::Error| HostError::CreateTemp {
            dir: dir.to_path_buf(),
            source,
        };

        let mut file = Builder::new()
            .prefix(prefix)
            .suffix(suffix)
            .tempfile_in(dir)
            .map_err(create_err)?;
        file.write_all(content.as_bytes()).map_err(create_err)?;
        file.flush().map_err(create_err)?;

        // Keep the file past the handle; deletion is the coordinator's job.
        let (_file, path): (File, PathBuf) = file.keep().map_err(|e| create_err(e.error))?;
        Ok(path)
    }

    fn delete_file(&self, path: &Path) -> Result<bool, HostError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(HostError::Delete {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn spawn(&self, launch: &SpawnSpec<'_>) -> Result<i32, HostError> {
        let (executable, args) = match launch.argv.split_first() {
            Some((exe, args)) if !exe.is_empty() => (exe, args),
            _ => {
                return Err(HostError::Launch {
                    executable: String::new(),
                    reason: "no interpreter given".to_string(),
                })
            }
        };

        let launch_err = |e: io::Error| HostError::Launch {
            executable: executable.clone(),
            reason: e.to_string(),
        };

        let (stdout, stderr) = self.sink.stdio_pair().map_err(launch_err)?;

        let status = Command::new(executable)
            .args(args)
            .envs(launch.env)
            .current_dir(launch.cwd)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr)
            .status()
            .map_err(launch_err)?;

        // Killed by a signal: no code, count as a plain failure.
        Ok(status.code().unwrap_or(1))
    }
}
