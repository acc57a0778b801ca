use crate::store::ScriptKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Windows,
}

/// Interpreter chosen for one execution. Never changed after resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedInterpreter {
    pub executable: String,
    pub fixed_args: Vec<String>,
}

impl ResolvedInterpreter {
    pub fn new(executable: impl Into<String>, fixed_args: Vec<String>) -> Self {
        Self {
            executable: executable.into(),
            fixed_args,
        }
    }
}

/// Platform-specific policy for running a materialized script.
pub trait PlatformStrategy: Send + Sync {
    fn platform(&self) -> Platform;

    /// File extension of the temporary script, including the dot.
    fn extension(&self) -> &'static str;

    /// Appended to the stored content so the last command's status becomes the exit code.
    fn success_suffix(&self) -> &'static str;

    fn resolve_interpreter(&self, content: &str, default_shell: &str) -> ResolvedInterpreter;

    fn build_argv(
        &self,
        resolved: &ResolvedInterpreter,
        script_path: &str,
        args: &[String],
    ) -> Vec<String>;

    fn wrap_content(&self, content: &str) -> String {
        format!("{}{}", content, self.success_suffix())
    }
}

pub fn strategy_for(kind: ScriptKind) -> &'static dyn PlatformStrategy {
    match kind {
        ScriptKind::Shell => &PosixShell,
        ScriptKind::PowerShell => &PowerShell,
        ScriptKind::Batch => &WinBatch,
    }
}

/// Reads a leading `#!` line. `None` when the content has no shebang.
///
/// The interpreter line is split on runs of whitespace; a single-line script
/// is valid and an empty line yields an empty executable.
pub fn parse_shebang(content: &str) -> Option<ResolvedInterpreter> {
    let rest = content.strip_prefix("#!")?;
    let line = rest.split('\n').next().unwrap_or("");

    let mut tokens = line.split_whitespace().map(str::to_string);
    let executable = tokens.next().unwrap_or_default();
    Some(ResolvedInterpreter::new(executable, tokens.collect()))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PosixShell;

impl PlatformStrategy for PosixShell {
    fn platform(&self) -> Platform {
        Platform::Posix
    }

    fn extension(&self) -> &'static str {
        ".sh"
    }

    fn success_suffix(&self) -> &'static str {
        "\nexit $?"
    }

    fn resolve_interpreter(&self, content: &str, default_shell: &str) -> ResolvedInterpreter {
        match parse_shebang(content) {
            Some(resolved) => {
                tracing::debug!(
                    executable = %resolved.executable,
                    args = ?resolved.fixed_args,
                    "using custom interpreter"
                );
                resolved
            }
            None => ResolvedInterpreter::new(default_shell, Vec::new()),
        }
    }

    fn build_argv(
        &self,
        resolved: &ResolvedInterpreter,
        script_path: &str,
        args: &[String],
    ) -> Vec<String> {
        let mut argv = Vec::with_capacity(2 + resolved.fixed_args.len() + args.len());
        argv.push(resolved.executable.clone());
        argv.extend(resolved.fixed_args.iter().cloned());
        argv.push(script_path.to_string());
        argv.extend(args.iter().cloned());
        argv
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PowerShell;

impl PlatformStrategy for PowerShell {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn extension(&self) -> &'static str {
        ".ps1"
    }

    fn success_suffix(&self) -> &'static str {
        "\r\nexit $LastExitCode"
    }

    fn resolve_interpreter(&self, _content: &str, _default_shell: &str) -> ResolvedInterpreter {
        ResolvedInterpreter::new(
            "powershell.exe",
            vec!["-ExecutionPolicy".to_string(), "ByPass".to_string()],
        )
    }

    fn build_argv(
        &self,
        resolved: &ResolvedInterpreter,
        script_path: &str,
        args: &[String],
    ) -> Vec<String> {
        let mut argv = vec![resolved.executable.clone()];
        argv.extend(resolved.fixed_args.iter().cloned());
        // Invocation is one composed token, not a separate path element.
        argv.push(format!("& '{}'", script_path));
        argv.extend(args.iter().cloned());
        argv
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WinBatch;

impl PlatformStrategy for WinBatch {
    fn platform(&self) -> Platform {
        Platform::Windows
    }

    fn extension(&self) -> &'static str {
        ".bat"
    }

    fn success_suffix(&self) -> &'static str {
        "\r\nexit %ERRORLEVEL%"
    }

    fn resolve_interpreter(&self, _content: &str, _default_shell: &str) -> ResolvedInterpreter {
        ResolvedInterpreter::new("cmd", vec!["/c".to_string(), "call".to_string()])
    }

    fn build_argv(
        &self,
        resolved: &ResolvedInterpreter,
        script_path: &str,
        args: &[String],
    ) -> Vec<String> {
        let mut argv = vec![resolved.executable.clone()];
        argv.extend(resolved.fixed_args.iter().cloned());
        argv.push(script_path.to_string());
        argv.extend(args.iter().cloned());
        argv
    }
}
