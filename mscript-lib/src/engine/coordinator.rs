use crate::engine::args::{expand_args, TokenExpander};
use crate::engine::context::BuildContext;
use crate::engine::materialize::{
    materialize, release, ExecutionHost, SpawnSpec, TempScript, TEMP_PREFIX,
};
use crate::engine::strategy::{strategy_for, PlatformStrategy};
use crate::error::{ConfigurationError, ExecutionError, HostError};
use crate::store::{ScriptDocument, ScriptKind, TemplateStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What to do when the temporary script cannot be removed after a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupPolicy {
    /// Log it and keep the result of the run.
    #[default]
    Warn,
    /// Mark the step failed even when the script itself succeeded.
    #[serde(rename = "fail")]
    FailStep,
}

impl CleanupPolicy {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "warn" => Some(CleanupPolicy::Warn),
            "fail" => Some(CleanupPolicy::FailStep),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub script_id: String,
    /// Positional, passed after the script path in this order.
    pub raw_args: Vec<String>,
    pub tokenize: bool,
    /// Overrides the stored document's kind when set.
    pub kind: Option<ScriptKind>,
}

impl ExecutionRequest {
    pub fn new(script_id: impl Into<String>) -> Self {
        Self {
            script_id: script_id.into(),
            raw_args: Vec::new(),
            tokenize: false,
            kind: None,
        }
    }

    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.raw_args = args;
        self
    }

    pub fn tokenized(mut self, tokenize: bool) -> Self {
        self.tokenize = tokenize;
        self
    }

    pub fn with_kind(mut self, kind: ScriptKind) -> Self {
        self.kind = Some(kind);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub exit_code: i32,
    pub succeeded: bool,
}

impl ExecutionResult {
    pub fn from_exit_code(exit_code: i32) -> Self {
        Self {
            exit_code,
            succeeded: exit_code == 0,
        }
    }
}

/// What a run would execute, without touching the host.
#[derive(Debug, Clone, Serialize)]
pub struct CommandPreview {
    pub script_name: String,
    pub kind: ScriptKind,
    pub argv: Vec<String>,
    pub cwd: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Used for Posix scripts without a shebang line.
    pub default_shell: String,
    /// Where temporary scripts go; the workspace when unset.
    pub temp_dir: Option<PathBuf>,
    pub cleanup: CleanupPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            default_shell: "/bin/sh".to_string(),
            temp_dir: None,
            cleanup: CleanupPolicy::default(),
        }
    }
}

/// Runs stored scripts: lookup, materialize, resolve, build argv, spawn, clean up.
///
/// Once the temporary script exists it is released on every path out of
/// [`Coordinator::execute`], including expansion and launch failures.
pub struct Coordinator<S, H, E> {
    store: S,
    host: H,
    expander: E,
    options: EngineOptions,
}

impl<S, H, E> Coordinator<S, H, E>
where
    S: TemplateStore,
    H: ExecutionHost,
    E: TokenExpander,
{
    pub fn new(store: S, host: H, expander: E, options: EngineOptions) -> Self {
        Self {
            store,
            host,
            expander,
            options,
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn execute(
        &self,
        request: &ExecutionRequest,
        context: &BuildContext,
    ) -> Result<ExecutionResult, ExecutionError> {
        let document = self.lookup(&request.script_id)?;
        tracing::info!(script = %document.name, id = %document.id, "executing script");

        let workspace = require_workspace(&document, context)?;

        let strategy = strategy_for(request.kind.unwrap_or(document.kind));
        let content = strategy.wrap_content(&document.content);
        let temp_dir = self.options.temp_dir.as_deref().unwrap_or(workspace);

        let handle = materialize(&self.host, temp_dir, &content, strategy.extension()).map_err(
            |source| ExecutionError::Materialize {
                name: document.name.clone(),
                source,
            },
        )?;
        tracing::debug!(path = %handle.path.display(), "wrote script");

        let outcome = self.run_materialized(
            strategy,
            &document,
            &content,
            &handle,
            request,
            context,
            workspace,
        );
        let cleanup = release(&self.host, &handle);
        let outcome = self.settle_cleanup(outcome, cleanup, &handle);

        tracing::debug!(script = %document.name, "finished script step");
        outcome
    }

    /// Resolves the command a run would execute, against a placeholder script path.
    pub fn preview(
        &self,
        request: &ExecutionRequest,
        context: &BuildContext,
    ) -> Result<CommandPreview, ExecutionError> {
        let document = self.lookup(&request.script_id)?;
        let workspace = require_workspace(&document, context)?;
        let kind = request.kind.unwrap_or(document.kind);
        let strategy = strategy_for(kind);
        let content = strategy.wrap_content(&document.content);

        let dir = self.options.temp_dir.as_deref().unwrap_or(workspace);
        let placeholder = dir.join(format!("{}{}", TEMP_PREFIX, strategy.extension()));

        let resolved = strategy.resolve_interpreter(&content, &self.options.default_shell);
        let args = expand_args(&self.expander, &request.raw_args, request.tokenize, context)?;
        let argv = strategy.build_argv(&resolved, &placeholder.to_string_lossy(), &args);
        if resolved.executable.is_empty() {
            return Err(empty_interpreter(&document));
        }

        Ok(CommandPreview {
            script_name: document.name,
            kind,
            argv,
            cwd: Some(workspace.to_path_buf()),
        })
    }

    fn lookup(&self, id: &str) -> Result<ScriptDocument, ExecutionError> {
        match self.store.lookup(id)? {
            Some(document) => Ok(document),
            None => {
                tracing::error!(id, "script does not exist");
                Err(ConfigurationError::ScriptNotFound(id.to_string()).into())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn run_materialized(
        &self,
        strategy: &dyn PlatformStrategy,
        document: &ScriptDocument,
        content: &str,
        handle: &TempScript,
        request: &ExecutionRequest,
        context: &BuildContext,
        workspace: &Path,
    ) -> Result<ExecutionResult, ExecutionError> {
        let resolved = strategy.resolve_interpreter(content, &self.options.default_shell);
        let args = expand_args(&self.expander, &request.raw_args, request.tokenize, context)?;
        let argv = strategy.build_argv(&resolved, &handle.path_str(), &args);

        if resolved.executable.is_empty() {
            return Err(empty_interpreter(document));
        }

        let exit_code = self
            .host
            .spawn(&SpawnSpec {
                argv: &argv,
                env: &context.env,
                cwd: workspace,
            })
            .map_err(|source| ExecutionError::Launch {
                name: document.name.clone(),
                source,
            })?;

        let result = ExecutionResult::from_exit_code(exit_code);
        if !result.succeeded {
            tracing::warn!(script = %document.name, exit_code, "script exited with failure");
        }
        Ok(result)
    }

    fn settle_cleanup(
        &self,
        outcome: Result<ExecutionResult, ExecutionError>,
        cleanup: Result<bool, HostError>,
        handle: &TempScript,
    ) -> Result<ExecutionResult, ExecutionError> {
        match cleanup {
            Ok(true) => outcome,
            Ok(false) => {
                tracing::debug!(path = %handle.path.display(), "temporary script already gone");
                outcome
            }
            Err(e) => {
                tracing::error!(error = %e, "cannot remove temporary script file");
                match (self.options.cleanup, outcome) {
                    (CleanupPolicy::FailStep, Ok(result)) => Ok(ExecutionResult {
                        exit_code: result.exit_code,
                        succeeded: false,
                    }),
                    (_, outcome) => outcome,
                }
            }
        }
    }
}

fn require_workspace<'a>(
    document: &ScriptDocument,
    context: &'a BuildContext,
) -> Result<&'a Path, ExecutionError> {
    context.workspace.as_deref().ok_or_else(|| {
        tracing::error!(script = %document.name, "no workspace present, can't run script");
        ConfigurationError::MissingWorkspace(document.name.clone()).into()
    })
}

fn empty_interpreter(document: &ScriptDocument) -> ExecutionError {
    ExecutionError::Launch {
        name: document.name.clone(),
        source: HostError::Launch {
            executable: String::new(),
            reason: "empty interpreter line".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::args::EnvExpander;
    use crate::error::ExpansionError;
    use crate::store::{DeclaredArg, ScriptStore};
    use std::cell::RefCell;
    use std::collections::HashMap;

    #[derive(Debug, Clone)]
    struct CreatedFile {
        dir: PathBuf,
        suffix: String,
        content: String,
    }

    /// Records every host call; spawn and delete outcomes are scripted.
    struct MockHost {
        created: RefCell<Vec<CreatedFile>>,
        deleted: RefCell<Vec<PathBuf>>,
        spawned: RefCell<Vec<(Vec<String>, HashMap<String, String>, PathBuf)>>,
        exit_code: i32,
        create_fails: bool,
        launch_fails: bool,
        delete_fails: bool,
    }

    impl MockHost {
        fn exiting(exit_code: i32) -> Self {
            Self {
                created: RefCell::new(Vec::new()),
                deleted: RefCell::new(Vec::new()),
                spawned: RefCell::new(Vec::new()),
                exit_code,
                create_fails: false,
                launch_fails: false,
                delete_fails: false,
            }
        }
    }

    impl ExecutionHost for MockHost {
        fn create_temp_file(
            &self,
            dir: &Path,
            prefix: &str,
            suffix: &str,
            content: &str,
        ) -> Result<PathBuf, HostError> {
            if self.create_fails {
                return Err(HostError::CreateTemp {
                    dir: dir.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
                });
            }
            self.created.borrow_mut().push(CreatedFile {
                dir: dir.to_path_buf(),
                suffix: suffix.to_string(),
                content: content.to_string(),
            });
            Ok(dir.join(format!("{}123{}", prefix, suffix)))
        }

        fn delete_file(&self, path: &Path) -> Result<bool, HostError> {
            self.deleted.borrow_mut().push(path.to_path_buf());
            if self.delete_fails {
                return Err(HostError::Delete {
                    path: path.to_path_buf(),
                    source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
                });
            }
            Ok(true)
        }

        fn spawn(&self, launch: &SpawnSpec<'_>) -> Result<i32, HostError> {
            self.spawned.borrow_mut().push((
                launch.argv.to_vec(),
                launch.env.clone(),
                launch.cwd.to_path_buf(),
            ));
            if self.launch_fails {
                return Err(HostError::Launch {
                    executable: launch.argv[0].clone(),
                    reason: "No such file or directory".to_string(),
                });
            }
            Ok(self.exit_code)
        }
    }

    struct FailingExpander;

    impl TokenExpander for FailingExpander {
        fn expand(&self, raw: &str, _context: &BuildContext) -> Result<String, ExpansionError> {
            Err(ExpansionError::new(raw, "unknown macro"))
        }
    }

    fn store_with(doc: ScriptDocument) -> ScriptStore {
        let mut store = ScriptStore::in_memory();
        store.put(doc);
        store
    }

    fn hello_store() -> ScriptStore {
        store_with(ScriptDocument::new(
            "hello",
            "Hello",
            ScriptKind::Shell,
            "echo hello",
            Vec::new(),
        ))
    }

    fn coordinator<E: TokenExpander>(
        store: ScriptStore,
        host: MockHost,
        expander: E,
    ) -> Coordinator<ScriptStore, MockHost, E> {
        Coordinator::new(store, host, expander, EngineOptions::default())
    }

    #[test]
    fn test_success_end_to_end() {
        let engine = coordinator(hello_store(), MockHost::exiting(0), EnvExpander);
        let context = BuildContext::new("/ws");

        let result = engine.execute(&ExecutionRequest::new("hello"), &context).unwrap();
        assert_eq!(result, ExecutionResult { exit_code: 0, succeeded: true });

        let host = engine.host();
        let created = host.created.borrow();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].dir, PathBuf::from("/ws"));
        assert_eq!(created[0].suffix, ".sh");
        assert_eq!(created[0].content, "echo hello\nexit $?");

        let script = PathBuf::from("/ws/build_step_template123.sh");
        assert_eq!(*host.deleted.borrow(), vec![script.clone()]);

        let spawned = host.spawned.borrow();
        assert_eq!(
            spawned[0].0,
            vec!["/bin/sh".to_string(), script.to_string_lossy().to_string()]
        );
        assert_eq!(spawned[0].2, PathBuf::from("/ws"));
    }

    #[test]
    fn test_nonzero_exit_still_cleans_up() {
        let engine = coordinator(hello_store(), MockHost::exiting(2), EnvExpander);
        let result = engine
            .execute(&ExecutionRequest::new("hello"), &BuildContext::new("/ws"))
            .unwrap();
        assert_eq!(result, ExecutionResult { exit_code: 2, succeeded: false });
        assert_eq!(engine.host().deleted.borrow().len(), 1);
    }

    #[test]
    fn test_lookup_miss_creates_nothing() {
        let engine = coordinator(hello_store(), MockHost::exiting(0), EnvExpander);
        let err = engine
            .execute(&ExecutionRequest::new("nope"), &BuildContext::new("/ws"))
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Configuration(ConfigurationError::ScriptNotFound(ref id))
                if id == "nope"
        ));
        assert!(engine.host().created.borrow().is_empty());
        assert!(engine.host().spawned.borrow().is_empty());
    }

    #[test]
    fn test_missing_workspace_creates_nothing() {
        let engine = coordinator(hello_store(), MockHost::exiting(0), EnvExpander);
        let err = engine
            .execute(&ExecutionRequest::new("hello"), &BuildContext::without_workspace())
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Configuration(ConfigurationError::MissingWorkspace(_))
        ));
        assert!(engine.host().created.borrow().is_empty());
    }

    #[test]
    fn test_expansion_failure_skips_spawn_but_cleans_up() {
        let engine = coordinator(hello_store(), MockHost::exiting(0), FailingExpander);
        let request = ExecutionRequest::new("hello").with_args(vec!["${X}".to_string()]);
        let err = engine.execute(&request, &BuildContext::new("/ws")).unwrap_err();
        assert!(matches!(err, ExecutionError::Expansion(_)));
        assert!(engine.host().spawned.borrow().is_empty());
        assert_eq!(engine.host().deleted.borrow().len(), 1);
    }

    #[test]
    fn test_launch_failure_cleans_up() {
        let mut host = MockHost::exiting(0);
        host.launch_fails = true;
        let engine = coordinator(hello_store(), host, EnvExpander);
        let err = engine
            .execute(&ExecutionRequest::new("hello"), &BuildContext::new("/ws"))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Launch { .. }));
        assert_eq!(engine.host().deleted.borrow().len(), 1);
    }

    #[test]
    fn test_materialize_failure_spawns_and_deletes_nothing() {
        let mut host = MockHost::exiting(0);
        host.create_fails = true;
        let engine = coordinator(hello_store(), host, EnvExpander);
        let err = engine
            .execute(&ExecutionRequest::new("hello"), &BuildContext::new("/ws"))
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Materialize { ref name, source: HostError::CreateTemp { .. } }
                if name == "Hello"
        ));
        assert!(engine.host().spawned.borrow().is_empty());
        assert!(engine.host().deleted.borrow().is_empty());
    }

    #[test]
    fn test_empty_shebang_fails_without_spawn() {
        let store = store_with(ScriptDocument::new(
            "x",
            "X",
            ScriptKind::Shell,
            "#!\necho",
            Vec::new(),
        ));
        let engine = coordinator(store, MockHost::exiting(0), EnvExpander);
        let err = engine
            .execute(&ExecutionRequest::new("x"), &BuildContext::new("/ws"))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Launch { .. }));
        assert!(engine.host().spawned.borrow().is_empty());
        assert_eq!(engine.host().deleted.borrow().len(), 1);
    }

    #[test]
    fn test_cleanup_failure_policy() {
        let mut host = MockHost::exiting(0);
        host.delete_fails = true;
        let engine = coordinator(hello_store(), host, EnvExpander);
        let result = engine
            .execute(&ExecutionRequest::new("hello"), &BuildContext::new("/ws"))
            .unwrap();
        assert!(result.succeeded);

        let mut host = MockHost::exiting(0);
        host.delete_fails = true;
        let options = EngineOptions {
            cleanup: CleanupPolicy::FailStep,
            ..EngineOptions::default()
        };
        let engine = Coordinator::new(hello_store(), host, EnvExpander, options);
        let result = engine
            .execute(&ExecutionRequest::new("hello"), &BuildContext::new("/ws"))
            .unwrap();
        assert_eq!(result, ExecutionResult { exit_code: 0, succeeded: false });
    }

    #[test]
    fn test_shebang_args_and_env_reach_spawn() {
        let store = store_with(ScriptDocument::new(
            "deploy",
            "Deploy",
            ScriptKind::Shell,
            "#!/usr/bin/env bash -x\n./deploy.sh \"$@\"",
            vec![DeclaredArg::new("target"), DeclaredArg::new("opts")],
        ));
        let engine = coordinator(store, MockHost::exiting(0), EnvExpander);
        let context = BuildContext::new("/ws").with_env("TARGET", "prod");
        let request = ExecutionRequest::new("deploy")
            .with_args(vec!["$TARGET".to_string(), "--dry 'a b'".to_string()])
            .tokenized(true);

        engine.execute(&request, &context).unwrap();

        let spawned = engine.host().spawned.borrow();
        let (argv, env, _) = &spawned[0];
        assert_eq!(
            argv,
            &vec![
                "/usr/bin/env".to_string(),
                "bash".to_string(),
                "-x".to_string(),
                "/ws/build_step_template123.sh".to_string(),
                "prod".to_string(),
                "--dry".to_string(),
                "a b".to_string(),
            ]
        );
        assert_eq!(env.get("TARGET").map(String::as_str), Some("prod"));
    }

    #[test]
    fn test_windows_kinds() {
        let store = store_with(ScriptDocument::new(
            "win",
            "Win",
            ScriptKind::Batch,
            "echo hi",
            Vec::new(),
        ));
        let engine = coordinator(store, MockHost::exiting(0), EnvExpander);
        engine
            .execute(&ExecutionRequest::new("win"), &BuildContext::new("C:/ws"))
            .unwrap();
        {
            let created = engine.host().created.borrow();
            assert_eq!(created[0].content, "echo hi\r\nexit %ERRORLEVEL%");
            assert_eq!(created[0].suffix, ".bat");
            let spawned = engine.host().spawned.borrow();
            assert_eq!(&spawned[0].0[..3], &["cmd", "/c", "call"]);
        }

        let request = ExecutionRequest::new("win").with_kind(ScriptKind::PowerShell);
        engine.execute(&request, &BuildContext::new("C:/ws")).unwrap();
        let created = engine.host().created.borrow();
        assert_eq!(created[1].content, "echo hi\r\nexit $LastExitCode");
        let spawned = engine.host().spawned.borrow();
        assert_eq!(spawned[1].0[0], "powershell.exe");
        assert!(spawned[1].0[3].starts_with("& '") && spawned[1].0[3].ends_with(".ps1'"));
    }

    #[test]
    fn test_temp_dir_override() {
        let options = EngineOptions {
            temp_dir: Some(PathBuf::from("/tmp/steps")),
            ..EngineOptions::default()
        };
        let engine = Coordinator::new(hello_store(), MockHost::exiting(0), EnvExpander, options);
        engine
            .execute(&ExecutionRequest::new("hello"), &BuildContext::new("/ws"))
            .unwrap();
        assert_eq!(engine.host().created.borrow()[0].dir, PathBuf::from("/tmp/steps"));
        assert_eq!(engine.host().spawned.borrow()[0].2, PathBuf::from("/ws"));
    }

    #[test]
    fn test_preview_touches_nothing() {
        let engine = coordinator(hello_store(), MockHost::exiting(0), EnvExpander);
        let request = ExecutionRequest::new("hello").with_args(vec!["a b".to_string()]);
        let preview = engine.preview(&request, &BuildContext::new("/ws")).unwrap();
        assert_eq!(
            preview.argv,
            vec![
                "/bin/sh".to_string(),
                "/ws/build_step_template.sh".to_string(),
                "a b".to_string()
            ]
        );
        assert!(engine.host().created.borrow().is_empty());
        assert!(engine.host().spawned.borrow().is_empty());
    }

    #[test]
    fn test_preview_requires_workspace() {
        let engine = coordinator(hello_store(), MockHost::exiting(0), EnvExpander);
        let err = engine
            .preview(&ExecutionRequest::new("hello"), &BuildContext::without_workspace())
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::Configuration(ConfigurationError::MissingWorkspace(_))
        ));
    }

    #[test]
    fn test_preview_rejects_empty_shebang() {
        let store = store_with(ScriptDocument::new(
            "x",
            "X",
            ScriptKind::Shell,
            "#!\necho",
            Vec::new(),
        ));
        let engine = coordinator(store, MockHost::exiting(0), EnvExpander);
        let err = engine
            .preview(&ExecutionRequest::new("x"), &BuildContext::new("/ws"))
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Launch { .. }));
    }

    #[test]
    fn test_cleanup_policy_parse() {
        assert_eq!(CleanupPolicy::parse("warn"), Some(CleanupPolicy::Warn));
        assert_eq!(CleanupPolicy::parse("fail"), Some(CleanupPolicy::FailStep));
        assert_eq!(CleanupPolicy::parse("nope"), None);
    }
}
