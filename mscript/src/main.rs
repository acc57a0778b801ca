use anyhow::{anyhow, Result};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use mscript_lib::engine::context::parse_env_pair;
use mscript_lib::{
    BuildContext, Context, DeclaredArg, ExecutionRequest, ExitCode, ScriptDocument, ScriptKind,
    TemplateStore,
};
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "mscript")]
#[command(about = "Run named, centrally stored script templates as build steps")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Override config file path
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override script store path
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Quiet output
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// List stored scripts (default command)
    #[command(alias = "ls")]
    List {
        /// Only scripts of this kind
        #[arg(long, value_enum)]
        kind: Option<ScriptKind>,

        /// Glob pattern matched against script names
        #[arg(long)]
        filter: Option<String>,

        /// Output format
        #[arg(long, default_value = "human")]
        format: ListFormat,
    },

    /// Show a stored script and its declared arguments
    Show {
        /// Script id
        id: String,
    },

    /// Execute a stored script as a build step
    Run {
        /// Script id
        id: String,

        /// Run as this kind instead of the stored one
        #[arg(long, value_enum)]
        kind: Option<ScriptKind>,

        /// Split each argument shell-style after expansion
        #[arg(long, overrides_with = "no_tokenize")]
        tokenize: bool,

        /// Pass each argument as one word, even when config enables tokenizing
        #[arg(long, overrides_with = "tokenize")]
        no_tokenize: bool,

        /// Working directory of the step
        #[arg(long)]
        workspace: Option<PathBuf>,

        /// Extra environment for the script, KEY=VALUE
        #[arg(long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Show what would be executed without running
        #[arg(long)]
        dry_run: bool,

        /// Arguments to pass to the script
        #[arg(last = true)]
        args: Vec<String>,
    },

    /// Add a script to the store
    Add {
        /// Display name
        #[arg(long)]
        name: String,

        #[arg(long, value_enum, default_value = "shell")]
        kind: ScriptKind,

        /// Read the script body from this file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Use this id instead of a generated one
        #[arg(long)]
        id: Option<String>,

        /// Declared argument name, repeatable
        #[arg(long = "arg", value_name = "NAME")]
        args: Vec<String>,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Change a stored script
    Edit {
        /// Script id
        id: String,

        #[arg(long)]
        name: Option<String>,

        /// Replace the script body with this file
        #[arg(long)]
        file: Option<PathBuf>,

        /// Replace declared arguments, repeatable
        #[arg(long = "arg", value_name = "NAME")]
        args: Vec<String>,

        /// Remove all declared arguments
        #[arg(long, conflicts_with = "args")]
        clear_args: bool,

        #[arg(long)]
        comment: Option<String>,
    },

    /// Remove a script from the store
    #[command(alias = "rm")]
    Remove {
        /// Script id
        id: String,
    },

    /// Import .sh, .ps1 and .bat files from a directory
    Import {
        dir: PathBuf,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        shell: Shell,
    },
}

#[derive(clap::ValueEnum, Clone)]
enum ListFormat {
    Human,
    Json,
}

#[tokio::main]
async fn main() {
    let result = run().await;

    match result {
        Ok(exit_code) => process::exit(exit_code.into()),
        Err(err) => {
            eprintln!("Error: {err}");
            process::exit(ExitCode::StepFailed.into());
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    };

    let filter = EnvFilter::try_from_env("MSCRIPT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("mscript={0},mscript_lib={0}", default_level)));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false),
        )
        .init();
}

async fn run() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    let mut context = Context::new(cli.config)?;
    if let Some(store) = cli.store {
        context.store_path = store;
    }

    // If no subcommand is provided, default to list
    let command = cli.command.unwrap_or(Commands::List {
        kind: None,
        filter: None,
        format: ListFormat::Human,
    });

    match command {
        Commands::List {
            kind,
            filter,
            format,
        } => handle_list(&context, kind, filter.as_deref(), format).await,
        Commands::Show { id } => handle_show(&context, &id).await,
        Commands::Run {
            id,
            kind,
            tokenize,
            no_tokenize,
            workspace,
            env,
            dry_run,
            args,
        } => {
            let tokenize = match (tokenize, no_tokenize) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            handle_run(&context, id, kind, tokenize, workspace, env, dry_run, args).await
        }
        Commands::Add {
            name,
            kind,
            file,
            id,
            args,
            comment,
        } => handle_add(&context, name, kind, file, id, args, comment).await,
        Commands::Edit {
            id,
            name,
            file,
            args,
            clear_args,
            comment,
        } => handle_edit(&context, &id, name, file, args, clear_args, comment).await,
        Commands::Remove { id } => handle_remove(&context, &id).await,
        Commands::Import { dir } => handle_import(&context, &dir).await,
        Commands::Completions { shell } => handle_completions(shell).await,
    }
}

async fn handle_list(
    context: &Context,
    kind: Option<ScriptKind>,
    filter: Option<&str>,
    format: ListFormat,
) -> Result<ExitCode> {
    let store = context.open_store()?;
    let scripts = store.list_matching(kind, filter)?;

    match format {
        ListFormat::Human => {
            if scripts.is_empty() {
                println!("No scripts found");
            } else {
                for script in &scripts {
                    println!("{} [{}] ({})", script.name, script.kind, script.id);
                }
            }
        }
        ListFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&scripts)?);
        }
    }

    Ok(ExitCode::Success)
}

async fn handle_show(context: &Context, id: &str) -> Result<ExitCode> {
    let store = context.open_store()?;
    let Some(doc) = store.lookup(id)? else {
        eprintln!("Script not found: {}", id);
        return Ok(ExitCode::ScriptNotFound);
    };

    println!("Name: {}", doc.name);
    println!("Id: {}", doc.id);
    println!("Kind: {}", doc.kind);
    if !doc.comment.is_empty() {
        println!("Comment: {}", doc.comment);
    }
    println!("Updated: {}", doc.updated_at.to_rfc3339());
    println!("Content hash: {}", doc.content_hash);
    println!("{}", doc.args_description());
    println!("---");
    println!("{}", doc.content);

    Ok(ExitCode::Success)
}

/// An explicit workspace must exist; otherwise fall back to the current directory.
fn resolve_workspace(workspace: Option<PathBuf>) -> Option<PathBuf> {
    match workspace {
        Some(dir) if dir.is_dir() => Some(dir),
        Some(dir) => {
            tracing::warn!(workspace = %dir.display(), "workspace does not exist");
            None
        }
        None => std::env::current_dir().ok(),
    }
}

#[allow(clippy::too_many_arguments)]
async fn handle_run(
    context: &Context,
    id: String,
    kind: Option<ScriptKind>,
    tokenize: Option<bool>,
    workspace: Option<PathBuf>,
    env: Vec<String>,
    dry_run: bool,
    args: Vec<String>,
) -> Result<ExitCode> {
    let mut build = BuildContext {
        workspace: resolve_workspace(workspace),
        ..BuildContext::default()
    };
    for pair in &env {
        match parse_env_pair(pair) {
            Some((key, value)) => {
                build.env.insert(key, value);
            }
            None => {
                eprintln!("Invalid --env value '{}', expected KEY=VALUE", pair);
                return Ok(ExitCode::CliUsageError);
            }
        }
    }

    let mut request = ExecutionRequest::new(id)
        .with_args(args)
        .tokenized(tokenize.unwrap_or(context.config.core.tokenize));
    if let Some(kind) = kind {
        request = request.with_kind(kind);
    }

    let coordinator = context.local_coordinator()?;

    if dry_run {
        return match coordinator.preview(&request, &build) {
            Ok(preview) => {
                let cwd_info = preview
                    .cwd
                    .as_ref()
                    .map(|cwd| format!(" (cwd: {})", cwd.display()))
                    .unwrap_or_default();
                println!("Would execute: {}{}", preview.argv.join(" "), cwd_info);
                Ok(ExitCode::Success)
            }
            Err(err) => {
                eprintln!("Error: {err}");
                Ok(ExitCode::from(&err))
            }
        };
    }

    // The coordinator blocks until the script exits.
    let outcome =
        tokio::task::spawn_blocking(move || coordinator.execute(&request, &build)).await?;

    match outcome {
        Ok(result) => {
            if !result.succeeded {
                eprintln!("Build step failed (exit code {})", result.exit_code);
            }
            Ok(ExitCode::from(&result))
        }
        Err(err) => {
            eprintln!("Error: {err}");
            Ok(ExitCode::from(&err))
        }
    }
}

fn read_script_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| anyhow!("Cannot read script file {}: {}", path.display(), e))
}

async fn handle_add(
    context: &Context,
    name: String,
    kind: ScriptKind,
    file: Option<PathBuf>,
    id: Option<String>,
    args: Vec<String>,
    comment: Option<String>,
) -> Result<ExitCode> {
    let mut store = context.open_store()?;

    let mut doc = ScriptDocument::with_defaults(kind);
    if let Some(id) = id {
        doc.id = id;
    }
    doc.name = name;
    if let Some(file) = file {
        doc.set_content(read_script_file(&file)?);
    }
    doc.set_declared_args(args.into_iter().map(DeclaredArg::new).collect());
    if let Some(comment) = comment {
        doc.comment = comment;
    }

    let (id, name) = (doc.id.clone(), doc.name.clone());
    store.create(doc)?;
    store.save()?;

    println!("Added script '{}' ({})", name, id);
    Ok(ExitCode::Success)
}

async fn handle_edit(
    context: &Context,
    id: &str,
    name: Option<String>,
    file: Option<PathBuf>,
    args: Vec<String>,
    clear_args: bool,
    comment: Option<String>,
) -> Result<ExitCode> {
    let mut store = context.open_store()?;
    let Some(mut doc) = store.get(id).cloned() else {
        eprintln!("Script not found: {}", id);
        return Ok(ExitCode::ScriptNotFound);
    };

    if let Some(name) = name {
        doc.name = name;
    }
    if let Some(file) = file {
        doc.set_content(read_script_file(&file)?);
    }
    if clear_args {
        doc.set_declared_args(Vec::new());
    } else if !args.is_empty() {
        doc.set_declared_args(args.into_iter().map(DeclaredArg::new).collect());
    }
    if let Some(comment) = comment {
        doc.comment = comment;
    }

    store.put(doc);
    store.save()?;

    println!("Updated script {}", id);
    Ok(ExitCode::Success)
}

async fn handle_remove(context: &Context, id: &str) -> Result<ExitCode> {
    let mut store = context.open_store()?;
    match store.remove(id) {
        Some(doc) => {
            store.save()?;
            println!("Removed script '{}' ({})", doc.name, id);
            Ok(ExitCode::Success)
        }
        None => {
            eprintln!("Script not found: {}", id);
            Ok(ExitCode::ScriptNotFound)
        }
    }
}

async fn handle_import(context: &Context, dir: &Path) -> Result<ExitCode> {
    if !dir.is_dir() {
        eprintln!("Not a directory: {}", dir.display());
        return Ok(ExitCode::CliUsageError);
    }

    let mut store = context.open_store()?;
    let imported = store.import_dir(dir)?;
    store.save()?;

    if imported.is_empty() {
        println!("No new scripts found in {}", dir.display());
    } else {
        println!("Imported {} script(s):", imported.len());
        for id in &imported {
            println!("  - {}", id);
        }
    }
    Ok(ExitCode::Success)
}

async fn handle_completions(shell: Shell) -> Result<ExitCode> {
    let mut command = Cli::command();
    clap_complete::generate(shell, &mut command, "mscript", &mut std::io::stdout());
    Ok(ExitCode::Success)
}
