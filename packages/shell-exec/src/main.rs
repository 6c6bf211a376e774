use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use relay_shell::parser::classify;
use relay_shell_exec::builtins::Builtins;
use relay_shell_exec::config::ExecConfig;
use relay_shell_exec::executor::{pipeline, run_pipeline};
use relay_shell_exec::host::{CommandDispatcher, Session};
use relay_shell_exec::state::ShellState;
use tracing_subscriber::EnvFilter;

/// Run a single pipeline stage against this process's stdin, stdout and stderr
#[derive(Parser, Debug)]
#[command(name = "relay-shell-exec")]
#[command(about = "Run one shell statement with redirections and multios")]
struct Args {
    /// Print the stage report as JSON on stderr
    #[arg(long)]
    json: bool,

    /// JSON executor configuration
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Replace instead of fanning out when a descriptor is redirected twice
    #[arg(long)]
    no_multios: bool,

    /// Prefix of diagnostic lines
    #[arg(long)]
    shell_name: Option<String>,

    /// Directory redirection targets are resolved against
    #[arg(long)]
    cwd: Option<PathBuf>,

    /// Command words and redirections, e.g. `echo hi '>' out.txt`; a `|` word
    /// starts the next stage
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    words: Vec<String>,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match run(Args::parse()) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            eprintln!("relay-shell-exec: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<u8> {
    let mut config = match &args.config {
        Some(path) => ExecConfig::load(path)?,
        None => ExecConfig::default(),
    };
    if args.no_multios {
        config.multios = false;
    }
    if let Some(name) = args.shell_name {
        config.shell_name = name;
    }

    let cwd = match args.cwd {
        Some(cwd) => cwd,
        None => std::env::current_dir().context("cannot determine the current directory")?,
    };
    let state = Arc::new(ShellState::with_std_terminals(cwd));
    let statements: Vec<_> = args
        .words
        .split(|word| word == "|")
        .map(|words| classify(words.to_vec()))
        .collect();
    tracing::debug!(stages = statements.len(), "running");

    let session: Arc<dyn Session> = state.clone();
    let dispatcher: Arc<dyn CommandDispatcher> = Arc::new(Builtins);
    let base = state.terminal_table_with(config.descriptors);
    let stages = pipeline(&session, &dispatcher, statements, &base, &config)?;
    let results = run_pipeline(stages).context("cannot run pipeline")?;
    let Some(result) = results.last() else {
        return Ok(0);
    };

    if args.json {
        let report = serde_json::to_string(&result.report()).context("cannot encode report")?;
        eprintln!("{report}");
    }
    Ok(result.exit_code().rem_euclid(256) as u8)
}
