//! CLI entry point: boots configuration and logging, runs one scan against
//! the given target, and maps the outcome onto the exit-status contract
//! (0 clean, 2 verified findings exist, non-zero fatal error).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use scanforge_core::config::{AppConfig, load_config, load_default_config};
use scanforge_core::scan::{ScanOutcome, ScanPrompts, run_scan};

#[derive(Parser, Debug)]
#[command(name = "scanforge", about = "Autonomous multi-agent security assessment runner")]
struct Cli {
    /// Target to assess (a URL, hostname, or repository path).
    target: String,

    /// Override the configured LLM model selector.
    #[arg(long)]
    model: Option<String>,

    /// Path to a config.toml; defaults to ~/.scanforge/config.toml.
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Directory the tracer writes run artifacts into (report, verified
    /// finding files, queue dumps). Overrides the configured path.
    #[arg(long, value_name = "DIR")]
    run_dir: Option<PathBuf>,

    /// Run without attaching an interactive console (the only mode this
    /// binary currently implements; the flag is accepted for forward
    /// compatibility with an eventual interactive front-end).
    #[arg(long, default_value_t = true)]
    non_interactive: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let mut config: AppConfig = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(err) => {
                eprintln!("failed to load config from {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => load_default_config(),
    };

    if let Some(model) = cli.model {
        config.llm.model = model;
    }
    if let Some(run_dir) = cli.run_dir {
        config.tracer.run_dir = Some(run_dir);
    }

    scanforge_core::logging::init(scanforge_core::logging::default_log_dir());

    if !cli.non_interactive {
        tracing::warn!("interactive mode is not implemented; running non-interactively");
    }

    match run_scan(&config, &cli.target, ScanPrompts::default()).await {
        Ok(ScanOutcome::Clean) => ExitCode::SUCCESS,
        Ok(ScanOutcome::FindingsVerified) => ExitCode::from(2),
        Err(err) => {
            tracing::error!(error = %err, "scan terminated with a fatal error");
            eprintln!("scan failed: {err}");
            ExitCode::FAILURE
        }
    }
}
