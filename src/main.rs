mod calc;
mod config;
mod db;
mod engine;
mod error;
mod ipc;
mod store;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use serde_json::json;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[derive(Parser, Debug)]
#[command(name = "coursed")]
#[command(about = "Course progress and certification sidecar (JSON lines over stdio)")]
struct Args {
    /// Path to a TOML config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace directory to open at start-up
    #[arg(long, env = "COURSED_WORKSPACE")]
    workspace: Option<PathBuf>,

    /// Log filter directives, e.g. `coursed=debug`
    #[arg(long, env = "COURSED_LOG")]
    log_filter: Option<String>,
}

fn init_tracing(explicit: bool, directives: &str) {
    // stdout carries the protocol, so logs go to stderr.
    let filter = if explicit {
        EnvFilter::new(directives)
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let explicit_filter = args.log_filter.is_some();
    let config = config.with_overrides(args.workspace, args.log_filter);
    init_tracing(explicit_filter, &config.log_filter);

    let mut state = ipc::AppState::new(config.db_file_name.clone());
    if let Some(path) = &config.workspace {
        // A bad start-up workspace is not fatal; the client can still select one.
        if let Err(e) = ipc::select_workspace(&mut state, path) {
            tracing::error!(workspace = %path.display(), error = %format!("{e:#}"), "failed to open start-up workspace");
        }
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "coursed ready");

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "stdin closed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = match serde_json::from_str::<ipc::Request>(&line) {
            Ok(req) => ipc::handle_request(&mut state, req),
            Err(e) => {
                // No id to reply to.
                tracing::warn!(error = %e, "unparseable request line");
                json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() }
                })
            }
        };

        if writeln!(stdout, "{}", resp).and_then(|_| stdout.flush()).is_err() {
            break;
        }
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}
