// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `drover` - batch orchestrator CLI
//!
//! `serve` runs the front-facing HTTP API (reads plus operator commands),
//! `dashboard` runs the read-only variant, `reset` wipes a development
//! store. Exit codes: 0 clean, 1 fatal configuration error, 2
//! irrecoverable store corruption.

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use drover_engine::{shared_store, EngineEnv, Orchestrator, TemplateSynthesizer};
use drover_runner::ClaudeRunner;
use drover_server::{api_router, dashboard_router, serve, AppState};
use drover_store::Store;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "drover", version, about = "Batch orchestrator for agentic LLM tasks")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the front-facing API (reads + operator commands)
    Serve {
        /// Port to listen on (default: DASHBOARD_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Store directory (default: STORAGE_PATH)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Run the read-only observation API
    Dashboard {
        /// Port to listen on (default: DASHBOARD_PORT)
        #[arg(long)]
        port: Option<u16>,
        /// Store directory (default: STORAGE_PATH)
        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Wipe the store (development only)
    Reset {
        /// Store directory (default: STORAGE_PATH)
        #[arg(long)]
        db: Option<PathBuf>,
        /// Actually delete; without this flag nothing happens
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    setup_logging();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Serve { port, db } => {
            let env = load_env(db)?;
            let store = match Store::open(&env.storage_path) {
                Ok(store) => shared_store(store),
                Err(e) if e.is_corruption() => return corrupt(e),
                Err(e) => return Err(e).context("failed to open store"),
            };
            let runner = Arc::new(ClaudeRunner::new(&env.agent_binary));
            let port = port.unwrap_or(env.dashboard_port);
            let orchestrator =
                Arc::new(Orchestrator::new(Arc::clone(&store), runner, Arc::new(TemplateSynthesizer), env));
            let router = api_router(AppState::with_control(store, orchestrator));
            serve(router, port).await.context("http server failed")?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Dashboard { port, db } => {
            let env = load_env(db)?;
            let store = match Store::open(&env.storage_path) {
                Ok(store) => shared_store(store),
                Err(e) if e.is_corruption() => return corrupt(e),
                Err(e) => return Err(e).context("failed to open store"),
            };
            let port = port.unwrap_or(env.dashboard_port);
            serve(dashboard_router(store), port)
                .await
                .context("http server failed")?;
            Ok(ExitCode::SUCCESS)
        }

        Command::Reset { db, force } => {
            let env = load_env(db)?;
            if !force {
                eprintln!(
                    "refusing to wipe {} without --force",
                    env.storage_path.display()
                );
                return Ok(ExitCode::from(1));
            }
            if env.storage_path.exists() {
                std::fs::remove_dir_all(&env.storage_path)
                    .with_context(|| format!("failed to remove {}", env.storage_path.display()))?;
            }
            std::fs::create_dir_all(&env.storage_path)
                .with_context(|| format!("failed to recreate {}", env.storage_path.display()))?;
            println!("store wiped: {}", env.storage_path.display());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn load_env(db: Option<PathBuf>) -> Result<EngineEnv> {
    let env = EngineEnv::load().context("invalid configuration")?;
    Ok(match db {
        Some(db) => env.with_storage_path(db),
        None => env,
    })
}

fn corrupt(e: drover_store::StoreError) -> Result<ExitCode> {
    eprintln!("error: store corrupt: {}", e);
    eprintln!("recover from a snapshot backup or wipe with `drover reset --force`");
    Ok(ExitCode::from(2))
}

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
