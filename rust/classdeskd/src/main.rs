mod calc;
mod config;
mod db;
mod error;
mod ipc;
mod model;
mod publish;
mod reports;
mod store;
mod telemetry;

use anyhow::Context;
use clap::Parser;
use std::io::{self, BufRead, Write};
use tracing::{error, info};

use config::{AppConfig, Cli};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(&cli)?;
    telemetry::init(&config.log_level)?;

    let mut state = ipc::AppState::new(config.teacher_name.clone());
    if let Some(path) = &config.workspace {
        let conn = db::open_db(path)
            .with_context(|| format!("failed to open workspace {}", path.display()))?;
        state.open_workspace(path.clone(), conn);
    }
    info!(
        version = env!("CARGO_PKG_VERSION"),
        workspace = ?config.workspace,
        "classdeskd ready"
    );

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        let resp = ipc::handle_line(&mut state, &line);
        writeln!(stdout, "{}", resp).context("failed to write response")?;
        stdout.flush().context("failed to flush stdout")?;
    }

    info!("stdin closed, shutting down");
    Ok(())
}
