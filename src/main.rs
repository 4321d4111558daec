//! template-aggregator binary: loads `.env`, installs tracing and hands off to the CLI.

use std::process::ExitCode;

use clap::Parser;
use template_aggregator::cli::{run, Cli};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact logs on stderr by default; AGGREGATOR_LOG_FORMAT=json switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("template_aggregator=info,warn"));

    let json = std::env::var("AGGREGATOR_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present; AGGREGATOR_* overrides and RUST_LOG may live there.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "run failed");
            eprintln!("[ERROR] {e:#}");
            ExitCode::FAILURE
        }
    }
}
