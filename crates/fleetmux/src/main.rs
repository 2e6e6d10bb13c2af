//! Fleetmux CLI - agent fleet orchestration over tmux
//!
//! Binary name: `fmx`

use fleetmux::{cli::build_cli, commands, output};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let matches = build_cli().get_matches();
    if let Err(err) = commands::dispatch(&matches).await {
        output::print_error(&err);
        std::process::exit(1);
    }
}
