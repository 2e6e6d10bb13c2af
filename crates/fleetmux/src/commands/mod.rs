//! Command implementations behind the CLI surface.

use anyhow::Result;
use clap::ArgMatches;
use fleetmux_core::{
    config::{default_config_path, OrchestratorConfig},
    Orchestrator,
};

mod approvals;
mod assign;
mod history;
mod maintenance;
mod reservations;
mod robot;
mod session;

/// Build the orchestrator from the operator's config file (or defaults).
pub async fn setup() -> Result<Orchestrator> {
    let config = OrchestratorConfig::load(&default_config_path()?).await?;
    Ok(Orchestrator::default_setup(config).await?)
}

/// Route parsed arguments to the right command.
pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    // Robot-mode flags first: stable JSON contracts for automated drivers.
    if robot::try_dispatch(matches).await? {
        return Ok(());
    }

    match matches.subcommand() {
        Some(("init", sub)) => session::init(sub).await,
        Some(("spawn", sub)) => session::spawn(sub).await,
        Some(("terminate", sub)) => session::terminate(sub).await,
        Some(("sessions", sub)) => session::list(sub).await,
        Some(("agents", sub)) => session::agents(sub).await,
        Some(("recover", sub)) => session::recover(sub).await,
        Some(("assign", sub)) => assign::run(sub).await,
        Some(("status", sub)) => assign::status(sub).await,
        Some(("watch", sub)) => assign::watch(sub).await,
        Some(("approvals", sub)) => approvals::dispatch(sub).await,
        Some(("reserve", sub)) => reservations::reserve(sub).await,
        Some(("release", sub)) => reservations::release(sub).await,
        Some(("conflicts", sub)) => reservations::conflicts(sub).await,
        Some(("history", sub)) => history::bead(sub).await,
        Some(("stats", sub)) => history::stats(sub).await,
        Some(("events", sub)) => history::events(sub).await,
        Some(("backup", sub)) => maintenance::backup(sub).await,
        Some(("restore", sub)) => maintenance::restore(sub).await,
        Some(("completions", sub)) => maintenance::completions(sub),
        _ => {
            // arg_required_else_help already covers the bare invocation.
            anyhow::bail!("no command given; see fmx --help")
        }
    }
}

/// Fetch a required string argument. The CLI marks these required, so a
/// miss is a programming error reported as such.
pub(crate) fn required<'a>(matches: &'a ArgMatches, name: &str) -> Result<&'a str> {
    matches
        .get_one::<String>(name)
        .map(String::as_str)
        .ok_or_else(|| anyhow::anyhow!("missing required argument '{name}'"))
}
