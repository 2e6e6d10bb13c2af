//! Assignment, status and watch commands.

use std::str::FromStr;

use anyhow::{Context, Result};
use clap::ArgMatches;
use fleetmux_core::{
    beads::{infer_task_type, Bead},
    signal_channels,
    types::{Strategy, TaskType},
};
use serde::Deserialize;

use super::{required, setup};
use crate::output::print_json;

/// One bead as written in a `--beads-file` document. The task type is
/// inferred from title and labels when not given explicitly.
#[derive(Debug, Deserialize)]
struct BeadSpec {
    id: String,
    title: String,
    #[serde(default)]
    priority: i64,
    #[serde(default)]
    task_type: Option<TaskType>,
    #[serde(default)]
    unblocks: Vec<String>,
    #[serde(default)]
    labels: Vec<String>,
}

impl From<BeadSpec> for Bead {
    fn from(spec: BeadSpec) -> Self {
        let task_type = spec
            .task_type
            .unwrap_or_else(|| infer_task_type(&spec.title, &spec.labels));
        Self {
            id: spec.id,
            title: spec.title,
            priority: spec.priority,
            task_type,
            unblocks: spec.unblocks,
            labels: spec.labels,
        }
    }
}

/// Parse a beads file into domain beads.
pub(crate) fn parse_beads_file(content: &str) -> Result<Vec<Bead>> {
    let specs: Vec<BeadSpec> =
        serde_json::from_str(content).context("beads file must be a JSON array of beads")?;
    Ok(specs.into_iter().map(Bead::from).collect())
}

pub(crate) fn parse_strategy(value: Option<&str>) -> Result<Strategy> {
    match value {
        None => Ok(Strategy::Capability),
        Some(raw) => {
            Strategy::from_str(raw).map_err(|_| anyhow::anyhow!("unknown strategy '{raw}'"))
        }
    }
}

/// `fmx assign <session> --beads-file F [--strategy S]`.
pub async fn run(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let beads_path = required(matches, "beads-file")?;
    let strategy = parse_strategy(matches.get_one::<String>("strategy").map(String::as_str))?;

    let content = tokio::fs::read_to_string(beads_path)
        .await
        .with_context(|| format!("failed to read {beads_path}"))?;
    let beads = parse_beads_file(&content)?;

    let orch = setup().await?;
    let response = orch.assign(session, &beads, strategy).await?;
    print_json(&response)
}

/// `fmx status <session>`.
pub async fn status(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let orch = setup().await?;
    let status = orch.session_status(session).await?;
    print_json(&status)
}

/// `fmx watch <session>`: run the detector, print events until interrupted.
pub async fn watch(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let orch = setup().await?;

    let mut handle = orch.watch(session);
    let canceller = handle.canceller();
    let (mut sigint, mut sigterm) = signal_channels().await?;
    tokio::spawn(async move {
        tokio::select! {
            _ = sigint.recv() => {}
            _ = sigterm.recv() => {}
        }
        canceller.cancel();
    });

    tracing::info!("watching session '{session}'; ctrl-c to stop");
    while let Some(event) = handle.events.recv().await {
        print_json(&event)?;
    }
    handle.join().await;
    Ok(())
}
