//! Robot-mode flag handling.
//!
//! Each flag prints one JSON envelope on stdout, success or failure, and
//! exits zero either way; automated drivers read `success` and
//! `error_code` from the payload instead of the exit code.

use std::str::FromStr;

use anyhow::Result;
use clap::ArgMatches;
use fleetmux_core::{
    robot::{
        RobotAgentHealth, RobotBulkAssign, RobotFormat, RobotIsWorking, RobotResponse,
        RobotSmartRestart, RobotStatus,
    },
    types::AgentKind,
    Error as CoreError,
};

use super::{assign::parse_beads_file, assign::parse_strategy, setup};
use crate::output::print_json;

/// Handle a robot flag if one was given. Returns `true` when handled.
pub async fn try_dispatch(matches: &ArgMatches) -> Result<bool> {
    if matches.get_flag("robot-format") {
        return print_json(&RobotResponse::ok(RobotFormat::default())).map(|()| true);
    }

    if let Some(session) = matches.get_one::<String>("robot-status") {
        let result = robot_status(session).await;
        return emit(result).map(|()| true);
    }

    if let Some(pane) = matches.get_one::<String>("robot-is-working") {
        let kind = matches
            .get_one::<String>("kind")
            .map_or(Ok(AgentKind::Claude), |raw| {
                AgentKind::from_str(raw)
                    .map_err(|_| CoreError::ValidationError(format!("unknown agent kind '{raw}'")))
            });
        let result = match kind {
            Ok(kind) => robot_is_working(pane, kind).await,
            Err(e) => Err(e),
        };
        return emit(result).map(|()| true);
    }

    if let Some(session) = matches.get_one::<String>("robot-agent-health") {
        let result = robot_agent_health(session).await;
        return emit(result).map(|()| true);
    }

    if let Some(agent) = matches.get_one::<String>("robot-smart-restart") {
        let result = robot_smart_restart(matches, agent).await;
        return emit(result).map(|()| true);
    }

    if let Some(session) = matches.get_one::<String>("robot-bulk-assign") {
        let result = robot_bulk_assign(matches, session).await;
        return emit(result).map(|()| true);
    }

    Ok(false)
}

/// Print a success or failure envelope for a payload type.
fn emit<T: serde::Serialize + Default>(result: fleetmux_core::Result<T>) -> Result<()> {
    match result {
        Ok(payload) => print_json(&RobotResponse::ok(payload)),
        Err(err) => print_json(&RobotResponse::<T>::from_error(&err)),
    }
}

async fn robot_status(session: &str) -> fleetmux_core::Result<RobotStatus> {
    let orch = setup().await.map_err(into_core)?;
    orch.session_status(session).await
}

async fn robot_is_working(pane: &str, kind: AgentKind) -> fleetmux_core::Result<RobotIsWorking> {
    let orch = setup().await.map_err(into_core)?;
    orch.is_working(pane, kind).await
}

async fn robot_agent_health(session: &str) -> fleetmux_core::Result<RobotAgentHealth> {
    let orch = setup().await.map_err(into_core)?;
    orch.agent_health(session).await
}

async fn robot_smart_restart(
    matches: &ArgMatches,
    agent: &str,
) -> fleetmux_core::Result<RobotSmartRestart> {
    let session = matches
        .get_one::<String>("session")
        .ok_or_else(|| CoreError::ValidationError("--session is required".to_string()))?;
    let requested_by = matches
        .get_one::<String>("requested-by")
        .ok_or_else(|| CoreError::ValidationError("--requested-by is required".to_string()))?;
    let approval = matches
        .get_one::<String>("approval")
        .map(|raw| {
            raw.parse::<i64>()
                .map_err(|_| CoreError::ValidationError(format!("invalid approval id '{raw}'")))
        })
        .transpose()?;

    let orch = setup().await.map_err(into_core)?;
    orch.smart_restart(session, agent, requested_by, approval)
        .await
}

async fn robot_bulk_assign(
    matches: &ArgMatches,
    session: &str,
) -> fleetmux_core::Result<RobotBulkAssign> {
    let beads_path = matches
        .get_one::<String>("beads-file")
        .ok_or_else(|| CoreError::ValidationError("--beads-file is required".to_string()))?;
    let strategy = parse_strategy(matches.get_one::<String>("strategy").map(String::as_str))
        .map_err(into_core)?;

    let content = tokio::fs::read_to_string(beads_path)
        .await
        .map_err(|e| CoreError::IoError(format!("failed to read {beads_path}: {e}")))?;
    let beads = parse_beads_file(&content).map_err(into_core)?;

    let orch = setup().await.map_err(into_core)?;
    orch.assign(session, &beads, strategy).await
}

/// Collapse CLI-level anyhow errors into the core taxonomy for envelopes.
fn into_core(err: anyhow::Error) -> CoreError {
    match err.downcast::<CoreError>() {
        Ok(core) => core,
        Err(other) => CoreError::ValidationError(other.to_string()),
    }
}
