//! Session registration and inspection.

use anyhow::Result;
use clap::ArgMatches;
use fleetmux_core::types::SessionStatus;

use super::{required, setup};
use crate::output::print_json;

/// `fmx init <session>`: register the session and bind agent panes.
pub async fn init(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let name = matches
        .get_one::<String>("name")
        .map_or(session, String::as_str);
    let project = match matches.get_one::<String>("project") {
        Some(path) => path.clone(),
        None => std::env::current_dir()?.display().to_string(),
    };

    let orch = setup().await?;
    let bound = orch.bootstrap_session(session, name, &project).await?;
    println!("registered session '{session}' with {bound} agent panes");
    Ok(())
}

/// `fmx sessions`: list registered sessions.
pub async fn list(matches: &ArgMatches) -> Result<()> {
    let status = matches
        .get_one::<String>("status")
        .map(|s| s.parse::<SessionStatus>())
        .transpose()
        .map_err(|_| anyhow::anyhow!("invalid status filter"))?;

    let orch = setup().await?;
    let sessions = orch.db().list_sessions(status).await?;

    if matches.get_flag("json") {
        return print_json(&sessions);
    }
    if sessions.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}\t{}\t{}\t{}",
            session.id, session.status, session.name, session.project_path
        );
    }
    Ok(())
}

/// `fmx agents <session>`: list a session's agents.
pub async fn agents(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let orch = setup().await?;
    let health = orch.agent_health(session).await?;
    print_json(&health)
}

/// `fmx spawn <session> [--panes N] [--width C] [--height R]`.
pub async fn spawn(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let parse = |name: &str, default: u32| -> Result<u32> {
        matches.get_one::<String>(name).map_or(Ok(default), |raw| {
            raw.parse()
                .map_err(|_| anyhow::anyhow!("invalid {name} '{raw}'"))
        })
    };
    let panes = parse("panes", 2)?;
    let width = parse("width", 220)?;
    let height = parse("height", 50)?;

    let orch = setup().await?;
    orch.create_fleet(session, panes, width, height).await?;
    println!("spawned session '{session}' with {panes} panes");
    Ok(())
}

/// `fmx terminate <session> [--kill]`.
pub async fn terminate(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let kill = matches.get_flag("kill");

    let orch = setup().await?;
    orch.terminate_session(session, kill).await?;
    println!("terminated session '{session}'");
    Ok(())
}

/// `fmx recover <session>`: fail assignments whose panes are gone.
pub async fn recover(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let orch = setup().await?;
    let recovered = orch.recover_incomplete(session).await?;
    println!("recovered {recovered} orphaned assignments");
    Ok(())
}
