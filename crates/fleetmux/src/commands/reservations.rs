//! Advisory reservation commands.

use anyhow::Result;
use clap::ArgMatches;
use fleetmux_core::store::NewReservation;

use super::{required, setup};
use crate::output::print_json;

/// `fmx reserve <session> --agent A --pattern G [--exclusive] [--ttl N]`.
pub async fn reserve(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let agent = required(matches, "agent")?;
    let pattern = required(matches, "pattern")?;
    let ttl_secs: i64 = matches
        .get_one::<String>("ttl")
        .map_or(Ok(1800), |raw| {
            raw.parse()
                .map_err(|_| anyhow::anyhow!("invalid ttl '{raw}'"))
        })?;

    let orch = setup().await?;
    let reservation = orch
        .db()
        .create_reservation(NewReservation {
            session_id: session.to_string(),
            agent_id: agent.to_string(),
            path_pattern: pattern.to_string(),
            exclusive: matches.get_flag("exclusive"),
            correlation_id: None,
            reason: None,
            ttl: chrono::Duration::seconds(ttl_secs),
        })
        .await?;
    print_json(&reservation)
}

/// `fmx release <id> [--force-by NAME]`.
pub async fn release(matches: &ArgMatches) -> Result<()> {
    let id: i64 = required(matches, "id")?
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid reservation id"))?;
    let forced_by = matches.get_one::<String>("force-by").map(String::as_str);

    let orch = setup().await?;
    orch.db().release_reservation(id, forced_by).await?;
    println!("released reservation {id}");
    Ok(())
}

/// `fmx conflicts <session> <path>`.
pub async fn conflicts(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let path = required(matches, "path")?;

    let orch = setup().await?;
    let conflicts = orch.db().find_reservation_conflicts(session, path).await?;
    print_json(&conflicts)
}
