//! History, stats and event-log commands.

use anyhow::Result;
use clap::ArgMatches;

use super::{required, setup};
use crate::output::print_json;

/// `fmx history <bead>`.
pub async fn bead(matches: &ArgMatches) -> Result<()> {
    let bead = required(matches, "bead")?;
    let orch = setup().await?;
    let history = orch.db().history_by_bead(bead).await?;
    print_json(&history)
}

/// `fmx stats <session>`.
pub async fn stats(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let orch = setup().await?;
    let stats = orch.db().history_stats(session).await?;
    print_json(&stats)
}

/// `fmx events <session> [--limit N]`.
pub async fn events(matches: &ArgMatches) -> Result<()> {
    let session = required(matches, "session")?;
    let limit: i64 = matches
        .get_one::<String>("limit")
        .map_or(Ok(20), |raw| {
            raw.parse()
                .map_err(|_| anyhow::anyhow!("invalid limit '{raw}'"))
        })?;

    let orch = setup().await?;
    let events = orch.db().list_events(session, limit).await?;
    print_json(&events)
}
