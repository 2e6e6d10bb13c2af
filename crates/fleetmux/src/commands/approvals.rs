//! Approval gate commands.

use anyhow::Result;
use clap::ArgMatches;

use super::{required, setup};
use crate::output::print_json;

pub async fn dispatch(matches: &ArgMatches) -> Result<()> {
    match matches.subcommand() {
        Some(("list", _)) => list().await,
        Some(("approve", sub)) => approve(sub).await,
        Some(("deny", sub)) => deny(sub).await,
        _ => anyhow::bail!("unknown approvals subcommand"),
    }
}

async fn list() -> Result<()> {
    let orch = setup().await?;
    let pending = orch.db().list_pending_approvals().await?;
    print_json(&pending)
}

fn parse_id(raw: &str) -> Result<i64> {
    raw.parse()
        .map_err(|_| anyhow::anyhow!("invalid approval id '{raw}'"))
}

async fn approve(matches: &ArgMatches) -> Result<()> {
    let id = parse_id(required(matches, "id")?)?;
    let by = required(matches, "by")?;

    let orch = setup().await?;
    let approval = orch.db().approve(id, by).await?;
    print_json(&approval)
}

async fn deny(matches: &ArgMatches) -> Result<()> {
    let id = parse_id(required(matches, "id")?)?;
    let by = required(matches, "by")?;
    let reason = required(matches, "reason")?;

    let orch = setup().await?;
    let approval = orch.db().deny(id, by, reason).await?;
    print_json(&approval)
}
