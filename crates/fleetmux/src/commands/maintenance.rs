//! Backup, restore and shell completions.

use std::path::Path;

use anyhow::Result;
use clap::ArgMatches;
use clap_complete::{generate, Shell};

use super::{required, setup};
use crate::cli::build_cli;

/// `fmx backup <path>`.
pub async fn backup(matches: &ArgMatches) -> Result<()> {
    let path = required(matches, "path")?;
    let orch = setup().await?;
    orch.db().backup(Path::new(path)).await?;
    println!("backup written to {path}");
    Ok(())
}

/// `fmx restore <path>`.
pub async fn restore(matches: &ArgMatches) -> Result<()> {
    let path = required(matches, "path")?;
    let sessions = fleetmux_core::store::verify_backup(Path::new(path))?;

    let orch = setup().await?;
    orch.db().restore(Path::new(path)).await?;
    println!("restored {sessions} sessions from {path}");
    Ok(())
}

/// `fmx completions <shell>`.
pub fn completions(matches: &ArgMatches) -> Result<()> {
    let shell = match required(matches, "shell")? {
        "bash" => Shell::Bash,
        "zsh" => Shell::Zsh,
        "fish" => Shell::Fish,
        other => anyhow::bail!("unsupported shell '{other}'"),
    };

    let mut cli = build_cli();
    generate(shell, &mut cli, "fmx", &mut std::io::stdout());
    Ok(())
}
