//! CLI definition for `fmx`.
//!
//! Robot-mode operations are top-level flags with stable JSON contracts;
//! everything else is a subcommand.

use clap::{Arg, ArgAction, Command as ClapCommand};

/// Build the `fmx` command tree.
#[must_use]
pub fn build_cli() -> ClapCommand {
    ClapCommand::new("fmx")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Fleetmux Contributors")
        .about("Fleetmux - orchestrate fleets of AI coding agents across tmux panes")
        .arg_required_else_help(true)
        .arg(
            Arg::new("robot-format")
                .long("robot-format")
                .action(ArgAction::SetTrue)
                .help("Print the robot-mode contract description as JSON")
                .exclusive(true),
        )
        .arg(
            Arg::new("robot-status")
                .long("robot-status")
                .value_name("SESSION")
                .help("Print every pane's inferred work status as JSON"),
        )
        .arg(
            Arg::new("robot-is-working")
                .long("robot-is-working")
                .value_name("PANE")
                .help("Print whether one pane's agent is working as JSON"),
        )
        .arg(
            Arg::new("robot-agent-health")
                .long("robot-agent-health")
                .value_name("SESSION")
                .help("Print the stored agent health rows as JSON"),
        )
        .arg(
            Arg::new("robot-smart-restart")
                .long("robot-smart-restart")
                .value_name("AGENT")
                .help("Restart an agent pane if safe, printing the outcome as JSON"),
        )
        .arg(
            Arg::new("robot-bulk-assign")
                .long("robot-bulk-assign")
                .value_name("SESSION")
                .help("Assign beads from --beads-file, printing the outcome as JSON"),
        )
        .arg(
            Arg::new("session")
                .long("session")
                .value_name("SESSION")
                .help("Session id for robot operations that need one"),
        )
        .arg(
            Arg::new("kind")
                .long("kind")
                .value_name("KIND")
                .help("Agent kind for --robot-is-working (claude, codex, gemini)"),
        )
        .arg(
            Arg::new("beads-file")
                .long("beads-file")
                .value_name("FILE")
                .help("JSON file with an array of beads for assignment"),
        )
        .arg(
            Arg::new("strategy")
                .long("strategy")
                .value_name("STRATEGY")
                .help("Assignment strategy (capability, balanced, speed, quality, dependency, round_robin)"),
        )
        .arg(
            Arg::new("requested-by")
                .long("requested-by")
                .value_name("NAME")
                .help("Requester name for approval-gated robot operations"),
        )
        .arg(
            Arg::new("approval")
                .long("approval")
                .value_name("ID")
                .help("Approved approval id for --robot-smart-restart"),
        )
        .subcommand(
            ClapCommand::new("init")
                .about("Register a multiplexer session and bind its agent panes")
                .arg(Arg::new("session").required(true).help("Session id"))
                .arg(
                    Arg::new("name")
                        .long("name")
                        .value_name("NAME")
                        .help("Display name (defaults to the session id)"),
                )
                .arg(
                    Arg::new("project")
                        .long("project")
                        .value_name("PATH")
                        .help("Project path (defaults to the working directory)"),
                ),
        )
        .subcommand(
            ClapCommand::new("spawn")
                .about("Create a detached multiplexer session with N shell panes")
                .arg(Arg::new("session").required(true).help("Session id"))
                .arg(
                    Arg::new("panes")
                        .long("panes")
                        .value_name("N")
                        .help("Number of panes (default 2)"),
                )
                .arg(
                    Arg::new("width")
                        .long("width")
                        .value_name("COLS")
                        .help("Session width in cells (default 220)"),
                )
                .arg(
                    Arg::new("height")
                        .long("height")
                        .value_name("ROWS")
                        .help("Session height in cells (default 50)"),
                ),
        )
        .subcommand(
            ClapCommand::new("terminate")
                .about("Mark a session terminated (refused while reservations are active)")
                .arg(Arg::new("session").required(true).help("Session id"))
                .arg(
                    Arg::new("kill")
                        .long("kill")
                        .action(ArgAction::SetTrue)
                        .help("Also kill the multiplexer session and its panes"),
                ),
        )
        .subcommand(
            ClapCommand::new("sessions")
                .about("List registered sessions")
                .arg(
                    Arg::new("status")
                        .long("status")
                        .value_name("STATUS")
                        .help("Filter by status (active, paused, terminated)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            ClapCommand::new("assign")
                .about("Assign beads to a session's agents")
                .arg(Arg::new("session").required(true).help("Session id"))
                .arg(
                    Arg::new("beads-file")
                        .long("beads-file")
                        .required(true)
                        .value_name("FILE")
                        .help("JSON file with an array of beads"),
                )
                .arg(
                    Arg::new("strategy")
                        .short('s')
                        .long("strategy")
                        .value_name("STRATEGY")
                        .help("Assignment strategy (default: capability)"),
                ),
        )
        .subcommand(
            ClapCommand::new("status")
                .about("Show every pane's inferred work status")
                .arg(Arg::new("session").required(true).help("Session id")),
        )
        .subcommand(
            ClapCommand::new("watch")
                .about("Run the completion detector, printing events as they fire")
                .arg(Arg::new("session").required(true).help("Session id")),
        )
        .subcommand(
            ClapCommand::new("agents")
                .about("List a session's agents")
                .arg(Arg::new("session").required(true).help("Session id")),
        )
        .subcommand(
            ClapCommand::new("recover")
                .about("Fail assignments whose panes disappeared while detached")
                .arg(Arg::new("session").required(true).help("Session id")),
        )
        .subcommand(
            ClapCommand::new("approvals")
                .about("Manage approval gates")
                .subcommand_required(true)
                .subcommand(ClapCommand::new("list").about("List pending approvals"))
                .subcommand(
                    ClapCommand::new("approve")
                        .about("Approve a pending request")
                        .arg(Arg::new("id").required(true).help("Approval id"))
                        .arg(
                            Arg::new("by")
                                .long("by")
                                .required(true)
                                .value_name("NAME")
                                .help("Approver name"),
                        ),
                )
                .subcommand(
                    ClapCommand::new("deny")
                        .about("Deny a pending request")
                        .arg(Arg::new("id").required(true).help("Approval id"))
                        .arg(
                            Arg::new("by")
                                .long("by")
                                .required(true)
                                .value_name("NAME")
                                .help("Denier name"),
                        )
                        .arg(
                            Arg::new("reason")
                                .long("reason")
                                .required(true)
                                .value_name("TEXT")
                                .help("Why the request is denied"),
                        ),
                ),
        )
        .subcommand(
            ClapCommand::new("reserve")
                .about("Record an advisory file reservation")
                .arg(Arg::new("session").required(true).help("Session id"))
                .arg(
                    Arg::new("agent")
                        .long("agent")
                        .required(true)
                        .value_name("AGENT")
                        .help("Reserving agent id"),
                )
                .arg(
                    Arg::new("pattern")
                        .long("pattern")
                        .required(true)
                        .value_name("GLOB")
                        .help("Path pattern, e.g. 'src/*'"),
                )
                .arg(
                    Arg::new("exclusive")
                        .long("exclusive")
                        .action(ArgAction::SetTrue)
                        .help("Refuse overlapping reservations while held"),
                )
                .arg(
                    Arg::new("ttl")
                        .long("ttl")
                        .value_name("SECONDS")
                        .help("Reservation lifetime (default 1800)"),
                ),
        )
        .subcommand(
            ClapCommand::new("release")
                .about("Release a reservation")
                .arg(Arg::new("id").required(true).help("Reservation id"))
                .arg(
                    Arg::new("force-by")
                        .long("force-by")
                        .value_name("NAME")
                        .help("Record who force-released it"),
                ),
        )
        .subcommand(
            ClapCommand::new("conflicts")
                .about("List active exclusive reservations matching a path")
                .arg(Arg::new("session").required(true).help("Session id"))
                .arg(Arg::new("path").required(true).help("Candidate path")),
        )
        .subcommand(
            ClapCommand::new("history")
                .about("Show a bead's status history")
                .arg(Arg::new("bead").required(true).help("Bead id")),
        )
        .subcommand(
            ClapCommand::new("stats")
                .about("Aggregate a session's bead history")
                .arg(Arg::new("session").required(true).help("Session id")),
        )
        .subcommand(
            ClapCommand::new("events")
                .about("Show a session's recent events")
                .arg(Arg::new("session").required(true).help("Session id"))
                .arg(
                    Arg::new("limit")
                        .long("limit")
                        .value_name("N")
                        .help("Maximum entries (default 20)"),
                ),
        )
        .subcommand(
            ClapCommand::new("backup")
                .about("Write sessions, agents and tasks to a JSON file")
                .arg(Arg::new("path").required(true).help("Backup file path")),
        )
        .subcommand(
            ClapCommand::new("restore")
                .about("Replace sessions, agents and tasks from a backup file")
                .arg(Arg::new("path").required(true).help("Backup file path")),
        )
        .subcommand(
            ClapCommand::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true).help("bash, zsh, or fish")),
        )
}
