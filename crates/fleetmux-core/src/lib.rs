#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![forbid(unsafe_code)]

//! # Fleetmux Core
//!
//! Orchestration engine for fleets of AI coding agents hosted in terminal
//! multiplexer panes: decide which bead each pane works on, watch panes for
//! progress and failure, detect completions, and keep every decision in a
//! crash-recoverable SQLite state file.
//!
//! The closed loop spans four subsystems:
//!
//! - [`matcher`] + [`capability`]: map beads onto panes under a strategy.
//! - [`tmux`] + [`status`]: capture pane output and infer agent state.
//! - [`detector`]: watch active assignments and emit completion events.
//! - [`store`]: sessions, agents, tasks, reservations, approvals, history
//!   and the append-only event log.
//!
//! All fallible operations return [`Result`]; no `unwrap`/`panic` outside
//! tests. Strings for strategies, statuses and kinds exist only at the
//! boundary; see [`types`].

pub mod beads;
pub mod capability;
pub mod config;
pub mod detector;
mod error;
pub mod mail;
pub mod matcher;
pub mod orchestrator;
pub mod robot;
pub mod shutdown;
pub mod status;
pub mod store;
pub mod timeline;
pub mod tmux;
pub mod types;

pub use config::OrchestratorConfig;
pub use error::{Error, ErrorCode, Result};
pub use orchestrator::Orchestrator;
pub use shutdown::{signal_channels, ShutdownCoordinator, ShutdownSignal};
