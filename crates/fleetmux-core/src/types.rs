//! Closed domain vocabulary.
//!
//! Strategies, statuses, agent kinds, task types and detection methods are
//! represented as enums everywhere inside the core. Strings exist only at the
//! external boundary, parsed and formatted here via strum.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, EnumString};

/// The family of AI assistant running in a pane.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgentKind {
    #[strum(to_string = "claude")]
    Claude,
    #[strum(to_string = "codex")]
    Codex,
    #[strum(to_string = "gemini")]
    Gemini,
    /// A plain shell or anything we cannot classify.
    #[strum(to_string = "user")]
    User,
}

impl AgentKind {
    /// True for panes that host an actual agent process.
    #[must_use]
    pub const fn is_agent(self) -> bool {
        !matches!(self, Self::User)
    }
}

/// Task classification inferred from a bead's title and labels.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    #[strum(to_string = "refactor")]
    Refactor,
    #[strum(to_string = "analysis")]
    Analysis,
    #[strum(to_string = "docs")]
    Docs,
    #[strum(to_string = "bug")]
    Bug,
    #[strum(to_string = "feature")]
    Feature,
    #[strum(to_string = "testing")]
    Testing,
    #[strum(to_string = "task")]
    Task,
    #[strum(to_string = "chore")]
    Chore,
    #[strum(to_string = "epic")]
    Epic,
}

/// Named policy for turning (beads, agents) into assignments.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, EnumIter, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// Best capability match per bead, unlimited beads per agent.
    #[strum(to_string = "capability")]
    Capability,
    /// Even load across agents; every bead assigned.
    #[strum(to_string = "balanced")]
    Balanced,
    /// One bead per agent, relaxed threshold, optimistic confidence.
    #[strum(to_string = "speed")]
    Speed,
    /// One bead per agent, highest score wins.
    #[strum(to_string = "quality")]
    Quality,
    /// One bead per agent, blockers and high priority boosted.
    #[strum(to_string = "dependency")]
    Dependency,
    /// Deterministic rotation, every bead assigned.
    #[strum(to_string = "round_robin", serialize = "round-robin")]
    RoundRobin,
}

/// Session lifecycle status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[strum(to_string = "active")]
    Active,
    #[strum(to_string = "paused")]
    Paused,
    #[strum(to_string = "terminated")]
    Terminated,
}

/// Observed agent status, updated on every observation tick.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    #[strum(to_string = "idle")]
    Idle,
    #[strum(to_string = "working")]
    Working,
    #[strum(to_string = "error")]
    Error,
    #[strum(to_string = "crashed")]
    Crashed,
}

/// Assignment lifecycle status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AssignmentStatus {
    #[strum(to_string = "assigned")]
    Assigned,
    #[strum(to_string = "working")]
    Working,
    #[strum(to_string = "completed")]
    Completed,
    #[strum(to_string = "failed")]
    Failed,
    #[strum(to_string = "reassigned")]
    Reassigned,
}

impl AssignmentStatus {
    /// Terminal statuses allow `completed_at` and `result` to be set.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Approval request status.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    #[strum(to_string = "pending")]
    Pending,
    #[strum(to_string = "approved")]
    Approved,
    #[strum(to_string = "denied")]
    Denied,
    #[strum(to_string = "expired")]
    Expired,
}

/// How a completion event was detected.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DetectionMethod {
    /// External bead store reports the bead closed.
    BeadClosed,
    /// Pane output matched a completion or failure pattern.
    PatternMatch,
    /// No output change for the idle threshold after an activity burst.
    Idle,
    /// Out-of-band message from the agent itself.
    AgentReport,
    /// The pane disappeared from the registry.
    PaneLost,
}

/// What the operator (or an automated driver) should do with a pane.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recommendation {
    /// Agent is mid-task; interrupting would lose work.
    DoNotInterrupt,
    /// Agent is idle; restarting loses nothing.
    SafeToRestart,
    /// Provider rate limit hit; wait it out.
    RateLimitedWait,
    /// Context window nearly exhausted; restart with fresh context.
    ContextLowRestart,
    /// Something looks wrong; a human should look.
    NeedsAttention,
    /// Not enough signal to say.
    Unknown,
}
