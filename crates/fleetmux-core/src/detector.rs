//! Completion detection for active assignments.
//!
//! The hard part is split in two, so the decision logic stays testable
//! without a store or a multiplexer:
//!
//! - [`decide`] is a pure function from one observation snapshot to an
//!   optional completion signal plus the pane's next activity state.
//! - [`CompletionDetector`] is the effectful watcher: it polls, feeds
//!   `decide`, commits the outcome to the durable store (task status,
//!   history entry, event-log row, all in one transaction) and only then
//!   pushes a best-effort notification onto a bounded channel.
//!
//! Detection methods fire in a fixed order, first signal wins: pane lost,
//! external bead closed, failure pattern, completion pattern, idle after a
//! burst. A per-bead dedup window suppresses repeat emissions.

use std::{collections::HashMap, sync::LazyLock, time::Duration};

use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use tokio::sync::{mpsc, watch};

use crate::{
    beads::BeadClient,
    config::OrchestratorConfig,
    store::{self, AgentUpdate, StateDb, TaskRecord, TaskUpdate},
    tmux::Multiplexer,
    types::{AgentStatus, AssignmentStatus, DetectionMethod},
    Result,
};

/// Patterns that mean the agent gave up or hit a wall.
const FAILURE_PATTERNS: &[&str] = &[
    "unable to complete",
    "cannot proceed",
    "blocked by",
    "giving up",
    "need help",
    "failed to",
    "error:.*fatal",
    "aborting",
];

/// Patterns that mean the work finished.
const COMPLETION_PATTERNS: &[&str] = &[
    r"bead \S+ complete",
    r"task \S+ (done|finished|complete)",
    "closing bead",
    "br (close|update.*closed)",
    "marked as complete",
    "successfully completed",
    "work complete",
    "finished working",
];

fn compile_all(patterns: &[&str]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
        .collect()
}

static FAILURE_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile_all(FAILURE_PATTERNS));
static COMPLETION_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| compile_all(COMPLETION_PATTERNS));

// ═══════════════════════════════════════════════════════════════════════════
// PURE DECISION CORE
// ═══════════════════════════════════════════════════════════════════════════

/// Per-pane activity tracking for idle detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityState {
    pub last_output: String,
    pub last_output_time: DateTime<Utc>,
    pub burst_active: bool,
    pub burst_started: Option<DateTime<Utc>>,
}

/// A detected completion, before store effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Signal {
    pub method: DetectionMethod,
    pub is_failed: bool,
    pub reason: String,
}

/// One observation snapshot for one assignment.
#[derive(Debug, Clone)]
pub struct DetectorCheck<'a> {
    /// Whether the bound pane still exists in the registry.
    pub pane_exists: bool,
    /// External tracker verdict; `None` when the bead CLI gave no signal.
    pub bead_closed: Option<bool>,
    /// Captured scrollback; `None` when the capture failed (soft error).
    pub capture: Option<&'a str>,
    /// Activity state from the previous observation of this pane.
    pub activity: Option<ActivityState>,
    pub now: DateTime<Utc>,
    pub idle_threshold: Duration,
}

/// Decide whether an observation completes the assignment.
///
/// Returns the optional signal and the pane's next activity state. Idle
/// only fires after a burst: a pane whose output never changed is never
/// completed-by-idle.
#[must_use]
pub fn decide(check: DetectorCheck<'_>) -> (Option<Signal>, Option<ActivityState>) {
    if !check.pane_exists {
        return (
            Some(Signal {
                method: DetectionMethod::PaneLost,
                is_failed: true,
                reason: "pane no longer exists (agent crashed)".to_string(),
            }),
            check.activity,
        );
    }

    if check.bead_closed == Some(true) {
        return (
            Some(Signal {
                method: DetectionMethod::BeadClosed,
                is_failed: false,
                reason: "external tracker reports bead closed".to_string(),
            }),
            check.activity,
        );
    }

    let Some(capture) = check.capture else {
        // Capture failure is a retryable soft error: no signal this tick.
        return (None, check.activity);
    };

    if let Some(matched) = first_match(&FAILURE_RES, capture) {
        return (
            Some(Signal {
                method: DetectionMethod::PatternMatch,
                is_failed: true,
                reason: matched,
            }),
            check.activity,
        );
    }

    if let Some(matched) = first_match(&COMPLETION_RES, capture) {
        return (
            Some(Signal {
                method: DetectionMethod::PatternMatch,
                is_failed: false,
                reason: matched,
            }),
            check.activity,
        );
    }

    // Idle state machine.
    let Some(mut activity) = check.activity else {
        return (
            None,
            Some(ActivityState {
                last_output: capture.to_string(),
                last_output_time: check.now,
                burst_active: false,
                burst_started: None,
            }),
        );
    };

    if capture != activity.last_output {
        if !activity.burst_active {
            activity.burst_active = true;
            activity.burst_started = Some(check.now);
        }
        activity.last_output = capture.to_string();
        activity.last_output_time = check.now;
        return (None, Some(activity));
    }

    let quiet = check
        .now
        .signed_duration_since(activity.last_output_time)
        .to_std()
        .unwrap_or_default();
    if activity.burst_active && quiet >= check.idle_threshold {
        activity.burst_active = false;
        return (
            Some(Signal {
                method: DetectionMethod::Idle,
                is_failed: false,
                reason: format!("no output change for {}s after activity", quiet.as_secs()),
            }),
            Some(activity),
        );
    }

    (None, Some(activity))
}

fn first_match(regexes: &[Regex], text: &str) -> Option<String> {
    regexes
        .iter()
        .find_map(|re| re.find(text).map(|m| m.as_str().to_string()))
}

// ═══════════════════════════════════════════════════════════════════════════
// EVENTS & EFFECTS
// ═══════════════════════════════════════════════════════════════════════════

/// A completion pushed to consumers after the store committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompletionEvent {
    pub session_id: String,
    pub task_id: i64,
    pub bead_id: String,
    pub agent_id: String,
    pub method: DetectionMethod,
    pub is_failed: bool,
    pub reason: String,
    pub detected_at: DateTime<Utc>,
}

/// Commit a signal's effects: task status, history entry and event-log row,
/// all in one transaction. The returned event is what consumers see.
pub async fn commit_signal(
    db: &StateDb,
    task: &TaskRecord,
    signal: &Signal,
) -> Result<CompletionEvent> {
    let status = if signal.is_failed {
        AssignmentStatus::Failed
    } else {
        AssignmentStatus::Completed
    };

    let event = CompletionEvent {
        session_id: task.session_id.clone(),
        task_id: task.id,
        bead_id: task.bead_id.clone(),
        agent_id: task.agent_id.clone(),
        method: signal.method,
        is_failed: signal.is_failed,
        reason: signal.reason.clone(),
        detected_at: Utc::now(),
    };

    let task = task.clone();
    let signal = signal.clone();
    let payload = serde_json::to_value(&event)?;
    db.transaction(move |conn: &mut sqlx::SqliteConnection| {
        Box::pin(async move {
            store::tasks::update_task_tx(
                conn,
                task.id,
                TaskUpdate {
                    status: Some(status),
                    result: Some(signal.reason.clone()),
                    ..TaskUpdate::default()
                },
            )
            .await?;

            store::history::record_history_tx(
                conn,
                store::NewHistoryEntry {
                    session_id: Some(task.session_id.clone()),
                    bead_id: task.bead_id.clone(),
                    from_status: Some(task.status.to_string()),
                    to_status: status.to_string(),
                    agent_id: Some(task.agent_id.clone()),
                    trigger: format!("detector:{}", signal.method),
                    reason: Some(signal.reason.clone()),
                    prompt: Some(task.prompt.clone()),
                    retry_count: task.retry_count,
                    ..store::NewHistoryEntry::default()
                },
            )
            .await?;

            store::events::log_event_tx(
                conn,
                &task.session_id,
                "completion_detected",
                &payload,
                task.correlation_id.as_deref(),
            )
            .await?;
            Ok(())
        })
    })
    .await?;

    // Reconcile the agent row: the bead is no longer in its hands. A lost
    // pane means the agent itself is gone, not merely idle.
    let agent_status = match (event.is_failed, event.method) {
        (_, DetectionMethod::PaneLost) => AgentStatus::Crashed,
        (true, _) => AgentStatus::Error,
        (false, _) => AgentStatus::Idle,
    };
    match db
        .update_agent(
            &event.agent_id,
            AgentUpdate {
                status: Some(agent_status),
                current_task: Some(None),
                touch: true,
                ..AgentUpdate::default()
            },
        )
        .await
    {
        Ok(()) => {}
        // The session (and its agents) may already be deleted; the
        // completion itself is committed either way.
        Err(crate::Error::NotFound(_)) => {}
        Err(e) => return Err(e),
    }

    Ok(event)
}

// ═══════════════════════════════════════════════════════════════════════════
// WATCHER
// ═══════════════════════════════════════════════════════════════════════════

/// Per-bead emission timestamps for deduplication.
#[derive(Debug, Default)]
pub struct DedupMap {
    emitted: HashMap<String, DateTime<Utc>>,
}

impl DedupMap {
    /// Whether an emission for this bead is allowed now; records it if so.
    pub fn try_claim(&mut self, bead_id: &str, now: DateTime<Utc>, window: Duration) -> bool {
        let allowed = self.emitted.get(bead_id).map_or(true, |last| {
            now.signed_duration_since(*last)
                .to_std()
                .is_ok_and(|elapsed| elapsed >= window)
        });
        if allowed {
            self.emitted.insert(bead_id.to_string(), now);
        }
        allowed
    }
}

/// Abstraction over completion-event delivery.
///
/// The polling detector is one implementation; a multiplexer with real
/// pane-change notifications could provide another without touching the
/// matcher or the store.
#[async_trait::async_trait]
pub trait EventSource: Send {
    /// Next completion event, or `None` when the source is exhausted.
    async fn next_event(&mut self) -> Option<CompletionEvent>;
}

/// Handle to a running detector.
pub struct DetectorHandle {
    /// Completion notifications, bounded; slow consumers miss events, the
    /// event log in the store remains the ledger.
    pub events: mpsc::Receiver<CompletionEvent>,
    cancel: std::sync::Arc<watch::Sender<bool>>,
    reports: mpsc::UnboundedSender<AgentReport>,
    join: tokio::task::JoinHandle<()>,
}

/// Cancellation handle detachable from the event consumer, so a signal
/// task can stop the watcher while another task drains events.
#[derive(Clone)]
pub struct Canceller {
    cancel: std::sync::Arc<watch::Sender<bool>>,
}

impl Canceller {
    /// Request cooperative shutdown of the watcher.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }
}

/// Out-of-band completion report from an agent.
#[derive(Debug, Clone)]
pub struct AgentReport {
    pub bead_id: String,
    pub is_failed: bool,
    pub reason: String,
}

impl DetectorHandle {
    /// Request cooperative shutdown; the watcher finishes its current tick
    /// and closes the event channel.
    pub fn cancel(&self) {
        let _ = self.cancel.send(true);
    }

    /// A cloneable cancellation handle for use from another task.
    #[must_use]
    pub fn canceller(&self) -> Canceller {
        Canceller {
            cancel: std::sync::Arc::clone(&self.cancel),
        }
    }

    /// Feed an out-of-band agent report into the next tick.
    pub fn report(&self, report: AgentReport) {
        let _ = self.reports.send(report);
    }

    /// Wait for the watcher task to finish.
    pub async fn join(self) {
        let _ = self.join.await;
    }
}

#[async_trait::async_trait]
impl EventSource for DetectorHandle {
    async fn next_event(&mut self) -> Option<CompletionEvent> {
        self.events.recv().await
    }
}

/// The long-running completion watcher for one session.
pub struct CompletionDetector {
    db: StateDb,
    mux: Multiplexer,
    beads: BeadClient,
    session_id: String,
    config: OrchestratorConfig,
}

impl CompletionDetector {
    #[must_use]
    pub fn new(
        db: StateDb,
        mux: Multiplexer,
        beads: BeadClient,
        session_id: impl Into<String>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            db,
            mux,
            beads,
            session_id: session_id.into(),
            config,
        }
    }

    /// Spawn the polling watcher. Ticks never overlap; cancellation lets
    /// the current tick finish before the channel closes.
    #[must_use]
    pub fn spawn(self) -> DetectorHandle {
        let (event_tx, event_rx) = mpsc::channel(self.config.event_channel_capacity);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        let (report_tx, mut report_rx) = mpsc::unbounded_channel::<AgentReport>();

        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.config.poll_interval());
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut activity: HashMap<String, ActivityState> = HashMap::new();
            let mut dedup = DedupMap::default();

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let mut reports = Vec::new();
                        while let Ok(report) = report_rx.try_recv() {
                            reports.push(report);
                        }
                        self.tick(&mut activity, &mut dedup, &reports, &event_tx).await;
                    }
                    changed = cancel_rx.changed() => {
                        // Stop on cancel, and also when every handle is
                        // gone (the sender side dropped).
                        if changed.is_err() || *cancel_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            // event_tx drops here, closing the channel.
        });

        DetectorHandle {
            events: event_rx,
            cancel: std::sync::Arc::new(cancel_tx),
            reports: report_tx,
            join,
        }
    }

    /// One observation pass over the session's active assignments.
    async fn tick(
        &self,
        activity: &mut HashMap<String, ActivityState>,
        dedup: &mut DedupMap,
        reports: &[AgentReport],
        events: &mpsc::Sender<CompletionEvent>,
    ) {
        let tasks = match self.db.list_active_tasks(&self.session_id).await {
            Ok(tasks) => tasks,
            Err(e) => {
                tracing::warn!("detector: failed to list active tasks: {e}");
                return;
            }
        };
        if tasks.is_empty() {
            return;
        }

        // One registry read per tick; a transient multiplexer error means
        // no pane-lost verdicts this tick.
        let panes = self.mux.list_panes(&self.session_id).await.ok();
        let pane_ids: Option<Vec<String>> =
            panes.map(|panes| panes.into_iter().map(|p| p.id).collect());

        for task in tasks {
            let report = reports.iter().find(|r| r.bead_id == task.bead_id);
            let signal = if let Some(report) = report {
                Some(Signal {
                    method: DetectionMethod::AgentReport,
                    is_failed: report.is_failed,
                    reason: report.reason.clone(),
                })
            } else {
                self.observe(&task, &pane_ids, activity).await
            };

            let Some(signal) = signal else { continue };
            if !dedup.try_claim(&task.bead_id, Utc::now(), self.config.dedup_window()) {
                continue;
            }

            match commit_signal(&self.db, &task, &signal).await {
                Ok(event) => {
                    // Bounded channel: skip emission rather than block or
                    // drop older events. The store has the ledger.
                    if let Err(e) = events.try_send(event) {
                        tracing::debug!("detector: event channel full, skipping: {e}");
                    }
                }
                Err(e) => {
                    tracing::warn!("detector: failed to commit completion: {e}");
                }
            }
        }
    }

    /// Gather one assignment's observation and run the pure decision.
    async fn observe(
        &self,
        task: &TaskRecord,
        pane_ids: &Option<Vec<String>>,
        activity: &mut HashMap<String, ActivityState>,
    ) -> Option<Signal> {
        let pane = self.agent_pane(&task.agent_id).await;

        let pane_exists = match (&pane, pane_ids) {
            (Some(pane), Some(ids)) => ids.contains(pane),
            // Registry unavailable or agent unknown: assume alive.
            _ => true,
        };

        let bead_closed = match self.beads.is_closed(&task.bead_id).await {
            Ok(true) => Some(true),
            Ok(false) => Some(false),
            Err(e) => {
                tracing::debug!("detector: bead query failed: {e}");
                None
            }
        };

        let capture = match &pane {
            Some(pane) if pane_exists => self
                .mux
                .capture_pane(pane, self.config.capture_lines)
                .await
                .ok(),
            _ => None,
        };

        let key = pane.unwrap_or_else(|| task.agent_id.clone());
        let (signal, next_activity) = decide(DetectorCheck {
            pane_exists,
            bead_closed,
            capture: capture.as_deref(),
            activity: activity.get(&key).cloned(),
            now: Utc::now(),
            idle_threshold: self.config.idle_threshold(),
        });

        match next_activity {
            Some(state) => {
                activity.insert(key, state);
            }
            None => {
                activity.remove(&key);
            }
        }
        signal
    }

    async fn agent_pane(&self, agent_id: &str) -> Option<String> {
        self.db
            .get_agent(agent_id)
            .await
            .ok()
            .flatten()
            .map(|agent| agent.pane)
    }
}
