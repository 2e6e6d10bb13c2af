//! Composition root: wires the store, capability matrix, multiplexer and
//! bead client together and exposes the entry points the CLI thin-wraps.
//!
//! There are no global singletons; everything the components need is owned
//! here and passed down explicitly. A `default_setup` factory exists for
//! CLI convenience.

use std::sync::Arc;

use crate::{
    beads::{Bead, BeadClient},
    capability::CapabilityMatrix,
    config::{default_state_db_path, default_timeline_dir, OrchestratorConfig},
    detector::{commit_signal, CompletionDetector, DetectorHandle, Signal},
    matcher::{AgentSnapshot, Assignment, Matcher},
    robot::{
        RobotAgentHealth, RobotAgentRow, RobotAssignmentRow, RobotBulkAssign, RobotIsWorking,
        RobotPaneStatus, RobotSmartRestart, RobotStatus,
    },
    status::{analyze_output, Observation},
    store::{NewApproval, NewHistoryEntry, NewTask, StateDb},
    timeline::TimelineWriter,
    tmux::Multiplexer,
    types::{AgentKind, AgentStatus, ApprovalStatus, DetectionMethod, Recommendation, Strategy},
    Error, Result,
};

/// Command launched when restarting an agent pane, by kind.
const fn agent_command(kind: AgentKind) -> &'static str {
    match kind {
        AgentKind::Claude => "claude",
        AgentKind::Codex => "codex",
        AgentKind::Gemini => "gemini",
        AgentKind::User => "",
    }
}

/// Prompt injected into a pane when a bead is assigned.
#[must_use]
pub fn build_prompt(bead: &Bead) -> String {
    format!(
        "Work on bead {id}: {title}. When finished, state \"bead {id} complete\".",
        id = bead.id,
        title = bead.title
    )
}

/// The orchestration engine for one host.
pub struct Orchestrator {
    db: StateDb,
    matrix: Arc<CapabilityMatrix>,
    mux: Multiplexer,
    #[allow(dead_code)]
    beads: BeadClient,
    timeline: TimelineWriter,
    config: OrchestratorConfig,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        db: StateDb,
        matrix: Arc<CapabilityMatrix>,
        mux: Multiplexer,
        beads: BeadClient,
        timeline: TimelineWriter,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            db,
            matrix,
            mux,
            beads,
            timeline,
            config,
        }
    }

    /// Factory with the default state file, timeline dir and tool names.
    ///
    /// # Errors
    ///
    /// Returns an error when the state directory cannot be determined or
    /// the store cannot be opened.
    pub async fn default_setup(config: OrchestratorConfig) -> Result<Self> {
        let db = StateDb::open(&default_state_db_path()?).await?;
        let matrix = Arc::new(CapabilityMatrix::from_config(&config));
        let mux = Multiplexer::new(config.multiplexer.clone(), config.command_timeout());
        let beads = BeadClient::new("br", config.command_timeout());
        let timeline = TimelineWriter::new(default_timeline_dir()?);
        Ok(Self::new(db, matrix, mux, beads, timeline, config))
    }

    #[must_use]
    pub const fn db(&self) -> &StateDb {
        &self.db
    }

    #[must_use]
    pub const fn timeline(&self) -> &TimelineWriter {
        &self.timeline
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // SESSION BOOTSTRAP
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Register a session and bind every agent pane to an agent row.
    ///
    /// # Errors
    ///
    /// Returns `Error::MultiplexerAbsent` when tmux is missing and
    /// `Error::Command` when the session does not exist in it.
    pub async fn bootstrap_session(
        &self,
        session_id: &str,
        name: &str,
        project_path: &str,
    ) -> Result<usize> {
        if !self.mux.has_session(session_id).await? {
            return Err(Error::NotFound(format!(
                "multiplexer session '{session_id}'"
            )));
        }

        self.db
            .create_session(session_id, name, project_path)
            .await?;

        let panes = self.mux.list_panes(session_id).await?;
        let mut bound = 0usize;
        for pane in &panes {
            if !pane.agent_kind.is_agent() {
                continue;
            }
            let agent_id = format!("{session_id}-{}", pane.index);
            let agent_name = format!("{}-{}", pane.agent_kind, pane.index);
            self.db
                .create_agent(
                    &agent_id,
                    session_id,
                    &agent_name,
                    pane.agent_kind,
                    None,
                    &pane.id,
                )
                .await?;
            bound += 1;
        }

        self.db
            .log_event(
                session_id,
                "session_bootstrapped",
                &serde_json::json!({ "agents": bound, "panes": panes.len() }),
                None,
            )
            .await?;
        Ok(bound)
    }

    /// Create a detached multiplexer session with the given pane count.
    ///
    /// Panes start as shells; the operator launches agents in them and
    /// then runs the bootstrap.
    pub async fn create_fleet(
        &self,
        session_id: &str,
        panes: u32,
        width: u32,
        height: u32,
    ) -> Result<()> {
        if panes == 0 {
            return Err(Error::ValidationError("pane count must be non-zero".to_string()));
        }
        if self.mux.has_session(session_id).await? {
            return Err(Error::ConstraintViolation(format!(
                "multiplexer session '{session_id}' already exists"
            )));
        }

        self.mux.create_session(session_id, width, height).await?;
        for _ in 1..panes {
            self.mux.split_window(session_id).await?;
        }
        Ok(())
    }

    /// Mark a session terminated, optionally killing its panes.
    ///
    /// Refused while the session still owns active reservations.
    pub async fn terminate_session(&self, session_id: &str, kill_panes: bool) -> Result<()> {
        self.db
            .update_session(
                session_id,
                crate::store::SessionUpdate {
                    status: Some(crate::types::SessionStatus::Terminated),
                    ..crate::store::SessionUpdate::default()
                },
            )
            .await?;

        if kill_panes {
            self.mux.kill_session(session_id).await?;
        }

        self.db
            .log_event(
                session_id,
                "session_terminated",
                &serde_json::json!({ "killed_panes": kill_panes }),
                None,
            )
            .await?;
        Ok(())
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // OBSERVATION
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Inferred status of every agent pane in a session.
    pub async fn session_status(&self, session_id: &str) -> Result<RobotStatus> {
        let agents = self.db.list_agents(session_id).await?;
        let mut panes = Vec::new();
        for agent in &agents {
            let capture = self
                .mux
                .capture_pane(&agent.pane, self.config.capture_lines)
                .await
                .ok();
            let status = analyze_output(&Observation {
                agent_kind: agent.kind,
                text: capture.as_deref().unwrap_or(""),
                previous: None,
                seconds_since_change: 0,
            });
            let mut row = RobotPaneStatus::from_status(agent.pane.clone(), &status);
            row.current_bead.clone_from(&agent.current_task);
            panes.push(row);
        }
        Ok(RobotStatus {
            session: session_id.to_string(),
            panes,
        })
    }

    /// Whether one pane's agent is working right now.
    pub async fn is_working(&self, pane: &str, kind: AgentKind) -> Result<RobotIsWorking> {
        let first = self.mux.capture_pane(pane, self.config.capture_lines).await?;
        tokio::time::sleep(std::time::Duration::from_millis(750)).await;
        let second = self.mux.capture_pane(pane, self.config.capture_lines).await?;

        let status = analyze_output(&Observation {
            agent_kind: kind,
            text: &second,
            previous: Some(&first),
            seconds_since_change: 0,
        });
        Ok(RobotIsWorking {
            pane: pane.to_string(),
            is_working: status.is_working,
            confidence: status.confidence,
        })
    }

    /// Stored health of a session's agents.
    pub async fn agent_health(&self, session_id: &str) -> Result<RobotAgentHealth> {
        let agents = self.db.list_agents(session_id).await?;
        Ok(RobotAgentHealth {
            session: session_id.to_string(),
            agents: agents
                .into_iter()
                .map(|a| RobotAgentRow {
                    agent_id: a.id,
                    agent_kind: a.kind,
                    pane: a.pane,
                    status: a.status.to_string(),
                    last_seen: a.last_seen,
                    current_bead: a.current_task,
                })
                .collect(),
        })
    }

    /// Live snapshots of a session's agents, for the matcher preflight.
    async fn agent_snapshots(&self, session_id: &str) -> Result<Vec<AgentSnapshot>> {
        let agents = self.db.list_agents(session_id).await?;
        let active = self.db.list_active_tasks(session_id).await?;

        let mut snapshots = Vec::with_capacity(agents.len());
        for agent in &agents {
            let capture = self
                .mux
                .capture_pane(&agent.pane, self.config.capture_lines)
                .await
                .ok();
            let status = analyze_output(&Observation {
                agent_kind: agent.kind,
                text: capture.as_deref().unwrap_or(""),
                previous: None,
                seconds_since_change: crate::status::PROMPT_QUIET_SECS,
            });
            let context_usage = status
                .context_remaining
                .map_or(0.0, |remaining| 1.0 - remaining / 100.0);
            let running = active.iter().filter(|t| t.agent_id == agent.id).count();
            snapshots.push(AgentSnapshot {
                id: agent.id.clone(),
                kind: agent.kind,
                idle: status.is_idle && running == 0,
                context_usage,
                active_assignments: running,
            });
        }
        Ok(snapshots)
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // ASSIGNMENT
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Assign beads to the session's agents under a strategy, observing the
    /// panes first to build agent snapshots.
    pub async fn assign(
        &self,
        session_id: &str,
        beads: &[Bead],
        strategy: Strategy,
    ) -> Result<RobotBulkAssign> {
        let snapshots = self.agent_snapshots(session_id).await?;
        self.assign_with_snapshots(session_id, beads, &snapshots, strategy)
            .await
    }

    /// Assignment core with caller-provided snapshots. Persists each
    /// assignment, injects the prompt, records history and events.
    pub async fn assign_with_snapshots(
        &self,
        session_id: &str,
        beads: &[Bead],
        snapshots: &[AgentSnapshot],
        strategy: Strategy,
    ) -> Result<RobotBulkAssign> {
        let matcher = Matcher::new(&self.matrix, self.config.matcher);
        let assignments = matcher.assign(beads, snapshots, strategy);

        let mut response = RobotBulkAssign {
            session: session_id.to_string(),
            strategy: Some(strategy),
            assigned: Vec::new(),
            skipped: Vec::new(),
            allocation_source: None,
        };
        let assigned_ids: Vec<&str> = assignments.iter().map(|a| a.bead.id.as_str()).collect();
        response.skipped = beads
            .iter()
            .filter(|b| !assigned_ids.contains(&b.id.as_str()))
            .map(|b| b.id.clone())
            .collect();

        for assignment in assignments {
            match self.persist_assignment(session_id, &assignment).await {
                Ok(row) => response.assigned.push(row),
                Err(e) => {
                    tracing::warn!("failed to persist assignment for {}: {e}", assignment.bead.id);
                    response.skipped.push(assignment.bead.id.clone());
                }
            }
        }
        Ok(response)
    }

    async fn persist_assignment(
        &self,
        session_id: &str,
        assignment: &Assignment,
    ) -> Result<RobotAssignmentRow> {
        let agent = self
            .db
            .get_agent(&assignment.agent_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("agent '{}'", assignment.agent_id)))?;

        let prompt = build_prompt(&assignment.bead);
        let task = self
            .db
            .create_task(NewTask {
                session_id: session_id.to_string(),
                agent_id: assignment.agent_id.clone(),
                bead_id: assignment.bead.id.clone(),
                correlation_id: Some(format!("{session_id}:{}", assignment.bead.id)),
                score: assignment.score,
                confidence: assignment.confidence,
                reason: assignment.reason.clone(),
                prompt: prompt.clone(),
            })
            .await?;

        self.db
            .record_history(NewHistoryEntry {
                session_id: Some(session_id.to_string()),
                bead_id: assignment.bead.id.clone(),
                bead_title: Some(assignment.bead.title.clone()),
                to_status: "assigned".to_string(),
                agent_id: Some(agent.id.clone()),
                agent_kind: Some(agent.kind.to_string()),
                agent_name: Some(agent.name.clone()),
                pane: Some(agent.pane.clone()),
                trigger: "matcher".to_string(),
                reason: Some(assignment.reason.clone()),
                prompt: Some(prompt.clone()),
                retry_count: 0,
                ..NewHistoryEntry::default()
            })
            .await?;

        self.db
            .log_event(
                session_id,
                "bead_assigned",
                &serde_json::json!({
                    "bead_id": assignment.bead.id,
                    "agent_id": agent.id,
                    "score": assignment.score,
                    "confidence": assignment.confidence,
                }),
                task.correlation_id.as_deref(),
            )
            .await?;

        self.db
            .update_agent(
                &agent.id,
                crate::store::AgentUpdate {
                    status: Some(AgentStatus::Working),
                    current_task: Some(Some(assignment.bead.id.clone())),
                    touch: true,
                    ..crate::store::AgentUpdate::default()
                },
            )
            .await?;

        // Injection failure leaves the task assigned; the operator can
        // re-inject or the detector will flag the pane.
        if let Err(e) = self.mux.inject_prompt(&agent.pane, &prompt).await {
            tracing::warn!("failed to inject prompt into {}: {e}", agent.pane);
        }

        if let Err(e) = self
            .timeline
            .append(&crate::timeline::TimelineRecord {
                agent_id: agent.id.clone(),
                agent_kind: agent.kind,
                session_id: session_id.to_string(),
                state: "assigned".to_string(),
                previous_state: None,
                timestamp_ns: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
                duration_ns: 0,
                details: std::collections::HashMap::from([(
                    "bead".to_string(),
                    assignment.bead.id.clone(),
                )]),
            })
            .await
        {
            tracing::warn!("failed to append timeline record: {e}");
        }

        Ok(RobotAssignmentRow {
            bead_id: assignment.bead.id.clone(),
            agent_id: agent.id,
            pane: agent.pane,
            score: assignment.score,
            confidence: assignment.confidence,
            reason: assignment.reason.clone(),
        })
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // RESTART & RECOVERY
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    /// Restart an agent pane only when it is safe, gated by an approval.
    ///
    /// Without an approval id this requests one and reports
    /// `restarted: false`; with an approved id it interrupts the pane and
    /// relaunches the agent command.
    pub async fn smart_restart(
        &self,
        session_id: &str,
        agent_id: &str,
        requested_by: &str,
        approval_id: Option<i64>,
    ) -> Result<RobotSmartRestart> {
        let agent = self
            .db
            .get_agent(agent_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("agent '{agent_id}'")))?;

        let capture = self
            .mux
            .capture_pane(&agent.pane, self.config.capture_lines)
            .await
            .ok();
        let status = analyze_output(&Observation {
            agent_kind: agent.kind,
            text: capture.as_deref().unwrap_or(""),
            previous: None,
            seconds_since_change: crate::status::PROMPT_QUIET_SECS,
        });

        if status.recommendation == Recommendation::DoNotInterrupt {
            return Ok(RobotSmartRestart {
                pane: agent.pane,
                restarted: false,
                reason: "agent is working; restart refused".to_string(),
                approval_id: None,
                dry_run: None,
            });
        }

        let Some(approval_id) = approval_id else {
            let approval = self
                .db
                .create_approval(NewApproval {
                    action: "smart-restart".to_string(),
                    resource: agent.pane.clone(),
                    reason: status.recommendation_reason.clone(),
                    requester: requested_by.to_string(),
                    requires_slb: true,
                    allowed_approvers: None,
                    ttl: chrono::Duration::minutes(15),
                })
                .await?;
            return Ok(RobotSmartRestart {
                pane: agent.pane,
                restarted: false,
                reason: "approval required before restart".to_string(),
                approval_id: Some(approval.id),
                dry_run: None,
            });
        };

        let approval = self
            .db
            .get_approval(approval_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("approval {approval_id}")))?;
        if approval.status != ApprovalStatus::Approved {
            return Err(Error::NoLongerPending(approval_id.to_string()));
        }

        self.mux.send_interrupt(&agent.pane).await?;
        tokio::time::sleep(std::time::Duration::from_millis(500)).await;
        self.mux
            .send_keys(&agent.pane, agent_command(agent.kind), true)
            .await?;

        self.db
            .log_event(
                session_id,
                "agent_restarted",
                &serde_json::json!({ "agent_id": agent.id, "pane": agent.pane }),
                None,
            )
            .await?;

        Ok(RobotSmartRestart {
            pane: agent.pane,
            restarted: true,
            reason: status.recommendation_reason,
            approval_id: Some(approval_id),
            dry_run: None,
        })
    }

    /// Crash-recovery sweep: assignments still in flight whose pane is gone
    /// are failed with a history entry. Returns the number recovered.
    pub async fn recover_incomplete(&self, session_id: &str) -> Result<usize> {
        let tasks = self.db.list_active_tasks(session_id).await?;
        if tasks.is_empty() {
            return Ok(0);
        }

        let pane_ids: Vec<String> = match self.mux.list_panes(session_id).await {
            Ok(panes) => panes.into_iter().map(|p| p.id).collect(),
            // Session gone entirely: every active assignment is orphaned.
            Err(_) => Vec::new(),
        };

        let mut recovered = 0usize;
        for task in tasks {
            let pane = self
                .db
                .get_agent(&task.agent_id)
                .await?
                .map(|agent| agent.pane);
            let alive = pane.as_ref().is_some_and(|p| pane_ids.contains(p));
            if alive {
                continue;
            }

            let signal = Signal {
                method: DetectionMethod::PaneLost,
                is_failed: true,
                reason: "pane no longer exists (agent crashed)".to_string(),
            };
            commit_signal(&self.db, &task, &signal).await?;
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Spawn the completion watcher for a session.
    #[must_use]
    pub fn watch(&self, session_id: &str) -> DetectorHandle {
        CompletionDetector::new(
            self.db.clone(),
            self.mux.clone(),
            BeadClient::new("br", self.config.command_timeout()),
            session_id,
            self.config.clone(),
        )
        .spawn()
    }
}
