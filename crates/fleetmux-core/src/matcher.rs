//! Bead-to-agent assignment under a chosen strategy.
//!
//! The matcher is pure: it sees a snapshot of beads and agents and produces
//! scored assignments. Persisting them and injecting prompts is the
//! orchestrator's job.
//!
//! Scoring: `capability(kind, task) * (1 - context_usage)`, gated by
//! `min_confidence` (the speed strategy halves the gate). Preflight keeps
//! only idle agents at or below the context ceiling; the boundary is
//! inclusive. Bead order is priority-ascending, ties kept stable.

use itertools::Itertools;
use serde::Serialize;

use crate::{
    beads::Bead,
    capability::CapabilityMatrix,
    config::MatcherConfig,
    types::{AgentKind, Strategy},
};

/// Snapshot of one agent as the matcher sees it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub kind: AgentKind,
    /// Only idle agents receive work.
    pub idle: bool,
    /// Context window usage in [0, 1].
    pub context_usage: f64,
    /// Assignments currently running; seeds balanced-load counting.
    pub active_assignments: usize,
}

impl AgentSnapshot {
    /// An idle agent with an empty context window.
    #[must_use]
    pub fn idle(id: impl Into<String>, kind: AgentKind) -> Self {
        Self {
            id: id.into(),
            kind,
            idle: true,
            context_usage: 0.0,
            active_assignments: 0,
        }
    }
}

/// One scored bead-to-agent pairing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assignment {
    pub bead: Bead,
    pub agent_id: String,
    /// Raw match score in [0, 1].
    pub score: f64,
    /// Strategy-adjusted confidence in [0, 1].
    pub confidence: f64,
    /// Human-readable explanation, semicolon-joined phrases.
    pub reason: String,
}

/// Pure assignment engine over a capability matrix.
#[derive(Debug)]
pub struct Matcher<'a> {
    matrix: &'a CapabilityMatrix,
    config: MatcherConfig,
}

impl<'a> Matcher<'a> {
    #[must_use]
    pub const fn new(matrix: &'a CapabilityMatrix, config: MatcherConfig) -> Self {
        Self { matrix, config }
    }

    /// Produce assignments for the given beads and agents under a strategy.
    ///
    /// Output ordering: highest confidence first for capability, balanced,
    /// speed and quality. Dependency keeps its (priority, unblocks) bead
    /// order and round-robin keeps input order, so their observable
    /// sequences stay deterministic.
    #[must_use]
    pub fn assign(
        &self,
        beads: &[Bead],
        agents: &[AgentSnapshot],
        strategy: Strategy,
    ) -> Vec<Assignment> {
        let eligible: Vec<&AgentSnapshot> = agents
            .iter()
            .filter(|a| a.idle && a.context_usage <= self.config.max_context_usage)
            .collect();
        if eligible.is_empty() || beads.is_empty() {
            return Vec::new();
        }

        let ordered: Vec<&Bead> = beads
            .iter()
            .sorted_by_key(|b| b.priority)
            .collect();

        let mut assignments = match strategy {
            Strategy::Capability => self.assign_capability(&ordered, &eligible),
            Strategy::Balanced => self.assign_balanced(&ordered, &eligible),
            Strategy::Speed => self.assign_exclusive(&ordered, &eligible, strategy),
            Strategy::Quality => self.assign_exclusive(&ordered, &eligible, strategy),
            Strategy::Dependency => self.assign_dependency(&ordered, &eligible),
            Strategy::RoundRobin => Self::assign_round_robin(&ordered, &eligible),
        };

        if matches!(
            strategy,
            Strategy::Capability | Strategy::Balanced | Strategy::Speed | Strategy::Quality
        ) {
            assignments.sort_by(|a, b| {
                b.confidence
                    .partial_cmp(&a.confidence)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
        }
        assignments
    }

    fn raw_score(&self, agent: &AgentSnapshot, bead: &Bead) -> f64 {
        self.matrix.score(agent.kind, bead.task_type) * (1.0 - agent.context_usage)
    }

    /// Best-capability match per bead; agents may take several beads.
    fn assign_capability(&self, beads: &[&Bead], agents: &[&AgentSnapshot]) -> Vec<Assignment> {
        beads
            .iter()
            .filter_map(|bead| {
                let (agent, score) = agents
                    .iter()
                    .map(|a| (*a, self.raw_score(a, bead)))
                    .max_by(|(_, x), (_, y)| {
                        x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal)
                    })?;
                (score >= self.config.min_confidence).then(|| Assignment {
                    bead: (*bead).clone(),
                    agent_id: agent.id.clone(),
                    score,
                    confidence: score,
                    reason: self.reason(agent, bead, "best capability match"),
                })
            })
            .collect()
    }

    /// Spread every bead across agents, least-loaded first.
    fn assign_balanced(&self, beads: &[&Bead], agents: &[&AgentSnapshot]) -> Vec<Assignment> {
        let mut counts: Vec<usize> = agents.iter().map(|a| a.active_assignments).collect();
        let mut out = Vec::new();

        for bead in beads {
            let Some((idx, agent, score)) = agents
                .iter()
                .enumerate()
                .map(|(i, a)| (i, *a, self.raw_score(a, bead)))
                .min_by(|(i, _, x), (j, _, y)| {
                    counts[*i]
                        .cmp(&counts[*j])
                        .then_with(|| y.partial_cmp(x).unwrap_or(std::cmp::Ordering::Equal))
                })
            else {
                continue;
            };

            if score >= self.config.min_confidence {
                counts[idx] += 1;
                out.push(Assignment {
                    bead: (*bead).clone(),
                    agent_id: agent.id.clone(),
                    score,
                    confidence: score,
                    reason: self.reason(agent, bead, "balanced load"),
                });
            }
        }
        out
    }

    /// One bead per agent: speed (relaxed gate, optimistic confidence) and
    /// quality (highest score wins) share the selection loop.
    fn assign_exclusive(
        &self,
        beads: &[&Bead],
        agents: &[&AgentSnapshot],
        strategy: Strategy,
    ) -> Vec<Assignment> {
        let threshold = if strategy == Strategy::Speed {
            self.config.min_confidence * 0.5
        } else {
            self.config.min_confidence
        };

        let mut used = vec![false; agents.len()];
        let mut out = Vec::new();

        for bead in beads {
            let best = agents
                .iter()
                .enumerate()
                .filter(|(i, _)| !used[*i])
                .map(|(i, a)| (i, *a, self.raw_score(a, bead)))
                .max_by(|(_, _, x), (_, _, y)| {
                    x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal)
                });
            let Some((idx, agent, score)) = best else {
                break;
            };

            if score < threshold {
                continue;
            }
            used[idx] = true;

            let (confidence, note) = if strategy == Strategy::Speed {
                ((score + 0.9) / 2.0, "speed strategy")
            } else {
                (score, "quality match")
            };
            out.push(Assignment {
                bead: (*bead).clone(),
                agent_id: agent.id.clone(),
                score,
                confidence,
                reason: self.reason(agent, bead, note),
            });
        }
        out
    }

    /// One bead per agent, blockers first: beads re-sorted by (priority,
    /// unblocks desc) with additive bonuses applied before the gate.
    fn assign_dependency(&self, beads: &[&Bead], agents: &[&AgentSnapshot]) -> Vec<Assignment> {
        let ordered: Vec<&&Bead> = beads
            .iter()
            .sorted_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| b.unblocks.len().cmp(&a.unblocks.len()))
            })
            .collect();

        let mut used = vec![false; agents.len()];
        let mut out = Vec::new();

        for bead in ordered {
            let best = agents
                .iter()
                .enumerate()
                .filter(|(i, _)| !used[*i])
                .map(|(i, a)| (i, *a, self.raw_score(a, bead)))
                .max_by(|(_, _, x), (_, _, y)| {
                    x.partial_cmp(y).unwrap_or(std::cmp::Ordering::Equal)
                });
            let Some((idx, agent, base)) = best else {
                break;
            };

            let mut boosted = base;
            if bead.priority <= 1 {
                boosted += 0.10;
            }
            let unblocks = bead.unblocks.len();
            if unblocks >= 1 {
                boosted += (0.05 * unblocks as f64).min(0.15);
            }
            let boosted = boosted.min(1.0);

            if boosted < self.config.min_confidence {
                continue;
            }
            used[idx] = true;

            let note = if unblocks > 0 {
                format!("unblocks {unblocks} beads; dependency order")
            } else {
                "dependency order".to_string()
            };
            out.push(Assignment {
                bead: (**bead).clone(),
                agent_id: agent.id.clone(),
                score: boosted,
                confidence: boosted,
                reason: self.reason(agent, bead, &note),
            });
        }
        out
    }

    /// Deterministic rotation: bead i to agent i mod len, fixed scores.
    fn assign_round_robin(beads: &[&Bead], agents: &[&AgentSnapshot]) -> Vec<Assignment> {
        beads
            .iter()
            .enumerate()
            .map(|(i, bead)| {
                let slot = i % agents.len();
                let agent = agents[slot];
                Assignment {
                    bead: (*bead).clone(),
                    agent_id: agent.id.clone(),
                    score: 1.0,
                    confidence: 1.0,
                    reason: format!("round-robin agent {}", slot + 1),
                }
            })
            .collect()
    }

    /// Semicolon-joined reason phrases: capability tier, priority, context
    /// pressure, strategy note.
    fn reason(&self, agent: &AgentSnapshot, bead: &Bead, note: &str) -> String {
        let capability = self.matrix.score(agent.kind, bead.task_type);
        let mut phrases = Vec::new();

        if capability >= 0.85 {
            phrases.push(format!("{} excels at {}", agent.kind, bead.task_type));
        } else if capability >= 0.70 {
            phrases.push(format!("{} is good at {}", agent.kind, bead.task_type));
        }

        match bead.priority {
            0 => phrases.push("critical priority".to_string()),
            1 => phrases.push("high priority".to_string()),
            _ => {}
        }

        if agent.context_usage >= 0.5 {
            phrases.push(format!(
                "context {:.0}% used",
                agent.context_usage * 100.0
            ));
        }

        phrases.push(note.to_string());
        phrases.join("; ")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::types::TaskType;

    fn matcher_over(matrix: &CapabilityMatrix) -> Matcher<'_> {
        Matcher::new(matrix, MatcherConfig::default())
    }

    fn feature_bead(id: &str, priority: i64) -> Bead {
        Bead::new(id, format!("implement {id}"), priority)
    }

    fn count_by_agent(assignments: &[Assignment]) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for a in assignments {
            *counts.entry(a.agent_id.clone()).or_insert(0) += 1;
        }
        counts
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Preflight
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[test]
    fn test_busy_agents_filtered_out() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let busy = AgentSnapshot {
            idle: false,
            ..AgentSnapshot::idle("a", AgentKind::Claude)
        };
        let beads = [feature_bead("bd-1", 2)];
        assert!(matcher.assign(&beads, &[busy], Strategy::Quality).is_empty());
    }

    #[test]
    fn test_context_ceiling_is_inclusive() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let at_limit = AgentSnapshot {
            context_usage: 0.9,
            ..AgentSnapshot::idle("a", AgentKind::Claude)
        };
        let beads = [feature_bead("bd-1", 2)];
        // 0.9 usage is allowed; score = 0.85 * 0.1 = 0.085 < 0.3, so
        // quality drops it but speed's half-gate (0.15) also drops it.
        // Use balanced with a permissive gate to see eligibility itself.
        let config = MatcherConfig {
            min_confidence: 0.05,
            ..MatcherConfig::default()
        };
        let permissive = Matcher::new(&matrix, config);
        let result = permissive.assign(&beads, &[at_limit], Strategy::Quality);
        assert_eq!(result.len(), 1);
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Scenario: balanced distribution
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[test]
    fn test_balanced_distributes_evenly() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents = [
            AgentSnapshot::idle("a", AgentKind::Claude),
            AgentSnapshot::idle("b", AgentKind::Claude),
        ];
        let beads: Vec<Bead> = (1..=4).map(|i| feature_bead(&format!("bd-{i}"), 2)).collect();

        let result = matcher.assign(&beads, &agents, Strategy::Balanced);
        assert_eq!(result.len(), 4);

        let counts = count_by_agent(&result);
        assert_eq!(counts.get("a"), Some(&2));
        assert_eq!(counts.get("b"), Some(&2));

        let expected = matrix.score(AgentKind::Claude, TaskType::Feature);
        for a in &result {
            assert!((a.score - expected).abs() < f64::EPSILON);
        }
    }

    #[test]
    fn test_balanced_spread_never_exceeds_one() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents: Vec<AgentSnapshot> = (0..3)
            .map(|i| AgentSnapshot::idle(format!("a{i}"), AgentKind::Codex))
            .collect();
        let beads: Vec<Bead> = (0..11).map(|i| feature_bead(&format!("bd-{i}"), 2)).collect();

        let result = matcher.assign(&beads, &agents, Strategy::Balanced);
        assert_eq!(result.len(), 11);
        let counts = count_by_agent(&result);
        let max = counts.values().max().copied().unwrap_or(0);
        let min = counts.values().min().copied().unwrap_or(0);
        assert!(max - min <= 1, "spread {max}-{min} too wide");
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Scenario: round-robin
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[test]
    fn test_round_robin_uneven_counts() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents: Vec<AgentSnapshot> = (1..=4)
            .map(|i| AgentSnapshot::idle(format!("a{i}"), AgentKind::Gemini))
            .collect();
        let beads: Vec<Bead> = (0..13).map(|i| feature_bead(&format!("bd-{i}"), 2)).collect();

        let result = matcher.assign(&beads, &agents, Strategy::RoundRobin);
        assert_eq!(result.len(), 13);

        let counts = count_by_agent(&result);
        assert_eq!(counts.get("a1"), Some(&4));
        assert_eq!(counts.get("a2"), Some(&3));
        assert_eq!(counts.get("a3"), Some(&3));
        assert_eq!(counts.get("a4"), Some(&3));

        for (i, a) in result.iter().enumerate() {
            assert!((a.score - 1.0).abs() < f64::EPSILON);
            assert!((a.confidence - 1.0).abs() < f64::EPSILON);
            assert!(a.reason.contains("round-robin"));
            assert!(a.reason.contains(&format!("agent {}", (i % 4) + 1)));
        }
    }

    #[test]
    fn test_round_robin_deterministic() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents: Vec<AgentSnapshot> = (0..3)
            .map(|i| AgentSnapshot::idle(format!("a{i}"), AgentKind::Claude))
            .collect();
        let beads: Vec<Bead> = (0..7).map(|i| feature_bead(&format!("bd-{i}"), 2)).collect();

        let first = matcher.assign(&beads, &agents, Strategy::RoundRobin);
        let second = matcher.assign(&beads, &agents, Strategy::RoundRobin);
        let third = matcher.assign(&beads, &agents, Strategy::RoundRobin);
        assert_eq!(first, second);
        assert_eq!(second, third);
    }

    #[test]
    fn test_round_robin_counts_follow_ceiling_formula() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let n = 10usize;
        let a = 4usize;
        let agents: Vec<AgentSnapshot> = (0..a)
            .map(|i| AgentSnapshot::idle(format!("a{i}"), AgentKind::Claude))
            .collect();
        let beads: Vec<Bead> = (0..n).map(|i| feature_bead(&format!("bd-{i}"), 2)).collect();

        let result = matcher.assign(&beads, &agents, Strategy::RoundRobin);
        let counts = count_by_agent(&result);
        for i in 0..a {
            let expected = (n - i).div_ceil(a);
            assert_eq!(counts.get(&format!("a{i}")), Some(&expected), "agent {i}");
        }
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Scenario: dependency boosts blockers
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[test]
    fn test_dependency_orders_by_priority_then_unblocks() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents = [
            AgentSnapshot::idle("a", AgentKind::Claude),
            AgentSnapshot::idle("b", AgentKind::Claude),
        ];
        let b1 = Bead::new("b1", "some work", 2);
        let b2 = Bead::new("b2", "some work", 2).with_unblocks(vec![
            "b3".to_string(),
            "b4".to_string(),
            "b5".to_string(),
        ]);
        let b3 = Bead::new("b3", "some work", 0);

        let result = matcher.assign(&[b1, b2, b3], &agents, Strategy::Dependency);
        assert_eq!(result.len(), 2, "one bead per agent under dependency");
        assert_eq!(result[0].bead.id, "b3", "priority 0 wins");
        assert_eq!(result[1].bead.id, "b2", "unblocks count breaks the tie");
        assert!(result[1].reason.contains("unblocks 3 beads"));
    }

    #[test]
    fn test_dependency_bonuses_clamped_at_one() {
        let matrix = CapabilityMatrix::new();
        matrix.set_override(AgentKind::Claude, TaskType::Task, 1.0);
        let matcher = matcher_over(&matrix);
        let agents = [AgentSnapshot::idle("a", AgentKind::Claude)];
        let bead = Bead::new("b1", "some work", 0).with_unblocks(vec!["x".to_string(); 9]);

        let result = matcher.assign(&[bead], &agents, Strategy::Dependency);
        assert_eq!(result.len(), 1);
        assert!(result[0].score <= 1.0);
        assert!((result[0].score - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dependency_unblocks_bonus_caps_at_fifteen_points() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents = [AgentSnapshot::idle("a", AgentKind::Claude)];
        // Base: fallback 0.5 (task type "task"). 5 unblocks would be
        // +0.25 uncapped; the cap keeps it at +0.15.
        let bead = Bead::new("b1", "some work", 2).with_unblocks(vec!["x".to_string(); 5]);

        let result = matcher.assign(&[bead], &agents, Strategy::Dependency);
        assert_eq!(result.len(), 1);
        assert!((result[0].score - 0.65).abs() < 1e-9);
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Scenario: context filters an agent out
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[test]
    fn test_context_over_limit_excluded_until_ceiling_raised() {
        let matrix = CapabilityMatrix::new();
        let hot = AgentSnapshot {
            context_usage: 0.91,
            ..AgentSnapshot::idle("a", AgentKind::Claude)
        };
        let cool = AgentSnapshot {
            context_usage: 0.50,
            ..AgentSnapshot::idle("b", AgentKind::Claude)
        };
        let beads = [feature_bead("bd-1", 2)];

        let default_matcher = matcher_over(&matrix);
        let result = default_matcher.assign(&beads, &[hot.clone(), cool.clone()], Strategy::Quality);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].agent_id, "b");

        let raised = Matcher::new(
            &matrix,
            MatcherConfig {
                max_context_usage: 0.95,
                ..MatcherConfig::default()
            },
        );
        let result = raised.assign(&beads, &[hot, cool], Strategy::Quality);
        assert_eq!(result.len(), 1);
        // Both eligible; the cooler agent's higher availability wins.
        assert_eq!(result[0].agent_id, "b");
        assert!(result[0].reason.contains("context 50% used"));
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Quality / speed / capability
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[test]
    fn test_quality_picks_highest_capability() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents = [
            AgentSnapshot::idle("claude", AgentKind::Claude),
            AgentSnapshot::idle("codex", AgentKind::Codex),
        ];
        // Codex has the higher bug capability (0.90 vs 0.80).
        let beads = [Bead::new("bd-1", "fix the crash", 2)];

        let result = matcher.assign(&beads, &agents, Strategy::Quality);
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].agent_id, "codex");
    }

    #[test]
    fn test_speed_at_most_one_per_agent_and_biased_confidence() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents = [
            AgentSnapshot::idle("a", AgentKind::Claude),
            AgentSnapshot::idle("b", AgentKind::Codex),
        ];
        let beads: Vec<Bead> = (0..5).map(|i| feature_bead(&format!("bd-{i}"), 2)).collect();

        let result = matcher.assign(&beads, &agents, Strategy::Speed);
        assert_eq!(result.len(), 2);
        let counts = count_by_agent(&result);
        assert!(counts.values().all(|&c| c == 1));
        for a in &result {
            assert!((a.confidence - (a.score + 0.9) / 2.0).abs() < 1e-9);
            assert!(a.confidence >= a.score);
        }
    }

    #[test]
    fn test_speed_uses_half_threshold() {
        let matrix = CapabilityMatrix::new();
        matrix.set_override(AgentKind::Claude, TaskType::Feature, 0.2);
        let matcher = matcher_over(&matrix);
        let agents = [AgentSnapshot::idle("a", AgentKind::Claude)];
        let beads = [feature_bead("bd-1", 2)];

        // 0.2 < 0.3 min_confidence, so quality drops it...
        assert!(matcher.assign(&beads, &agents, Strategy::Quality).is_empty());
        // ...but 0.2 >= 0.15 half-threshold, so speed keeps it.
        assert_eq!(matcher.assign(&beads, &agents, Strategy::Speed).len(), 1);
    }

    #[test]
    fn test_exclusive_strategies_never_reuse_agents() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents: Vec<AgentSnapshot> = (0..3)
            .map(|i| AgentSnapshot::idle(format!("a{i}"), AgentKind::Claude))
            .collect();
        let beads: Vec<Bead> = (0..8).map(|i| feature_bead(&format!("bd-{i}"), 2)).collect();

        for strategy in [Strategy::Speed, Strategy::Quality, Strategy::Dependency] {
            let result = matcher.assign(&beads, &agents, strategy);
            let counts = count_by_agent(&result);
            assert!(
                counts.values().all(|&c| c == 1),
                "{strategy} reused an agent"
            );
        }
    }

    #[test]
    fn test_capability_strategy_allows_agent_reuse() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        // Claude dominates refactor; every bead should land on it.
        let agents = [
            AgentSnapshot::idle("claude", AgentKind::Claude),
            AgentSnapshot::idle("codex", AgentKind::Codex),
        ];
        let beads: Vec<Bead> = (0..3)
            .map(|i| Bead::new(format!("bd-{i}"), "refactor module", 2))
            .collect();

        let result = matcher.assign(&beads, &agents, Strategy::Capability);
        assert_eq!(result.len(), 3);
        assert!(result.iter().all(|a| a.agent_id == "claude"));
    }

    #[test]
    fn test_all_emitted_scores_meet_threshold() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents = [
            AgentSnapshot::idle("a", AgentKind::Claude),
            AgentSnapshot::idle("b", AgentKind::Gemini),
        ];
        let beads: Vec<Bead> = (0..6).map(|i| feature_bead(&format!("bd-{i}"), i)).collect();

        for strategy in [
            Strategy::Capability,
            Strategy::Balanced,
            Strategy::Quality,
            Strategy::Dependency,
        ] {
            for a in matcher.assign(&beads, &agents, strategy) {
                assert!(
                    a.score >= MatcherConfig::default().min_confidence,
                    "{strategy}: {} below gate",
                    a.score
                );
            }
        }
    }

    #[test]
    fn test_reason_tier_phrases() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents = [AgentSnapshot::idle("a", AgentKind::Claude)];
        // Claude/refactor capability 0.95 -> "excels at".
        let beads = [Bead::new("bd-1", "refactor the parser", 0)];

        let result = matcher.assign(&beads, &agents, Strategy::Quality);
        assert_eq!(result.len(), 1);
        assert!(result[0].reason.contains("claude excels at refactor"));
        assert!(result[0].reason.contains("critical priority"));
    }

    #[test]
    fn test_nonempty_when_anything_is_matchable() {
        let matrix = CapabilityMatrix::new();
        let matcher = matcher_over(&matrix);
        let agents = [AgentSnapshot::idle("a", AgentKind::Claude)];
        let beads = [feature_bead("bd-1", 2)];

        for strategy in [
            Strategy::Capability,
            Strategy::Balanced,
            Strategy::Speed,
            Strategy::Quality,
            Strategy::Dependency,
            Strategy::RoundRobin,
        ] {
            assert!(
                !matcher.assign(&beads, &agents, strategy).is_empty(),
                "{strategy} returned nothing"
            );
        }
    }
}
