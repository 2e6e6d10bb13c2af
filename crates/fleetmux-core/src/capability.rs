//! Layered capability scores: agent kind x task type -> fitness in [0, 1].
//!
//! Three tiers, consulted newest-knowledge-first: learned (post-hoc
//! analysis), override (operator config), base (compiled-in defaults).
//! Anything unknown falls back to 0.5. Reads are lock-shared; the rare
//! writes serialize behind the same lock.

use std::{collections::HashMap, str::FromStr, sync::RwLock};

use crate::{
    config::OrchestratorConfig,
    types::{AgentKind, TaskType},
};

/// Score used when no tier knows the (kind, task) pair.
pub const FALLBACK_SCORE: f64 = 0.5;

/// Compiled-in defaults. Numbers express relative fitness, not benchmarks.
const BASE_SCORES: &[(AgentKind, TaskType, f64)] = &[
    (AgentKind::Claude, TaskType::Refactor, 0.95),
    (AgentKind::Claude, TaskType::Analysis, 0.90),
    (AgentKind::Claude, TaskType::Docs, 0.85),
    (AgentKind::Claude, TaskType::Bug, 0.80),
    (AgentKind::Claude, TaskType::Feature, 0.85),
    (AgentKind::Claude, TaskType::Testing, 0.75),
    (AgentKind::Claude, TaskType::Epic, 0.90),
    (AgentKind::Codex, TaskType::Refactor, 0.75),
    (AgentKind::Codex, TaskType::Analysis, 0.70),
    (AgentKind::Codex, TaskType::Docs, 0.70),
    (AgentKind::Codex, TaskType::Bug, 0.90),
    (AgentKind::Codex, TaskType::Feature, 0.90),
    (AgentKind::Codex, TaskType::Testing, 0.85),
    (AgentKind::Codex, TaskType::Epic, 0.60),
    (AgentKind::Gemini, TaskType::Refactor, 0.75),
    (AgentKind::Gemini, TaskType::Analysis, 0.85),
    (AgentKind::Gemini, TaskType::Docs, 0.90),
    (AgentKind::Gemini, TaskType::Bug, 0.75),
    (AgentKind::Gemini, TaskType::Feature, 0.80),
    (AgentKind::Gemini, TaskType::Testing, 0.80),
    (AgentKind::Gemini, TaskType::Epic, 0.75),
];

type ScoreKey = (AgentKind, TaskType);

#[derive(Debug, Default)]
struct MutableTiers {
    overrides: HashMap<ScoreKey, f64>,
    learned: HashMap<ScoreKey, f64>,
}

/// The capability lookup table. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct CapabilityMatrix {
    base: HashMap<ScoreKey, f64>,
    tiers: RwLock<MutableTiers>,
}

impl Default for CapabilityMatrix {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_unit(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

impl CapabilityMatrix {
    /// Matrix with compiled-in defaults and empty override/learned tiers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            base: BASE_SCORES
                .iter()
                .map(|&(kind, task, score)| ((kind, task), score))
                .collect(),
            tiers: RwLock::new(MutableTiers::default()),
        }
    }

    /// Matrix seeded with operator overrides from config.
    ///
    /// Unparseable kind or task names in the config are skipped; config
    /// validation has already bounds-checked the scores.
    #[must_use]
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        let matrix = Self::new();
        for (kind_name, tasks) in &config.capabilities {
            let Ok(kind) = AgentKind::from_str(kind_name) else {
                continue;
            };
            for (task_name, score) in tasks {
                if let Ok(task) = TaskType::from_str(task_name) {
                    matrix.set_override(kind, task, *score);
                }
            }
        }
        matrix
    }

    /// Look up the effective score: learned, else override, else base,
    /// else `FALLBACK_SCORE`. Always within [0, 1].
    #[must_use]
    pub fn score(&self, kind: AgentKind, task: TaskType) -> f64 {
        let key = (kind, task);
        self.tiers
            .read()
            .ok()
            .and_then(|tiers| {
                tiers
                    .learned
                    .get(&key)
                    .or_else(|| tiers.overrides.get(&key))
                    .copied()
            })
            .or_else(|| self.base.get(&key).copied())
            .unwrap_or(FALLBACK_SCORE)
    }

    /// Set an operator override, clamped to [0, 1].
    pub fn set_override(&self, kind: AgentKind, task: TaskType, score: f64) {
        if let Ok(mut tiers) = self.tiers.write() {
            tiers.overrides.insert((kind, task), clamp_unit(score));
        }
    }

    /// Set a learned score, clamped to [0, 1]. Learned beats override.
    pub fn set_learned(&self, kind: AgentKind, task: TaskType, score: f64) {
        if let Ok(mut tiers) = self.tiers.write() {
            tiers.learned.insert((kind, task), clamp_unit(score));
        }
    }

    /// Drop a learned score, re-exposing override/base for the pair.
    pub fn clear_learned(&self, kind: AgentKind, task: TaskType) {
        if let Ok(mut tiers) = self.tiers.write() {
            tiers.learned.remove(&(kind, task));
        }
    }
}
