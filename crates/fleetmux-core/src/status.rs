//! Pane state inference.
//!
//! Turns a captured output buffer into a `PaneWorkStatus`. Entirely pure:
//! the caller supplies the current capture, the previous capture, and how
//! long the buffer has been unchanged. Rules apply in a fixed order and the
//! first match wins:
//!
//! 1. rate-limit phrase present        -> rate limited
//! 2. context marker / low remaining   -> context low
//! 3. input prompt + quiet long enough -> idle (safe to restart)
//! 4. output changed since last look   -> working (do not interrupt)
//! 5. otherwise                        -> idle, low confidence

use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::types::{AgentKind, Recommendation};

/// Seconds a prompt must sit quiet before rule 3 declares the pane idle.
pub const PROMPT_QUIET_SECS: u64 = 10;

/// Remaining-context percentage below which a pane is context-low.
pub const CONTEXT_LOW_PCT: f64 = 10.0;

/// Phrases that indicate the provider is throttling the agent.
const RATE_LIMIT_PHRASES: &[&str] = &[
    "rate limit",
    "rate-limited",
    "quota exceeded",
    "try again in",
    "usage limit",
];

/// Phrases that indicate compaction is already underway. The routine
/// "Context left until auto-compact: N%" status line is NOT a marker; the
/// percentage it carries goes through the `CONTEXT_LOW_PCT` gate instead.
const CONTEXT_LOW_MARKERS: &[&str] = &["context low", "compacting conversation"];

/// Markers that the agent is sitting at an input prompt.
const PROMPT_MARKERS: &[&str] = &[
    "? for shortcuts",
    "type your message",
    "waiting for input",
    "\u{276f}",
];

static CONTEXT_PCT_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)context[^\n%]{0,40}?(\d{1,3})\s*%").ok());

static PCT_OF_CONTEXT_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"(?i)(\d{1,3})\s*%\s*(?:of\s+context|context\s+left)").ok());

/// Inferred work status for one pane.
#[derive(Debug, Clone, Serialize)]
pub struct PaneWorkStatus {
    pub agent_kind: AgentKind,
    pub is_working: bool,
    pub is_idle: bool,
    pub is_rate_limited: bool,
    pub is_context_low: bool,
    /// Remaining context window, percent in [0, 100], when parseable.
    pub context_remaining: Option<f64>,
    /// Heuristic confidence in [0, 1].
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub recommendation_reason: String,
}

/// Everything the inference needs about one observation.
#[derive(Debug, Clone, Copy)]
pub struct Observation<'a> {
    pub agent_kind: AgentKind,
    /// Current capture (last ~50 lines by default).
    pub text: &'a str,
    /// Previous capture, when one exists.
    pub previous: Option<&'a str>,
    /// Seconds since the buffer last changed.
    pub seconds_since_change: u64,
}

/// Extract the remaining-context percentage from a capture, if present.
#[must_use]
pub fn extract_context_remaining(text: &str) -> Option<f64> {
    [&*CONTEXT_PCT_RE, &*PCT_OF_CONTEXT_RE]
        .into_iter()
        .flatten()
        .find_map(|re| {
            re.captures(text)
                .and_then(|c| c.get(1))
                .and_then(|m| m.as_str().parse::<f64>().ok())
        })
        .filter(|pct| (0.0..=100.0).contains(pct))
}

fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}

/// Infer a pane's work status from one observation.
#[must_use]
pub fn analyze_output(obs: &Observation<'_>) -> PaneWorkStatus {
    let lowered = obs.text.to_lowercase();
    let context_remaining = extract_context_remaining(obs.text);

    let base = PaneWorkStatus {
        agent_kind: obs.agent_kind,
        is_working: false,
        is_idle: false,
        is_rate_limited: false,
        is_context_low: false,
        context_remaining,
        confidence: 0.0,
        recommendation: Recommendation::Unknown,
        recommendation_reason: String::new(),
    };

    // Rule 1: provider throttling.
    if contains_any(&lowered, RATE_LIMIT_PHRASES) {
        return PaneWorkStatus {
            is_rate_limited: true,
            confidence: 0.9,
            recommendation: Recommendation::RateLimitedWait,
            recommendation_reason: "rate limit phrase in output".to_string(),
            ..base
        };
    }

    // Rule 2: context exhaustion.
    let context_low_marker = contains_any(&lowered, CONTEXT_LOW_MARKERS);
    let context_low_pct = context_remaining.is_some_and(|pct| pct < CONTEXT_LOW_PCT);
    if context_low_marker || context_low_pct {
        return PaneWorkStatus {
            is_context_low: true,
            confidence: 0.85,
            recommendation: Recommendation::ContextLowRestart,
            recommendation_reason: if context_low_marker {
                "context-low marker in output".to_string()
            } else {
                format!(
                    "context remaining {:.0}% below {CONTEXT_LOW_PCT:.0}%",
                    context_remaining.unwrap_or(0.0)
                )
            },
            ..base
        };
    }

    // Rule 3: input prompt sitting quiet.
    let at_prompt = contains_any(&lowered, PROMPT_MARKERS);
    if at_prompt && obs.seconds_since_change >= PROMPT_QUIET_SECS {
        return PaneWorkStatus {
            is_idle: true,
            confidence: 0.8,
            recommendation: Recommendation::SafeToRestart,
            recommendation_reason: format!(
                "input prompt unchanged for {}s",
                obs.seconds_since_change
            ),
            ..base
        };
    }

    // Rule 4: output changed since the previous capture.
    let changed = obs.previous.is_some_and(|prev| prev != obs.text);
    if changed {
        return PaneWorkStatus {
            is_working: true,
            confidence: 0.9,
            recommendation: Recommendation::DoNotInterrupt,
            recommendation_reason: "output changed since previous capture".to_string(),
            ..base
        };
    }

    // Rule 5: nothing moved, no prompt seen long enough.
    PaneWorkStatus {
        is_idle: true,
        confidence: 0.5,
        recommendation: Recommendation::SafeToRestart,
        recommendation_reason: "no output change observed".to_string(),
        ..base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(text: &'static str) -> Observation<'static> {
        Observation {
            agent_kind: AgentKind::Claude,
            text,
            previous: None,
            seconds_since_change: 0,
        }
    }

    #[test]
    fn test_rate_limit_wins_over_everything() {
        let status = analyze_output(&Observation {
            seconds_since_change: 600,
            ..obs("You have hit your rate limit. Try again in 2 hours.\n\u{276f}")
        });
        assert!(status.is_rate_limited);
        assert!(!status.is_working);
        assert_eq!(status.recommendation, Recommendation::RateLimitedWait);
    }

    #[test]
    fn test_context_low_from_percentage() {
        let status = analyze_output(&obs("Context left until auto-compact: 7%"));
        assert!(status.is_context_low);
        assert_eq!(status.context_remaining, Some(7.0));
        assert_eq!(status.recommendation, Recommendation::ContextLowRestart);
    }

    #[test]
    fn test_context_percentage_extracted_but_not_low() {
        let status = analyze_output(&obs("Context left until auto-compact: 64%"));
        assert!(!status.is_context_low);
        assert_eq!(status.context_remaining, Some(64.0));
    }

    #[test]
    fn test_pct_of_context_form() {
        assert_eq!(extract_context_remaining("12% of context remaining"), Some(12.0));
        assert_eq!(extract_context_remaining("no numbers here"), None);
    }

    #[test]
    fn test_idle_requires_quiet_prompt() {
        let early = analyze_output(&Observation {
            seconds_since_change: 2,
            ..obs("? for shortcuts")
        });
        assert!(!early.is_idle || early.confidence < 0.8);

        let late = analyze_output(&Observation {
            seconds_since_change: 30,
            ..obs("? for shortcuts")
        });
        assert!(late.is_idle);
        assert_eq!(late.recommendation, Recommendation::SafeToRestart);
    }

    #[test]
    fn test_changed_output_means_working() {
        let status = analyze_output(&Observation {
            agent_kind: AgentKind::Codex,
            text: "compiling module b",
            previous: Some("compiling module a"),
            seconds_since_change: 0,
        });
        assert!(status.is_working);
        assert_eq!(status.recommendation, Recommendation::DoNotInterrupt);
    }

    #[test]
    fn test_unchanged_output_is_low_confidence_idle() {
        let status = analyze_output(&Observation {
            agent_kind: AgentKind::Gemini,
            text: "same",
            previous: Some("same"),
            seconds_since_change: 5,
        });
        assert!(status.is_idle);
        assert!(status.confidence <= 0.5);
    }

    #[test]
    fn test_working_and_idle_mutually_exclusive() {
        let cases = [
            "rate limit hit",
            "Context left: 5%",
            "? for shortcuts",
            "plain output",
        ];
        for text in cases {
            let status = analyze_output(&Observation {
                agent_kind: AgentKind::Claude,
                text,
                previous: Some("different"),
                seconds_since_change: 60,
            });
            assert!(
                !(status.is_working && status.is_idle),
                "working and idle both set for {text:?}"
            );
        }
    }

    #[test]
    fn test_rate_limited_implies_wait_recommendation() {
        for phrase in ["rate limit", "quota exceeded", "usage limit reached"] {
            let status = analyze_output(&Observation {
                agent_kind: AgentKind::Claude,
                text: phrase,
                previous: None,
                seconds_since_change: 0,
            });
            assert!(status.is_rate_limited, "{phrase}");
            assert_eq!(status.recommendation, Recommendation::RateLimitedWait);
        }
    }

    #[test]
    fn test_confidence_bounds() {
        let status = analyze_output(&obs("anything at all"));
        assert!((0.0..=1.0).contains(&status.confidence));
    }
}
