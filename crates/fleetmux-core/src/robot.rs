//! Robot-mode JSON responses.
//!
//! Every robot operation returns a top-level object with `success`, a
//! flattened payload, optional `error`/`error_code`, and a `timestamp`.
//! Field names and types are stable contracts consumed by automated
//! drivers; optional fields are omitted when irrelevant and consumers
//! treat missing as default.

use serde::{Deserialize, Serialize};

use crate::{
    error::ErrorCode,
    status::PaneWorkStatus,
    types::{AgentKind, Recommendation, Strategy},
    Error,
};

/// Standard robot-mode envelope.
#[derive(Debug, Clone, Serialize)]
pub struct RobotResponse<T> {
    pub success: bool,
    #[serde(flatten)]
    pub payload: T,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> RobotResponse<T> {
    /// Successful envelope around a payload.
    pub fn ok(payload: T) -> Self {
        Self {
            success: true,
            payload,
            error: None,
            error_code: None,
            timestamp: chrono::Utc::now(),
        }
    }
}

impl<T: Default> RobotResponse<T> {
    /// Failure envelope carrying the error's code and message.
    #[must_use]
    pub fn from_error(err: &Error) -> Self {
        Self {
            success: false,
            payload: T::default(),
            error: Some(err.to_string()),
            error_code: Some(ErrorCode::as_str(err.code()).to_string()),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Payload for `--robot-status`: one entry per pane.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RobotStatus {
    pub session: String,
    pub panes: Vec<RobotPaneStatus>,
}

/// Status of one pane in `--robot-status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotPaneStatus {
    pub pane: String,
    pub agent_kind: AgentKind,
    pub is_working: bool,
    pub is_idle: bool,
    pub is_rate_limited: bool,
    pub is_context_low: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub context_remaining: Option<f64>,
    pub confidence: f64,
    pub recommendation: Recommendation,
    pub recommendation_reason: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_bead: Option<String>,
}

impl RobotPaneStatus {
    /// Build from a pane address and its inferred status.
    #[must_use]
    pub fn from_status(pane: impl Into<String>, status: &PaneWorkStatus) -> Self {
        Self {
            pane: pane.into(),
            agent_kind: status.agent_kind,
            is_working: status.is_working,
            is_idle: status.is_idle,
            is_rate_limited: status.is_rate_limited,
            is_context_low: status.is_context_low,
            context_remaining: status.context_remaining,
            confidence: status.confidence,
            recommendation: status.recommendation,
            recommendation_reason: status.recommendation_reason.clone(),
            current_bead: None,
        }
    }
}

/// Payload for `--robot-is-working`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RobotIsWorking {
    pub pane: String,
    pub is_working: bool,
    pub confidence: f64,
}

/// Payload for `--robot-smart-restart`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RobotSmartRestart {
    pub pane: String,
    pub restarted: bool,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub approval_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub dry_run: Option<bool>,
}

/// Payload for `--robot-agent-health`: one row per agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RobotAgentHealth {
    pub session: String,
    pub agents: Vec<RobotAgentRow>,
}

/// One agent in `--robot-agent-health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotAgentRow {
    pub agent_id: String,
    pub agent_kind: AgentKind,
    pub pane: String,
    pub status: String,
    pub last_seen: chrono::DateTime<chrono::Utc>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub current_bead: Option<String>,
}

/// Payload for `--robot-bulk-assign`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RobotBulkAssign {
    pub session: String,
    pub strategy: Option<Strategy>,
    pub assigned: Vec<RobotAssignmentRow>,
    pub skipped: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub allocation_source: Option<String>,
}

/// One assignment in `--robot-bulk-assign`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotAssignmentRow {
    pub bead_id: String,
    pub agent_id: String,
    pub pane: String,
    pub score: f64,
    pub confidence: f64,
    pub reason: String,
}

/// Payload for `--robot-format`: describes the robot-mode contract itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RobotFormat {
    pub format: String,
    pub version: String,
    pub operations: Vec<String>,
}

impl Default for RobotFormat {
    fn default() -> Self {
        Self {
            format: "json".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            operations: [
                "robot-status",
                "robot-is-working",
                "robot-smart-restart",
                "robot-agent-health",
                "robot-bulk-assign",
                "robot-format",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_envelope_shape() {
        let response = RobotResponse::ok(RobotIsWorking {
            pane: "%1".to_string(),
            is_working: true,
            confidence: 0.9,
        });
        let json = serde_json::to_value(&response).unwrap_or_default();

        assert_eq!(json["success"], true);
        assert_eq!(json["pane"], "%1");
        assert_eq!(json["is_working"], true);
        assert!(json.get("error").is_none());
        assert!(json.get("error_code").is_none());
        assert!(json.get("timestamp").is_some());
    }

    #[test]
    fn test_error_envelope_shape() {
        let err = Error::NotFound("session 'x'".to_string());
        let response = RobotResponse::<RobotIsWorking>::from_error(&err);
        let json = serde_json::to_value(&response).unwrap_or_default();

        assert_eq!(json["success"], false);
        assert_eq!(json["error_code"], "NOT_FOUND");
        assert!(json["error"]
            .as_str()
            .unwrap_or_default()
            .contains("session 'x'"));
    }

    #[test]
    fn test_optional_fields_omitted() {
        let restart = RobotSmartRestart {
            pane: "%2".to_string(),
            restarted: true,
            reason: "idle".to_string(),
            approval_id: None,
            dry_run: None,
        };
        let json = serde_json::to_value(RobotResponse::ok(restart)).unwrap_or_default();
        assert!(json.get("approval_id").is_none());
        assert!(json.get("dry_run").is_none());
    }

    #[test]
    fn test_missing_optional_fields_parse_as_default() {
        let parsed: std::result::Result<RobotSmartRestart, _> = serde_json::from_str(
            r#"{"pane": "%1", "restarted": false, "reason": "working"}"#,
        );
        assert!(parsed.is_ok());
        if let Ok(restart) = parsed {
            assert_eq!(restart.approval_id, None);
            assert_eq!(restart.dry_run, None);
        }
    }

    #[test]
    fn test_format_lists_all_operations() {
        let format = RobotFormat::default();
        assert_eq!(format.operations.len(), 6);
        assert!(format.operations.contains(&"robot-bulk-assign".to_string()));
    }
}
