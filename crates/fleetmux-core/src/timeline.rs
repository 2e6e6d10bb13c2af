//! Per-session timeline files for the external exporter.
//!
//! One JSONL file per session under the timeline directory; each line is a
//! single agent state transition. The exporter consumes these files; the
//! core only appends and reads them back.

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;

use crate::{types::AgentKind, Error, Result};

/// One timeline record: an agent state transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineRecord {
    pub agent_id: String,
    pub agent_kind: AgentKind,
    pub session_id: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub previous_state: Option<String>,
    /// Wall-clock instant, nanoseconds since the epoch.
    pub timestamp_ns: i64,
    /// Time spent in the previous state, nanoseconds.
    pub duration_ns: i64,
    #[serde(default)]
    pub details: HashMap<String, String>,
}

/// Appends timeline records to per-session JSONL files.
#[derive(Debug, Clone)]
pub struct TimelineWriter {
    dir: PathBuf,
}

impl TimelineWriter {
    /// Writer rooted at the given directory (created on first append).
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        // Session ids come from operators; keep the filename tame.
        let safe: String = session_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.jsonl"))
    }

    /// Append one record to the session's timeline.
    pub async fn append(&self, record: &TimelineRecord) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::IoError(format!("failed to create timeline dir: {e}")))?;

        let mut line = serde_json::to_string(record)
            .map_err(|e| Error::ParseError(format!("failed to encode timeline record: {e}")))?;
        line.push('\n');

        let path = self.session_path(&record.session_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| Error::IoError(format!("failed to open {}: {e}", path.display())))?;
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| Error::IoError(format!("failed to append timeline record: {e}")))?;
        file.flush()
            .await
            .map_err(|e| Error::IoError(format!("failed to flush timeline file: {e}")))
    }

    /// Read a session's full timeline, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `Error::ParseError` naming the offending line number when a
    /// record is malformed. A missing file is an empty timeline.
    pub async fn read_all(&self, session_id: &str) -> Result<Vec<TimelineRecord>> {
        let path = self.session_path(session_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::IoError(format!(
                    "failed to read {}: {e}",
                    path.display()
                )))
            }
        };

        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(idx, line)| {
                serde_json::from_str(line).map_err(|e| {
                    Error::ParseError(format!("timeline line {}: {e}", idx + 1))
                })
            })
            .collect()
    }
}
