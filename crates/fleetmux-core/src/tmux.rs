//! Terminal multiplexer access: pane enumeration, capture, and input.
//!
//! All operations shell out to the multiplexer binary (tmux by default) via
//! `tokio::process::Command` and return `Result`; non-zero exit codes become
//! typed errors. Pane classification is pure and unit-tested without a
//! running multiplexer.

use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use crate::{types::AgentKind, Error, Result};

/// Format string handed to `list-panes -F`; fields split on `|`.
const PANE_FORMAT: &str =
    "#{pane_index}|#{pane_id}|#{pane_title}|#{pane_width}|#{pane_height}|#{pane_pid}";

/// Delay before injecting a prompt, letting the pane's readline settle.
const INJECT_QUIESCENCE: Duration = Duration::from_millis(500);

/// One rectangle inside a multiplexer session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pane {
    /// Index within the window; unique small non-negative integer.
    pub index: u32,
    /// Stable pane id (e.g. `%5`).
    pub id: String,
    /// Pane title as reported by the multiplexer.
    pub title: String,
    /// Width in cells.
    pub width: u32,
    /// Height in cells.
    pub height: u32,
    /// Agent family classified from the title.
    pub agent_kind: AgentKind,
    /// Shell process id of the pane.
    pub pid: u32,
    /// First child of the pane shell, when one could be determined.
    pub child_pid: Option<u32>,
}

/// Classify the agent family from a pane title or command prefix.
///
/// Case-insensitive and tolerant of extra prefixes/suffixes: any title
/// containing `claude`/`cc`, `codex`/`cod`, or `gemini`/`gmi` maps to the
/// corresponding kind; everything else is `User`.
#[must_use]
pub fn classify_agent_kind(title: &str) -> AgentKind {
    let lowered = title.to_lowercase();
    let first_word = lowered
        .split(|c: char| !c.is_alphanumeric())
        .find(|w| !w.is_empty())
        .unwrap_or("");

    if lowered.contains("claude") || first_word == "cc" {
        AgentKind::Claude
    } else if lowered.contains("codex") || first_word == "cod" {
        AgentKind::Codex
    } else if lowered.contains("gemini") || first_word == "gmi" {
        AgentKind::Gemini
    } else {
        AgentKind::User
    }
}

/// Parse one line of `list-panes -F` output.
///
/// # Errors
///
/// Returns `Error::ParseError` when the line does not have the six expected
/// fields or numeric fields fail to parse.
pub fn parse_pane_line(line: &str) -> Result<Pane> {
    let fields: Vec<&str> = line.splitn(6, '|').collect();
    let [index, id, title, width, height, pid] = fields.as_slice() else {
        return Err(Error::ParseError(format!(
            "expected 6 pane fields, got {}: {line}",
            fields.len()
        )));
    };

    let parse_u32 = |name: &str, value: &str| {
        value
            .trim()
            .parse::<u32>()
            .map_err(|e| Error::ParseError(format!("invalid pane {name} '{value}': {e}")))
    };

    Ok(Pane {
        index: parse_u32("index", index)?,
        id: (*id).to_string(),
        title: (*title).to_string(),
        width: parse_u32("width", width)?,
        height: parse_u32("height", height)?,
        agent_kind: classify_agent_kind(title),
        pid: parse_u32("pid", pid)?,
        child_pid: None,
    })
}

/// Handle to the terminal multiplexer.
#[derive(Debug, Clone)]
pub struct Multiplexer {
    program: String,
    timeout: Duration,
}

impl Multiplexer {
    /// Create a handle using the given binary name and per-command deadline.
    #[must_use]
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Whether the multiplexer binary is installed.
    #[must_use]
    pub fn is_available(&self) -> bool {
        which::which(&self.program).is_ok()
    }

    /// Run a multiplexer subcommand, enforcing the deadline.
    async fn run(&self, args: &[&str]) -> Result<String> {
        if !self.is_available() {
            return Err(Error::MultiplexerAbsent(format!(
                "'{}' not found in PATH",
                self.program
            )));
        }

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program).args(args).output(),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "{} {} exceeded {:?}",
                self.program,
                args.first().unwrap_or(&""),
                self.timeout
            ))
        })?
        .map_err(|e| Error::Command(format!("failed to execute {}: {e}", self.program)))?;

        if output.status.success() {
            String::from_utf8(output.stdout)
                .map_err(|e| Error::Command(format!("invalid UTF-8 in {} output: {e}", self.program)))
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(Error::Command(format!(
                "{} {} failed: {}",
                self.program,
                args.first().unwrap_or(&""),
                stderr.trim()
            )))
        }
    }

    /// List the panes of a session, newest classification applied.
    ///
    /// # Errors
    ///
    /// Returns `Error::MultiplexerAbsent` when the binary is missing,
    /// `Error::Command` when the session does not exist.
    pub async fn list_panes(&self, session: &str) -> Result<Vec<Pane>> {
        let stdout = self
            .run(&["list-panes", "-t", session, "-F", PANE_FORMAT])
            .await?;

        stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(parse_pane_line)
            .collect()
    }

    /// Whether the named session exists.
    ///
    /// # Errors
    ///
    /// Returns `Error::MultiplexerAbsent` when the binary is missing. A
    /// missing session is `Ok(false)`, not an error.
    pub async fn has_session(&self, session: &str) -> Result<bool> {
        if !self.is_available() {
            return Err(Error::MultiplexerAbsent(format!(
                "'{}' not found in PATH",
                self.program
            )));
        }

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(&self.program)
                .args(["has-session", "-t", session])
                .output(),
        )
        .await
        .map_err(|_| Error::Timeout(format!("has-session exceeded {:?}", self.timeout)))?
        .map_err(|e| Error::Command(format!("failed to execute {}: {e}", self.program)))?;

        Ok(output.status.success())
    }

    /// Create a detached session with a fixed size.
    pub async fn create_session(&self, session: &str, width: u32, height: u32) -> Result<()> {
        self.run(&[
            "new-session",
            "-d",
            "-s",
            session,
            "-x",
            &width.to_string(),
            "-y",
            &height.to_string(),
        ])
        .await
        .map(|_| ())
    }

    /// Split the current window of a session, producing a new pane.
    pub async fn split_window(&self, session: &str) -> Result<()> {
        self.run(&["split-window", "-t", session]).await.map(|_| ())
    }

    /// Kill a session and everything in it.
    pub async fn kill_session(&self, session: &str) -> Result<()> {
        self.run(&["kill-session", "-t", session]).await.map(|_| ())
    }

    /// Return the most recent `lines` lines of a pane's scrollback.
    ///
    /// Fewer lines than requested may exist; whatever is present is
    /// returned. A failed capture is a retryable soft error for callers.
    pub async fn capture_pane(&self, target: &str, lines: u32) -> Result<String> {
        self.run(&[
            "capture-pane",
            "-p",
            "-t",
            target,
            "-S",
            &format!("-{lines}"),
        ])
        .await
    }

    /// Send literal keys to a pane, optionally pressing Enter afterwards.
    pub async fn send_keys(&self, target: &str, keys: &str, press_enter: bool) -> Result<()> {
        self.run(&["send-keys", "-t", target, "-l", keys]).await?;
        if press_enter {
            self.run(&["send-keys", "-t", target, "Enter"]).await?;
        }
        Ok(())
    }

    /// Inject a prompt: wait for the pane to quiesce, then send text + Enter.
    pub async fn inject_prompt(&self, target: &str, text: &str) -> Result<()> {
        tokio::time::sleep(INJECT_QUIESCENCE).await;
        self.send_keys(target, text, true).await
    }

    /// Send an interrupt (Ctrl-C) keystroke to a pane.
    pub async fn send_interrupt(&self, target: &str) -> Result<()> {
        self.run(&["send-keys", "-t", target, "C-c"]).await.map(|_| ())
    }

    /// Shell process id of a pane via `display-message`.
    pub async fn pane_pid(&self, target: &str) -> Result<u32> {
        let stdout = self
            .run(&["display-message", "-p", "-t", target, "#{pane_pid}"])
            .await?;
        stdout
            .trim()
            .parse::<u32>()
            .map_err(|e| Error::ParseError(format!("invalid pane pid '{}': {e}", stdout.trim())))
    }

    /// Best-effort lookup of the pane shell's first child process.
    ///
    /// Returns `None` when `pgrep` is unavailable or reports no children;
    /// this is informational only and never an error.
    pub async fn child_pid(&self, shell_pid: u32) -> Option<u32> {
        let output = Command::new("pgrep")
            .args(["-P", &shell_pid.to_string()])
            .output()
            .await
            .ok()?;
        if !output.status.success() {
            return None;
        }
        String::from_utf8(output.stdout)
            .ok()?
            .lines()
            .next()?
            .trim()
            .parse()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Classification (pure)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[test]
    fn test_classify_claude_variants() {
        assert_eq!(classify_agent_kind("claude"), AgentKind::Claude);
        assert_eq!(classify_agent_kind("CLAUDE"), AgentKind::Claude);
        assert_eq!(classify_agent_kind("cc-worker-3"), AgentKind::Claude);
        assert_eq!(classify_agent_kind("my-claude-pane"), AgentKind::Claude);
    }

    #[test]
    fn test_classify_codex_variants() {
        assert_eq!(classify_agent_kind("codex"), AgentKind::Codex);
        assert_eq!(classify_agent_kind("cod_2"), AgentKind::Codex);
        assert_eq!(classify_agent_kind("Codex Agent"), AgentKind::Codex);
    }

    #[test]
    fn test_classify_gemini_variants() {
        assert_eq!(classify_agent_kind("gemini"), AgentKind::Gemini);
        assert_eq!(classify_agent_kind("gmi:pane"), AgentKind::Gemini);
        assert_eq!(classify_agent_kind("GEMINI-cli"), AgentKind::Gemini);
    }

    #[test]
    fn test_classify_fallback_to_user() {
        assert_eq!(classify_agent_kind("zsh"), AgentKind::User);
        assert_eq!(classify_agent_kind(""), AgentKind::User);
        assert_eq!(classify_agent_kind("vim"), AgentKind::User);
        // "cc" must be the leading word, not a substring
        assert_eq!(classify_agent_kind("gcc-build"), AgentKind::User);
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Pane line parsing (pure)
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    #[test]
    fn test_parse_pane_line_valid() {
        let result = parse_pane_line("0|%3|claude|120|40|12345");
        assert!(result.is_ok());
        if let Ok(pane) = result {
            assert_eq!(pane.index, 0);
            assert_eq!(pane.id, "%3");
            assert_eq!(pane.title, "claude");
            assert_eq!(pane.width, 120);
            assert_eq!(pane.height, 40);
            assert_eq!(pane.agent_kind, AgentKind::Claude);
            assert_eq!(pane.pid, 12345);
            assert_eq!(pane.child_pid, None);
        }
    }

    #[test]
    fn test_parse_pane_line_title_may_contain_spaces() {
        let result = parse_pane_line("2|%7|codex worker two|80|24|999");
        assert!(result.is_ok());
        if let Ok(pane) = result {
            assert_eq!(pane.title, "codex worker two");
            assert_eq!(pane.agent_kind, AgentKind::Codex);
        }
    }

    #[test]
    fn test_parse_pane_line_too_few_fields() {
        let result = parse_pane_line("0|%3|claude");
        assert!(result.is_err());
        if let Err(Error::ParseError(msg)) = result {
            assert!(msg.contains("6 pane fields"));
        }
    }

    #[test]
    fn test_parse_pane_line_bad_number() {
        let result = parse_pane_line("x|%3|claude|120|40|12345");
        assert!(result.is_err());
        assert!(matches!(result, Err(Error::ParseError(_))));
    }

    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
    // Multiplexer absence
    // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

    fn absent_mux() -> Multiplexer {
        Multiplexer::new(
            "definitely-not-a-real-multiplexer",
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_list_panes_absent_binary() {
        let result = absent_mux().list_panes("main").await;
        assert!(matches!(result, Err(Error::MultiplexerAbsent(_))));
    }

    #[tokio::test]
    async fn test_has_session_absent_binary() {
        let result = absent_mux().has_session("main").await;
        assert!(matches!(result, Err(Error::MultiplexerAbsent(_))));
    }

    #[tokio::test]
    async fn test_capture_absent_binary() {
        let result = absent_mux().capture_pane("%1", 50).await;
        assert!(matches!(result, Err(Error::MultiplexerAbsent(_))));
    }

    #[tokio::test]
    async fn test_list_panes_missing_session_is_command_error() {
        let mux = Multiplexer::new("tmux", Duration::from_secs(5));
        if !mux.is_available() {
            // No tmux on this machine; absence path covered above.
            return;
        }
        let result = mux
            .list_panes("fleetmux-test-session-that-does-not-exist")
            .await;
        assert!(matches!(result, Err(Error::Command(_))));
    }
}
