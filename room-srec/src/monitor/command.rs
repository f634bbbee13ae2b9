//! Probe backed by an external program.
//!
//! The program is run once per check with `{room}` and `{secondary}`
//! substituted in its arguments. Exit status 0 with a URL on the first
//! stdout line means live (an optional second line is the title), exit
//! status 0 with empty output means offline, anything else is a failure.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use super::probe::{CaptureHandle, LiveStatus, ProbeError, StreamProbe};
use crate::{Error, Result};

/// Maximum stderr characters kept in a failure message.
const STDERR_TAIL_CHARS: usize = 512;

/// [`StreamProbe`] that shells out to a configured program.
#[derive(Debug, Clone)]
pub struct CommandProbe {
    program: String,
    args: Vec<String>,
}

impl CommandProbe {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// Parse a whitespace separated command line such as
    /// `check-live --room {room} --sec {secondary}`.
    pub fn from_command_line(line: &str) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::config("probe_command must not be empty"))?;
        Ok(Self::new(program, parts.collect()))
    }

    fn render_args(&self, room_id: &str, secondary_id: Option<&str>) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace("{room}", room_id)
                    .replace("{secondary}", secondary_id.unwrap_or(""))
            })
            .collect()
    }
}

/// Interpret the program's result.
fn parse_output(success: bool, stdout: &str, stderr: &str) -> std::result::Result<LiveStatus, ProbeError> {
    if !success {
        let stderr = stderr.trim();
        let start = stderr
            .char_indices()
            .rev()
            .nth(STDERR_TAIL_CHARS.saturating_sub(1))
            .map(|(i, _)| i)
            .unwrap_or(0);
        return Err(ProbeError::failed(if stderr.is_empty() {
            "probe program exited with failure".to_string()
        } else {
            stderr[start..].to_string()
        }));
    }

    let mut lines = stdout.lines().map(str::trim).filter(|l| !l.is_empty());
    match lines.next() {
        None => Ok(LiveStatus::Offline),
        Some(url) => {
            let mut handle = CaptureHandle::new(url);
            if let Some(title) = lines.next() {
                handle = handle.with_title(title);
            }
            Ok(LiveStatus::Live(handle))
        }
    }
}

#[async_trait]
impl StreamProbe for CommandProbe {
    async fn check(
        &self,
        room_id: &str,
        secondary_id: Option<&str>,
        timeout: Duration,
    ) -> std::result::Result<LiveStatus, ProbeError> {
        let args = self.render_args(room_id, secondary_id);
        trace!(room_id = %room_id, program = %self.program, ?args, "Running probe command");

        let child = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProbeError::failed(format!("failed to spawn {}: {}", self.program, e)))?;

        // Dropping the wait future on timeout kills the child.
        let output = tokio::time::timeout(timeout, child.wait_with_output())
            .await
            .map_err(|_| ProbeError::Timeout(timeout))?
            .map_err(|e| ProbeError::failed(format!("failed to wait for probe: {}", e)))?;

        parse_output(
            output.status.success(),
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_output_live() {
        let status = parse_output(true, "http://cdn/a.flv\nMy stream\n", "").unwrap();
        assert_eq!(
            status,
            LiveStatus::Live(CaptureHandle::new("http://cdn/a.flv").with_title("My stream"))
        );
    }

    #[test]
    fn test_parse_output_offline() {
        assert_eq!(parse_output(true, "\n  \n", "").unwrap(), LiveStatus::Offline);
    }

    #[test]
    fn test_parse_output_failure() {
        let err = parse_output(false, "", "  rate limited\n").unwrap_err();
        assert_eq!(err, ProbeError::failed("rate limited"));
        let err = parse_output(false, "", "").unwrap_err();
        assert!(matches!(err, ProbeError::Failed(_)));
    }

    #[test]
    fn test_from_command_line() {
        let probe = CommandProbe::from_command_line("check --room {room} --sec={secondary}").unwrap();
        assert_eq!(probe.program, "check");
        assert_eq!(
            probe.render_args("42", Some("s1")),
            vec!["--room", "42", "--sec=s1"]
        );
        assert_eq!(probe.render_args("42", None)[2], "--sec=");
        assert!(CommandProbe::from_command_line("   ").is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_probe_live() {
        let probe = CommandProbe::new(
            "sh",
            vec!["-c".to_string(), "echo http://cdn/{room}.flv".to_string()],
        );
        let status = probe
            .check("42", None, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(status, LiveStatus::Live(CaptureHandle::new("http://cdn/42.flv")));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_probe_timeout() {
        let probe = CommandProbe::new("sh", vec!["-c".to_string(), "sleep 5".to_string()]);
        let err = probe
            .check("42", None, Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(err, ProbeError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_command_probe_spawn_failure() {
        let probe = CommandProbe::new("/nonexistent/room-srec-probe", Vec::new());
        let err = probe
            .check("42", None, Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::Failed(_)));
    }
}
