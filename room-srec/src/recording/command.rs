//! Recorder backed by an external program.
//!
//! Each recording is one child process. `{url}`, `{output}` and `{title}`
//! are substituted in the configured arguments. A process that exits on
//! its own is reported as [`RecorderEvent::StreamEnded`]; a process killed
//! through [`Recorder::stop`] is not.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::process::Child;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::recorder::{RECORDER_EVENT_CAPACITY, Recorder, RecorderError, RecorderEvent, RecordingToken};
use crate::monitor::CaptureHandle;
use crate::{Error, Result};

/// Longest title fragment used in output file names.
const MAX_TITLE_CHARS: usize = 64;

/// How recordings are launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecorderConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Appended to `args` when the room records its side channel.
    pub side_channel_args: Vec<String>,
    pub output_dir: PathBuf,
    pub file_extension: String,
}

impl CommandRecorderConfig {
    pub fn new(program: impl Into<String>, args: Vec<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args,
            side_channel_args: Vec::new(),
            output_dir: output_dir.into(),
            file_extension: "flv".to_string(),
        }
    }

    /// Parse a whitespace separated command line such as
    /// `ffmpeg -i {url} -c copy {output}`.
    pub fn from_command_line(line: &str, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let mut parts = line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| Error::config("recorder_command must not be empty"))?;
        Ok(Self::new(program, parts.collect(), output_dir))
    }

    pub fn with_side_channel_args(mut self, line: &str) -> Self {
        self.side_channel_args = line.split_whitespace().map(str::to_string).collect();
        self
    }

    pub fn with_file_extension(mut self, ext: impl Into<String>) -> Self {
        self.file_extension = ext.into();
        self
    }

    fn render_args(&self, capture: &CaptureHandle, output: &Path, side_channel: bool) -> Vec<String> {
        let output = output.to_string_lossy();
        let title = capture.title.as_deref().unwrap_or("");
        let extra = if side_channel {
            self.side_channel_args.as_slice()
        } else {
            &[]
        };
        self.args
            .iter()
            .chain(extra)
            .map(|arg| {
                arg.replace("{url}", &capture.url)
                    .replace("{output}", &output)
                    .replace("{title}", title)
            })
            .collect()
    }

    fn output_path(&self, capture: &CaptureHandle, token: &RecordingToken) -> PathBuf {
        let stem = sanitize_title(capture.title.as_deref().unwrap_or(""));
        let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let short: String = token.as_str().chars().take(8).collect();
        self.output_dir
            .join(format!("{}_{}_{}.{}", stem, stamp, short, self.file_extension))
    }
}

/// Make a title safe to use as a file name component.
fn sanitize_title(title: &str) -> String {
    let cleaned: String = title
        .trim()
        .chars()
        .take(MAX_TITLE_CHARS)
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_matches('_');
    if cleaned.is_empty() {
        "stream".to_string()
    } else {
        cleaned.to_string()
    }
}

struct ActiveProcess {
    cancel: CancellationToken,
    /// Fires once the process is gone, or with the reason it could not be killed.
    exited: oneshot::Receiver<std::result::Result<(), String>>,
}

/// [`Recorder`] running one external process per recording.
pub struct CommandRecorder {
    config: CommandRecorderConfig,
    active: Arc<DashMap<RecordingToken, ActiveProcess>>,
    events: broadcast::Sender<RecorderEvent>,
}

impl CommandRecorder {
    pub fn new(config: CommandRecorderConfig) -> Self {
        let (events, _) = broadcast::channel(RECORDER_EVENT_CAPACITY);
        Self {
            config,
            active: Arc::new(DashMap::new()),
            events,
        }
    }

    pub fn config(&self) -> &CommandRecorderConfig {
        &self.config
    }

    /// Number of running recording processes.
    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Wait for the child in the background.
///
/// On natural exit the entry is removed and `StreamEnded` is emitted,
/// unless `stop` already claimed the entry. On cancellation the child is
/// killed. `done` fires in both cases, carrying the kill error if any.
fn spawn_process_waiter(
    mut child: Child,
    token: RecordingToken,
    cancel: CancellationToken,
    active: Arc<DashMap<RecordingToken, ActiveProcess>>,
    events: broadcast::Sender<RecorderEvent>,
    done: oneshot::Sender<std::result::Result<(), String>>,
) {
    tokio::spawn(async move {
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                child.kill().await.map_err(|e| {
                    warn!(token = %token, error = %e, "Failed to kill recorder process");
                    e.to_string()
                })
            }
            status = child.wait() => {
                match status {
                    Ok(status) if !status.success() => {
                        warn!(token = %token, code = ?status.code(), "Recorder process exited with failure");
                    }
                    Ok(_) => debug!(token = %token, "Recorder process exited"),
                    Err(e) => error!(token = %token, error = %e, "Error waiting for recorder process"),
                }
                if active.remove(&token).is_some() {
                    let _ = events.send(RecorderEvent::StreamEnded(token.clone()));
                }
                Ok(())
            }
        };
        let _ = done.send(result);
    });
}

#[async_trait]
impl Recorder for CommandRecorder {
    async fn start(
        &self,
        capture: &CaptureHandle,
        record_side_channel: bool,
    ) -> std::result::Result<RecordingToken, RecorderError> {
        tokio::fs::create_dir_all(&self.config.output_dir)
            .await
            .map_err(|e| {
                RecorderError::StartFailed(format!(
                    "cannot create {}: {}",
                    self.config.output_dir.display(),
                    e
                ))
            })?;

        let token = RecordingToken::generate();
        let output = self.config.output_path(capture, &token);
        let args = self.config.render_args(capture, &output, record_side_channel);

        let child = tokio::process::Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                RecorderError::StartFailed(format!("failed to spawn {}: {}", self.config.program, e))
            })?;

        let cancel = CancellationToken::new();
        let (done_tx, done_rx) = oneshot::channel();
        self.active.insert(
            token.clone(),
            ActiveProcess {
                cancel: cancel.clone(),
                exited: done_rx,
            },
        );
        spawn_process_waiter(
            child,
            token.clone(),
            cancel,
            self.active.clone(),
            self.events.clone(),
            done_tx,
        );

        info!(token = %token, output = %output.display(), "Recorder process started");
        Ok(token)
    }

    async fn stop(
        &self,
        token: &RecordingToken,
        timeout: Duration,
    ) -> std::result::Result<(), RecorderError> {
        let (_, process) = self
            .active
            .remove(token)
            .ok_or_else(|| RecorderError::UnknownToken(token.clone()))?;

        process.cancel.cancel();
        match tokio::time::timeout(timeout, process.exited).await {
            Ok(Ok(Err(reason))) => Err(RecorderError::StopFailed(reason)),
            Ok(_) => Ok(()),
            Err(_) => Err(RecorderError::Timeout(timeout)),
        }
    }

    fn is_active(&self, token: &RecordingToken) -> bool {
        self.active.contains_key(token)
    }

    fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.events.subscribe()
    }
}
