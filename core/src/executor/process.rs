// Process runner - executes sanitization utilities as child processes
//
// stdout and stderr are read line by line (carriage-return updates are split
// as well) and fed to the progress tracker. The child is stopped with SIGTERM
// and, after the grace period, SIGKILL when the step times out or the batch
// is cancelled.

use super::progress::{ProgressParser, ProgressTracker};
use super::{ExecutorSettings, OutputSummary, StepInvocation, StepRunner};
use crate::{StepFailure, StepOutcome, StepResult};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long to keep reading output after the process exits
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

enum Ending {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Cancelled,
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    settings: ExecutorSettings,
}

struct LineState {
    tracker: ProgressTracker,
    summary: OutputSummary,
    marker_seen: bool,
    failure_seen: bool,
}

impl ProcessRunner {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    async fn execute(&self, invocation: StepInvocation<'_>) -> StepResult {
        let step = invocation.step;
        let device = invocation.device;
        let (program, args) = step.command.render(device, &self.settings.ata_password);

        if invocation.cancel.is_cancelled() {
            return StepResult::refused(invocation.index, step, StepFailure::Cancelled);
        }

        let timeout = self.settings.step_timeout(step, device);
        let started_at = Utc::now();

        tracing::info!(
            device = %device.path,
            step = %step.name,
            program = %program,
            timeout = %humantime::format_duration(timeout),
            "Starting sanitization step"
        );

        let spawned = Command::new(&program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    device = %device.path,
                    step = %step.name,
                    utility = %program,
                    error = %e,
                    "Sanitization utility unavailable"
                );
                let mut result = StepResult::refused(
                    invocation.index,
                    step,
                    StepFailure::UtilityUnavailable {
                        utility: program,
                        reason: e.to_string(),
                    },
                );
                result.started_at = started_at;
                return result;
            }
        };

        let (line_tx, mut line_rx) = mpsc::unbounded_channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_line_reader(stdout, line_tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_line_reader(stderr, line_tx.clone()));
        }
        drop(line_tx);

        let mut lines = LineState {
            tracker: ProgressTracker::new(ProgressParser::for_kind(&step.kind)),
            summary: OutputSummary::new(self.settings.output_summary_lines),
            marker_seen: false,
            failure_seen: false,
        };

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);

        let ending = loop {
            tokio::select! {
                Some(line) = line_rx.recv() => self.observe_line(&line, &invocation, &mut lines),
                status = child.wait() => break Ending::Exited(status),
                _ = &mut deadline => break Ending::TimedOut(timeout),
                _ = invocation.cancel.cancelled() => break Ending::Cancelled,
            }
        };

        match ending {
            Ending::Exited(_) => {
                let _ = tokio::time::timeout(
                    OUTPUT_DRAIN_TIMEOUT,
                    futures::future::join_all(readers.iter_mut()),
                )
                .await;
            }
            Ending::TimedOut(_) | Ending::Cancelled => {
                self.terminate(&mut child, &device.path).await;
            }
        }
        for reader in &readers {
            reader.abort();
        }
        while let Ok(line) = line_rx.try_recv() {
            self.observe_line(&line, &invocation, &mut lines);
        }

        let (outcome, failure, exit_code) = match ending {
            Ending::Exited(Ok(status)) if lines.failure_seen => (
                StepOutcome::Failed,
                step.failure_marker
                    .clone()
                    .map(|marker| StepFailure::FailureMarker { marker }),
                status.code(),
            ),
            Ending::Exited(Ok(status)) => {
                let code = status.code();
                match code {
                    Some(c) if step.success_exit_codes.contains(&c) => {
                        match &step.completion_marker {
                            Some(marker) if !lines.marker_seen => (
                                StepOutcome::Failed,
                                Some(StepFailure::MissingCompletionMarker {
                                    marker: marker.clone(),
                                }),
                                code,
                            ),
                            _ => (StepOutcome::Success, None, code),
                        }
                    }
                    _ => (
                        StepOutcome::Failed,
                        Some(StepFailure::ExitStatus { code }),
                        code,
                    ),
                }
            }
            Ending::Exited(Err(e)) => (
                StepOutcome::Failed,
                Some(StepFailure::Io {
                    reason: e.to_string(),
                }),
                None,
            ),
            Ending::TimedOut(after) => (
                StepOutcome::TimedOut,
                Some(StepFailure::Timeout {
                    after_secs: after.as_secs(),
                }),
                None,
            ),
            Ending::Cancelled => (StepOutcome::Failed, Some(StepFailure::Cancelled), None),
        };

        if outcome == StepOutcome::Success {
            let pct = lines.tracker.complete();
            invocation
                .progress
                .report(invocation.index, pct, format!("{} complete", step.name));
            tracing::info!(device = %device.path, step = %step.name, "Sanitization step succeeded");
        } else if let Some(reason) = &failure {
            tracing::warn!(
                device = %device.path,
                step = %step.name,
                outcome = ?outcome,
                reason = %reason,
                "Sanitization step did not succeed"
            );
        }

        StepResult {
            index: invocation.index,
            step_name: step.name.clone(),
            kind: step.kind,
            critical: step.critical,
            started_at,
            finished_at: Utc::now(),
            exit_code,
            outcome,
            failure,
            output_summary: lines.summary.into_lines(),
        }
    }

    fn observe_line(&self, line: &str, invocation: &StepInvocation<'_>, lines: &mut LineState) {
        tracing::trace!(device = %invocation.device.path, output = %line, "Utility output");
        lines.summary.push(line);

        if let Some(marker) = &invocation.step.completion_marker {
            if line.contains(marker.as_str()) {
                lines.marker_seen = true;
            }
        }

        if let Some(marker) = &invocation.step.failure_marker {
            if line.to_lowercase().contains(&marker.to_lowercase()) {
                lines.failure_seen = true;
            }
        }

        if let Some(pct) = lines.tracker.observe(line) {
            invocation.progress.report(invocation.index, pct, line);
        }
    }

    /// SIGTERM, wait for the grace period, then SIGKILL
    async fn terminate(&self, child: &mut Child, device: &str) {
        if send_sigterm(child) {
            if let Ok(Ok(status)) =
                tokio::time::timeout(self.settings.termination_grace, child.wait()).await
            {
                tracing::info!(device = %device, status = %status, "Utility stopped after SIGTERM");
                return;
            }
        }

        if let Err(e) = child.kill().await {
            tracing::warn!(device = %device, error = %e, "Failed to kill utility process");
        } else {
            tracing::warn!(device = %device, "Utility killed");
        }
    }
}

impl StepRunner for ProcessRunner {
    fn run<'a>(&'a self, invocation: StepInvocation<'a>) -> BoxFuture<'a, StepResult> {
        self.execute(invocation).boxed()
    }
}

#[cfg(unix)]
fn send_sigterm(child: &Child) -> bool {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let Some(pid) = child.id() else {
        return false;
    };
    match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            tracing::debug!(pid = pid, error = %e, "SIGTERM delivery failed");
            false
        }
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &Child) -> bool {
    false
}

fn spawn_line_reader<R>(stream: R, tx: mpsc::UnboundedSender<String>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    for segment in buf.split(|b| *b == b'\r' || *b == b'\n') {
                        let line = String::from_utf8_lossy(segment).trim().to_string();
                        if !line.is_empty() && tx.send(line).is_err() {
                            return;
                        }
                    }
                }
            }
        }
    })
}
