/// Step execution - runs one sanitization step and classifies its outcome
///
/// The executor never retries. Whether a failed step aborts the session or
/// falls through to the next one is decided by the session controller, which
/// is the only component that knows the step's criticality in context.
///
/// # Outcome classification
///
/// ```text
/// exit code in success set + marker seen (if any)  -> Success
/// exit code outside success set / marker missing   -> Failed
/// utility could not be launched                    -> Failed (UtilityUnavailable)
/// deadline exceeded                                -> TimedOut (process terminated)
/// batch cancelled                                  -> Failed (Cancelled, process terminated)
/// ```
pub mod process;
pub mod progress;

pub use process::ProcessRunner;
pub use progress::{ProgressParser, ProgressTracker};

use crate::cancel::CancelToken;
use crate::events::ProgressReporter;
use crate::method::SanitizationStep;
use crate::{DeviceDescriptor, StepResult};
use futures::future::BoxFuture;
use std::collections::VecDeque;
use std::time::Duration;

/// Everything a runner needs to execute one step
pub struct StepInvocation<'a> {
    pub index: usize,
    pub step: &'a SanitizationStep,
    pub device: &'a DeviceDescriptor,
    pub cancel: &'a CancelToken,
    pub progress: &'a ProgressReporter,
}

/// Seam between the session controller and whatever actually runs a step
pub trait StepRunner: Send + Sync {
    fn run<'a>(&'a self, invocation: StepInvocation<'a>) -> BoxFuture<'a, StepResult>;
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Multiplier applied to a step's nominal duration
    pub timeout_factor: f64,
    pub min_step_timeout: Duration,
    /// Time between SIGTERM and SIGKILL when stopping a utility
    pub termination_grace: Duration,
    pub output_summary_lines: usize,
    /// Temporary ATA security password substituted for `{password}`
    pub ata_password: String,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            timeout_factor: 2.0,
            min_step_timeout: Duration::from_secs(60),
            termination_grace: Duration::from_secs(5),
            output_summary_lines: 20,
            ata_password: "wipe-attest".to_string(),
        }
    }
}

impl ExecutorSettings {
    /// Enforced timeout: nominal duration scaled by capacity and the
    /// configured factor, never below the minimum
    pub fn step_timeout(&self, step: &SanitizationStep, device: &DeviceDescriptor) -> Duration {
        let nominal = step.duration.nominal(device);
        let factor = if self.timeout_factor.is_finite() && self.timeout_factor > 0.0 {
            self.timeout_factor
        } else {
            1.0
        };
        let scaled = Duration::from_secs_f64((nominal.as_secs_f64() * factor).min(u32::MAX as f64));
        scaled.max(self.min_step_timeout)
    }
}

/// Rolling window of the last N output lines
#[derive(Debug, Clone)]
pub struct OutputSummary {
    lines: VecDeque<String>,
    limit: usize,
}

/// Lines longer than this are cut to keep certificates compact
const MAX_LINE_LEN: usize = 240;

impl OutputSummary {
    pub fn new(limit: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(limit),
            limit,
        }
    }

    pub fn push(&mut self, line: &str) {
        if self.limit == 0 {
            return;
        }
        if self.lines.len() == self.limit {
            self.lines.pop_front();
        }
        let trimmed: String = line.chars().take(MAX_LINE_LEN).collect();
        self.lines.push_back(trimmed);
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::{CommandTemplate, StepKind};

    fn step(base: u64, per_gib: u64) -> SanitizationStep {
        SanitizationStep::new("t", StepKind::CryptoErase, CommandTemplate::new("true", Vec::<String>::new()))
            .with_duration(base, per_gib)
    }

    #[test]
    fn test_timeout_scales_with_capacity_and_factor() {
        let settings = ExecutorSettings {
            min_step_timeout: Duration::from_secs(1),
            ..Default::default()
        };
        let device = DeviceDescriptor::new("/dev/sda", "sata", 10 * 1024 * 1024 * 1024);
        // (60 + 10 * 10) * 2.0
        assert_eq!(
            settings.step_timeout(&step(60, 10), &device),
            Duration::from_secs(320)
        );
    }

    #[test]
    fn test_timeout_never_below_minimum() {
        let settings = ExecutorSettings::default();
        let device = DeviceDescriptor::new("/dev/sda", "sata", 0);
        assert_eq!(
            settings.step_timeout(&step(1, 0), &device),
            Duration::from_secs(60)
        );
    }

    #[test]
    fn test_invalid_factor_falls_back_to_nominal() {
        let settings = ExecutorSettings {
            timeout_factor: f64::NAN,
            min_step_timeout: Duration::ZERO,
            ..Default::default()
        };
        let device = DeviceDescriptor::new("/dev/sda", "sata", 0);
        assert_eq!(
            settings.step_timeout(&step(30, 0), &device),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_output_summary_keeps_tail() {
        let mut summary = OutputSummary::new(2);
        summary.push("one");
        summary.push("two");
        summary.push("three");
        assert_eq!(summary.into_lines(), vec!["two", "three"]);
    }

    #[test]
    fn test_output_summary_truncates_long_lines() {
        let mut summary = OutputSummary::new(1);
        summary.push(&"x".repeat(1000));
        assert_eq!(summary.into_lines()[0].len(), MAX_LINE_LEN);
    }
}
