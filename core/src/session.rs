// Wipe session controller - drives one device through its ordered steps
//
// Pending -> Classifying -> Executing(i) -> Verifying -> Terminal(Verified|Failed)
//
// Mounted filesystems are unmounted first; a failed unmount ends the session.
// Method steps then run strictly in registry order, each one gated by its
// condition on the step before it. A failed critical step ends the
// session; a failed non-critical step falls through to the next one.
// Cancellation always ends the session with a cancellation-tagged step.
// Exactly one terminal event is emitted, from `finish`, which consumes the
// session.

use crate::cancel::CancelToken;
use crate::device::classifier::classify_descriptor;
use crate::error::WipeError;
use crate::events::ProgressReporter;
use crate::executor::{StepInvocation, StepRunner};
use crate::method::{MethodClass, MethodRegistry, NistClass, SanitizationStep};
use crate::verification::{VerificationCheck, Verifier};
use crate::{DeviceDescriptor, SessionOutcome, StepFailure, StepResult, WipeSessionResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Pending,
    Classifying,
    Executing(usize),
    Verifying,
    Terminal(SessionOutcome),
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Terminal(_))
    }
}

/// Read-only collaborators shared by every session of a batch
#[derive(Clone)]
pub struct SessionContext {
    pub registry: Arc<MethodRegistry>,
    pub runner: Arc<dyn StepRunner>,
    pub verifier: Arc<dyn Verifier>,
}

pub struct WipeSession {
    device: DeviceDescriptor,
    state: SessionState,
    method: MethodClass,
    steps: Vec<StepResult>,
    verification: Option<VerificationCheck>,
    started_at: DateTime<Utc>,
    context: SessionContext,
    reporter: ProgressReporter,
    cancel: CancelToken,
}

impl WipeSession {
    pub fn new(
        device: DeviceDescriptor,
        context: SessionContext,
        reporter: ProgressReporter,
        cancel: CancelToken,
    ) -> Self {
        Self {
            device,
            state: SessionState::Pending,
            method: MethodClass::OverwriteFallback,
            steps: Vec::new(),
            verification: None,
            started_at: Utc::now(),
            context,
            reporter,
            cancel,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn device(&self) -> &DeviceDescriptor {
        &self.device
    }

    pub async fn run(mut self) -> WipeSessionResult {
        self.started_at = Utc::now();
        self.transition(SessionState::Classifying);

        let classification = classify_descriptor(&self.device);
        if classification.ambiguous {
            tracing::warn!(
                device = %self.device.path,
                bus_type = %self.device.bus_type,
                "{}",
                WipeError::ClassificationAmbiguous(self.device.path.clone())
            );
        }
        self.method = classification.class;
        tracing::info!(device = %self.device.path, method = %self.method, "Device classified");

        let registry = Arc::clone(&self.context.registry);
        let steps = registry.steps_for(self.method);

        let Some(first) = steps.first() else {
            let reason = format!("no steps registered for {}", self.method);
            return self.finish(SessionOutcome::Failed, Some(reason));
        };

        if self.device.read_only {
            tracing::error!(device = %self.device.path, "Device is read-only, refusing to launch utilities");
            self.transition(SessionState::Executing(0));
            self.steps
                .push(StepResult::refused(0, first, StepFailure::ReadOnlyDevice));
            self.reporter.report(0, 100, format!("{}: device is read-only", first.name));
            return self.finish(
                SessionOutcome::Failed,
                Some(WipeError::SessionAborted("device is read-only".to_string()).to_string()),
            );
        }

        let unmounts: Vec<SanitizationStep> = unmount_order(&self.device.mountpoints)
            .into_iter()
            .map(|mountpoint| registry.unmount_step(mountpoint))
            .collect();
        for (index, step) in unmounts.iter().enumerate() {
            let executed = self.execute(index, step).await;
            if let Some(reason) = self.abort_reason(step, &executed) {
                return self.finish(SessionOutcome::Failed, Some(reason));
            }
        }

        let mut previous: Option<bool> = None;
        for (offset, step) in steps.iter().enumerate() {
            let index = unmounts.len() + offset;

            if !step.run_when.allows(previous) {
                tracing::debug!(
                    device = %self.device.path,
                    step = %step.name,
                    condition = ?step.run_when,
                    "Skipping step"
                );
                self.transition(SessionState::Executing(index));
                self.steps.push(StepResult::skipped(index, step));
                self.reporter.report(index, 100, format!("{} skipped", step.name));
                previous = None;
                continue;
            }

            let executed = self.execute(index, step).await;
            if let Some(reason) = self.abort_reason(step, &executed) {
                return self.finish(SessionOutcome::Failed, Some(reason));
            }
            previous = Some(executed.succeeded);
        }

        self.transition(SessionState::Verifying);
        let verifier = Arc::clone(&self.context.verifier);
        let last_executed = self.steps.iter().rev().find(|s| s.was_executed());
        let check = verifier.verify(&self.device, last_executed).await;
        let passed = check.passed;
        let detail = check.detail.clone();
        self.verification = Some(check);

        if passed {
            self.finish(SessionOutcome::Verified, None)
        } else {
            self.finish(
                SessionOutcome::Failed,
                Some(format!("verification failed: {}", detail)),
            )
        }
    }

    /// Run one step (or refuse it once cancelled), report around it and
    /// append its result
    async fn execute(&mut self, index: usize, step: &SanitizationStep) -> Executed {
        self.transition(SessionState::Executing(index));
        self.reporter
            .report(index, 0, format!("starting {}", step.name));

        let result = if self.cancel.is_cancelled() {
            StepResult::refused(index, step, StepFailure::Cancelled)
        } else {
            let runner = Arc::clone(&self.context.runner);
            runner
                .run(StepInvocation {
                    index,
                    step,
                    device: &self.device,
                    cancel: &self.cancel,
                    progress: &self.reporter,
                })
                .await
        };

        let executed = Executed {
            succeeded: result.is_success(),
            cancelled: result.is_cancelled(),
            reason: result
                .failure
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_default(),
        };

        self.reporter.report(
            index,
            100,
            if executed.succeeded {
                format!("{} succeeded", step.name)
            } else {
                format!("{} failed: {}", step.name, executed.reason)
            },
        );

        if let Some(err) = step_error(&result) {
            tracing::warn!(device = %self.device.path, step = %step.name, error = %err, "Step failed");
        }
        self.steps.push(result);
        executed
    }

    /// Why the session must stop after this step, if it must
    fn abort_reason(&self, step: &SanitizationStep, executed: &Executed) -> Option<String> {
        if executed.cancelled {
            return Some(
                WipeError::SessionAborted(format!("cancelled during '{}'", step.name)).to_string(),
            );
        }
        if executed.succeeded {
            return None;
        }
        if step.critical {
            return Some(
                WipeError::SessionAborted(format!(
                    "critical step '{}' {}",
                    step.name, executed.reason
                ))
                .to_string(),
            );
        }
        tracing::info!(
            device = %self.device.path,
            step = %step.name,
            "Non-critical step failed, falling back to next step"
        );
        None
    }

    /// Terminal states are never left
    fn transition(&mut self, next: SessionState) {
        if self.state.is_terminal() {
            tracing::debug!(
                device = %self.device.path,
                state = ?self.state,
                ignored = ?next,
                "Session already terminal"
            );
            return;
        }
        tracing::debug!(device = %self.device.path, from = ?self.state, to = ?next, "Session transition");
        self.state = next;
    }

    fn finish(mut self, outcome: SessionOutcome, reason: Option<String>) -> WipeSessionResult {
        self.transition(SessionState::Terminal(outcome));

        match (&outcome, &reason) {
            (SessionOutcome::Verified, _) => {
                tracing::info!(device = %self.device.path, method = %self.method, "Device sanitization verified");
            }
            (SessionOutcome::Failed, Some(reason)) => {
                tracing::error!(device = %self.device.path, method = %self.method, reason = %reason, "Device sanitization failed");
            }
            (SessionOutcome::Failed, None) => {
                tracing::error!(device = %self.device.path, method = %self.method, "Device sanitization failed");
            }
        }

        self.reporter.terminal(outcome, reason.clone());

        let nist_class = match outcome {
            SessionOutcome::Verified => achieved_nist_class(&self.steps),
            SessionOutcome::Failed => None,
        };

        WipeSessionResult {
            device: self.device,
            method: self.method,
            steps: self.steps,
            outcome,
            nist_class,
            verification: self.verification,
            failure_reason: reason,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

struct Executed {
    succeeded: bool,
    cancelled: bool,
    reason: String,
}

/// Strongest class among the sanitizing steps that actually succeeded.
/// Preparation steps never count.
fn achieved_nist_class(steps: &[StepResult]) -> Option<NistClass> {
    steps
        .iter()
        .filter(|s| s.is_success())
        .filter_map(|s| s.kind.nist_class())
        .max()
}

/// Absolute mountpoints, deepest first so nested mounts come off before
/// their parents
fn unmount_order(mountpoints: &[String]) -> Vec<&str> {
    let mut ordered: Vec<&str> = mountpoints
        .iter()
        .map(|m| m.trim())
        .filter(|m| m.starts_with('/'))
        .collect();
    ordered.sort_by(|a, b| b.cmp(a));
    ordered.dedup();
    ordered
}

fn step_error(result: &StepResult) -> Option<WipeError> {
    match result.failure.as_ref()? {
        StepFailure::UtilityUnavailable { utility, reason } => Some(WipeError::UtilityUnavailable(
            format!("{} ({})", utility, reason),
        )),
        StepFailure::Timeout { after_secs } => Some(WipeError::StepTimeout(format!(
            "'{}' after {}s",
            result.step_name, after_secs
        ))),
        _ => None,
    }
}
