/// Scripted step runner
///
/// Stands in for the process runner when a test cares about sequencing and
/// concurrency rather than real utilities. Every step "runs" for `delay`,
/// honours cancellation, and records how many steps were in flight per device
/// and overall.
use futures::future::{BoxFuture, FutureExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use wipe_attest::executor::{StepInvocation, StepRunner};
use wipe_attest::{StepFailure, StepOutcome, StepResult};

#[derive(Default)]
pub struct ScriptedRunner {
    delay: Duration,
    failing_devices: HashSet<String>,
    per_device: Mutex<HashMap<String, usize>>,
    current: AtomicUsize,
    max_in_flight: AtomicUsize,
    same_device_overlaps: AtomicUsize,
    calls: Mutex<Vec<(String, String)>>,
}

impl ScriptedRunner {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    /// Every step against `device` fails
    pub fn failing_on(mut self, device: &str) -> Self {
        self.failing_devices.insert(device.to_string());
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn same_device_overlaps(&self) -> usize {
        self.same_device_overlaps.load(Ordering::SeqCst)
    }

    /// (device path, step name) in start order
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, device: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|(path, _)| path == device)
            .map(|(_, step)| step)
            .collect()
    }

    fn enter(&self, device: &str, step: &str) {
        self.calls
            .lock()
            .unwrap()
            .push((device.to_string(), step.to_string()));

        let mut per_device = self.per_device.lock().unwrap();
        let count = per_device.entry(device.to_string()).or_default();
        *count += 1;
        if *count > 1 {
            self.same_device_overlaps.fetch_add(1, Ordering::SeqCst);
        }

        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
    }

    fn leave(&self, device: &str) {
        self.current.fetch_sub(1, Ordering::SeqCst);
        if let Some(count) = self.per_device.lock().unwrap().get_mut(device) {
            *count -= 1;
        }
    }
}

impl StepRunner for ScriptedRunner {
    fn run<'a>(&'a self, invocation: StepInvocation<'a>) -> BoxFuture<'a, StepResult> {
        async move {
            let device = invocation.device.path.as_str();
            let step = invocation.step;
            self.enter(device, &step.name);

            let cancelled = tokio::select! {
                _ = tokio::time::sleep(self.delay) => false,
                _ = invocation.cancel.cancelled() => true,
            };
            self.leave(device);

            let failure = if cancelled {
                StepFailure::Cancelled
            } else {
                StepFailure::ExitStatus { code: Some(1) }
            };
            let mut result = StepResult::refused(invocation.index, step, failure);

            if !cancelled && !self.failing_devices.contains(device) {
                invocation.progress.report(invocation.index, 100, "done");
                result.outcome = StepOutcome::Success;
                result.failure = None;
                result.exit_code = Some(0);
            }
            result
        }
        .boxed()
    }
}
