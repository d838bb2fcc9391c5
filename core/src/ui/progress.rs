// Terminal rendering of batch events: one indicatif bar per device

use crate::events::WipeEvent;
use crate::{DeviceDescriptor, SessionOutcome};
use colored::{ColoredString, Colorize};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::collections::HashMap;

const BAR_TEMPLATE: &str = "{prefix:14} [{elapsed_precise}] [{bar:40.green/black}] {pos:>3}% {msg}";

pub struct BatchProgress {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl BatchProgress {
    pub fn new(devices: &[DeviceDescriptor]) -> Self {
        Self::with_target(devices, ProgressDrawTarget::stderr())
    }

    /// Tracks state without drawing anything
    pub fn hidden(devices: &[DeviceDescriptor]) -> Self {
        Self::with_target(devices, ProgressDrawTarget::hidden())
    }

    fn with_target(devices: &[DeviceDescriptor], target: ProgressDrawTarget) -> Self {
        let multi = MultiProgress::with_draw_target(target);
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("■ ");

        let bars = devices
            .iter()
            .map(|device| {
                let bar = multi.add(ProgressBar::new(100));
                bar.set_style(style.clone());
                bar.set_prefix(short_name(&device.path).to_string());
                bar.set_message("queued");
                (device.path.clone(), bar)
            })
            .collect();

        Self { multi, bars }
    }

    pub fn handle(&self, event: &WipeEvent) {
        match event {
            WipeEvent::Progress(progress) => {
                if let Some(bar) = self.bars.get(&progress.device_id) {
                    bar.set_position(u64::from(progress.percent));
                    bar.set_message(format!("step {}: {}", progress.step_index + 1, progress.message));
                }
            }
            WipeEvent::DeviceTerminal {
                device_id,
                outcome,
                reason,
            } => {
                if let Some(bar) = self.bars.get(device_id) {
                    let label = outcome_label(*outcome);
                    match reason {
                        Some(reason) => bar.abandon_with_message(format!("{} ({})", label, reason)),
                        None => {
                            bar.set_position(100);
                            bar.finish_with_message(label.to_string());
                        }
                    }
                }
            }
            WipeEvent::BatchComplete { .. } | WipeEvent::BatchFailed { .. } => {
                let _ = self.multi.clear();
            }
        }
    }

    pub fn position(&self, device_id: &str) -> Option<u64> {
        self.bars.get(device_id).map(ProgressBar::position)
    }

    pub fn is_finished(&self, device_id: &str) -> bool {
        self.bars.get(device_id).is_some_and(ProgressBar::is_finished)
    }
}

pub fn outcome_label(outcome: SessionOutcome) -> ColoredString {
    match outcome {
        SessionOutcome::Verified => "VERIFIED".green().bold(),
        SessionOutcome::Failed => "FAILED".red().bold(),
    }
}

fn short_name(path: &str) -> &str {
    path.rsplit('/').next().filter(|s| !s.is_empty()).unwrap_or(path)
}

/// Bytes as a binary-unit string
pub fn human_bytes(bytes: u64) -> String {
    let units = ["B", "KiB", "MiB", "GiB", "TiB", "PiB"];
    let mut val = bytes as f64;
    let mut i = 0usize;
    while val >= 1024.0 && i + 1 < units.len() {
        val /= 1024.0;
        i += 1;
    }
    if i == 0 {
        format!("{}B", bytes)
    } else {
        format!("{:.1}{}", val, units[i])
    }
}

/// H:MM:SS or M:SS
pub fn format_duration(secs: u64) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
