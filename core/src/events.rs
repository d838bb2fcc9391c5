//! Progress and terminal event delivery to the presentation layer.
//!
//! Senders never block. Progress events share a bounded budget: when it is
//! exhausted the oldest queued progress event is dropped to make room.
//! Terminal events (per device and per batch) are never dropped. Relative
//! order of the events that remain is preserved.

use crate::crypto::WipeCertificate;
use crate::SessionOutcome;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressEvent {
    pub device_id: String,
    pub step_index: usize,
    pub percent: u8,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub enum WipeEvent {
    Progress(ProgressEvent),
    DeviceTerminal {
        device_id: String,
        outcome: SessionOutcome,
        reason: Option<String>,
    },
    BatchComplete {
        certificate: Box<WipeCertificate>,
    },
    BatchFailed {
        error: String,
    },
}

impl WipeEvent {
    pub fn is_progress(&self) -> bool {
        matches!(self, WipeEvent::Progress(_))
    }
}

#[derive(Debug)]
struct QueueState {
    items: VecDeque<WipeEvent>,
    progress_len: usize,
    dropped_progress: u64,
    senders: usize,
    receiver_alive: bool,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
    progress_capacity: usize,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Create a connected sender/receiver pair with the given progress budget
pub fn event_queue(progress_capacity: usize) -> (EventSender, EventReceiver) {
    let shared = Arc::new(Shared {
        state: Mutex::new(QueueState {
            items: VecDeque::new(),
            progress_len: 0,
            dropped_progress: 0,
            senders: 1,
            receiver_alive: true,
        }),
        notify: Notify::new(),
        progress_capacity: progress_capacity.max(1),
    });

    (
        EventSender {
            shared: Arc::clone(&shared),
        },
        EventReceiver { shared },
    )
}

#[derive(Debug)]
pub struct EventSender {
    shared: Arc<Shared>,
}

impl Clone for EventSender {
    fn clone(&self) -> Self {
        self.shared.lock().senders += 1;
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for EventSender {
    fn drop(&mut self) {
        let last = {
            let mut state = self.shared.lock();
            state.senders -= 1;
            state.senders == 0
        };
        if last {
            self.shared.notify.notify_one();
        }
    }
}

impl EventSender {
    /// Fire-and-forget delivery; never blocks the caller
    pub fn send(&self, event: WipeEvent) {
        {
            let mut state = self.shared.lock();
            if !state.receiver_alive {
                return;
            }

            if event.is_progress() {
                if state.progress_len >= self.shared.progress_capacity {
                    if let Some(pos) = state.items.iter().position(WipeEvent::is_progress) {
                        state.items.remove(pos);
                        state.progress_len -= 1;
                        state.dropped_progress += 1;
                    }
                }
                state.progress_len += 1;
            }

            state.items.push_back(event);
        }
        self.shared.notify.notify_one();
    }

    pub fn progress(&self, device_id: &str, step_index: usize, percent: u8, message: impl Into<String>) {
        self.send(WipeEvent::Progress(ProgressEvent {
            device_id: device_id.to_string(),
            step_index,
            percent: percent.min(100),
            message: message.into(),
        }));
    }

    /// Progress reporter bound to one device
    pub fn reporter(&self, device_id: impl Into<String>) -> ProgressReporter {
        ProgressReporter {
            sender: self.clone(),
            device_id: device_id.into(),
        }
    }
}

#[derive(Debug)]
pub struct EventReceiver {
    shared: Arc<Shared>,
}

impl Drop for EventReceiver {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.receiver_alive = false;
        state.items.clear();
        state.progress_len = 0;
    }
}

impl EventReceiver {
    /// Next event, or None once every sender is gone and the queue is drained
    pub async fn recv(&mut self) -> Option<WipeEvent> {
        loop {
            {
                let mut state = self.shared.lock();
                if let Some(event) = state.items.pop_front() {
                    if event.is_progress() {
                        state.progress_len -= 1;
                    }
                    return Some(event);
                }
                if state.senders == 0 {
                    return None;
                }
            }
            self.shared.notify.notified().await;
        }
    }

    /// Non-blocking variant of [`recv`](Self::recv)
    pub fn try_recv(&mut self) -> Option<WipeEvent> {
        let mut state = self.shared.lock();
        let event = state.items.pop_front()?;
        if event.is_progress() {
            state.progress_len -= 1;
        }
        Some(event)
    }

    /// Progress events discarded so far to honour the budget
    pub fn dropped_progress(&self) -> u64 {
        self.shared.lock().dropped_progress
    }
}

/// Sends progress for a single device
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: EventSender,
    device_id: String,
}

impl ProgressReporter {
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn report(&self, step_index: usize, percent: u8, message: impl Into<String>) {
        self.sender.progress(&self.device_id, step_index, percent, message);
    }

    pub fn terminal(&self, outcome: SessionOutcome, reason: Option<String>) {
        self.sender.send(WipeEvent::DeviceTerminal {
            device_id: self.device_id.clone(),
            outcome,
            reason,
        });
    }
}
