use std::sync::Mutex;

use crate::broadcast::{JobProgressBroadcaster, JobProgressEvent};

/// Sink for the events a job run emits.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: JobProgressEvent);
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _event: JobProgressEvent) {}
}

/// Forwards pipeline events to the broadcast channel.
pub struct BroadcastProgress {
    broadcaster: JobProgressBroadcaster,
}

impl BroadcastProgress {
    pub fn new(broadcaster: JobProgressBroadcaster) -> Self {
        Self { broadcaster }
    }
}

impl ProgressReporter for BroadcastProgress {
    fn report(&self, event: JobProgressEvent) {
        self.broadcaster.send(event);
    }
}

/// Keeps every event in memory. Used by tests that assert on the full
/// sequence.
#[derive(Default)]
pub struct RecordingProgress {
    events: Mutex<Vec<JobProgressEvent>>,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<JobProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl ProgressReporter for RecordingProgress {
    fn report(&self, event: JobProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Decides when a processing-phase broadcast is due: after `interval` rows
/// since the last one, and always on the final row.
#[derive(Debug, Clone)]
pub struct EmitThrottle {
    interval: u64,
    since_last: u64,
}

impl EmitThrottle {
    pub fn new(interval: u64) -> Self {
        Self {
            interval: interval.max(1),
            since_last: 0,
        }
    }

    /// Registers one consumed row; returns true when an event should go out.
    pub fn tick(&mut self, is_last: bool) -> bool {
        self.since_last += 1;
        if self.since_last >= self.interval || is_last {
            self.since_last = 0;
            true
        } else {
            false
        }
    }
}
