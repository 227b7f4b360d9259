//! Nested wall-clock timing for fleet runs.
//!
//! A [`Timeline`] is an explicit context object: each run creates its own, so
//! two runs in one process never share depth counters or output handles.
//! [`Timeline::push`] returns a [`TimingHandle`]; nesting is expressed by
//! pushing from a handle rather than by mutating shared depth state.
//!
//! ```ignore
//! let timeline = Timeline::new();
//! let run = timeline.push("checkout");
//! {
//!     let _validate = run.push("validate");
//! } // recorded at depth 1 on drop
//! run.finish(); // recorded at depth 0
//! ```

use std::fmt::Write as _;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// One completed timing span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingRecord {
    pub label: String,
    pub depth: usize,
    pub elapsed_ms: u64,
}

/// Collects timing records for one run. Cloning shares the same record list.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    records: Arc<Mutex<Vec<TimingRecord>>>,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a top-level span.
    pub fn push(&self, label: impl Into<String>) -> TimingHandle {
        TimingHandle::open(self.clone(), label.into(), 0)
    }

    /// Completed spans in completion order (children before parents).
    pub fn records(&self) -> Vec<TimingRecord> {
        self.lock().clone()
    }

    /// Indented, one span per line, in completion order.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for record in self.lock().iter() {
            let _ = writeln!(
                out,
                "{:indent$}{} {}ms",
                "",
                record.label,
                record.elapsed_ms,
                indent = record.depth * 2
            );
        }
        out
    }

    fn lock(&self) -> MutexGuard<'_, Vec<TimingRecord>> {
        self.records.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An open span. Recorded exactly once: on [`TimingHandle::finish`] or on drop.
#[derive(Debug)]
pub struct TimingHandle {
    timeline: Timeline,
    label: String,
    depth: usize,
    started: Instant,
    recorded: bool,
}

impl TimingHandle {
    fn open(timeline: Timeline, label: String, depth: usize) -> Self {
        debug!(event = "timing.push", label = %label, depth);
        Self {
            timeline,
            label,
            depth,
            started: Instant::now(),
            recorded: false,
        }
    }

    /// Open a child span one level deeper.
    pub fn push(&self, label: impl Into<String>) -> TimingHandle {
        TimingHandle::open(self.timeline.clone(), label.into(), self.depth + 1)
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Close the span and return its elapsed time.
    pub fn finish(mut self) -> Duration {
        self.record()
    }

    fn record(&mut self) -> Duration {
        let elapsed = self.started.elapsed();
        if !self.recorded {
            self.recorded = true;
            let elapsed_ms = elapsed.as_millis() as u64;
            debug!(event = "timing.pop", label = %self.label, depth = self.depth, elapsed_ms);
            self.timeline.lock().push(TimingRecord {
                label: std::mem::take(&mut self.label),
                depth: self.depth,
                elapsed_ms,
            });
        }
        elapsed
    }
}

impl Drop for TimingHandle {
    fn drop(&mut self) {
        self.record();
    }
}
