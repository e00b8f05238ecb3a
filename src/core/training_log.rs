//! Bounded, append-only training log.

use std::collections::VecDeque;

/// Default number of lines kept before the oldest are evicted.
pub const LOG_CAPACITY: usize = 1000;

/// Substrings that mark a log line worth keeping once a run completes.
const SUMMARY_MARKERS: [&str; 3] = ["Model summary", "Results saved", "epochs completed"];

#[derive(Debug, Clone)]
pub struct TrainingLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for TrainingLog {
    fn default() -> Self {
        Self::with_capacity(LOG_CAPACITY)
    }
}

impl TrainingLog {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(LOG_CAPACITY)),
            capacity,
        }
    }

    /// Append one line; returns the line evicted to make room, if any.
    pub fn push(&mut self, line: impl Into<String>) -> Option<String> {
        let evicted = if self.lines.len() >= self.capacity {
            self.lines.pop_front()
        } else {
            None
        };
        self.lines.push_back(line.into());
        evicted
    }

    /// Drop everything and start over with a single line.
    pub fn reset_with(&mut self, line: impl Into<String>) {
        self.lines.clear();
        self.lines.push_back(line.into());
    }

    /// Keep only the lines that summarize a finished run.
    pub fn retain_summary(&mut self) {
        self.lines.retain(|l| is_summary_line(l));
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    /// The newest `n` lines, oldest first.
    pub fn tail(&self, n: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }
}

/// Lines kept when a run completes: model summary, results location, epoch
/// completion, and the overall (`all` class) validation row.
pub fn is_summary_line(line: &str) -> bool {
    SUMMARY_MARKERS.iter().any(|m| line.contains(m))
        || (line.contains("all") && line.contains("mAP50"))
}
