//! Bounded in-memory output log.

use std::collections::VecDeque;

/// Number of lines kept when no capacity is configured.
pub const DEFAULT_OUTPUT_LOG_CAPACITY: usize = 1000;

/// Ordered, bounded sequence of captured lines.
///
/// Lines are kept in arrival order; once the capacity is reached the oldest
/// lines are dropped from the front.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OutputLog {
    /// Creates an empty log. A zero capacity is treated as one.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(DEFAULT_OUTPUT_LOG_CAPACITY)),
            capacity,
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push_back(line.into());
        while self.lines.len() > self.capacity {
            self.lines.pop_front();
        }
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

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    /// The most recent `count` lines, oldest first.
    pub fn tail(&self, count: usize) -> Vec<String> {
        let skip = self.lines.len().saturating_sub(count);
        self.lines.iter().skip(skip).cloned().collect()
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }
}

impl Default for OutputLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_OUTPUT_LOG_CAPACITY)
    }
}
