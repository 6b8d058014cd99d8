use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::level::MessageLevel;

pub type SharedLogModel = Arc<Mutex<LogModel>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotonic sequence number, never reused even after eviction or `clear`.
    pub index: u64,
    pub level: MessageLevel,
    pub line: String,
}

/// Bounded console buffer for one launch.
///
/// With `stop_on_overflow` the last free slot receives the overflow message and every
/// later append is dropped. Without it the oldest entry is evicted instead.
#[derive(Debug)]
pub struct LogModel {
    entries: VecDeque<LogEntry>,
    max_lines: usize,
    stop_on_overflow: bool,
    overflow_message: String,
    overflowed: bool,
    suspended: bool,
    wrap_lines: bool,
    next_index: u64,
}

impl Default for LogModel {
    fn default() -> Self {
        Self::new(
            quarry_config::DEFAULT_CONSOLE_MAX_LINES,
            quarry_config::DEFAULT_STOP_ON_OVERFLOW,
        )
    }
}

impl LogModel {
    pub fn new(max_lines: usize, stop_on_overflow: bool) -> Self {
        let max_lines = max_lines.max(1);
        Self {
            entries: VecDeque::new(),
            max_lines,
            stop_on_overflow,
            overflow_message: default_overflow_message(max_lines),
            overflowed: false,
            suspended: false,
            wrap_lines: true,
            next_index: 0,
        }
    }

    pub fn shared(self) -> SharedLogModel {
        Arc::new(Mutex::new(self))
    }

    /// Returns whether the line was stored.
    pub fn append(&mut self, level: MessageLevel, line: impl Into<String>) -> bool {
        if self.suspended {
            return false;
        }

        let (level, line) = if self.entries.len() >= self.max_lines {
            if self.stop_on_overflow {
                self.overflowed = true;
                return false;
            }
            self.entries.pop_front();
            (level, line.into())
        } else if self.stop_on_overflow && self.entries.len() + 1 == self.max_lines {
            self.overflowed = true;
            (MessageLevel::Fatal, self.overflow_message.clone())
        } else {
            (level, line.into())
        };

        self.entries.push_back(LogEntry {
            index: self.next_index,
            level,
            line,
        });
        self.next_index += 1;
        true
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.overflowed = false;
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, row: usize) -> Option<&LogEntry> {
        self.entries.get(row)
    }

    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Entries whose sequence number is at least `index`, for incremental readers.
    pub fn entries_since(&self, index: u64) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.index >= index)
            .cloned()
            .collect()
    }

    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    pub fn to_plain_text(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(&entry.line);
            out.push('\n');
        }
        out
    }

    pub fn max_lines(&self) -> usize {
        self.max_lines
    }

    /// Shrinking keeps the newest entries.
    pub fn set_max_lines(&mut self, max_lines: usize) {
        let max_lines = max_lines.max(1);
        while self.entries.len() > max_lines {
            self.entries.pop_front();
        }
        if self.overflow_message == default_overflow_message(self.max_lines) {
            self.overflow_message = default_overflow_message(max_lines);
        }
        self.max_lines = max_lines;
    }

    pub fn stop_on_overflow(&self) -> bool {
        self.stop_on_overflow
    }

    pub fn set_stop_on_overflow(&mut self, stop: bool) {
        self.stop_on_overflow = stop;
    }

    pub fn set_overflow_message(&mut self, message: impl Into<String>) {
        self.overflow_message = message.into();
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn suspend(&mut self, suspend: bool) {
        self.suspended = suspend;
    }

    pub fn suspended(&self) -> bool {
        self.suspended
    }

    pub fn set_line_wrap(&mut self, wrap: bool) {
        self.wrap_lines = wrap;
    }

    pub fn wrap_lines(&self) -> bool {
        self.wrap_lines
    }

    /// Case-insensitive search starting after `start`, wrapping around once.
    /// The starting row itself is never a match.
    pub fn find(&self, start: usize, needle: &str, reverse: bool) -> Option<usize> {
        let len = self.entries.len();
        if len == 0 {
            return None;
        }
        let start = start.min(len - 1);
        let needle = needle.to_lowercase();
        let matches = |row: usize| {
            row != start && self.entries[row].line.to_lowercase().contains(&needle)
        };

        if reverse {
            (0..start)
                .rev()
                .chain((start + 1..len).rev())
                .find(|&row| matches(row))
        } else {
            (start + 1..len).chain(0..start).find(|&row| matches(row))
        }
    }
}

fn default_overflow_message(max_lines: usize) -> String {
    format!(
        "Stopped watching the game log because the log length surpassed {max_lines} lines.\n\
         The game is still logging to files and is likely wasting disk space at an alarming rate!"
    )
}
