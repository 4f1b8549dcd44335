//! Outgoing message queue with priority buckets and byte-budget batching.

use std::collections::{BTreeMap, VecDeque};

use covalent_core::Priority;

/// Encoded messages waiting for one peer, highest priority first.
#[derive(Debug, Default)]
pub struct OutgoingQueue {
    buckets: BTreeMap<Priority, VecDeque<String>>,
    bytes: usize,
}

impl OutgoingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, priority: Priority, line: String) {
        self.bytes += line.len();
        self.buckets.entry(priority).or_default().push_back(line);
    }

    pub fn len(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.values().all(VecDeque::is_empty)
    }

    /// Bytes of all queued lines.
    pub fn queued_bytes(&self) -> usize {
        self.bytes
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.bytes = 0;
    }

    fn front_len(&self) -> Option<usize> {
        self.buckets
            .values()
            .find_map(|bucket| bucket.front().map(String::len))
    }

    fn pop_front(&mut self) -> Option<String> {
        let line = self
            .buckets
            .values_mut()
            .find_map(|bucket| bucket.pop_front())?;
        self.bytes -= line.len();
        Some(line)
    }

    /// Next frame of newline-joined messages, at most `budget` bytes.
    ///
    /// A message larger than the budget is returned on its own; messages
    /// gathered before it go out first in their own frame.
    pub fn pop_batch(&mut self, budget: usize) -> Option<String> {
        let mut lines: Vec<String> = Vec::new();
        let mut size = 0usize;

        while let Some(next) = self.front_len() {
            let extra = if lines.is_empty() { next } else { next + 1 };
            if !lines.is_empty() && size + extra > budget {
                break;
            }
            let line = self.pop_front()?;
            size += extra;
            lines.push(line);
            if size > budget {
                break;
            }
        }

        (!lines.is_empty()).then(|| lines.join("\n"))
    }
}
