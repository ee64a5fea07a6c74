//! # Update Queue
//!
//! FIFO between decoding and publishing. Decoders may produce many updates
//! from one frame; the engine hands exactly one to the sink per tick.

use std::collections::VecDeque;

use super::protocol::Update;

#[derive(Debug, Default)]
pub struct UpdateQueue {
    entries: VecDeque<Update>,
}

impl UpdateQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest update, if any
    pub fn pop(&mut self) -> Option<Update> {
        self.entries.pop_front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Extend<Update> for UpdateQueue {
    fn extend<I: IntoIterator<Item = Update>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}
