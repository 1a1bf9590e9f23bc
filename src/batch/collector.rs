//! Staging buffer shared between the batcher's intake and flush tasks.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

pub struct BatchCollector<T> {
    max_batch_size: usize,
    items: Mutex<VecDeque<T>>,
}

impl<T> BatchCollector<T> {
    pub fn new(max_batch_size: usize) -> Self {
        Self {
            max_batch_size: max_batch_size.max(1),
            items: Mutex::new(VecDeque::new()),
        }
    }

    fn items(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }

    pub fn add(&self, item: T) -> BatchAddResult {
        let mut items = self.items();
        items.push_back(item);
        let count = items.len();
        if count >= self.max_batch_size {
            BatchAddResult::ShouldFlush { count }
        } else {
            BatchAddResult::Added { count }
        }
    }

    pub fn should_flush(&self) -> bool {
        self.len() >= self.max_batch_size
    }

    /// Take the oldest `max_batch_size` items, leaving the rest for the next batch.
    pub fn drain_batch(&self) -> Vec<T> {
        let mut items = self.items();
        let n = items.len().min(self.max_batch_size);
        items.drain(..n).collect()
    }

    pub fn drain(&self) -> Vec<T> {
        self.items().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.items().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchAddResult {
    Added { count: usize },
    ShouldFlush { count: usize },
}

impl BatchAddResult {
    pub fn should_flush(&self) -> bool {
        matches!(self, BatchAddResult::ShouldFlush { .. })
    }

    pub fn count(&self) -> usize {
        match self {
            BatchAddResult::Added { count } | BatchAddResult::ShouldFlush { count } => *count,
        }
    }
}
