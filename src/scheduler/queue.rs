//! Work distribution across workers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

/// FIFO queue popped by every worker in dynamic mode.
#[derive(Debug)]
pub struct SharedQueue<T> {
    items: Mutex<VecDeque<T>>,
}

impl<T> SharedQueue<T> {
    /// Creates a queue holding `items` in order.
    #[must_use]
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: Mutex::new(items.into_iter().collect()),
        }
    }

    /// Removes and returns the next item. No two callers get the same item.
    pub fn pop(&self) -> Option<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }

    /// Items still queued.
    #[must_use]
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Returns true when drained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where one worker takes its next item from.
#[derive(Debug)]
pub(crate) enum WorkSource<T> {
    /// Fixed slice owned by the worker.
    Slice(VecDeque<T>),
    /// Queue shared with every other worker.
    Shared(Arc<SharedQueue<T>>),
}

impl<T> WorkSource<T> {
    pub(crate) fn next(&mut self) -> Option<T> {
        match self {
            Self::Slice(items) => items.pop_front(),
            Self::Shared(queue) => queue.pop(),
        }
    }

    /// Items this worker alone is responsible for.
    pub(crate) fn owned_remaining(&self) -> usize {
        match self {
            Self::Slice(items) => items.len(),
            Self::Shared(_) => 0,
        }
    }
}

/// Deals `items` round-robin into `workers` slices, preserving order within
/// each slice.
pub(crate) fn round_robin<T>(items: Vec<T>, workers: usize) -> Vec<VecDeque<T>> {
    let workers = workers.max(1);
    let mut slices: Vec<VecDeque<T>> = (0..workers).map(|_| VecDeque::new()).collect();
    for (position, item) in items.into_iter().enumerate() {
        slices[position % workers].push_back(item);
    }
    slices
}
