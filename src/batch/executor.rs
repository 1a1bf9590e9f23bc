//! Bounded fan-out over a batch of items.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct BatchResult<T, E> {
    pub successes: Vec<(usize, T)>,
    pub failures: Vec<(usize, E)>,
    pub execution_time: Duration,
    pub total_processed: usize,
}

impl<T, E> BatchResult<T, E> {
    pub fn new() -> Self {
        Self {
            successes: Vec::new(),
            failures: Vec::new(),
            execution_time: Duration::ZERO,
            total_processed: 0,
        }
    }
    pub fn add_success(&mut self, i: usize, r: T) {
        self.successes.push((i, r));
    }
    pub fn add_failure(&mut self, i: usize, e: E) {
        self.failures.push((i, e));
    }
    pub fn all_succeeded(&self) -> bool {
        self.failures.is_empty()
    }
    pub fn success_count(&self) -> usize {
        self.successes.len()
    }
    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

impl<T, E> Default for BatchResult<T, E> {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs one future per item with at most `max_concurrency` in flight, and joins them all.
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    max_concurrency: usize,
}

impl BatchExecutor {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Results are indexed by input position; completion order is not preserved.
    pub async fn execute_concurrent<T, R, E, F, Fut>(
        &self,
        items: Vec<T>,
        executor_fn: F,
    ) -> BatchResult<R, E>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
    {
        let start = Instant::now();
        let total = items.len();
        let f = &executor_fn;

        let outcomes: Vec<(usize, std::result::Result<R, E>)> = stream::iter(items.into_iter().enumerate())
            .map(move |(i, item)| async move { (i, f(item).await) })
            .buffer_unordered(self.max_concurrency)
            .collect()
            .await;

        let mut result = BatchResult::new();
        for (i, outcome) in outcomes {
            match outcome {
                Ok(r) => result.add_success(i, r),
                Err(e) => result.add_failure(i, e),
            }
        }
        result.execution_time = start.elapsed();
        result.total_processed = total;
        result
    }
}

impl Default for BatchExecutor {
    fn default() -> Self {
        Self::new(20)
    }
}
