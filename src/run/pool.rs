//! Bounded pool of OS worker threads with index-ordered results.
//!
//! Workers pull `(index, task)` pairs from a shared queue and block on each
//! task until it returns. Results land in a slot array keyed by task index, so
//! the output order never depends on which worker finished first.

#![allow(missing_docs)]

use std::thread;

use crossbeam_channel as channel;
use parking_lot::Mutex;

use crate::core::errors::{HarnessError, Result};

/// Resolve a requested worker count: `0` or negative means every available CPU.
pub fn resolve_parallelism(requested: i64) -> usize {
    match usize::try_from(requested) {
        Ok(n) if n > 0 => n,
        _ => thread::available_parallelism().map_or(8, std::num::NonZeroUsize::get),
    }
}

/// Fixed-size worker pool, sized once from the task count and the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerPool {
    workers: usize,
}

impl WorkerPool {
    /// `min(task_count, resolve_parallelism(requested))`, never below one.
    pub fn new(task_count: usize, requested: i64) -> Self {
        Self {
            workers: task_count.min(resolve_parallelism(requested)).max(1),
        }
    }

    pub const fn workers(&self) -> usize {
        self.workers
    }

    /// Run `f` over every task and return results in task order.
    pub fn run<T, R, F>(&self, tasks: Vec<T>, f: F) -> Result<Vec<R>>
    where
        T: Send,
        R: Send,
        F: Fn(usize, T) -> R + Sync,
    {
        let count = tasks.len();
        let (task_tx, task_rx) = channel::bounded::<(usize, T)>(count.max(1));
        for (index, task) in tasks.into_iter().enumerate() {
            task_tx
                .send((index, task))
                .map_err(|_| HarnessError::Runtime {
                    details: "worker queue closed before dispatch".to_string(),
                })?;
        }
        drop(task_tx);

        let slots: Mutex<Vec<Option<R>>> = Mutex::new((0..count).map(|_| None).collect());

        thread::scope(|scope| {
            for _ in 0..self.workers {
                let task_rx = task_rx.clone();
                let slots = &slots;
                let f = &f;
                scope.spawn(move || {
                    while let Ok((index, task)) = task_rx.recv() {
                        let result = f(index, task);
                        slots.lock()[index] = Some(result);
                    }
                });
            }
        });

        slots
            .into_inner()
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.ok_or_else(|| HarnessError::Runtime {
                    details: format!("worker exited without reporting task {index}"),
                })
            })
            .collect()
    }
}
