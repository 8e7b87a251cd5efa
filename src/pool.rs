// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A fixed-size worker pool draining a shared FIFO of runnable units, with an
//! idle-wait primitive the scheduler uses to block until the whole graph has
//! executed.

use std::collections::VecDeque;

use crate::sync::{thread, Arc, Condvar, Mutex};

/// An opaque unit of work the pool can run. The scheduler's completion units
/// implement this.
pub trait Runnable: Send {
    fn run(self: Box<Self>);
}

impl<F> Runnable for F
where
    F: FnOnce() + Send,
{
    fn run(self: Box<Self>) {
        (*self)();
    }
}

struct State {
    queue: VecDeque<Box<dyn Runnable>>,
    in_progress: usize,
    stopped: bool,
}

/// A cloneable handle onto a pool's shared queue. Completion units hold one
/// of these to re-enqueue newly-ready successors from inside a running unit,
/// without needing access to the pool's owned `JoinHandle`s.
#[derive(Clone)]
pub struct PoolHandle(Arc<Shared>);

impl PoolHandle {
    /// Appends `unit` to the queue and wakes exactly one waiting worker.
    pub fn enqueue(&self, unit: impl Runnable + 'static) {
        let mut state = self.0.state.lock().unwrap();
        state.queue.push_back(Box::new(unit));
        tracing::trace!(queue_len = state.queue.len(), "enqueued unit");
        drop(state);
        self.0.not_empty.notify_one();
    }

    /// Blocks until the queue is empty and no unit is running.
    pub fn wait_idle(&self) {
        let mut state = self.0.state.lock().unwrap();
        while !(state.queue.is_empty() && state.in_progress == 0) {
            state = self.0.idle.wait(state).unwrap();
        }
        tracing::trace!("pool idle");
    }
}

/// Fixed set of worker threads draining a shared FIFO.
pub struct WorkerPool {
    handle: PoolHandle,
    workers: Vec<thread::JoinHandle<()>>,
}

struct Shared {
    state: Mutex<State>,
    not_empty: Condvar,
    idle: Condvar,
}

impl WorkerPool {
    /// Spawns `worker_count` worker threads, each draining the shared queue.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
                in_progress: 0,
                stopped: false,
            }),
            not_empty: Condvar::new(),
            idle: Condvar::new(),
        });

        let workers = (0..worker_count.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                thread::spawn(move || Self::worker_loop(&shared))
            })
            .collect();

        Self {
            handle: PoolHandle(shared),
            workers,
        }
    }

    /// A cloneable handle that can enqueue onto this pool.
    #[must_use]
    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    /// Appends `unit` to the queue and wakes exactly one waiting worker.
    pub fn enqueue(&self, unit: impl Runnable + 'static) {
        self.handle.enqueue(unit);
    }

    /// Blocks until the queue is empty and no unit is running.
    pub fn wait_idle(&self) {
        self.handle.wait_idle();
    }

    fn worker_loop(shared: &Shared) {
        loop {
            let mut state = shared.state.lock().unwrap();
            while !state.stopped && state.queue.is_empty() {
                state = shared.not_empty.wait(state).unwrap();
            }

            if state.stopped && state.queue.is_empty() {
                return;
            }

            let unit = state
                .queue
                .pop_front()
                .expect("queue non-empty per wait predicate");
            state.in_progress += 1;
            drop(state);

            unit.run();

            let mut state = shared.state.lock().unwrap();
            state.in_progress -= 1;
            if state.queue.is_empty() && state.in_progress == 0 {
                drop(state);
                shared.idle.notify_all();
            }
        }
    }

    /// Signals shutdown and joins every worker thread. Idempotent.
    pub fn stop(&mut self) {
        {
            let mut state = self.handle.0.state.lock().unwrap();
            if state.stopped {
                return;
            }
            state.stopped = true;
        }
        self.handle.0.not_empty.notify_all();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn runs_enqueued_units() {
        let pool = WorkerPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.enqueue(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_idle();
        assert_eq!(counter.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn wait_idle_observes_in_progress_not_just_empty_queue() {
        let pool = WorkerPool::new(1);
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));
        {
            let started = Arc::clone(&started);
            let finished = Arc::clone(&finished);
            pool.enqueue(move || {
                started.fetch_add(1, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(50));
                finished.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_idle();
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_is_idempotent() {
        let mut pool = WorkerPool::new(2);
        pool.stop();
        pool.stop();
    }
}
