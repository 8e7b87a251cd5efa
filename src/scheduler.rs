// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The scheduler façade: owns the node table, edge table, in-degree counters
//! and one-shot executed flags, and drives execution across the worker pool.

use std::panic::{self, AssertUnwindSafe};

use crate::error::TaskGraphError;
use crate::node::{Arg, Binary, Future, Method, NodeId, NodeTable, SchedNode, Unary};
use crate::pool::{PoolHandle, WorkerPool};
use crate::sync::{AtomicBool, Arc, Mutex, Ordering};

/// Node/edge tables, append-only once registration ends. Registration is
/// single-threaded and execution is multi-threaded; the two phases never
/// overlap (I5), which `add_*` taking `&mut self` and `execute_all`/
/// `get_result` taking `&self` enforces at the borrow-checker level.
struct Graph {
    nodes: Vec<Box<dyn SchedNode>>,
    /// `edges[n]` is the list of successor ids for node `n`.
    edges: Vec<Vec<NodeId>>,
    /// One-shot per node; a per-node atomic compare-and-set, not folded into
    /// `has_result()` (which is not atomic with the body's effects).
    executed: Vec<AtomicBool>,
}

/// Mutated only under the scheduler mutex: the decrement-and-enqueue pair for
/// a completing node's successors must be atomic together, so this is a
/// plain counter rather than a lock-free one.
struct InDegree {
    counts: Mutex<Vec<u32>>,
}

/// An in-process parallel task-graph scheduler.
///
/// Nodes are pure computations with zero, one, or two argument slots, each
/// either an immediate value or a [`Future`] referencing a previously
/// registered node's result. `execute_all`/`get_result` parallelize
/// independent nodes across a fixed worker pool, running each node's
/// function at most once.
pub struct Scheduler {
    graph: Arc<Graph>,
    in_degree: Arc<InDegree>,
    pool: WorkerPool,
}

impl Scheduler {
    /// Builds a scheduler backed by `worker_count` worker threads.
    #[must_use]
    pub fn new(worker_count: usize) -> Self {
        Self {
            graph: Arc::new(Graph {
                nodes: Vec::new(),
                edges: Vec::new(),
                executed: Vec::new(),
            }),
            in_degree: Arc::new(InDegree {
                counts: Mutex::new(Vec::new()),
            }),
            pool: WorkerPool::new(worker_count),
        }
    }

    fn graph_mut(&mut self) -> &mut Graph {
        Arc::get_mut(&mut self.graph)
            .expect("add_* called while a previous execute_all/get_result is still in flight")
    }

    /// Registers a node, recording the in-degree contribution of its
    /// argument slot(s) and appending this node's id to each referenced
    /// producer's successor list.
    fn register(&mut self, node: Box<dyn SchedNode>, producers: &[NodeId]) -> NodeId {
        let id = NodeId(
            u32::try_from(self.graph.nodes.len()).expect("more than u32::MAX nodes registered"),
        );

        let graph = self.graph_mut();
        graph.nodes.push(node);
        graph.edges.push(Vec::new());
        graph.executed.push(AtomicBool::new(false));
        for &producer in producers {
            graph.edges[producer.index()].push(id);
        }

        let mut in_degree = self.in_degree.counts.lock().unwrap();
        in_degree.push(u32::try_from(producers.len()).expect("in-degree overflow"));

        id
    }

    /// Registers `f: A -> R` with one argument slot.
    pub fn add_unary<A, R, F>(&mut self, f: F, arg: impl Into<Arg<A>>) -> NodeId
    where
        F: Fn(A) -> R + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
        R: Clone + Send + 'static,
    {
        let arg = arg.into();
        let producers = future_ids(&arg);
        self.register(Box::new(Unary::new(f, arg)), &producers)
    }

    /// Registers `f: (A, B) -> R` with two argument slots. If both slots
    /// reference the same producer, the in-degree contribution is still 2 —
    /// one per slot that must be satisfied.
    pub fn add_binary<A, B, R, F>(
        &mut self,
        f: F,
        left: impl Into<Arg<A>>,
        right: impl Into<Arg<B>>,
    ) -> NodeId
    where
        F: Fn(A, B) -> R + Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
        B: Clone + Send + Sync + 'static,
        R: Clone + Send + 'static,
    {
        let left = left.into();
        let right = right.into();
        let mut producers = future_ids(&left);
        producers.extend(future_ids(&right));
        self.register(Box::new(Binary::new(f, left, right)), &producers)
    }

    /// Registers a bound-receiver node: `m(&receiver, arg)` with one
    /// argument slot.
    pub fn add_method<C, A, R, F>(
        &mut self,
        receiver: C,
        f: F,
        arg: impl Into<Arg<A>>,
    ) -> NodeId
    where
        F: Fn(&C, A) -> R + Send + Sync + 'static,
        C: Send + Sync + 'static,
        A: Clone + Send + Sync + 'static,
        R: Clone + Send + 'static,
    {
        let arg = arg.into();
        let producers = future_ids(&arg);
        self.register(Box::new(Method::new(receiver, f, arg)), &producers)
    }

    /// Returns a handle to node `id`'s eventual output, tagged with its
    /// declared type.
    ///
    /// # Errors
    ///
    /// Returns [`TaskGraphError::UnknownTask`] if `id` is not registered.
    pub fn future_of<T: 'static>(&self, id: NodeId) -> Result<Future<T>, TaskGraphError> {
        if id.index() >= self.graph.nodes.len() {
            return Err(TaskGraphError::UnknownTask(id));
        }
        Ok(Future::new(id))
    }

    /// Runs every registered node to completion, parallelizing independent
    /// nodes across the worker pool. Safe to call repeatedly: already-
    /// executed nodes observe their one-shot flag and skip.
    ///
    /// # Errors
    ///
    /// Returns the first [`TaskGraphError::NodeFailure`] observed, after the
    /// pool has drained to quiescence.
    pub fn execute_all(&self) -> Result<(), TaskGraphError> {
        if self.graph.nodes.is_empty() {
            return Ok(());
        }

        let failure: Arc<Mutex<Option<TaskGraphError>>> = Arc::new(Mutex::new(None));
        let handle = self.pool.handle();

        {
            let in_degree = self.in_degree.counts.lock().unwrap();
            for (idx, &count) in in_degree.iter().enumerate() {
                if count == 0 {
                    spawn_completion(
                        NodeId(u32::try_from(idx).unwrap()),
                        Arc::clone(&self.graph),
                        Arc::clone(&self.in_degree),
                        handle.clone(),
                        Arc::clone(&failure),
                    );
                }
            }
        }

        self.pool.wait_idle();

        let result = match failure.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        };
        result
    }

    /// Drives execution of the whole graph (simpler, and permitted by the
    /// contract, to execute everything rather than just the reverse-
    /// reachable subgraph of `id`), then reads and downcasts node `id`'s
    /// result.
    ///
    /// # Errors
    ///
    /// Returns [`TaskGraphError::UnknownTask`] if `id` is not registered,
    /// any [`TaskGraphError::NodeFailure`] raised during execution, or
    /// [`TaskGraphError::BadCast`] if `T` does not match the node's output
    /// type.
    pub fn get_result<T>(&self, id: NodeId) -> Result<T, TaskGraphError>
    where
        T: Clone + Send + 'static,
    {
        if id.index() >= self.graph.nodes.len() {
            return Err(TaskGraphError::UnknownTask(id));
        }
        self.execute_all()?;
        self.graph.nodes[id.index()].result().downcast::<T>()
    }
}

fn future_ids<T>(arg: &Arg<T>) -> Vec<NodeId> {
    match arg {
        Arg::Immediate(_) => Vec::new(),
        Arg::Future(future) => vec![future.id()],
    }
}

/// The per-node completion unit. Flips the executed flag, runs the node
/// body, then decrements each successor's in-degree under the scheduler
/// mutex and enqueues any successor that reaches zero — all before releasing
/// the mutex, so a successor can never be dispatched ahead of the predecessor
/// result write that unblocked it.
fn spawn_completion(
    id: NodeId,
    graph: Arc<Graph>,
    in_degree: Arc<InDegree>,
    handle: PoolHandle,
    failure: Arc<Mutex<Option<TaskGraphError>>>,
) {
    let dispatch = handle.clone();
    dispatch.enqueue(move || {
        if graph.executed[id.index()].swap(true, Ordering::AcqRel) {
            return;
        }

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            graph.nodes[id.index()].execute(&NodeTable::new(&graph.nodes))
        }));

        let result = match outcome {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(panic) => Err(TaskGraphError::NodeFailure {
                node: id,
                message: panic_message(&panic),
            }),
        };

        if let Err(err) = result {
            let mut slot = failure.lock().unwrap();
            if slot.is_none() {
                *slot = Some(err);
            }
            return;
        }

        let mut counts = in_degree.counts.lock().unwrap();
        for &successor in &graph.edges[id.index()] {
            let count = &mut counts[successor.index()];
            *count -= 1;
            if *count == 0 {
                spawn_completion(
                    successor,
                    Arc::clone(&graph),
                    Arc::clone(&in_degree),
                    handle.clone(),
                    Arc::clone(&failure),
                );
            }
        }
    });
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "node body panicked".to_string()
    }
}

impl Default for Scheduler {
    /// Four workers, matching the embedded API's documented default.
    fn default() -> Self {
        Self::new(4)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_unary() {
        let mut s = Scheduler::new(4);
        let n = s.add_unary(|x: i32| x + 10, Arg::value(10));
        assert_eq!(s.get_result::<i32>(n).unwrap(), 20);
    }

    #[test]
    fn chain_of_two() {
        let mut s = Scheduler::new(4);
        let n1 = s.add_unary(|x: i32| x + 10, Arg::value(10));
        let f1 = s.future_of::<i32>(n1).unwrap();
        let n2 = s.add_unary(|x: i32| x + 20, f1);
        assert_eq!(s.get_result::<i32>(n2).unwrap(), 40);
    }

    #[test]
    fn diamond_dag() {
        let mut s = Scheduler::new(4);
        let n1 = s.add_unary(|x: i32| x, Arg::value(10));
        let n2 = s.add_unary(|x: i32| x, Arg::value(20));
        let f1 = s.future_of::<i32>(n1).unwrap();
        let f2 = s.future_of::<i32>(n2).unwrap();
        let n3 = s.add_binary(|a: i32, b: i32| a + b, f1, f2);
        let f3 = s.future_of::<i32>(n3).unwrap();
        let n4 = s.add_binary(|a: i32, b: i32| a + b, Arg::value(30), f3);
        let f3b = s.future_of::<i32>(n3).unwrap();
        let f4 = s.future_of::<i32>(n4).unwrap();
        let n5 = s.add_binary(|a: i32, b: i32| a + b, f3b, f4);
        assert_eq!(s.get_result::<i32>(n5).unwrap(), 90);
    }

    #[test]
    fn bad_cast() {
        let mut s = Scheduler::new(2);
        let n = s.add_unary(|x: i32| x, Arg::value(10));
        let err = s.get_result::<String>(n).unwrap_err();
        assert!(matches!(err, TaskGraphError::BadCast { .. }));
    }

    #[test]
    fn unknown_id() {
        let s = Scheduler::new(2);
        assert!(matches!(
            s.future_of::<i32>(NodeId(2)),
            Err(TaskGraphError::UnknownTask(_))
        ));
        assert!(matches!(
            s.get_result::<i32>(NodeId(1)),
            Err(TaskGraphError::UnknownTask(_))
        ));
    }

    #[test]
    fn node_panic_surfaces_as_node_failure() {
        let mut s = Scheduler::new(2);
        let n = s.add_unary(|_: i32| -> i32 { panic!("boom") }, Arg::value(1));
        let err = s.get_result::<i32>(n).unwrap_err();
        assert!(matches!(err, TaskGraphError::NodeFailure { .. }));
    }

    #[test]
    fn repeated_get_result_executes_once() {
        use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
        let calls = Arc::new(AtomicUsize::new(0));
        let mut s = Scheduler::new(2);
        let calls_clone = Arc::clone(&calls);
        let n = s.add_unary(
            move |x: i32| {
                calls_clone.fetch_add(1, AtomicOrdering::SeqCst);
                x + 1
            },
            Arg::value(10),
        );
        assert_eq!(s.get_result::<i32>(n).unwrap(), 11);
        assert_eq!(s.get_result::<i32>(n).unwrap(), 11);
        assert_eq!(calls.load(AtomicOrdering::SeqCst), 1);
    }
}
