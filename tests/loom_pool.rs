// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Model-checks the worker pool's enqueue/wait_idle/stop interleavings under
//! loom. Run with `RUSTFLAGS="--cfg loom" cargo test --release --test loom_pool`.
//!
//! Exercised indirectly through `taskgraph::Scheduler`, since the pool itself
//! is a private module; a two-node chain is enough to drive an enqueue, a
//! completion-triggered re-enqueue, and a `wait_idle` race under loom's
//! exhaustive scheduling exploration.

#![cfg(loom)]

use taskgraph::{Arg, Scheduler};

#[test]
fn chain_executes_exactly_once_under_all_interleavings() {
    loom::model(|| {
        let mut s = Scheduler::new(2);
        let n1 = s.add_unary(|x: i32| x + 1, Arg::value(1));
        let f1 = s.future_of::<i32>(n1).unwrap();
        let n2 = s.add_unary(|x: i32| x * 2, f1);

        assert_eq!(s.get_result::<i32>(n2).unwrap(), 4);
    });
}
