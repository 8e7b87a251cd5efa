// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Node shapes: the tagged `{Unary, Binary, Method}` representation the
//! scheduler kernel drives uniformly through the [`SchedNode`] trait.

use std::marker::PhantomData;
use std::sync::Mutex;

use crate::any_value::AnyValue;
use crate::error::TaskGraphError;

/// A dense, zero-based id assigned to a node in registration order.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NodeId(pub(crate) u32);

impl NodeId {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// An opaque reference to node `id`'s eventual output, tagged with its
/// declared type so slot construction is type-checked at the call site.
pub struct Future<T> {
    pub(crate) id: NodeId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Future<T> {
    pub(crate) fn new(id: NodeId) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }

    /// The id of the node producing this future's value.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.id
    }
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Future<T> {}

impl<T> std::fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Future").field("id", &self.id).finish()
    }
}

/// An argument slot: either a concrete value or a reference to a
/// previously-registered node's output.
pub enum Arg<T> {
    Immediate(T),
    Future(Future<T>),
}

impl<T> Arg<T> {
    /// Wraps a concrete value as an immediate argument slot.
    pub fn value(v: T) -> Self {
        Arg::Immediate(v)
    }
}

impl<T> From<Future<T>> for Arg<T> {
    fn from(future: Future<T>) -> Self {
        Arg::Future(future)
    }
}

/// Read-only view over the node table used while resolving argument slots.
/// Node and edge tables are never mutated during execution (I5), so shared
/// references are sufficient — no locking is needed for lookups.
pub struct NodeTable<'a> {
    nodes: &'a [Box<dyn SchedNode>],
}

impl<'a> NodeTable<'a> {
    pub(crate) fn new(nodes: &'a [Box<dyn SchedNode>]) -> Self {
        Self { nodes }
    }

    fn resolve<T>(&self, arg: &Arg<T>) -> Result<T, TaskGraphError>
    where
        T: Clone + 'static,
    {
        match arg {
            Arg::Immediate(v) => Ok(v.clone()),
            Arg::Future(future) => {
                let producer = &self.nodes[future.id.index()];
                if !producer.has_result() {
                    return Err(TaskGraphError::MissingProducer(future.id));
                }
                producer.result().downcast::<T>()
            }
        }
    }
}

/// Uniform capability set every node shape implements, so the scheduler
/// kernel can drive `Unary`/`Binary`/`Method` nodes through one trait object.
pub trait SchedNode: Send + Sync {
    /// Resolves argument slots (left before right for binary nodes) and
    /// invokes the callable, storing the result in the node's result cell.
    /// A no-op if the node already has a result.
    fn execute(&self, nodes: &NodeTable<'_>) -> Result<(), TaskGraphError>;

    /// An independent deep copy of the computed value. Only meaningful after
    /// `has_result()` is true.
    fn result(&self) -> AnyValue;

    /// Whether `execute` has populated this node's result cell.
    fn has_result(&self) -> bool;
}

struct ResultCell {
    value: Mutex<AnyValue>,
}

impl ResultCell {
    fn empty() -> Self {
        Self {
            value: Mutex::new(AnyValue::empty()),
        }
    }

    fn set(&self, value: AnyValue) {
        *self.value.lock().unwrap() = value;
    }

    fn get(&self) -> AnyValue {
        self.value.lock().unwrap().clone()
    }

    fn has_value(&self) -> bool {
        self.value.lock().unwrap().has_value()
    }
}

/// `f: A -> R` plus one argument slot.
pub struct Unary<A, R, F> {
    func: F,
    arg: Arg<A>,
    result: ResultCell,
    _marker: PhantomData<fn() -> R>,
}

impl<A, R, F> Unary<A, R, F>
where
    F: Fn(A) -> R + Send + Sync,
    A: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    pub(crate) fn new(func: F, arg: Arg<A>) -> Self {
        Self {
            func,
            arg,
            result: ResultCell::empty(),
            _marker: PhantomData,
        }
    }
}

impl<A, R, F> SchedNode for Unary<A, R, F>
where
    F: Fn(A) -> R + Send + Sync,
    A: Clone + Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    fn execute(&self, nodes: &NodeTable<'_>) -> Result<(), TaskGraphError> {
        if self.result.has_value() {
            return Ok(());
        }
        let arg = nodes.resolve(&self.arg)?;
        let output = (self.func)(arg);
        self.result.set(AnyValue::new(output));
        Ok(())
    }

    fn result(&self) -> AnyValue {
        self.result.get()
    }

    fn has_result(&self) -> bool {
        self.result.has_value()
    }
}

/// `f: (A, B) -> R` plus two argument slots, resolved left before right.
pub struct Binary<A, B, R, F> {
    func: F,
    left: Arg<A>,
    right: Arg<B>,
    result: ResultCell,
    _marker: PhantomData<fn() -> R>,
}

impl<A, B, R, F> Binary<A, B, R, F>
where
    F: Fn(A, B) -> R + Send + Sync,
    A: Clone + Send + 'static,
    B: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    pub(crate) fn new(func: F, left: Arg<A>, right: Arg<B>) -> Self {
        Self {
            func,
            left,
            right,
            result: ResultCell::empty(),
            _marker: PhantomData,
        }
    }
}

impl<A, B, R, F> SchedNode for Binary<A, B, R, F>
where
    F: Fn(A, B) -> R + Send + Sync,
    A: Clone + Send + Sync + 'static,
    B: Clone + Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    fn execute(&self, nodes: &NodeTable<'_>) -> Result<(), TaskGraphError> {
        if self.result.has_value() {
            return Ok(());
        }
        let left = nodes.resolve(&self.left)?;
        let right = nodes.resolve(&self.right)?;
        let output = (self.func)(left, right);
        self.result.set(AnyValue::new(output));
        Ok(())
    }

    fn result(&self) -> AnyValue {
        self.result.get()
    }

    fn has_result(&self) -> bool {
        self.result.has_value()
    }
}

/// A bound receiver `o: C` plus method `m: (&C, A) -> R` and one argument
/// slot. Rust has no pointer-to-member-function type usable the way C++
/// does, so the method is captured as a closure over `&C` by the `add_method`
/// adapter in [`crate::scheduler`]; the receiver is still owned by the node,
/// matching the original's by-value `Class obj_` field.
pub struct Method<C, A, R, F> {
    receiver: C,
    func: F,
    arg: Arg<A>,
    result: ResultCell,
    _marker: PhantomData<fn() -> R>,
}

impl<C, A, R, F> Method<C, A, R, F>
where
    F: Fn(&C, A) -> R + Send + Sync,
    C: Send + Sync,
    A: Clone + Send + 'static,
    R: Clone + Send + 'static,
{
    pub(crate) fn new(receiver: C, func: F, arg: Arg<A>) -> Self {
        Self {
            receiver,
            func,
            arg,
            result: ResultCell::empty(),
            _marker: PhantomData,
        }
    }
}

impl<C, A, R, F> SchedNode for Method<C, A, R, F>
where
    F: Fn(&C, A) -> R + Send + Sync,
    C: Send + Sync,
    A: Clone + Send + Sync + 'static,
    R: Clone + Send + 'static,
{
    fn execute(&self, nodes: &NodeTable<'_>) -> Result<(), TaskGraphError> {
        if self.result.has_value() {
            return Ok(());
        }
        let arg = nodes.resolve(&self.arg)?;
        let output = (self.func)(&self.receiver, arg);
        self.result.set(AnyValue::new(output));
        Ok(())
    }

    fn result(&self) -> AnyValue {
        self.result.get()
    }

    fn has_result(&self) -> bool {
        self.result.has_value()
    }
}
