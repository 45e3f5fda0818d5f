//! Execution contexts and their scheduling contract.
//!
//! An [`Isolate`] owns a heap, a globals map, and a task queue. The isolate itself is
//! owned by exactly one thread at a time; other threads interact with it only through
//! its [`IsolateHandle`], which can enqueue [`Task`]s. The owning thread drains the
//! queue with [`Isolate::pump`] or [`Isolate::drain`], preserving the single-threaded
//! execution guarantee for all heap access.

use std::{
    collections::VecDeque,
    fmt,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
};

use ahash::AHashMap;

use crate::{
    heap::{Heap, HeapData, HeapId, PromiseCell, PromiseReactions, PromiseSettlement, Reaction},
    transfer_error::TransferError,
    value::Value,
};

/// Unique identifier for an isolate.
///
/// Sequential integers from a process-wide atomic counter, so ids stay unique across
/// threads without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IsolateId(u32);

impl IsolateId {
    fn next() -> Self {
        static NEXT: AtomicU32 = AtomicU32::new(0);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw u32 value.
    #[inline]
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for IsolateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "isolate-{}", self.0)
    }
}

/// A unit of work scheduled onto an isolate's queue.
///
/// Tasks are fire-and-forget and never retried. They run on the thread that owns the
/// destination isolate, with exclusive access to it.
pub trait Task: Send {
    /// Runs the task inside its destination isolate.
    fn run(self: Box<Self>, isolate: &mut Isolate) -> Result<(), TransferError>;
}

/// Lifecycle of the cross-thread queue state.
///
/// `Open` accepts any task. `ShuttingDown` (after [`Isolate::shutdown`]) accepts only
/// tasks scheduled with `allow_during_shutdown` while the queue still drains. `Closed`
/// (the isolate was dropped) accepts nothing; late tasks are dropped silently.
enum QueueState {
    Open(VecDeque<Box<dyn Task>>),
    ShuttingDown(VecDeque<Box<dyn Task>>),
    Closed,
}

struct SharedState {
    queue: Mutex<QueueState>,
}

/// Recovers the queue from a poisoned lock: the queue is plain data, and teardown
/// paths must keep working after an unrelated thread panicked mid-schedule.
fn lock_queue(shared: &SharedState) -> std::sync::MutexGuard<'_, QueueState> {
    shared.queue.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cheaply cloneable, thread-safe handle to an isolate's scheduling state.
///
/// Handles stay valid after the isolate is destroyed; scheduling then reports failure
/// instead of panicking.
#[derive(Clone)]
pub struct IsolateHandle {
    id: IsolateId,
    shared: Arc<SharedState>,
}

impl IsolateHandle {
    /// The id of the isolate this handle points at.
    #[must_use]
    pub fn id(&self) -> IsolateId {
        self.id
    }

    /// Returns true while the isolate has not been destroyed.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !matches!(&*lock_queue(&self.shared), QueueState::Closed)
    }

    /// Enqueues a task onto the isolate's queue.
    ///
    /// `run_synchronously` puts the task at the front of the queue so it runs at the
    /// next pump; execution still happens on the owning thread. `allow_during_shutdown`
    /// admits the task while the isolate is shutting down but its queue still drains.
    ///
    /// Returns `false` (and drops the task) when the isolate no longer accepts work.
    pub fn schedule_task(&self, task: Box<dyn Task>, run_synchronously: bool, allow_during_shutdown: bool) -> bool {
        let mut state = lock_queue(&self.shared);
        let queue = match &mut *state {
            QueueState::Open(queue) => queue,
            QueueState::ShuttingDown(queue) if allow_during_shutdown => queue,
            QueueState::ShuttingDown(_) | QueueState::Closed => return false,
        };
        if run_synchronously {
            queue.push_front(task);
        } else {
            queue.push_back(task);
        }
        true
    }

    /// Number of tasks currently queued.
    #[must_use]
    pub fn queued_tasks(&self) -> usize {
        match &*lock_queue(&self.shared) {
            QueueState::Open(queue) | QueueState::ShuttingDown(queue) => queue.len(),
            QueueState::Closed => 0,
        }
    }
}

impl fmt::Debug for IsolateHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IsolateHandle")
            .field("id", &self.id)
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// An independent execution context with its own heap.
///
/// Not `Clone`: the isolate is owned by one thread at a time (it is `Send`, so
/// ownership may move between threads). All heap access goes through this owner.
pub struct Isolate {
    id: IsolateId,
    heap: Heap,
    globals: AHashMap<String, Value>,
    shared: Arc<SharedState>,
}

impl Isolate {
    /// Creates a new empty isolate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            id: IsolateId::next(),
            heap: Heap::default(),
            globals: AHashMap::new(),
            shared: Arc::new(SharedState {
                queue: Mutex::new(QueueState::Open(VecDeque::new())),
            }),
        }
    }

    /// This isolate's id.
    #[must_use]
    pub fn id(&self) -> IsolateId {
        self.id
    }

    /// Returns a scheduling handle to this isolate.
    #[must_use]
    pub fn handle(&self) -> IsolateHandle {
        IsolateHandle {
            id: self.id,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Read access to the heap.
    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Allocates heap data and returns a `Ref` value for it.
    pub fn alloc(&mut self, data: HeapData) -> Value {
        Value::Ref(self.heap.alloc(data))
    }

    /// Stores a value under a global name.
    pub fn set_global(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Looks up a value by global name.
    #[must_use]
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    /// Returns true when `value` is a native promise in this isolate.
    #[must_use]
    pub fn is_promise(&self, value: &Value) -> bool {
        matches!(value, Value::Ref(id) if matches!(self.heap.get(*id), HeapData::Promise(_)))
    }

    /// Creates a new pending promise.
    pub fn create_promise(&mut self) -> HeapId {
        self.heap.alloc(HeapData::Promise(PromiseCell::new()))
    }

    /// Resolves a pending promise, running its fulfilled reactions.
    ///
    /// A no-op if the promise already settled.
    ///
    /// # Panics
    /// Panics if `id` does not refer to a promise.
    pub fn resolve_promise(&mut self, id: HeapId, value: Value) {
        self.settle_promise(id, value, false);
    }

    /// Rejects a pending promise, running its rejected reactions.
    ///
    /// A no-op if the promise already settled.
    ///
    /// # Panics
    /// Panics if `id` does not refer to a promise.
    pub fn reject_promise(&mut self, id: HeapId, value: Value) {
        self.settle_promise(id, value, true);
    }

    fn settle_promise(&mut self, id: HeapId, value: Value, rejected: bool) {
        let reactions = match self.heap.get_mut(id) {
            HeapData::Promise(cell) => cell.settle(value.clone(), rejected),
            other => panic!("settle_promise on a {}", other.type_name()),
        };
        for PromiseReactions {
            on_fulfilled,
            on_rejected,
        } in reactions
        {
            if rejected {
                on_rejected(self, value.clone());
            } else {
                on_fulfilled(self, value.clone());
            }
        }
    }

    /// Registers a fulfilled/rejected continuation pair on a promise.
    ///
    /// Exactly one of the two fires, exactly once. If the promise already settled, the
    /// matching continuation fires immediately on this call.
    ///
    /// # Panics
    /// Panics if `id` does not refer to a promise.
    pub fn promise_then(&mut self, id: HeapId, on_fulfilled: Reaction, on_rejected: Reaction) {
        let fired = match self.heap.get_mut(id) {
            HeapData::Promise(cell) => cell.observe(PromiseReactions {
                on_fulfilled,
                on_rejected,
            }),
            other => panic!("promise_then on a {}", other.type_name()),
        };
        if let Some((reactions, value, rejected)) = fired {
            if rejected {
                (reactions.on_rejected)(self, value);
            } else {
                (reactions.on_fulfilled)(self, value);
            }
        }
    }

    /// Returns the settlement state of a promise.
    ///
    /// # Panics
    /// Panics if `id` does not refer to a promise.
    #[must_use]
    pub fn promise_state(&self, id: HeapId) -> PromiseSettlement {
        match self.heap.get(id) {
            HeapData::Promise(cell) => cell.state(),
            other => panic!("promise_state on a {}", other.type_name()),
        }
    }

    /// Returns the settled value of a promise, or `None` while pending.
    ///
    /// # Panics
    /// Panics if `id` does not refer to a promise.
    #[must_use]
    pub fn promise_result(&self, id: HeapId) -> Option<Value> {
        match self.heap.get(id) {
            HeapData::Promise(cell) => cell.result().cloned(),
            other => panic!("promise_result on a {}", other.type_name()),
        }
    }

    /// Runs the next queued task on the calling thread.
    ///
    /// Returns `Ok(false)` when the queue is empty, `Ok(true)` after running one task,
    /// or the task's error. Errors are terminal for that task only; the queue keeps
    /// draining on subsequent pumps.
    pub fn pump(&mut self) -> Result<bool, TransferError> {
        let task = {
            let mut state = lock_queue(&self.shared);
            match &mut *state {
                QueueState::Open(queue) | QueueState::ShuttingDown(queue) => queue.pop_front(),
                QueueState::Closed => None,
            }
        };
        match task {
            Some(task) => task.run(self).map(|()| true),
            None => Ok(false),
        }
    }

    /// Pumps until the queue is empty, stopping at the first task error.
    ///
    /// Returns the number of tasks that ran successfully.
    pub fn drain(&mut self) -> Result<usize, TransferError> {
        let mut ran = 0;
        while self.pump()? {
            ran += 1;
        }
        Ok(ran)
    }

    /// Number of tasks currently queued.
    #[must_use]
    pub fn queued_tasks(&self) -> usize {
        self.handle().queued_tasks()
    }

    /// Begins shutdown: from now on only tasks scheduled with `allow_during_shutdown`
    /// are accepted, while already-queued work keeps draining.
    pub fn shutdown(&mut self) {
        let mut state = lock_queue(&self.shared);
        if let QueueState::Open(queue) = &mut *state {
            *state = QueueState::ShuttingDown(std::mem::take(queue));
        }
    }
}

impl Default for Isolate {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Isolate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Isolate")
            .field("id", &self.id)
            .field("heap_objects", &self.heap.len())
            .field("globals", &self.globals.len())
            .finish()
    }
}

impl Drop for Isolate {
    fn drop(&mut self) {
        // Close the queue first: queued tasks are discarded and late schedulers see
        // `false`. The heap (and with it any pending promise reactions) drops after.
        *lock_queue(&self.shared) = QueueState::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SetGlobal(&'static str, i64);

    impl Task for SetGlobal {
        fn run(self: Box<Self>, isolate: &mut Isolate) -> Result<(), TransferError> {
            isolate.set_global(self.0, Value::Int(self.1));
            Ok(())
        }
    }

    #[test]
    fn tasks_run_in_fifo_order_with_front_priority() {
        let mut isolate = Isolate::new();
        let handle = isolate.handle();
        assert!(handle.schedule_task(Box::new(SetGlobal("a", 1)), false, false));
        assert!(handle.schedule_task(Box::new(SetGlobal("a", 2)), false, false));
        // Front-of-queue scheduling runs before both.
        assert!(handle.schedule_task(Box::new(SetGlobal("first", 0)), true, false));

        assert!(isolate.pump().unwrap());
        assert_eq!(isolate.get_global("first"), Some(Value::Int(0)));
        assert_eq!(isolate.drain().unwrap(), 2);
        assert_eq!(isolate.get_global("a"), Some(Value::Int(2)));
    }

    #[test]
    fn shutdown_admits_only_flagged_tasks() {
        let mut isolate = Isolate::new();
        let handle = isolate.handle();
        isolate.shutdown();
        assert!(!handle.schedule_task(Box::new(SetGlobal("x", 1)), false, false));
        assert!(handle.schedule_task(Box::new(SetGlobal("x", 2)), false, true));
        isolate.drain().unwrap();
        assert_eq!(isolate.get_global("x"), Some(Value::Int(2)));
    }

    #[test]
    fn destroyed_isolate_drops_tasks_silently() {
        let isolate = Isolate::new();
        let handle = isolate.handle();
        drop(isolate);
        assert!(!handle.is_alive());
        assert!(!handle.schedule_task(Box::new(SetGlobal("x", 1)), false, true));
        assert_eq!(handle.queued_tasks(), 0);
    }

    #[test]
    fn reactions_after_settlement_fire_immediately() {
        let mut isolate = Isolate::new();
        let promise = isolate.create_promise();
        isolate.resolve_promise(promise, Value::Int(7));
        isolate.promise_then(
            promise,
            Box::new(|isolate, value| isolate.set_global("got", value)),
            Box::new(|_, _| panic!("fulfilled promise must not run the rejected reaction")),
        );
        assert_eq!(isolate.get_global("got"), Some(Value::Int(7)));
    }
}
