//! The cross-isolate promise bridge.
//!
//! A bridged promise has two halves sharing one mutex-guarded settlement record:
//!
//! - [`TransferablePromise`] faces destinations. Materializing it creates a deferred
//!   native promise in the destination isolate that either resolves immediately from
//!   the stored outcome or joins the waiting queue.
//! - [`BridgeHolder`] faces the origin. It watches the native pending result through a
//!   pair of continuations and settles the shared record exactly once -- or, if it is
//!   dropped first (its origin isolate was torn down), forces the abandonment
//!   rejection.
//!
//! The settlement record is the only multiply-owned mutable state in the subsystem.
//! Its lock is held for bookkeeping only and always released before scheduling work
//! onto any destination isolate.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use crate::{
    dispatch,
    heap::{HeapId, PromiseSettlement},
    isolate::{Isolate, IsolateHandle, Task},
    options::TransferOptions,
    snapshot::{ErrorKind, ErrorValue, Snapshot},
    transfer_error::TransferError,
    transferable::Transferable,
    value::Value,
};

/// Rejection message installed when a bridge is destroyed before its result settles.
pub const ABANDONED_MESSAGE: &str = "Promise was abandoned";

/// One waiter: a deferred promise previously created in a destination isolate.
#[derive(Debug)]
struct RemoteResolver {
    isolate: IsolateHandle,
    promise: HeapId,
}

/// The shared settlement record.
///
/// `waiting` is non-empty only while `resolved` is false; settlement flips the flag
/// and takes the whole queue in one locked section, so the queue is never repopulated.
#[derive(Debug, Default)]
struct PromiseState {
    resolved: bool,
    did_throw: bool,
    value: Option<Arc<Transferable>>,
    waiting: VecDeque<RemoteResolver>,
}

#[derive(Debug, Default)]
struct PromiseShared {
    state: Mutex<PromiseState>,
}

/// The record is plain data; recover it from a waiter thread's panic instead of
/// propagating poison through teardown paths.
fn lock_state(shared: &PromiseShared) -> MutexGuard<'_, PromiseState> {
    shared.state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Destination-facing half of a bridged pending result.
///
/// Cloning shares the settlement record; the record lives until the last clone and the
/// origin-side holder are gone.
#[derive(Debug, Clone)]
pub struct TransferablePromise {
    state: Arc<PromiseShared>,
}

impl TransferablePromise {
    /// Bridges a native promise living in `isolate`.
    ///
    /// Attaches to the promise whatever its current settlement state: an
    /// already-settled promise settles the bridge synchronously without registering
    /// continuations.
    pub(crate) fn new(isolate: &mut Isolate, promise: HeapId, options: TransferOptions) -> Self {
        let state = Arc::new(PromiseShared::default());
        let holder = BridgeHolder::new(Arc::clone(&state), options);
        holder.accept(isolate, promise);
        Self { state }
    }

    /// Bridges a value that is not itself a pending result: the bridge settles
    /// immediately with `value` as the fulfillment outcome.
    pub(crate) fn settled(isolate: &mut Isolate, value: &Value, options: TransferOptions) -> Self {
        let state = Arc::new(PromiseShared::default());
        let holder = BridgeHolder::new(Arc::clone(&state), options);
        holder.resolved(isolate, value);
        Self { state }
    }

    /// Materializes the bridge in a destination isolate.
    ///
    /// Creates a deferred native promise there and either settles it now from the
    /// stored outcome (fast path -- no task is scheduled) or registers it as a waiter.
    /// Never blocks.
    pub(crate) fn transfer_in(&self, isolate: &mut Isolate) -> Result<Value, TransferError> {
        let deferred = isolate.create_promise();
        let settled = {
            let mut state = lock_state(&self.state);
            if state.resolved {
                Some((
                    state.value.clone().expect("settled bridge has an outcome"),
                    state.did_throw,
                ))
            } else {
                state.waiting.push_back(RemoteResolver {
                    isolate: isolate.handle(),
                    promise: deferred,
                });
                None
            }
        };
        // Lock released before touching the destination heap.
        if let Some((value, did_throw)) = settled {
            settle_deferred(isolate, deferred, &value, did_throw)?;
        }
        Ok(Value::Ref(deferred))
    }
}

/// Origin-facing half: watches the native pending result and settles the shared
/// record exactly once.
struct BridgeHolder {
    state: Arc<PromiseShared>,
    options: TransferOptions,
}

impl BridgeHolder {
    fn new(state: Arc<PromiseShared>, options: TransferOptions) -> Arc<Self> {
        // Re-wrapping the settled payload as another bridged promise would nest
        // promises forever; the payload dispatch never sees the promise flag.
        let options = TransferOptions {
            promise: false,
            ..options
        };
        Arc::new(Self { state, options })
    }

    /// Attaches to the native promise, or settles synchronously if it already has.
    ///
    /// The registered continuations capture this holder through `Arc` clones: the
    /// holder must stay reachable across the asynchronous gap even after every other
    /// owner released it.
    fn accept(self: &Arc<Self>, isolate: &mut Isolate, promise: HeapId) {
        let already_settled = match isolate.promise_state(promise) {
            PromiseSettlement::Pending => None,
            PromiseSettlement::Fulfilled => Some(false),
            PromiseSettlement::Rejected => Some(true),
        };
        match already_settled {
            Some(did_throw) => {
                let value = isolate
                    .promise_result(promise)
                    .expect("settled promise has a result");
                if did_throw {
                    self.rejected(isolate, &value);
                } else {
                    self.resolved(isolate, &value);
                }
            }
            None => {
                let on_fulfilled = Arc::clone(self);
                let on_rejected = Arc::clone(self);
                isolate.promise_then(
                    promise,
                    Box::new(move |isolate, value| on_fulfilled.resolved(isolate, &value)),
                    Box::new(move |isolate, value| on_rejected.rejected(isolate, &value)),
                );
            }
        }
    }

    /// Success continuation: the payload is dispatched under the bridge's options.
    fn resolved(&self, isolate: &mut Isolate, value: &Value) {
        self.save(false, || dispatch::transfer_out(isolate, value, &self.options));
    }

    /// Failure continuation: rejection payloads only cross as primitives or errors.
    fn rejected(&self, isolate: &mut Isolate, value: &Value) {
        self.save(true, || {
            let snapshot = Snapshot::copy_if_primitive_or_error(value, isolate).unwrap_or_else(|| {
                Snapshot::Error(ErrorValue::new(
                    ErrorKind::Error,
                    "Promise rejection could not be copied",
                ))
            });
            Ok(Transferable::Copy(snapshot))
        });
    }

    /// Settles the shared record. First settlement wins; if evaluating the outcome
    /// itself fails, the failure becomes the stored outcome and the bridge rejects.
    ///
    /// Waiters are drained in the same locked section that flips `resolved`, and
    /// their resolve tasks are scheduled only after the lock is released.
    fn save(&self, did_throw: bool, produce: impl FnOnce() -> Result<Transferable, TransferError>) {
        let (value, did_throw, waiting) = {
            let mut state = lock_state(&self.state);
            if !state.resolved {
                state.resolved = true;
                match produce() {
                    Ok(value) => {
                        state.value = Some(Arc::new(value));
                        state.did_throw = did_throw;
                    }
                    Err(error) => {
                        state.value = Some(Arc::new(Transferable::Copy(Snapshot::Error(error.to_error_value()))));
                        state.did_throw = true;
                    }
                }
            }
            (
                state.value.clone().expect("settled bridge has an outcome"),
                state.did_throw,
                std::mem::take(&mut state.waiting),
            )
        };
        for resolver in waiting {
            let task = ResolveTask {
                promise: resolver.promise,
                value: Arc::clone(&value),
                did_throw,
            };
            // A destination that was destroyed in the meantime drops the task
            // silently; one that is shutting down still gets its settlement.
            resolver.isolate.schedule_task(Box::new(task), false, true);
        }
    }
}

impl Drop for BridgeHolder {
    fn drop(&mut self) {
        // Dropped unresolved means the origin side is gone (its isolate was torn
        // down before the result settled): deliver the abandonment rejection.
        self.save(true, || {
            Ok(Transferable::Copy(Snapshot::Error(ErrorValue::new(
                ErrorKind::Error,
                ABANDONED_MESSAGE,
            ))))
        });
    }
}

/// One-shot task that settles a previously-registered deferred promise in its
/// destination isolate, carrying the bridge's final outcome.
struct ResolveTask {
    promise: HeapId,
    value: Arc<Transferable>,
    did_throw: bool,
}

impl Task for ResolveTask {
    fn run(self: Box<Self>, isolate: &mut Isolate) -> Result<(), TransferError> {
        settle_deferred(isolate, self.promise, &self.value, self.did_throw)
    }
}

/// Materializes `outcome` in `isolate` and settles the deferred promise with it.
///
/// If materialization fails the deferred is rejected with the failure rendered as an
/// error value, and the failure is also reported to the caller; no retry either way.
fn settle_deferred(
    isolate: &mut Isolate,
    deferred: HeapId,
    outcome: &Transferable,
    did_throw: bool,
) -> Result<(), TransferError> {
    match outcome.transfer_in(isolate) {
        Ok(value) => {
            if did_throw {
                isolate.reject_promise(deferred, value);
            } else {
                isolate.resolve_promise(deferred, value);
            }
            Ok(())
        }
        Err(error) => {
            let value = Snapshot::Error(error.to_error_value()).instantiate(isolate);
            isolate.reject_promise(deferred, value);
            Err(error)
        }
    }
}
