use std::fmt;

use smallvec::SmallVec;

use crate::{
    isolate::Isolate,
    reference::ReferenceValue,
    snapshot::{ErrorValue, ExternalSnapshot},
    value::Value,
};

/// Unique identifier for data stored inside one isolate's heap arena.
///
/// Ids are never reused and stay valid for the lifetime of the owning isolate;
/// they carry no meaning in any other isolate's heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeapId(usize);

impl HeapId {
    /// Returns the raw index value.
    #[inline]
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// A continuation attached to a native promise.
///
/// Runs on the thread that owns the isolate, with exclusive access to it.
pub type Reaction = Box<dyn FnOnce(&mut Isolate, Value) + Send>;

/// A fulfilled/rejected continuation pair of which exactly one fires, exactly once.
pub(crate) struct PromiseReactions {
    pub on_fulfilled: Reaction,
    pub on_rejected: Reaction,
}

/// Observable settlement state of a native promise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum PromiseSettlement {
    Pending,
    Fulfilled,
    Rejected,
}

/// A native pending result and its settlement state.
///
/// Settlement is single-shot: the first `settle` wins and later settles are no-ops.
/// Reactions registered after settlement fire immediately.
pub struct PromiseCell {
    inner: PromiseInner,
}

enum PromiseInner {
    Pending {
        reactions: SmallVec<[PromiseReactions; 2]>,
    },
    Fulfilled(Value),
    Rejected(Value),
}

impl PromiseCell {
    /// Creates a new pending promise cell.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: PromiseInner::Pending {
                reactions: SmallVec::new(),
            },
        }
    }

    /// Returns the current settlement state.
    #[must_use]
    pub fn state(&self) -> PromiseSettlement {
        match &self.inner {
            PromiseInner::Pending { .. } => PromiseSettlement::Pending,
            PromiseInner::Fulfilled(_) => PromiseSettlement::Fulfilled,
            PromiseInner::Rejected(_) => PromiseSettlement::Rejected,
        }
    }

    /// Returns the settled value, or `None` while pending.
    #[must_use]
    pub fn result(&self) -> Option<&Value> {
        match &self.inner {
            PromiseInner::Pending { .. } => None,
            PromiseInner::Fulfilled(value) | PromiseInner::Rejected(value) => Some(value),
        }
    }

    /// Settles the cell, returning the reactions to run.
    ///
    /// Returns an empty list when the cell was already settled (single-settlement).
    pub(crate) fn settle(&mut self, value: Value, rejected: bool) -> SmallVec<[PromiseReactions; 2]> {
        match &mut self.inner {
            PromiseInner::Pending { reactions } => {
                let taken = std::mem::take(reactions);
                self.inner = if rejected {
                    PromiseInner::Rejected(value)
                } else {
                    PromiseInner::Fulfilled(value)
                };
                taken
            }
            PromiseInner::Fulfilled(_) | PromiseInner::Rejected(_) => SmallVec::new(),
        }
    }

    /// Registers a reaction pair, or hands it back together with the settled
    /// outcome when the cell has already settled (the caller fires it directly).
    pub(crate) fn observe(&mut self, reactions: PromiseReactions) -> Option<(PromiseReactions, Value, bool)> {
        match &mut self.inner {
            PromiseInner::Pending { reactions: list } => {
                list.push(reactions);
                None
            }
            PromiseInner::Fulfilled(value) => Some((reactions, value.clone(), false)),
            PromiseInner::Rejected(value) => Some((reactions, value.clone(), true)),
        }
    }
}

impl Default for PromiseCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PromiseCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            PromiseInner::Pending { reactions } => f
                .debug_struct("PromiseCell")
                .field("state", &"pending")
                .field("reactions", &reactions.len())
                .finish(),
            PromiseInner::Fulfilled(value) => f.debug_tuple("PromiseCell::Fulfilled").field(value).finish(),
            PromiseInner::Rejected(value) => f.debug_tuple("PromiseCell::Rejected").field(value).finish(),
        }
    }
}

/// Heap object kinds.
///
/// The closed set of heap-allocated data an isolate can hold. `SnapshotHandle` and
/// `ProxyHandle` are the wrapper kinds: objects that arrived from another isolate and
/// transfer themselves back out as the variant they arrived as.
#[derive(Debug)]
pub enum HeapData {
    /// Ordered container of values.
    List(Vec<Value>),
    /// A built-in error object.
    Error(ErrorValue),
    /// A promoted immediate, held so back-references always have a stable slot.
    Cell(Value),
    /// A native pending result and its settlement state.
    Promise(PromiseCell),
    /// Wrapper: a shared encoded snapshot received from (or destined for) another isolate.
    SnapshotHandle(ExternalSnapshot),
    /// Wrapper: a live back-reference into another isolate.
    ProxyHandle(ReferenceValue),
}

impl HeapData {
    /// Static name of this object kind.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::List(_) => "list",
            Self::Error(_) => "error",
            Self::Cell(_) => "cell",
            Self::Promise(_) => "promise",
            Self::SnapshotHandle(_) => "external snapshot",
            Self::ProxyHandle(_) => "reference proxy",
        }
    }
}

/// Arena of heap objects owned by one isolate.
///
/// Slots live for the isolate's lifetime; there is no mid-life reclamation. Teardown
/// order matters: dropping the heap drops pending promise reactions, which is what
/// lets a promise bridge observe that its origin is gone.
#[derive(Debug, Default)]
pub struct Heap {
    entries: Vec<HeapData>,
}

impl Heap {
    /// Allocates a new heap entry.
    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        let id = HeapId(self.entries.len());
        self.entries.push(data);
        id
    }

    /// Returns the data stored at `id`.
    ///
    /// # Panics
    /// Panics if the id did not come from this heap.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        self.entries.get(id.index()).expect("Heap::get: slot missing")
    }

    /// Returns mutable access to the data stored at `id`.
    ///
    /// # Panics
    /// Panics if the id did not come from this heap.
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        self.entries.get_mut(id.index()).expect("Heap::get_mut: slot missing")
    }

    /// Number of live objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when nothing has been allocated.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_get_round_trip() {
        let mut heap = Heap::default();
        let id = heap.alloc(HeapData::List(vec![Value::Int(1), Value::Null]));
        match heap.get(id) {
            HeapData::List(items) => assert_eq!(items.len(), 2),
            other => panic!("expected list, got {other:?}"),
        }
        assert_eq!(heap.len(), 1);
    }

    #[test]
    fn promise_cell_settles_once() {
        let mut cell = PromiseCell::new();
        assert_eq!(cell.state(), PromiseSettlement::Pending);
        let reactions = cell.settle(Value::Int(1), false);
        assert!(reactions.is_empty());
        assert_eq!(cell.state(), PromiseSettlement::Fulfilled);

        // Second settlement is a no-op: state and result keep the first outcome.
        cell.settle(Value::Int(2), true);
        assert_eq!(cell.state(), PromiseSettlement::Fulfilled);
        assert_eq!(cell.result(), Some(&Value::Int(1)));
    }
}
