use crate::{
    heap::{HeapData, HeapId},
    isolate::{Isolate, IsolateHandle, IsolateId},
    transfer_error::TransferError,
    value::Value,
};

/// Live back-reference to a value owned by its origin isolate.
///
/// Holding a `ReferenceValue` never keeps the origin isolate alive. Materializing one
/// after the origin has been destroyed fails with `IsolateDestroyed`; the remote-call
/// mechanics behind a materialized proxy belong to the embedder.
#[derive(Debug, Clone)]
pub struct ReferenceValue {
    origin: IsolateHandle,
    target: HeapId,
}

impl ReferenceValue {
    /// Creates a back-reference to `value` inside `isolate`.
    ///
    /// Immediate values are promoted to a heap cell first, so every reference has a
    /// stable slot to point at.
    pub fn new(isolate: &mut Isolate, value: &Value) -> Self {
        let target = match value {
            Value::Ref(id) => *id,
            immediate => {
                let Value::Ref(id) = isolate.alloc(HeapData::Cell(immediate.clone())) else {
                    unreachable!("alloc returns a heap reference")
                };
                id
            }
        };
        Self {
            origin: isolate.handle(),
            target,
        }
    }

    /// The id of the isolate that owns the referenced value.
    #[must_use]
    pub fn origin_id(&self) -> IsolateId {
        self.origin.id()
    }

    /// The referenced heap slot in the origin isolate.
    #[must_use]
    pub fn target(&self) -> HeapId {
        self.target
    }

    /// Scheduling handle to the origin isolate.
    #[must_use]
    pub fn origin(&self) -> &IsolateHandle {
        &self.origin
    }

    /// Builds the destination-side proxy object for this reference.
    pub(crate) fn transfer_in(&self, isolate: &mut Isolate) -> Result<Value, TransferError> {
        if !self.origin.is_alive() {
            return Err(TransferError::IsolateDestroyed {
                isolate: self.origin.id(),
            });
        }
        Ok(isolate.alloc(HeapData::ProxyHandle(self.clone())))
    }
}
