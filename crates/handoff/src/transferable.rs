use crate::{
    isolate::Isolate,
    promise::TransferablePromise,
    reference::ReferenceValue,
    snapshot::{ExternalSnapshot, Snapshot},
    transfer_error::TransferError,
    value::Value,
};

/// The result of a transfer decision: how one value crosses an isolate boundary.
///
/// A closed set of four strategies, matched exhaustively at every call site. Each
/// variant knows how to materialize itself as a new value inside an arbitrary
/// destination isolate, any number of times.
#[derive(Debug, Clone)]
pub enum Transferable {
    /// Owns an independent deep snapshot; materialization clones it into the
    /// destination heap.
    Copy(Snapshot),
    /// Shares one reference-counted encoded snapshot; each destination decodes a
    /// fresh value.
    ExternalCopy(ExternalSnapshot),
    /// Owns a back-reference to a value that stays in its origin isolate.
    Reference(ReferenceValue),
    /// A pending asynchronous result bridged across isolates.
    PendingPromise(TransferablePromise),
}

impl Transferable {
    /// Materializes this transferable as a new value inside `isolate`.
    ///
    /// `PendingPromise` returns a native promise that resolves once the bridged result
    /// settles -- immediately if it already has, otherwise via a task scheduled onto
    /// `isolate`'s queue. The caller never blocks.
    pub fn transfer_in(&self, isolate: &mut Isolate) -> Result<Value, TransferError> {
        match self {
            Self::Copy(snapshot) => Ok(snapshot.instantiate(isolate)),
            Self::ExternalCopy(encoded) => Ok(encoded.decode()?.instantiate(isolate)),
            Self::Reference(reference) => reference.transfer_in(isolate),
            Self::PendingPromise(promise) => promise.transfer_in(isolate),
        }
    }
}
