#![doc = include_str!("../../../README.md")]

mod dispatch;
mod heap;
mod isolate;
mod options;
mod promise;
mod reference;
mod snapshot;
mod transfer_error;
mod transferable;
mod value;

pub use crate::{
    dispatch::{transfer_out, try_transfer_out},
    heap::{Heap, HeapData, HeapId, PromiseCell, PromiseSettlement, Reaction},
    isolate::{Isolate, IsolateHandle, IsolateId, Task},
    options::{TransferMode, TransferOptions, TransferOptionsInput},
    promise::{ABANDONED_MESSAGE, TransferablePromise},
    reference::ReferenceValue,
    snapshot::{ErrorKind, ErrorValue, ExternalSnapshot, Snapshot},
    transfer_error::TransferError,
    transferable::Transferable,
    value::Value,
};
