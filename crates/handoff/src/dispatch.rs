//! Transfer-mode resolution: picking how a value crosses the isolate boundary.

use crate::{
    heap::HeapData,
    isolate::Isolate,
    options::{TransferMode, TransferOptions},
    promise::TransferablePromise,
    reference::ReferenceValue,
    snapshot::{ExternalSnapshot, Snapshot},
    transfer_error::TransferError,
    transferable::Transferable,
    value::Value,
};

/// Decides how `value` crosses the isolate boundary and builds the variant.
///
/// Fails with `NonTransferable` when nothing matched (auto mode, no wrapper, not a
/// primitive or error, and no fallback mode configured).
pub fn transfer_out(isolate: &mut Isolate, value: &Value, options: &TransferOptions) -> Result<Transferable, TransferError> {
    match try_transfer_out(isolate, value, options)? {
        Some(transferable) => Ok(transferable),
        None => Err(TransferError::NonTransferable {
            type_name: value.type_name(isolate.heap()),
        }),
    }
}

/// Non-failing classification variant, used for recursive dispatch (a settled
/// promise's own payload must itself be transferred).
///
/// `Ok(None)` means no variant matched; collaborator failures (an uncopyable value
/// under an explicit copy mode, for instance) still surface as `Err`.
pub fn try_transfer_out(
    isolate: &mut Isolate,
    value: &Value,
    options: &TransferOptions,
) -> Result<Option<Transferable>, TransferError> {
    if options.promise {
        let bridged = match value {
            Value::Ref(id) if isolate.is_promise(value) => TransferablePromise::new(isolate, *id, *options),
            _ => TransferablePromise::settled(isolate, value, *options),
        };
        return Ok(Some(Transferable::PendingPromise(bridged)));
    }

    match options.mode {
        TransferMode::Auto => {
            if let Some(wrapper) = unwrap_wrapper(isolate, value) {
                return Ok(Some(wrapper));
            }
            if let Some(snapshot) = Snapshot::copy_if_primitive_or_error(value, isolate) {
                return Ok(Some(Transferable::Copy(snapshot)));
            }
            transfer_with_mode(isolate, value, options.fallback)
        }
        mode => transfer_with_mode(isolate, value, mode),
    }
}

/// Registry lookup: wrapper heap objects transfer themselves back out as the variant
/// they arrived as.
fn unwrap_wrapper(isolate: &Isolate, value: &Value) -> Option<Transferable> {
    let Value::Ref(id) = value else { return None };
    match isolate.heap().get(*id) {
        HeapData::SnapshotHandle(encoded) => Some(Transferable::ExternalCopy(encoded.clone())),
        HeapData::ProxyHandle(reference) => Some(Transferable::Reference(reference.clone())),
        _ => None,
    }
}

fn transfer_with_mode(
    isolate: &mut Isolate,
    value: &Value,
    mode: TransferMode,
) -> Result<Option<Transferable>, TransferError> {
    match mode {
        TransferMode::Auto => Ok(None),
        TransferMode::Copy => Ok(Some(Transferable::Copy(Snapshot::copy(value, isolate)?))),
        TransferMode::ExternalCopy => {
            let snapshot = Snapshot::copy(value, isolate)?;
            Ok(Some(Transferable::ExternalCopy(ExternalSnapshot::encode(&snapshot)?)))
        }
        TransferMode::Reference => Ok(Some(Transferable::Reference(ReferenceValue::new(isolate, value)))),
    }
}
