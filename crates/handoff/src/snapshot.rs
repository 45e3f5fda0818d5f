//! Heap-independent value snapshots.
//!
//! A [`Snapshot`] is a self-contained tree mirroring heap values: the deep-copy
//! representation that crosses isolate boundaries. An [`ExternalSnapshot`] is the
//! shared, encoded form of one -- reference-counted, immutable after construction, and
//! decoded fresh per destination.

use std::{fmt, sync::Arc};

use crate::{heap::HeapData, isolate::Isolate, transfer_error::TransferError, value::Value};

/// Maximum nesting depth for deep copies.
///
/// Caps recursion when copying self-similar list structures out of a heap.
pub(crate) const MAX_COPY_DEPTH: usize = 128;

/// Built-in error classes a snapshot can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, serde::Serialize, serde::Deserialize)]
pub enum ErrorKind {
    Error,
    TypeError,
    RangeError,
}

/// A built-in error object: class plus message.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ErrorValue {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorValue {
    /// Creates an error value.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A self-contained, heap-independent value tree.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Snapshot {
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Snapshot>),
    Error(ErrorValue),
}

impl Snapshot {
    /// Deep-copies `value` out of `isolate`'s heap.
    ///
    /// Fails with `UnsupportedType` for heap kinds that have no heap-independent form
    /// (promises, proxies, snapshot handles) and with `DepthExceeded` past the nesting
    /// cap.
    pub fn copy(value: &Value, isolate: &Isolate) -> Result<Self, TransferError> {
        copy_at_depth(value, isolate, 0)
    }

    /// Copies an immediate value, or returns `None` for heap references.
    #[must_use]
    pub fn copy_if_primitive(value: &Value) -> Option<Self> {
        match value {
            Value::Undefined => Some(Self::Undefined),
            Value::Null => Some(Self::Null),
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Int(i) => Some(Self::Int(*i)),
            Value::Float(f) => Some(Self::Float(*f)),
            Value::Str(s) => Some(Self::Str(s.to_string())),
            Value::Ref(_) => None,
        }
    }

    /// Copies an immediate value or a built-in error object, or returns `None`.
    ///
    /// This is the rejection-payload path: rejection values are almost always errors,
    /// and anything else heap-allocated is not dragged across the boundary.
    #[must_use]
    pub fn copy_if_primitive_or_error(value: &Value, isolate: &Isolate) -> Option<Self> {
        if let Some(primitive) = Self::copy_if_primitive(value) {
            return Some(primitive);
        }
        let Value::Ref(id) = value else { return None };
        match isolate.heap().get(*id) {
            HeapData::Error(error) => Some(Self::Error(error.clone())),
            _ => None,
        }
    }

    /// Instantiates this snapshot as a fresh value inside `isolate`'s heap.
    pub fn instantiate(&self, isolate: &mut Isolate) -> Value {
        match self {
            Self::Undefined => Value::Undefined,
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Int(i) => Value::Int(*i),
            Self::Float(f) => Value::Float(*f),
            Self::Str(s) => Value::Str(s.as_str().into()),
            Self::List(items) => {
                let values = items.iter().map(|item| item.instantiate(isolate)).collect();
                isolate.alloc(HeapData::List(values))
            }
            Self::Error(error) => isolate.alloc(HeapData::Error(error.clone())),
        }
    }
}

fn copy_at_depth(value: &Value, isolate: &Isolate, depth: usize) -> Result<Snapshot, TransferError> {
    if depth > MAX_COPY_DEPTH {
        return Err(TransferError::DepthExceeded);
    }
    if let Some(primitive) = Snapshot::copy_if_primitive(value) {
        return Ok(primitive);
    }
    let Value::Ref(id) = value else { unreachable!() };
    match isolate.heap().get(*id) {
        HeapData::List(items) => {
            let copies = items
                .iter()
                .map(|item| copy_at_depth(item, isolate, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Snapshot::List(copies))
        }
        HeapData::Error(error) => Ok(Snapshot::Error(error.clone())),
        HeapData::Cell(inner) => copy_at_depth(inner, isolate, depth + 1),
        other => Err(TransferError::UnsupportedType {
            type_name: other.type_name(),
        }),
    }
}

/// A shared encoded snapshot.
///
/// Encoded once, decoded fresh per destination. The byte buffer is reference-counted
/// and immutable after construction, so sharing it across threads needs no lock.
#[derive(Debug, Clone)]
pub struct ExternalSnapshot {
    bytes: Arc<[u8]>,
}

impl ExternalSnapshot {
    /// Encodes a snapshot into shared bytes.
    pub fn encode(snapshot: &Snapshot) -> Result<Self, TransferError> {
        let bytes = postcard::to_allocvec(snapshot)?;
        Ok(Self { bytes: bytes.into() })
    }

    /// Decodes a fresh snapshot from the shared bytes.
    pub fn decode(&self) -> Result<Snapshot, TransferError> {
        Ok(postcard::from_bytes(&self.bytes)?)
    }

    /// Size of the encoded form in bytes.
    #[must_use]
    pub fn byte_len(&self) -> usize {
        self.bytes.len()
    }
}
