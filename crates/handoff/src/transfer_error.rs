use std::fmt;

use crate::{
    isolate::IsolateId,
    snapshot::{ErrorKind, ErrorValue},
};

/// Errors surfaced by transfer dispatch and materialization.
///
/// Separates configuration mistakes from classification misses and collaborator
/// failures, so callers can pattern-match on the category without string parsing.
///
/// Two failure modes from the bridge are deliberately absent: a settlement whose
/// outcome evaluation fails, and bridge abandonment. Both are captured as rejection
/// outcomes delivered to waiters, never as `Err` to the code that triggered them.
#[derive(Debug, Clone)]
pub enum TransferError {
    /// More than one exclusive transfer mode was requested.
    Configuration(String),
    /// No transfer variant could be produced for the value.
    NonTransferable { type_name: &'static str },
    /// The value kind cannot be deep-copied.
    UnsupportedType { type_name: &'static str },
    /// A deep copy exceeded the nesting-depth cap.
    DepthExceeded,
    /// Materialization needed an isolate that has been destroyed.
    IsolateDestroyed { isolate: IsolateId },
    /// Snapshot encoding or decoding failed.
    Codec(postcard::Error),
}

impl fmt::Display for TransferError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(message) => f.write_str(message),
            Self::NonTransferable { type_name } => {
                write!(f, "A non-transferable value was passed (type {type_name})")
            }
            Self::UnsupportedType { type_name } => {
                write!(f, "a value of type {type_name} is not copyable")
            }
            Self::DepthExceeded => f.write_str("maximum copy depth exceeded"),
            Self::IsolateDestroyed { isolate } => write!(f, "{isolate} has been destroyed"),
            Self::Codec(error) => write!(f, "snapshot codec error: {error}"),
        }
    }
}

impl std::error::Error for TransferError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Codec(error) => Some(error),
            _ => None,
        }
    }
}

impl From<postcard::Error> for TransferError {
    fn from(error: postcard::Error) -> Self {
        Self::Codec(error)
    }
}

impl TransferError {
    /// Renders this error as an error value, for delivery as a rejection outcome.
    #[must_use]
    pub(crate) fn to_error_value(&self) -> ErrorValue {
        let kind = match self {
            Self::Configuration(_) | Self::NonTransferable { .. } | Self::UnsupportedType { .. } => ErrorKind::TypeError,
            Self::DepthExceeded => ErrorKind::RangeError,
            Self::IsolateDestroyed { .. } | Self::Codec(_) => ErrorKind::Error,
        };
        ErrorValue::new(kind, self.to_string())
    }
}
