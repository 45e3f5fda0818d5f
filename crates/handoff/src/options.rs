use crate::transfer_error::TransferError;

/// How a value crosses an isolate boundary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::Display, serde::Serialize, serde::Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum TransferMode {
    /// Classify automatically: wrappers transfer themselves, primitives and built-in
    /// errors are copied, everything else falls back to the configured fallback mode.
    #[default]
    Auto,
    /// Independent deep snapshot, cloned into each destination heap.
    Copy,
    /// One shared encoded snapshot, decoded fresh per destination.
    ExternalCopy,
    /// Live back-reference; the value stays owned by its origin isolate.
    Reference,
}

/// Raw caller-supplied transfer flags, before validation.
///
/// Mirrors the external option shape: at most one of `copy`/`external_copy`/
/// `reference` may be set, and `promise` composes with any of them.
#[derive(Debug, Clone, Copy, Default, serde::Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TransferOptionsInput {
    pub copy: bool,
    pub external_copy: bool,
    pub reference: bool,
    pub promise: bool,
}

/// Validated transfer options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferOptions {
    /// The requested transfer mode (`Auto` when no explicit flag was set).
    pub mode: TransferMode,
    /// Mode applied when `Auto` cannot classify the value.
    pub fallback: TransferMode,
    /// Bridge the value as a pending asynchronous result.
    pub promise: bool,
}

impl TransferOptions {
    /// Validates raw flags into resolved options.
    ///
    /// Fails before any transfer work begins when more than one exclusive mode is
    /// requested; absence of all three leaves the mode `Auto`.
    pub fn parse(input: TransferOptionsInput, fallback: TransferMode) -> Result<Self, TransferError> {
        let TransferOptionsInput {
            copy,
            external_copy,
            reference,
            promise,
        } = input;
        if usize::from(copy) + usize::from(external_copy) + usize::from(reference) > 1 {
            return Err(TransferError::Configuration(
                "Only one of `copy`, `externalCopy`, or `reference` may be set".to_owned(),
            ));
        }
        let mode = if copy {
            TransferMode::Copy
        } else if external_copy {
            TransferMode::ExternalCopy
        } else if reference {
            TransferMode::Reference
        } else {
            TransferMode::Auto
        };
        Ok(Self {
            mode,
            fallback,
            promise,
        })
    }
}
