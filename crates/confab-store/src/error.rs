use confab_types::RecordKind;
use thiserror::Error;

/// Failures surfaced by a backing store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The write violated a uniqueness rule the store enforces
    /// (profile usernames).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A patch referenced a field this record kind does not carry, or
    /// carried a value of the wrong shape for it.
    #[error("{kind:?} records have no writable field '{field}'")]
    UnknownField {
        kind: RecordKind,
        field: &'static str,
    },

    /// Opaque backend failure (network, storage), passed through as-is.
    #[error("backing store error: {0}")]
    Backend(String),
}
