//! Domain errors.

use thiserror::Error;

/// Failure writing a named property on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    /// A typed accessor exists and the value has the wrong variant.
    #[error("expected {0}")]
    Expected(&'static str),
    /// A typed accessor exists but does not accept writes.
    #[error("read-only member")]
    ReadOnly,
    /// The target cannot store the member at all.
    #[error("unknown member")]
    UnknownMember,
}
