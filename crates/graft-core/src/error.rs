//! Error types for Graft Core.

use thiserror::Error;

/// Structural validation errors for syncable snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("entity id is empty")]
    EmptyId,

    #[error("type name is empty for entity {0}")]
    EmptyTypeName(String),

    #[error("type name of entity {id} exceeds {max} bytes")]
    TypeNameTooLong { id: String, max: usize },

    #[error("entity {id} has {count} properties, maximum is {max}")]
    TooManyProperties { id: String, count: usize, max: usize },

    #[error("relationship {0} has an empty endpoint id")]
    EmptyEndpoint(String),
}
