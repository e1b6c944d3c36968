//! Core error types.

use thiserror::Error;

use crate::catalog::Cardinality;

/// Error returned by a query backend.
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Broad classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The schema or the metadata it was built from is inconsistent.
    Configuration,
    /// The caller's search is malformed.
    Input,
    /// A backend round trip failed or was interrupted.
    Execution,
}

/// Core engine errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Entity type not present in the catalog.
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),

    /// Field not present on an entity.
    #[error("unknown field '{field}' on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    /// A relation path that does not resolve to a relation.
    #[error("relation path '{path}' does not resolve to a relation")]
    UnresolvedRelation { path: String },

    /// A relation whose inverse side cannot be found.
    #[error("cannot resolve inverse side of relation '{relation}'")]
    UnresolvedInverse { relation: String },

    /// A relation kind that an operation cannot handle.
    #[error("{operation} is not supported for {cardinality:?} relation '{relation}'")]
    UnsupportedRelation {
        relation: String,
        cardinality: Cardinality,
        operation: &'static str,
    },

    /// Two relation paths that map to the same backend alias.
    #[error("alias '{alias}' is produced by both '{first}' and '{second}'")]
    AliasCollision {
        alias: String,
        first: String,
        second: String,
    },

    /// Inconsistent schema definition.
    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    /// Malformed search input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Surface parsing error.
    #[error("protocol error: {0}")]
    Proto(#[from] quarry_proto::Error),

    /// Backend failure, with the stage it happened in.
    #[error("backend error during {stage}: {source}")]
    Backend {
        stage: String,
        #[source]
        source: BackendError,
    },

    /// The request was cancelled.
    #[error("request cancelled during {stage}")]
    Cancelled { stage: String },

    /// The request deadline elapsed.
    #[error("deadline exceeded during {stage}")]
    DeadlineExceeded { stage: String },
}

impl Error {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::UnknownEntity(_)
            | Error::UnknownField { .. }
            | Error::UnresolvedRelation { .. }
            | Error::UnresolvedInverse { .. }
            | Error::UnsupportedRelation { .. }
            | Error::AliasCollision { .. }
            | Error::InvalidSchema(_) => ErrorKind::Configuration,
            Error::InvalidInput(_) | Error::Proto(_) => ErrorKind::Input,
            Error::Backend { .. } | Error::Cancelled { .. } | Error::DeadlineExceeded { .. } => {
                ErrorKind::Execution
            }
        }
    }

    pub(crate) fn unknown_field(entity: &str, field: &str) -> Self {
        Error::UnknownField {
            entity: entity.to_string(),
            field: field.to_string(),
        }
    }

    pub(crate) fn unresolved(path: &str) -> Self {
        Error::UnresolvedRelation {
            path: path.to_string(),
        }
    }
}
