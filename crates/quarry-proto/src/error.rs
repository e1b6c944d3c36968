//! Surface-level error types.

use thiserror::Error;

/// Errors raised while reading the declarative search surface.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum Error {
    /// Operator string that is not part of the condition language.
    #[error("unknown condition operator '{0}'")]
    UnknownOperator(String),

    /// Structurally invalid condition (wrong operand count or shape).
    #[error("invalid condition: {0}")]
    InvalidCondition(String),

    /// A JSON value that has no runtime value representation.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Malformed relation request.
    #[error("invalid relation request: {0}")]
    InvalidRelationRequest(String),

    /// Malformed sort specification.
    #[error("invalid sort specification '{0}'")]
    InvalidSort(String),

    /// Malformed search specification document.
    #[error("invalid search specification: {0}")]
    InvalidSearch(String),
}
