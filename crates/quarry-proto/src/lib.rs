//! Quarry search surface types.
//!
//! This crate defines the declarative side of quarry: what a caller hands to
//! the engine and what it gets back.
//!
//! # Modules
//!
//! - [`value`] - Runtime value types for condition operands and record columns
//! - [`condition`] - Condition AST and its map/tuple surface forms
//! - [`search`] - Search specification, relation requests, sorting and pagination
//! - [`record`] - Result records with resolved relations
//! - [`error`] - Surface error types
//!
//! # Example
//!
//! ```ignore
//! use quarry_proto::{Condition, SearchSpec};
//!
//! let spec = SearchSpec::new("User")
//!     .join("images")
//!     .with_condition(Condition::some("images", Condition::eq("kind", "avatar")))
//!     .limit(10);
//! ```

pub mod condition;
pub mod error;
pub mod record;
pub mod search;
pub mod value;

pub use error::Error;

// Re-export commonly used types at crate root
pub use condition::{CompareOp, Condition, Operand, Quantifier};
pub use record::{Record, Related};
pub use search::{
    AliasMode, OrderDirection, OrderSpec, Pagination, RelationRequest, RelationSelect, SearchSpec,
    DEFAULT_ROOT_ALIAS,
};
pub use value::{Value, ValueKey};
