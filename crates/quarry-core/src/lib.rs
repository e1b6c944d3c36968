//! Quarry core - declarative search compilation and relation hydration.
//!
//! A search names a root entity, the relations to load with it, a filter
//! condition and an ordering. This crate compiles it against entity metadata
//! into a backend-neutral select query, runs it through a [`QueryBackend`], and
//! loads relations that were not joined with one batched query per level.

pub mod backend;
pub mod cancel;
pub mod catalog;
pub mod config;
pub mod error;
pub mod query;

pub use quarry_proto as proto;

pub use backend::{MemoryBackend, QueryBackend};
pub use cancel::{CancelToken, RequestContext};
pub use catalog::{
    Cardinality, Catalog, EntityDef, FieldDef, FieldType, JoinTable, MetadataProvider, OrderBy, RelationDef,
    ScalarType, SchemaBundle,
};
pub use config::SearchConfig;
pub use error::{BackendError, Error, ErrorKind};
pub use query::{CompiledSearch, SearchExecutor, SelectQuery};
