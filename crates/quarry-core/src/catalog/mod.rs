//! Entity metadata for quarry.
//!
//! The catalog describes entities, their columns and the relations between
//! them. It is built once from a [`SchemaBundle`] and only read afterwards.

mod catalog;
mod entity;
mod field;
mod relation;
mod schema;
mod types;

pub use catalog::{Catalog, MetadataProvider};
pub use entity::{EntityDef, OrderBy};
pub use field::{FieldDef, FieldKind, FieldRole};
pub use relation::{Cardinality, JoinTable, RelationDef, RelationLink};
pub use schema::SchemaBundle;
pub use types::{FieldType, ScalarType};
