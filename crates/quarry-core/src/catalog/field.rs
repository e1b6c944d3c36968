//! Field definitions for entities.

use serde::{Deserialize, Serialize};

use super::relation::RelationDef;
use super::types::FieldType;

/// What a field holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// A stored column.
    Column(FieldType),
    /// A relation to another entity.
    Relation(RelationDef),
}

/// Role of a field within its entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRole {
    /// Plain column.
    Column,
    /// The entity's primary key column.
    PrimaryKey,
    /// Relation field.
    Relation,
    /// Column holding the foreign key of one of the entity's relations.
    RelationForeignKey,
}

/// A field definition within an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    /// Field name.
    pub name: String,
    /// Column type or relation descriptor.
    #[serde(flatten)]
    pub kind: FieldKind,
}

impl FieldDef {
    /// Create a column field.
    pub fn column(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            kind: FieldKind::Column(field_type),
        }
    }

    /// Create a relation field; its name is taken from the descriptor.
    pub fn relation(relation: RelationDef) -> Self {
        Self {
            name: relation.name.clone(),
            kind: FieldKind::Relation(relation),
        }
    }

    /// Relation descriptor, if this is a relation field.
    pub fn as_relation(&self) -> Option<&RelationDef> {
        match &self.kind {
            FieldKind::Relation(rel) => Some(rel),
            FieldKind::Column(_) => None,
        }
    }

    /// Column type, if this is a column.
    pub fn column_type(&self) -> Option<&FieldType> {
        match &self.kind {
            FieldKind::Column(ty) => Some(ty),
            FieldKind::Relation(_) => None,
        }
    }

    /// Check if this is a stored column.
    pub fn is_column(&self) -> bool {
        matches!(self.kind, FieldKind::Column(_))
    }
}
