//! Entity definitions.

use quarry_proto::OrderDirection;
use serde::{Deserialize, Serialize};

use super::field::{FieldDef, FieldKind, FieldRole};
use super::relation::RelationDef;
use super::types::FieldType;

/// An entity definition (table schema).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDef {
    /// Entity name (unique within schema).
    pub name: String,
    /// Backing table; defaults to the entity name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Name of the primary key column.
    pub identity_field: String,
    /// Field definitions, in declaration order.
    pub fields: Vec<FieldDef>,
    /// Ordering applied when a search specifies none.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_order: Vec<OrderBy>,
}

/// Order specification for default ordering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    /// Field name to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl EntityDef {
    /// Create a new entity definition.
    pub fn new(name: impl Into<String>, identity_field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            identity_field: identity_field.into(),
            fields: Vec::new(),
            default_order: Vec::new(),
        }
    }

    /// Add a field to the entity.
    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    /// Add a column.
    pub fn with_column(self, name: impl Into<String>, field_type: FieldType) -> Self {
        self.with_field(FieldDef::column(name, field_type))
    }

    /// Add a relation field.
    pub fn with_relation(self, relation: RelationDef) -> Self {
        self.with_field(FieldDef::relation(relation))
    }

    /// Set the backing table.
    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = Some(table.into());
        self
    }

    /// Append a default ordering term.
    pub fn with_default_order(mut self, order: OrderBy) -> Self {
        self.default_order.push(order);
        self
    }

    /// Backing table name.
    pub fn table_name(&self) -> &str {
        self.table.as_deref().unwrap_or(&self.name)
    }

    /// Get a field by name.
    pub fn get_field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Get a relation field by name.
    pub fn get_relation(&self, name: &str) -> Option<&RelationDef> {
        self.get_field(name).and_then(FieldDef::as_relation)
    }

    /// Stored columns, in declaration order.
    pub fn columns(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields.iter().filter(|f| f.is_column())
    }

    /// Relation fields, in declaration order.
    pub fn relations(&self) -> impl Iterator<Item = &RelationDef> {
        self.fields.iter().filter_map(FieldDef::as_relation)
    }

    /// Role of a field within this entity.
    pub fn field_role(&self, name: &str) -> Option<FieldRole> {
        let field = self.get_field(name)?;
        Some(match field.kind {
            FieldKind::Relation(_) => FieldRole::Relation,
            FieldKind::Column(_) if field.name == self.identity_field => FieldRole::PrimaryKey,
            FieldKind::Column(_)
                if self
                    .relations()
                    .any(|rel| rel.foreign_key.as_deref() == Some(name)) =>
            {
                FieldRole::RelationForeignKey
            }
            FieldKind::Column(_) => FieldRole::Column,
        })
    }
}

impl OrderBy {
    /// Create ascending order.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create descending order.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ScalarType;

    fn user() -> EntityDef {
        EntityDef::new("User", "id")
            .with_column("id", FieldType::scalar(ScalarType::Int64))
            .with_column("name", FieldType::scalar(ScalarType::String))
            .with_column("mainPhotoId", FieldType::optional_scalar(ScalarType::Int64))
            .with_relation(RelationDef::many_to_one("mainPhoto", "Photo", "mainPhotoId"))
            .with_default_order(OrderBy::asc("name"))
    }

    #[test]
    fn test_entity_builder() {
        let entity = user();
        assert_eq!(entity.table_name(), "User");
        assert_eq!(entity.columns().count(), 3);
        assert_eq!(entity.relations().count(), 1);
        assert!(entity.get_relation("mainPhoto").is_some());
        assert!(entity.get_relation("name").is_none());
    }

    #[test]
    fn test_field_roles() {
        let entity = user();
        assert_eq!(entity.field_role("id"), Some(FieldRole::PrimaryKey));
        assert_eq!(entity.field_role("name"), Some(FieldRole::Column));
        assert_eq!(entity.field_role("mainPhotoId"), Some(FieldRole::RelationForeignKey));
        assert_eq!(entity.field_role("mainPhoto"), Some(FieldRole::Relation));
        assert_eq!(entity.field_role("missing"), None);
    }
}
