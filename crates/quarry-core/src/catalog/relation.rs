//! Relation descriptors between entities.

use serde::{Deserialize, Serialize};

/// Cardinality of a relation, seen from the entity declaring it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// At most one related entity on each side.
    OneToOne,
    /// Many declaring entities point at one related entity (foreign key here).
    ManyToOne,
    /// One declaring entity owns many related entities (foreign key there).
    OneToMany,
    /// Linked through a join table.
    ManyToMany,
}

impl Cardinality {
    /// Whether the relation resolves to at most one entity.
    pub fn is_single_valued(&self) -> bool {
        matches!(self, Cardinality::OneToOne | Cardinality::ManyToOne)
    }
}

/// Join table of a many-to-many relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTable {
    /// Join table name.
    pub table: String,
    /// Column referencing the owning entity's primary key.
    pub owner_column: String,
    /// Column referencing the related entity's primary key.
    pub related_column: String,
}

/// A relation field on an entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationDef {
    /// Relation field name; filled from the field when omitted.
    #[serde(default)]
    pub name: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Related entity name.
    pub related_entity: String,
    /// Whether this side holds the foreign key or the join table.
    #[serde(default)]
    pub owning_side: bool,
    /// Relation field on the related entity pointing back here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inverse_field: Option<String>,
    /// Column on this entity holding the related primary key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub foreign_key: Option<String>,
    /// Join table, owning side of many-to-many only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_table: Option<JoinTable>,
}

/// How a relation links the two tables, resolved against the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationLink<'a> {
    /// `parent.foreign_key = related.pk`
    Owned { foreign_key: &'a str },
    /// `related.foreign_key = parent.pk`
    Inverse { foreign_key: &'a str },
    /// `table.parent_column = parent.pk` and `table.related_column = related.pk`
    Through {
        table: &'a str,
        parent_column: &'a str,
        related_column: &'a str,
    },
}

impl RelationDef {
    fn new(name: impl Into<String>, cardinality: Cardinality, related_entity: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cardinality,
            related_entity: related_entity.into(),
            owning_side: false,
            inverse_field: None,
            foreign_key: None,
            join_table: None,
        }
    }

    /// Many-to-one relation stored in `foreign_key` on the declaring entity.
    pub fn many_to_one(
        name: impl Into<String>,
        related_entity: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let mut rel = Self::new(name, Cardinality::ManyToOne, related_entity);
        rel.owning_side = true;
        rel.foreign_key = Some(foreign_key.into());
        rel
    }

    /// One-to-many relation, the inverse of `inverse_field` on the related entity.
    pub fn one_to_many(
        name: impl Into<String>,
        related_entity: impl Into<String>,
        inverse_field: impl Into<String>,
    ) -> Self {
        Self::new(name, Cardinality::OneToMany, related_entity).with_inverse(inverse_field)
    }

    /// Owning side of a one-to-one relation.
    pub fn one_to_one(
        name: impl Into<String>,
        related_entity: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        let mut rel = Self::new(name, Cardinality::OneToOne, related_entity);
        rel.owning_side = true;
        rel.foreign_key = Some(foreign_key.into());
        rel
    }

    /// Inverse side of a one-to-one relation.
    pub fn one_to_one_inverse(
        name: impl Into<String>,
        related_entity: impl Into<String>,
        inverse_field: impl Into<String>,
    ) -> Self {
        Self::new(name, Cardinality::OneToOne, related_entity).with_inverse(inverse_field)
    }

    /// Owning side of a many-to-many relation.
    pub fn many_to_many(
        name: impl Into<String>,
        related_entity: impl Into<String>,
        join_table: JoinTable,
    ) -> Self {
        let mut rel = Self::new(name, Cardinality::ManyToMany, related_entity);
        rel.owning_side = true;
        rel.join_table = Some(join_table);
        rel
    }

    /// Inverse side of a many-to-many relation.
    pub fn many_to_many_inverse(
        name: impl Into<String>,
        related_entity: impl Into<String>,
        inverse_field: impl Into<String>,
    ) -> Self {
        Self::new(name, Cardinality::ManyToMany, related_entity).with_inverse(inverse_field)
    }

    /// Set the inverse field.
    pub fn with_inverse(mut self, inverse_field: impl Into<String>) -> Self {
        self.inverse_field = Some(inverse_field.into());
        self
    }

    /// Check if this is a many-to-many relation.
    pub fn is_many_to_many(&self) -> bool {
        self.cardinality == Cardinality::ManyToMany
    }

    /// Whether the declaring entity stores the foreign key.
    pub fn holds_foreign_key(&self) -> bool {
        self.owning_side && self.foreign_key.is_some()
    }
}

impl JoinTable {
    /// Create a join table descriptor.
    pub fn new(
        table: impl Into<String>,
        owner_column: impl Into<String>,
        related_column: impl Into<String>,
    ) -> Self {
        Self {
            table: table.into(),
            owner_column: owner_column.into(),
            related_column: related_column.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_many_to_one_relation() {
        let rel = RelationDef::many_to_one("mainPhoto", "Photo", "mainPhotoId");
        assert_eq!(rel.cardinality, Cardinality::ManyToOne);
        assert!(rel.holds_foreign_key());
        assert!(rel.cardinality.is_single_valued());
    }

    #[test]
    fn test_one_to_many_relation() {
        let rel = RelationDef::one_to_many("images", "Image", "user");
        assert!(!rel.owning_side);
        assert_eq!(rel.inverse_field.as_deref(), Some("user"));
        assert!(!rel.cardinality.is_single_valued());
    }

    #[test]
    fn test_many_to_many_relation() {
        let rel = RelationDef::many_to_many("tags", "Tag", JoinTable::new("user_tags", "userId", "tagId"));
        assert!(rel.is_many_to_many());
        assert!(!rel.holds_foreign_key());
        assert_eq!(rel.join_table.as_ref().map(|t| t.table.as_str()), Some("user_tags"));
    }
}
