//! Schema bundle - snapshot of every entity the engine can query.

use serde::{Deserialize, Serialize};

use super::relation::{Cardinality, RelationDef};
use super::EntityDef;
use crate::error::Error;

/// A versioned snapshot of the entire schema.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SchemaBundle {
    /// Schema version.
    #[serde(default)]
    pub version: u64,
    /// Entity definitions.
    pub entities: Vec<EntityDef>,
}

impl SchemaBundle {
    /// Create an empty schema bundle.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            entities: Vec::new(),
        }
    }

    /// Add an entity, replacing any entity with the same name.
    pub fn with_entity(mut self, entity: EntityDef) -> Self {
        self.entities.retain(|e| e.name != entity.name);
        self.entities.push(entity);
        self
    }

    /// Get an entity by name.
    pub fn get_entity(&self, name: &str) -> Option<&EntityDef> {
        self.entities.iter().find(|e| e.name == name)
    }

    /// List all entity names.
    pub fn entity_names(&self) -> Vec<&str> {
        self.entities.iter().map(|e| e.name.as_str()).collect()
    }

    /// Parse a schema bundle from JSON.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        serde_json::from_str(json).map_err(|e| Error::InvalidSchema(e.to_string()))
    }

    /// Serialize the schema bundle to JSON.
    pub fn to_json(&self) -> Result<String, Error> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSchema(e.to_string()))
    }

    /// Fill relation names omitted in serialized form from their field names.
    pub(crate) fn normalize(&mut self) {
        for entity in &mut self.entities {
            for field in &mut entity.fields {
                if let super::FieldKind::Relation(rel) = &mut field.kind {
                    if rel.name.is_empty() {
                        rel.name = field.name.clone();
                    }
                }
            }
        }
    }

    /// Check that the schema is internally consistent.
    ///
    /// Every relation must point at a known entity and carry what its
    /// cardinality needs: a foreign key column on owning single-valued sides, a
    /// join table on owning many-to-many sides, and an inverse field that
    /// resolves on the other sides.
    pub fn validate(&self) -> Result<(), Error> {
        for entity in &self.entities {
            if self.entities.iter().filter(|e| e.name == entity.name).count() > 1 {
                return Err(Error::InvalidSchema(format!(
                    "entity '{}' is defined more than once",
                    entity.name
                )));
            }
            match entity.get_field(&entity.identity_field) {
                Some(field) if field.is_column() => {}
                _ => {
                    return Err(Error::InvalidSchema(format!(
                        "identity field '{}' of '{}' is not a column",
                        entity.identity_field, entity.name
                    )))
                }
            }
            for field in &entity.fields {
                if let Some(rel) = field.as_relation() {
                    if rel.name != field.name {
                        return Err(Error::InvalidSchema(format!(
                            "relation field '{}.{}' is named '{}'",
                            entity.name, field.name, rel.name
                        )));
                    }
                    self.validate_relation(entity, rel)?;
                }
            }
        }
        Ok(())
    }

    fn validate_relation(&self, entity: &EntityDef, rel: &RelationDef) -> Result<(), Error> {
        let qualified = format!("{}.{}", entity.name, rel.name);
        let related = self
            .get_entity(&rel.related_entity)
            .ok_or_else(|| Error::UnknownEntity(rel.related_entity.clone()))?;

        if rel.owning_side {
            match rel.cardinality {
                Cardinality::ManyToOne | Cardinality::OneToOne => {
                    let fk = rel.foreign_key.as_deref().ok_or_else(|| {
                        Error::InvalidSchema(format!("relation '{qualified}' needs a foreign key"))
                    })?;
                    if !entity.get_field(fk).is_some_and(|f| f.is_column()) {
                        return Err(Error::unknown_field(&entity.name, fk));
                    }
                }
                Cardinality::ManyToMany => {
                    if rel.join_table.is_none() {
                        return Err(Error::InvalidSchema(format!(
                            "relation '{qualified}' needs a join table"
                        )));
                    }
                }
                Cardinality::OneToMany => {
                    return Err(Error::InvalidSchema(format!(
                        "one-to-many relation '{qualified}' cannot be the owning side"
                    )))
                }
            }
            return Ok(());
        }

        // Inverse sides resolve through the related entity.
        let inverse = rel
            .inverse_field
            .as_deref()
            .and_then(|name| related.get_relation(name))
            .ok_or_else(|| Error::UnresolvedInverse {
                relation: qualified.clone(),
            })?;
        let consistent = match rel.cardinality {
            Cardinality::OneToMany => {
                inverse.cardinality == Cardinality::ManyToOne && inverse.holds_foreign_key()
            }
            Cardinality::OneToOne => {
                inverse.cardinality == Cardinality::OneToOne && inverse.holds_foreign_key()
            }
            Cardinality::ManyToMany => {
                inverse.cardinality == Cardinality::ManyToMany && inverse.join_table.is_some()
            }
            Cardinality::ManyToOne => false,
        };
        if consistent && inverse.related_entity == entity.name {
            Ok(())
        } else {
            Err(Error::UnresolvedInverse {
                relation: qualified,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldType, JoinTable, ScalarType};

    fn sample_schema() -> SchemaBundle {
        let user = EntityDef::new("User", "id")
            .with_column("id", FieldType::scalar(ScalarType::Int64))
            .with_column("name", FieldType::scalar(ScalarType::String))
            .with_relation(RelationDef::one_to_many("posts", "Post", "author"))
            .with_relation(RelationDef::many_to_many(
                "tags",
                "Tag",
                JoinTable::new("user_tags", "userId", "tagId"),
            ));

        let post = EntityDef::new("Post", "id")
            .with_column("id", FieldType::scalar(ScalarType::Int64))
            .with_column("authorId", FieldType::scalar(ScalarType::Int64))
            .with_relation(RelationDef::many_to_one("author", "User", "authorId"));

        let tag = EntityDef::new("Tag", "id")
            .with_column("id", FieldType::scalar(ScalarType::Int64))
            .with_relation(RelationDef::many_to_many_inverse("users", "User", "tags"));

        SchemaBundle::new(1)
            .with_entity(user)
            .with_entity(post)
            .with_entity(tag)
    }

    #[test]
    fn test_valid_schema() {
        let schema = sample_schema();
        assert_eq!(schema.entities.len(), 3);
        assert!(schema.validate().is_ok());
    }

    #[test]
    fn test_with_entity_replaces() {
        let schema = sample_schema().with_entity(
            EntityDef::new("Tag", "id").with_column("id", FieldType::scalar(ScalarType::Int64)),
        );
        assert_eq!(schema.entities.len(), 3);
        assert_eq!(schema.get_entity("Tag").map(|t| t.fields.len()), Some(1));
    }

    #[test]
    fn test_one_to_many_without_inverse_is_fatal() {
        let schema = sample_schema().with_entity(
            EntityDef::new("Post", "id").with_column("id", FieldType::scalar(ScalarType::Int64)),
        );
        let err = schema.validate().unwrap_err();
        assert!(matches!(err, Error::UnresolvedInverse { ref relation } if relation == "User.posts"));
    }

    #[test]
    fn test_unknown_related_entity() {
        let schema = SchemaBundle::new(1).with_entity(
            EntityDef::new("User", "id")
                .with_column("id", FieldType::scalar(ScalarType::Int64))
                .with_column("photoId", FieldType::scalar(ScalarType::Int64))
                .with_relation(RelationDef::many_to_one("photo", "Photo", "photoId")),
        );
        assert!(matches!(schema.validate(), Err(Error::UnknownEntity(name)) if name == "Photo"));
    }

    #[test]
    fn test_json_roundtrip() {
        let schema = sample_schema();
        let json = schema.to_json().unwrap();
        assert_eq!(SchemaBundle::from_json(&json).unwrap(), schema);
    }
}
