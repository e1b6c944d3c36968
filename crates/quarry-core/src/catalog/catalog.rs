//! Read-only metadata lookups over a validated schema.

use std::collections::{BTreeSet, HashMap};

use super::field::{FieldDef, FieldRole};
use super::relation::{Cardinality, RelationDef, RelationLink};
use super::{EntityDef, SchemaBundle};
use crate::error::Error;

/// Entity metadata consumed by the compiler, the planner and the hydrator.
///
/// Implementations must be immutable for the lifetime of a search.
pub trait MetadataProvider: Send + Sync {
    /// Entity definition by name.
    fn entity(&self, entity: &str) -> Result<&EntityDef, Error>;

    /// Ordered field names of an entity.
    fn fields(&self, entity: &str) -> Result<Vec<&str>, Error> {
        Ok(self
            .entity(entity)?
            .fields
            .iter()
            .map(|f| f.name.as_str())
            .collect())
    }

    /// Field definition, or `UnknownField`.
    fn field_descriptor(&self, entity: &str, field: &str) -> Result<&FieldDef, Error> {
        self.entity(entity)?
            .get_field(field)
            .ok_or_else(|| Error::unknown_field(entity, field))
    }

    /// Role of a field within its entity.
    fn field_role(&self, entity: &str, field: &str) -> Result<FieldRole, Error> {
        self.entity(entity)?
            .field_role(field)
            .ok_or_else(|| Error::unknown_field(entity, field))
    }

    /// Primary key column of an entity.
    fn primary_key(&self, entity: &str) -> Result<&str, Error> {
        Ok(self.entity(entity)?.identity_field.as_str())
    }

    /// Relation descriptor of a field, `None` if the field is a column.
    fn relation(&self, entity: &str, field: &str) -> Result<Option<&RelationDef>, Error> {
        Ok(self.field_descriptor(entity, field)?.as_relation())
    }

    /// Whether an entity is known.
    fn entity_exists(&self, entity: &str) -> bool {
        self.entity(entity).is_ok()
    }

    /// Walk a relation path from `entity`, returning the relation of each segment.
    ///
    /// Any segment that is missing or not a relation fails with
    /// `UnresolvedRelation` naming the full path.
    fn resolve_path(&self, entity: &str, path: &str) -> Result<Vec<&RelationDef>, Error> {
        let mut current = entity;
        let mut relations = Vec::new();
        for segment in path.split('.') {
            let rel = self
                .entity(current)?
                .get_relation(segment)
                .ok_or_else(|| Error::unresolved(path))?;
            current = rel.related_entity.as_str();
            relations.push(rel);
        }
        Ok(relations)
    }

    /// How `relation`, declared on `entity`, links the two tables.
    fn relation_link<'a>(
        &'a self,
        entity: &str,
        relation: &'a RelationDef,
    ) -> Result<RelationLink<'a>, Error> {
        let qualified = || format!("{entity}.{}", relation.name);
        if relation.owning_side {
            if let Some(fk) = relation.foreign_key.as_deref() {
                return Ok(RelationLink::Owned { foreign_key: fk });
            }
            if let Some(table) = &relation.join_table {
                return Ok(RelationLink::Through {
                    table: &table.table,
                    parent_column: &table.owner_column,
                    related_column: &table.related_column,
                });
            }
            return Err(Error::InvalidSchema(format!(
                "relation '{}' has neither a foreign key nor a join table",
                qualified()
            )));
        }

        let inverse = relation
            .inverse_field
            .as_deref()
            .map(|name| self.relation(&relation.related_entity, name))
            .transpose()
            .map_err(|_| Error::UnresolvedInverse {
                relation: qualified(),
            })?
            .flatten()
            .ok_or_else(|| Error::UnresolvedInverse {
                relation: qualified(),
            })?;

        match (relation.cardinality, &inverse.foreign_key, &inverse.join_table) {
            (Cardinality::ManyToMany, _, Some(table)) => Ok(RelationLink::Through {
                table: &table.table,
                parent_column: &table.related_column,
                related_column: &table.owner_column,
            }),
            (Cardinality::OneToMany | Cardinality::OneToOne, Some(fk), _) => {
                Ok(RelationLink::Inverse { foreign_key: fk })
            }
            _ => Err(Error::UnresolvedInverse {
                relation: qualified(),
            }),
        }
    }

    /// Every relation path reachable from `entity`, up to `max_depth` segments.
    ///
    /// Paths are visited breadth-first; the visited set is keyed by full path,
    /// so the same entity type may appear under several paths.
    fn relation_paths(&self, entity: &str, max_depth: usize) -> Result<Vec<String>, Error> {
        let mut visited = BTreeSet::new();
        let mut frontier = vec![(String::new(), self.entity(entity)?)];
        for _ in 0..max_depth {
            let mut next = Vec::new();
            for (prefix, def) in frontier {
                for rel in def.relations() {
                    let path = if prefix.is_empty() {
                        rel.name.clone()
                    } else {
                        format!("{prefix}.{}", rel.name)
                    };
                    if visited.insert(path.clone()) {
                        next.push((path, self.entity(&rel.related_entity)?));
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
        }
        Ok(visited.into_iter().collect())
    }
}

/// The catalog of entity metadata.
///
/// Built once from a validated [`SchemaBundle`] and only read afterwards.
#[derive(Debug, Clone)]
pub struct Catalog {
    schema: SchemaBundle,
    index: HashMap<String, usize>,
}

impl Catalog {
    /// Validate a schema bundle and index it.
    pub fn new(mut schema: SchemaBundle) -> Result<Self, Error> {
        schema.normalize();
        schema.validate()?;
        let index = schema
            .entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        Ok(Self { schema, index })
    }

    /// Parse, validate and index a JSON schema bundle.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        Self::new(SchemaBundle::from_json(json)?)
    }

    /// The underlying schema.
    pub fn schema(&self) -> &SchemaBundle {
        &self.schema
    }

    /// Schema version.
    pub fn version(&self) -> u64 {
        self.schema.version
    }

    /// List all entity names.
    pub fn list_entities(&self) -> Vec<&str> {
        self.schema.entity_names()
    }
}

impl MetadataProvider for Catalog {
    fn entity(&self, entity: &str) -> Result<&EntityDef, Error> {
        self.index
            .get(entity)
            .and_then(|&i| self.schema.entities.get(i))
            .ok_or_else(|| Error::UnknownEntity(entity.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FieldType, JoinTable, ScalarType};

    fn catalog() -> Catalog {
        let id = || FieldType::scalar(ScalarType::Int64);
        let user = EntityDef::new("User", "id")
            .with_column("id", id())
            .with_column("name", FieldType::scalar(ScalarType::String))
            .with_column("mainPhotoId", FieldType::optional_scalar(ScalarType::Int64))
            .with_relation(RelationDef::many_to_one("mainPhoto", "Photo", "mainPhotoId"))
            .with_relation(RelationDef::one_to_many("photos", "Photo", "owner"))
            .with_relation(RelationDef::many_to_many(
                "tags",
                "Tag",
                JoinTable::new("user_tags", "userId", "tagId"),
            ));
        let photo = EntityDef::new("Photo", "id")
            .with_column("id", id())
            .with_column("ownerId", id())
            .with_relation(RelationDef::many_to_one("owner", "User", "ownerId"));
        let tag = EntityDef::new("Tag", "id")
            .with_column("id", id())
            .with_relation(RelationDef::many_to_many_inverse("users", "User", "tags"));

        Catalog::new(
            SchemaBundle::new(1)
                .with_entity(user)
                .with_entity(photo)
                .with_entity(tag),
        )
        .unwrap()
    }

    #[test]
    fn test_lookups() {
        let catalog = catalog();
        assert_eq!(catalog.primary_key("User").unwrap(), "id");
        assert_eq!(
            catalog.fields("Photo").unwrap(),
            vec!["id", "ownerId", "owner"]
        );
        assert_eq!(
            catalog.field_role("User", "mainPhotoId").unwrap(),
            FieldRole::RelationForeignKey
        );
        assert!(catalog.relation("User", "name").unwrap().is_none());
        assert!(matches!(
            catalog.field_descriptor("User", "nickname"),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(catalog.entity("Nope"), Err(Error::UnknownEntity(_))));
        assert!(catalog.entity_exists("Tag"));
    }

    #[test]
    fn test_resolve_path() {
        let catalog = catalog();
        let chain = catalog.resolve_path("User", "photos.owner.tags").unwrap();
        let names: Vec<_> = chain.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["photos", "owner", "tags"]);

        let err = catalog.resolve_path("User", "photos.ownerId").unwrap_err();
        assert!(matches!(err, Error::UnresolvedRelation { ref path } if path == "photos.ownerId"));
    }

    #[test]
    fn test_relation_links() {
        let catalog = catalog();
        let user = catalog.entity("User").unwrap();

        let main = user.get_relation("mainPhoto").unwrap();
        assert_eq!(
            catalog.relation_link("User", main).unwrap(),
            RelationLink::Owned {
                foreign_key: "mainPhotoId"
            }
        );

        let photos = user.get_relation("photos").unwrap();
        assert_eq!(
            catalog.relation_link("User", photos).unwrap(),
            RelationLink::Inverse {
                foreign_key: "ownerId"
            }
        );

        let users = catalog.entity("Tag").unwrap().get_relation("users").unwrap();
        assert_eq!(
            catalog.relation_link("Tag", users).unwrap(),
            RelationLink::Through {
                table: "user_tags",
                parent_column: "tagId",
                related_column: "userId"
            }
        );
    }

    #[test]
    fn test_relation_paths_follow_cycles_by_path() {
        let catalog = catalog();
        let paths = catalog.relation_paths("User", 2).unwrap();
        assert!(paths.contains(&"mainPhoto".to_string()));
        assert!(paths.contains(&"photos.owner".to_string()));
        assert!(paths.contains(&"mainPhoto.owner".to_string()));
        assert!(paths.contains(&"tags.users".to_string()));
        assert!(!paths.iter().any(|p| p.split('.').count() > 2));
    }
}
