//! Join planning: relation paths to ordered, aliased plan entries.

use std::collections::{BTreeMap, HashMap};

use quarry_proto::search::{parent_path, path_depth, path_prefixes, relation_name};
use quarry_proto::{RelationRequest, RelationSelect};
use tracing::debug;

use super::alias::AliasTable;
use super::select::{ColumnRef, JoinClause, JoinKind, JoinOn};
use crate::catalog::{MetadataProvider, RelationDef, RelationLink};
use crate::error::Error;

/// How a planned relation is fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinMode {
    /// Join the related table and select its columns.
    Join,
    /// Project related ids only, without joining.
    IdProjection,
}

/// One planned relation path.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinPlanEntry {
    /// Full relation path from the root.
    pub path: String,
    /// Parent path (`""` for top-level relations).
    pub parent_path: String,
    /// Backend alias of the related entity.
    pub alias: String,
    /// Backend alias of the parent entity.
    pub parent_alias: String,
    /// Entity declaring the relation.
    pub parent_entity: String,
    /// Relation descriptor.
    pub relation: RelationDef,
    /// Requested projection.
    pub select: RelationSelect,
    /// Fetch mode.
    pub mode: JoinMode,
}

impl JoinPlanEntry {
    /// Related entity name.
    pub fn related_entity(&self) -> &str {
        &self.relation.related_entity
    }

    /// Number of segments in the path.
    pub fn depth(&self) -> usize {
        path_depth(&self.path)
    }

    /// Check if this is a top-level relation.
    pub fn is_top_level(&self) -> bool {
        self.parent_path.is_empty()
    }
}

/// Ordered join plan; every path's prefixes precede it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JoinPlan {
    entries: Vec<JoinPlanEntry>,
}

impl JoinPlan {
    /// Plan entries in order.
    pub fn entries(&self) -> &[JoinPlanEntry] {
        &self.entries
    }

    /// Entry for a path.
    pub fn get(&self, path: &str) -> Option<&JoinPlanEntry> {
        self.entries.iter().find(|e| e.path == path)
    }

    /// Whether a path is planned.
    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    /// Direct children of a path (`""` for top-level entries).
    pub fn children<'a>(&'a self, parent: &'a str) -> impl Iterator<Item = &'a JoinPlanEntry> + 'a {
        self.entries.iter().filter(move |e| e.parent_path == parent)
    }

    /// Deepest planned path.
    pub fn max_depth(&self) -> usize {
        self.entries.iter().map(JoinPlanEntry::depth).max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Builds join plans against entity metadata.
pub struct JoinPlanner<'a> {
    meta: &'a dyn MetadataProvider,
}

impl<'a> JoinPlanner<'a> {
    /// Create a planner over a metadata provider.
    pub fn new(meta: &'a dyn MetadataProvider) -> Self {
        Self { meta }
    }

    /// Expand, order, resolve and alias the requested relation paths.
    ///
    /// Implied prefixes load every column. A path is resolved against the
    /// entity its parent path resolved to; a segment that is not a relation
    /// fails with `UnresolvedRelation` naming the requested path.
    pub fn build(
        &self,
        requests: &BTreeMap<String, RelationRequest>,
        root_entity: &str,
        aliases: &mut AliasTable,
    ) -> Result<JoinPlan, Error> {
        let mut expanded: BTreeMap<String, RelationRequest> = BTreeMap::new();
        for (path, request) in requests {
            for prefix in path_prefixes(path) {
                if prefix == path {
                    expanded.insert(prefix.to_string(), request.clone());
                } else {
                    expanded.entry(prefix.to_string()).or_default();
                }
            }
        }

        let mut entities: HashMap<String, String> = HashMap::new();
        entities.insert(String::new(), self.meta.entity(root_entity)?.name.clone());

        let mut entries = Vec::with_capacity(expanded.len());
        for (path, request) in &expanded {
            let parent = parent_path(path).unwrap_or("");
            let parent_entity = entities
                .get(parent)
                .cloned()
                .ok_or_else(|| Error::unresolved(path))?;
            let relation = self
                .meta
                .entity(&parent_entity)?
                .get_relation(relation_name(path))
                .ok_or_else(|| Error::unresolved(path))?
                .clone();

            let alias = match &request.alias {
                Some(alias) => aliases.assign(path, alias)?,
                None => aliases.allocate(path)?,
            };
            let parent_alias = aliases.allocate(parent)?;

            let descendant_prefix = format!("{path}.");
            let has_descendants = expanded
                .range::<String, _>(descendant_prefix.clone()..)
                .next()
                .is_some_and(|(next, _)| next.starts_with(&descendant_prefix));
            let mode = if request.select == RelationSelect::IdsOnly && !has_descendants {
                JoinMode::IdProjection
            } else {
                JoinMode::Join
            };

            entities.insert(path.clone(), relation.related_entity.clone());
            entries.push(JoinPlanEntry {
                path: path.clone(),
                parent_path: parent.to_string(),
                alias,
                parent_alias,
                parent_entity,
                relation,
                select: request.select.clone(),
                mode,
            });
        }

        debug!(
            root = root_entity,
            paths = ?entries.iter().map(|e| e.path.as_str()).collect::<Vec<_>>(),
            "built join plan"
        );
        Ok(JoinPlan { entries })
    }
}

/// Join clause linking `parent_alias` (an instance of `parent_entity`) to the
/// related entity of `relation` under `alias`.
pub fn relation_join(
    meta: &dyn MetadataProvider,
    parent_entity: &str,
    parent_alias: &str,
    relation: &RelationDef,
    alias: &str,
    kind: JoinKind,
) -> Result<JoinClause, Error> {
    let related = meta.entity(&relation.related_entity)?;
    let related_pk = related.identity_field.as_str();
    let parent_pk = meta.primary_key(parent_entity)?;

    let on = match meta.relation_link(parent_entity, relation)? {
        RelationLink::Owned { foreign_key } => JoinOn::Columns {
            left: ColumnRef::new(alias, related_pk),
            right: ColumnRef::new(parent_alias, foreign_key),
        },
        RelationLink::Inverse { foreign_key } => JoinOn::Columns {
            left: ColumnRef::new(alias, foreign_key),
            right: ColumnRef::new(parent_alias, parent_pk),
        },
        RelationLink::Through {
            table,
            parent_column,
            related_column,
        } => JoinOn::Through {
            link_table: table.to_string(),
            link_alias: format!("{alias}__link"),
            parent_key: ColumnRef::new(parent_alias, parent_pk),
            parent_column: parent_column.to_string(),
            related_column: related_column.to_string(),
            related_key: related_pk.to_string(),
        },
    };

    Ok(JoinClause {
        kind,
        table: related.table_name().to_string(),
        alias: alias.to_string(),
        primary_key: related_pk.to_string(),
        on,
        nest: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, EntityDef, FieldType, ScalarType, SchemaBundle};
    use quarry_proto::AliasMode;

    fn catalog() -> Catalog {
        let id = || FieldType::scalar(ScalarType::Int64);
        let a = EntityDef::new("A", "id")
            .with_column("id", id())
            .with_column("bId", id())
            .with_relation(RelationDef::many_to_one("b", "B", "bId"));
        let b = EntityDef::new("B", "id")
            .with_column("id", id())
            .with_column("cId", id())
            .with_relation(RelationDef::many_to_one("c", "C", "cId"));
        let c = EntityDef::new("C", "id")
            .with_column("id", id())
            .with_column("name", FieldType::scalar(ScalarType::String));
        Catalog::new(SchemaBundle::new(1).with_entity(a).with_entity(b).with_entity(c)).unwrap()
    }

    fn requests(paths: &[(&str, RelationRequest)]) -> BTreeMap<String, RelationRequest> {
        paths
            .iter()
            .map(|(p, r)| (p.to_string(), r.clone()))
            .collect()
    }

    #[test]
    fn test_prefix_chain_in_order() {
        let catalog = catalog();
        let mut aliases = AliasTable::new("model", AliasMode::Long);
        let plan = JoinPlanner::new(&catalog)
            .build(&requests(&[("b.c", RelationRequest::all())]), "A", &mut aliases)
            .unwrap();

        let paths: Vec<_> = plan.entries().iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["b", "b.c"]);
        let c = plan.get("b.c").unwrap();
        assert_eq!(c.alias, "model_b_c");
        assert_eq!(c.parent_alias, "model_b");
        assert_eq!(c.parent_entity, "B");
        assert_eq!(c.related_entity(), "C");
        assert_eq!(plan.children("").count(), 1);
        assert_eq!(plan.max_depth(), 2);
    }

    #[test]
    fn test_ids_only_becomes_projection_without_descendants() {
        let catalog = catalog();
        let mut aliases = AliasTable::new("model", AliasMode::Long);
        let plan = JoinPlanner::new(&catalog)
            .build(&requests(&[("b", RelationRequest::ids_only())]), "A", &mut aliases)
            .unwrap();
        assert_eq!(plan.get("b").unwrap().mode, JoinMode::IdProjection);

        let mut aliases = AliasTable::new("model", AliasMode::Long);
        let plan = JoinPlanner::new(&catalog)
            .build(
                &requests(&[("b", RelationRequest::ids_only()), ("b.c", RelationRequest::all())]),
                "A",
                &mut aliases,
            )
            .unwrap();
        assert_eq!(plan.get("b").unwrap().mode, JoinMode::Join);
    }

    #[test]
    fn test_unresolved_path_is_named() {
        let catalog = catalog();
        let mut aliases = AliasTable::new("model", AliasMode::Long);
        let err = JoinPlanner::new(&catalog)
            .build(&requests(&[("b.name", RelationRequest::all())]), "A", &mut aliases)
            .unwrap_err();
        assert!(matches!(err, Error::UnresolvedRelation { ref path } if path == "b.name"));
    }

    #[test]
    fn test_requested_alias_overrides_allocator() {
        let catalog = catalog();
        let mut aliases = AliasTable::new("model", AliasMode::Short);
        let plan = JoinPlanner::new(&catalog)
            .build(
                &requests(&[("b", RelationRequest::all().with_alias("bee")), ("b.c", RelationRequest::all())]),
                "A",
                &mut aliases,
            )
            .unwrap();
        assert_eq!(plan.get("b").unwrap().alias, "bee");
        assert_eq!(plan.get("b.c").unwrap().parent_alias, "bee");
        assert_eq!(plan.get("b.c").unwrap().alias, "model_b11_c21");
    }
}
