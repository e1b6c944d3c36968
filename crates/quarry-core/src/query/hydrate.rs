//! Batched relation hydration.
//!
//! Relations that are not joined into the primary query are loaded one level
//! at a time: every record of a level contributes its keys to a single query,
//! and the results are spliced back into the records that asked for them.

use std::collections::{HashMap, HashSet};

use futures::future::BoxFuture;
use futures::FutureExt;
use quarry_proto::{Record, Related, RelationSelect, Value, ValueKey};
use tracing::debug;

use super::join::{JoinMode, JoinPlan, JoinPlanEntry};
use super::select::{ColumnRef, Predicate, QueryBuilder, SelectQuery};
use crate::backend::QueryBackend;
use crate::cancel::RequestContext;
use crate::catalog::{MetadataProvider, RelationDef, RelationLink};
use crate::error::Error;

/// One relation level of a hydration tree.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationNode {
    pub entry: JoinPlanEntry,
    /// Already loaded by the primary query; only its children are fetched.
    pub preloaded: bool,
    pub children: Vec<RelationNode>,
}

/// Relations resolved after the primary query, nested by path.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationTree {
    pub roots: Vec<RelationNode>,
}

impl RelationTree {
    /// Build the tree of `deferred` paths. Paths the primary query joins are
    /// marked preloaded.
    pub fn build(deferred: &JoinPlan, joined: &JoinPlan) -> Self {
        Self {
            roots: nodes(deferred, joined, ""),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// Node for a path.
    pub fn find(&self, path: &str) -> Option<&RelationNode> {
        let mut level = &self.roots;
        let mut found = None;
        for prefix in quarry_proto::search::path_prefixes(path) {
            let node = level.iter().find(|n| n.entry.path == prefix)?;
            level = &node.children;
            found = Some(node);
        }
        found
    }

    /// Paths that will be fetched, parents first.
    pub fn fetched_paths(&self) -> Vec<&str> {
        fn walk<'a>(nodes: &'a [RelationNode], out: &mut Vec<&'a str>) {
            for node in nodes {
                if !node.preloaded {
                    out.push(&node.entry.path);
                }
                walk(&node.children, out);
            }
        }
        let mut out = Vec::new();
        walk(&self.roots, &mut out);
        out
    }

    /// Reject relations that cannot be fetched in batches, before any query
    /// runs.
    pub fn check_supported(&self, meta: &dyn MetadataProvider) -> Result<(), Error> {
        fn walk(meta: &dyn MetadataProvider, nodes: &[RelationNode]) -> Result<(), Error> {
            for node in nodes {
                if !node.preloaded {
                    let entry = &node.entry;
                    let unsupported_link = entry.relation.is_many_to_many()
                        || matches!(
                            meta.relation_link(&entry.parent_entity, &entry.relation)?,
                            RelationLink::Through { .. }
                        );
                    if unsupported_link {
                        return Err(unsupported(&entry.parent_entity, &entry.relation));
                    }
                }
                walk(meta, &node.children)?;
            }
            Ok(())
        }
        walk(meta, &self.roots)
    }
}

fn unsupported(entity: &str, relation: &RelationDef) -> Error {
    Error::UnsupportedRelation {
        relation: format!("{entity}.{}", relation.name),
        cardinality: relation.cardinality,
        operation: "batched hydration",
    }
}

fn nodes(deferred: &JoinPlan, joined: &JoinPlan, parent: &str) -> Vec<RelationNode> {
    deferred
        .children(parent)
        .map(|entry| RelationNode {
            preloaded: joined
                .get(&entry.path)
                .is_some_and(|j| j.mode == JoinMode::Join),
            children: nodes(deferred, joined, &entry.path),
            entry: entry.clone(),
        })
        .collect()
}

/// Column names loaded for a relation selection. The primary key is always
/// included.
pub(crate) fn selection_columns(
    meta: &dyn MetadataProvider,
    entity: &str,
    select: &RelationSelect,
) -> Result<Vec<String>, Error> {
    let def = meta.entity(entity)?;
    let mut columns = vec![def.identity_field.clone()];
    match select {
        RelationSelect::All => {
            for field in def.columns() {
                push_unique(&mut columns, &field.name);
            }
        }
        RelationSelect::Fields(fields) => {
            for field in fields {
                if !meta.field_descriptor(entity, field)?.is_column() {
                    return Err(Error::InvalidInput(format!(
                        "'{field}' on '{entity}' is a relation, not a column"
                    )));
                }
                push_unique(&mut columns, field);
            }
        }
        RelationSelect::IdsOnly => {}
    }
    Ok(columns)
}

/// Foreign key columns an entity's records must carry so that `children`
/// can be hydrated from them.
pub(crate) fn link_columns(
    meta: &dyn MetadataProvider,
    entity: &str,
    children: &[RelationNode],
) -> Result<Vec<String>, Error> {
    let mut columns = Vec::new();
    for child in children.iter().filter(|c| !c.preloaded) {
        if let RelationLink::Owned { foreign_key } = meta.relation_link(entity, &child.entry.relation)? {
            push_unique(&mut columns, foreign_key);
        }
    }
    Ok(columns)
}

pub(crate) fn push_unique(columns: &mut Vec<String>, column: &str) {
    if !columns.iter().any(|c| c == column) {
        columns.push(column.to_string());
    }
}

/// Distinct non-null keys in first-seen order.
fn distinct_keys<'r>(values: impl Iterator<Item = Option<&'r Value>>) -> Vec<Value> {
    let mut seen = HashSet::new();
    values
        .flatten()
        .filter(|v| v.key().is_some_and(|k| seen.insert(k)))
        .cloned()
        .collect()
}

fn key_of(record: &Record, column: &str) -> Option<ValueKey> {
    record.get(column).and_then(Value::key)
}

fn records_mut(related: &mut Related) -> Vec<&mut Record> {
    match related {
        Related::One(Some(record)) => vec![record.as_mut()],
        Related::Many(records) => records.iter_mut().collect(),
        Related::One(None) | Related::Ids(_) => Vec::new(),
    }
}

/// Loads relation trees into records, one backend round trip per level.
pub struct Hydrator<'a, B: QueryBackend + ?Sized> {
    meta: &'a dyn MetadataProvider,
    backend: &'a B,
}

impl<'a, B: QueryBackend + ?Sized> Hydrator<'a, B> {
    pub fn new(meta: &'a dyn MetadataProvider, backend: &'a B) -> Self {
        Self { meta, backend }
    }

    /// Hydrate `tree` into `records`, which are instances of `root_entity`.
    pub async fn hydrate(
        &self,
        root_entity: &str,
        records: &mut [Record],
        tree: &RelationTree,
        ctx: &RequestContext,
    ) -> Result<(), Error> {
        if tree.is_empty() || records.is_empty() {
            return Ok(());
        }
        self.level(root_entity, records.iter_mut().collect(), &tree.roots, ctx)
            .await
    }

    /// Hydrate sibling relations of one level, in order.
    fn level<'b>(
        &'b self,
        entity: &'b str,
        mut parents: Vec<&'b mut Record>,
        nodes: &'b [RelationNode],
        ctx: &'b RequestContext,
    ) -> BoxFuture<'b, Result<(), Error>> {
        async move {
            for node in nodes {
                if node.preloaded {
                    let related_entity = node.entry.related_entity();
                    let loaded: Vec<&mut Record> = parents
                        .iter_mut()
                        .filter_map(|p| p.relations.get_mut(&node.entry.relation.name))
                        .flat_map(records_mut)
                        .collect();
                    if !loaded.is_empty() {
                        self.level(related_entity, loaded, &node.children, ctx).await?;
                    }
                } else {
                    self.relation(entity, &mut parents, node, ctx).await?;
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn relation(
        &self,
        entity: &str,
        parents: &mut [&mut Record],
        node: &RelationNode,
        ctx: &RequestContext,
    ) -> Result<(), Error> {
        let relation = &node.entry.relation;
        if relation.is_many_to_many() {
            return Err(unsupported(entity, relation));
        }

        match self.meta.relation_link(entity, relation)? {
            RelationLink::Owned { foreign_key } => {
                self.owned(parents, node, foreign_key, ctx).await
            }
            RelationLink::Inverse { foreign_key } => {
                let parent_pk = self.meta.primary_key(entity)?;
                self.inverse(parents, node, parent_pk, foreign_key, ctx).await
            }
            RelationLink::Through { .. } => Err(unsupported(entity, relation)),
        }
    }

    /// Many-to-one and owning one-to-one: the parent holds the related key.
    async fn owned(
        &self,
        parents: &mut [&mut Record],
        node: &RelationNode,
        foreign_key: &str,
        ctx: &RequestContext,
    ) -> Result<(), Error> {
        let name = node.entry.relation.name.as_str();
        let keys = distinct_keys(parents.iter().map(|p| p.get(foreign_key)));

        if node.entry.select == RelationSelect::IdsOnly && node.children.is_empty() {
            for parent in parents.iter_mut() {
                let ids = parent
                    .get(foreign_key)
                    .filter(|v| !v.is_null())
                    .cloned()
                    .into_iter()
                    .collect();
                parent.set_relation(name, Related::Ids(ids));
            }
            return Ok(());
        }

        let related_entity = node.entry.related_entity();
        let related_pk = self.meta.primary_key(related_entity)?;
        let mut fetched = if keys.is_empty() {
            Vec::new()
        } else {
            self.fetch(node, related_pk, &keys, &[], ctx).await?
        };
        self.level(related_entity, fetched.iter_mut().collect(), &node.children, ctx)
            .await?;

        let index: HashMap<ValueKey, Record> = fetched
            .into_iter()
            .filter_map(|r| key_of(&r, related_pk).map(|k| (k, r)))
            .collect();
        for parent in parents.iter_mut() {
            let related = key_of(parent, foreign_key)
                .and_then(|k| index.get(&k))
                .map(|r| Box::new(r.clone()));
            parent.set_relation(name, Related::One(related));
        }
        Ok(())
    }

    /// One-to-many and inverse one-to-one: the related rows hold the parent key.
    async fn inverse(
        &self,
        parents: &mut [&mut Record],
        node: &RelationNode,
        parent_pk: &str,
        foreign_key: &str,
        ctx: &RequestContext,
    ) -> Result<(), Error> {
        let name = node.entry.relation.name.as_str();
        let keys = distinct_keys(parents.iter().map(|p| p.get(parent_pk)));

        let related_entity = node.entry.related_entity();
        let related_pk = self.meta.primary_key(related_entity)?;
        let mut fetched = if keys.is_empty() {
            Vec::new()
        } else {
            self.fetch(node, foreign_key, &keys, &[foreign_key], ctx).await?
        };
        self.level(related_entity, fetched.iter_mut().collect(), &node.children, ctx)
            .await?;

        let mut groups: HashMap<ValueKey, Vec<Record>> = HashMap::new();
        for record in fetched {
            if let Some(key) = key_of(&record, foreign_key) {
                groups.entry(key).or_default().push(record);
            }
        }

        let ids_only = node.entry.select == RelationSelect::IdsOnly && node.children.is_empty();
        let single = node.entry.relation.cardinality.is_single_valued();
        for parent in parents.iter_mut() {
            let group = key_of(parent, parent_pk)
                .and_then(|k| groups.get(&k))
                .map(Vec::as_slice)
                .unwrap_or_default();
            let related = if ids_only {
                Related::Ids(group.iter().filter_map(|r| r.get(related_pk).cloned()).collect())
            } else if single {
                Related::One(group.first().map(|r| Box::new(r.clone())))
            } else {
                Related::Many(group.to_vec())
            };
            parent.set_relation(name, related);
        }
        Ok(())
    }

    /// One batched query: related rows whose `column` is among `keys`.
    async fn fetch(
        &self,
        node: &RelationNode,
        column: &str,
        keys: &[Value],
        extra: &[&str],
        ctx: &RequestContext,
    ) -> Result<Vec<Record>, Error> {
        let entry = &node.entry;
        let related_entity = entry.related_entity();
        let def = self.meta.entity(related_entity)?;

        let mut columns = selection_columns(self.meta, related_entity, &entry.select)?;
        for name in extra {
            push_unique(&mut columns, name);
        }
        for name in link_columns(self.meta, related_entity, &node.children)? {
            push_unique(&mut columns, &name);
        }

        let mut builder = QueryBuilder::new();
        let mut query = SelectQuery::new(def.table_name(), entry.alias.clone(), def.identity_field.clone());
        query.columns = columns
            .iter()
            .map(|c| ColumnRef::new(entry.alias.clone(), c.clone()))
            .collect();
        query.predicate = Some(Predicate::InList {
            column: ColumnRef::new(entry.alias.clone(), column),
            params: keys.iter().map(|k| builder.bind(k.clone())).collect(),
            negated: false,
        });
        query.params = builder.into_params();

        let stage = format!("hydration of '{}'", entry.path);
        let rows = ctx.run(&stage, self.backend.fetch(&query)).await?;
        debug!(
            path = %entry.path,
            relation = %entry.relation.name,
            keys = keys.len(),
            rows = rows.len(),
            "hydrated relation level"
        );
        Ok(rows)
    }
}
