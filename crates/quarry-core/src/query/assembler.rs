//! Search assembly: specification in, records out.
//!
//! A search compiles into one primary [`SelectQuery`] holding the root columns,
//! the joined relations, id projections and the filter, plus a
//! [`RelationTree`] of relations loaded afterwards by the [`Hydrator`].

use quarry_proto::{Record, RelationSelect, SearchSpec};
use tracing::{debug, instrument};

use super::alias::AliasTable;
use super::condition::{ConditionCompiler, Scope};
use super::hydrate::{link_columns, push_unique, selection_columns, Hydrator, RelationTree};
use super::join::{relation_join, JoinMode, JoinPlan, JoinPlanEntry, JoinPlanner};
use super::select::{ColumnRef, IdProjection, IdSource, Nest, OrderTerm, QueryBuilder, SelectQuery};
use crate::backend::QueryBackend;
use crate::cancel::RequestContext;
use crate::catalog::{EntityDef, MetadataProvider, RelationLink};
use crate::config::SearchConfig;
use crate::error::Error;

/// A search ready to run.
#[derive(Debug, Clone)]
pub struct CompiledSearch {
    /// Root entity name.
    pub entity: String,
    /// The primary query.
    pub query: SelectQuery,
    /// Relations resolved inside the primary query.
    pub plan: JoinPlan,
    /// Relations resolved after it.
    pub hydration: RelationTree,
    /// Aliases handed out for the primary query.
    pub aliases: AliasTable,
}

/// Compiles and runs searches.
pub struct SearchExecutor<'a> {
    meta: &'a dyn MetadataProvider,
    config: SearchConfig,
}

impl<'a> SearchExecutor<'a> {
    /// Create an executor with the default configuration.
    pub fn new(meta: &'a dyn MetadataProvider) -> Self {
        Self {
            meta,
            config: SearchConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SearchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Compile a search without running it.
    pub fn compile(&self, spec: &SearchSpec) -> Result<CompiledSearch, Error> {
        let entity = self.meta.entity(&spec.root_entity)?;

        let mut aliases = AliasTable::new(spec.alias.clone(), spec.aliasing);
        let plan = JoinPlanner::new(self.meta).build(&spec.join_relations, &entity.name, &mut aliases)?;
        let mut deferred_aliases = AliasTable::new(spec.alias.clone(), spec.aliasing);
        let deferred =
            JoinPlanner::new(self.meta).build(&spec.no_join_relations, &entity.name, &mut deferred_aliases)?;
        for entry in plan.entries().iter().chain(deferred.entries()) {
            self.config.validate_depth(&entry.path, entry.depth())?;
        }
        let hydration = RelationTree::build(&deferred, &plan);
        hydration.check_supported(self.meta)?;

        let mut query = SelectQuery::new(entity.table_name(), spec.alias.clone(), entity.identity_field.clone());
        let mut root_columns = self.root_columns(entity, spec)?;
        for column in link_columns(self.meta, &entity.name, &hydration.roots)? {
            push_unique(&mut root_columns, &column);
        }
        query.columns = root_columns
            .iter()
            .map(|c| ColumnRef::new(spec.alias.clone(), c.clone()))
            .collect();

        for entry in plan.entries() {
            match entry.mode {
                JoinMode::Join => self.add_join(&mut query, entry, &hydration)?,
                JoinMode::IdProjection => query.id_projections.push(self.id_projection(entry)?),
            }
        }

        if let Some(condition) = &spec.condition {
            let scope = plan
                .entries()
                .iter()
                .filter(|e| e.mode == JoinMode::Join)
                .fold(Scope::new(entity.name.clone(), spec.alias.clone()), |scope, e| {
                    scope.with_joined(e.path.clone(), e.alias.clone(), e.related_entity())
                });
            let mut builder = QueryBuilder::new();
            query.predicate = ConditionCompiler::new(self.meta).compile(condition, &scope, &mut builder, false)?;
            query.params = builder.into_params();
        }

        query.order_by = self.order_terms(entity, spec, &plan)?;
        query.limit = spec.limit.or(self.config.default_limit);
        query.offset = spec.offset;

        debug!(
            entity = %entity.name,
            sql = %query.to_sql(),
            params = query.params.len(),
            deferred = ?hydration.fetched_paths(),
            "compiled search"
        );
        Ok(CompiledSearch {
            entity: entity.name.clone(),
            query,
            plan,
            hydration,
            aliases,
        })
    }

    /// Compile and run a search: the primary query, then every deferred
    /// relation level.
    #[instrument(skip_all, fields(entity = %spec.root_entity))]
    pub async fn search<B>(&self, spec: SearchSpec, backend: &B, ctx: &RequestContext) -> Result<Vec<Record>, Error>
    where
        B: QueryBackend + ?Sized,
    {
        let ctx = ctx.clone().bounded_by(self.config.request_timeout);
        let compiled = self.compile(&spec)?;

        let mut records = ctx.run("primary query", backend.fetch(&compiled.query)).await?;
        debug!(rows = records.len(), "primary query done");

        Hydrator::new(self.meta, backend)
            .hydrate(&compiled.entity, &mut records, &compiled.hydration, &ctx)
            .await?;
        Ok(records)
    }

    fn root_columns(&self, entity: &EntityDef, spec: &SearchSpec) -> Result<Vec<String>, Error> {
        let mut columns = match &spec.select {
            Some(fields) => selection_columns(self.meta, &entity.name, &RelationSelect::Fields(fields.clone()))?,
            None => selection_columns(self.meta, &entity.name, &RelationSelect::All)?,
        };
        if let Some(excluded) = &spec.exclude_select {
            for field in excluded {
                self.meta.field_descriptor(&entity.name, field)?;
            }
            columns.retain(|c| *c == entity.identity_field || !excluded.contains(c));
        }
        Ok(columns)
    }

    fn add_join(&self, query: &mut SelectQuery, entry: &JoinPlanEntry, hydration: &RelationTree) -> Result<(), Error> {
        let mut join = relation_join(
            self.meta,
            &entry.parent_entity,
            &entry.parent_alias,
            &entry.relation,
            &entry.alias,
            self.config.join_kind,
        )?;
        join.nest = Some(Nest {
            parent_alias: entry.parent_alias.clone(),
            relation: entry.relation.name.clone(),
            single: entry.relation.cardinality.is_single_valued(),
        });
        query.joins.push(join);

        let mut columns = selection_columns(self.meta, entry.related_entity(), &entry.select)?;
        if let Some(node) = hydration.find(&entry.path) {
            for column in link_columns(self.meta, entry.related_entity(), &node.children)? {
                push_unique(&mut columns, &column);
            }
        }
        query
            .columns
            .extend(columns.into_iter().map(|c| ColumnRef::new(entry.alias.clone(), c)));
        Ok(())
    }

    fn id_projection(&self, entry: &JoinPlanEntry) -> Result<IdProjection, Error> {
        let parent_pk = self.meta.primary_key(&entry.parent_entity)?;
        let parent_key = ColumnRef::new(entry.parent_alias.clone(), parent_pk);
        let source = match self.meta.relation_link(&entry.parent_entity, &entry.relation)? {
            RelationLink::Owned { foreign_key } => {
                IdSource::Column(ColumnRef::new(entry.parent_alias.clone(), foreign_key))
            }
            RelationLink::Inverse { foreign_key } => {
                let related = self.meta.entity(entry.related_entity())?;
                IdSource::Inverse {
                    table: related.table_name().to_string(),
                    primary_key: related.identity_field.clone(),
                    foreign_key: foreign_key.to_string(),
                    parent_key,
                }
            }
            RelationLink::Through {
                table,
                parent_column,
                related_column,
            } => IdSource::Through {
                link_table: table.to_string(),
                parent_column: parent_column.to_string(),
                related_column: related_column.to_string(),
                parent_key,
            },
        };
        Ok(IdProjection {
            nest: Nest {
                parent_alias: entry.parent_alias.clone(),
                relation: entry.relation.name.clone(),
                single: entry.relation.cardinality.is_single_valued(),
            },
            source,
        })
    }

    /// Requested ordering, or the root entity's default order.
    fn order_terms(&self, entity: &EntityDef, spec: &SearchSpec, plan: &JoinPlan) -> Result<Vec<OrderTerm>, Error> {
        if spec.order_by.is_empty() {
            return Ok(entity
                .default_order
                .iter()
                .map(|o| OrderTerm {
                    column: ColumnRef::new(spec.alias.clone(), o.field.clone()),
                    direction: o.direction,
                })
                .collect());
        }

        let mut terms = Vec::with_capacity(spec.order_by.len());
        for order in &spec.order_by {
            let (owner, alias) = match order.alias.as_deref() {
                None => (entity.name.as_str(), spec.alias.as_str()),
                Some(alias) if alias == spec.alias => (entity.name.as_str(), spec.alias.as_str()),
                Some(alias) => {
                    let entry = plan
                        .entries()
                        .iter()
                        .filter(|e| e.mode == JoinMode::Join)
                        .find(|e| e.alias == alias || e.path == alias)
                        .ok_or_else(|| {
                            Error::InvalidInput(format!(
                                "sort on '{alias}.{}' refers to a relation that is not joined",
                                order.field
                            ))
                        })?;
                    (entry.related_entity(), entry.alias.as_str())
                }
            };
            if !self.meta.field_descriptor(owner, &order.field)?.is_column() {
                return Err(Error::InvalidInput(format!(
                    "cannot sort on relation '{}' of '{owner}'",
                    order.field
                )));
            }
            terms.push(OrderTerm {
                column: ColumnRef::new(alias, order.field.clone()),
                direction: order.direction,
            });
        }
        Ok(terms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, EntityDef, FieldType, OrderBy, RelationDef, ScalarType, SchemaBundle};
    use pretty_assertions::assert_eq;
    use quarry_proto::{AliasMode, Condition, OrderSpec, RelationRequest};

    fn catalog() -> Catalog {
        let int = || FieldType::scalar(ScalarType::Int64);
        let text = || FieldType::scalar(ScalarType::String);
        let user = EntityDef::new("User", "id")
            .with_column("id", int())
            .with_column("name", text())
            .with_column("status", text())
            .with_column("mainPhotoId", FieldType::optional_scalar(ScalarType::Int64))
            .with_relation(RelationDef::many_to_one("mainPhoto", "Photo", "mainPhotoId"))
            .with_relation(RelationDef::one_to_many("images", "Photo", "owner"))
            .with_default_order(OrderBy::asc("name"));
        let photo = EntityDef::new("Photo", "id")
            .with_column("id", int())
            .with_column("url", text())
            .with_column("ownerId", int())
            .with_relation(RelationDef::many_to_one("owner", "User", "ownerId").with_inverse("images"));
        Catalog::new(SchemaBundle::new(1).with_entity(user).with_entity(photo)).unwrap()
    }

    #[test]
    fn test_compile_join_and_condition() {
        let catalog = catalog();
        let spec = SearchSpec::new("User")
            .select(["name"])
            .join("mainPhoto")
            .with_condition(Condition::eq("mainPhoto.url", "a.png"));
        let compiled = SearchExecutor::new(&catalog).compile(&spec).unwrap();
        assert_eq!(
            compiled.query.to_sql(),
            "SELECT model.id, model.name, model_mainPhoto.id, model_mainPhoto.url, model_mainPhoto.ownerId \
             FROM User model LEFT JOIN Photo model_mainPhoto ON model_mainPhoto.id = model.mainPhotoId \
             WHERE model_mainPhoto.url = :p0 ORDER BY model.name ASC"
        );
        assert!(compiled.hydration.is_empty());
    }

    #[test]
    fn test_deferred_relations_carry_link_columns() {
        let catalog = catalog();
        let spec = SearchSpec::new("User")
            .select(["name"])
            .no_join("mainPhoto")
            .sort("name!")
            .unwrap()
            .limit(10);
        let compiled = SearchExecutor::new(&catalog).compile(&spec).unwrap();
        assert_eq!(
            compiled.query.to_sql(),
            "SELECT model.id, model.name, model.mainPhotoId FROM User model ORDER BY model.name DESC LIMIT 10"
        );
        assert_eq!(compiled.hydration.fetched_paths(), vec!["mainPhoto"]);
    }

    #[test]
    fn test_ids_only_projection() {
        let catalog = catalog();
        let spec = SearchSpec::new("User")
            .select(["id"])
            .join_with("images", RelationRequest::ids_only());
        let sql = SearchExecutor::new(&catalog).compile(&spec).unwrap().query.to_sql();
        assert_eq!(
            sql,
            "SELECT model.id, ARRAY(SELECT Photo.id FROM Photo WHERE Photo.ownerId = model.id) AS model__images \
             FROM User model ORDER BY model.name ASC"
        );
    }

    #[test]
    fn test_default_limit_and_short_aliases() {
        let catalog = catalog();
        let spec = SearchSpec::new("User")
            .select(["id"])
            .join("mainPhoto")
            .aliasing(AliasMode::Short);
        let executor = SearchExecutor::new(&catalog).with_config(SearchConfig::new().with_default_limit(50));
        let compiled = executor.compile(&spec).unwrap();
        assert_eq!(compiled.query.limit, Some(50));
        assert_eq!(compiled.plan.get("mainPhoto").unwrap().alias, "model_mp19");
    }

    #[test]
    fn test_sort_on_unjoined_relation_fails() {
        let catalog = catalog();
        let mut spec = SearchSpec::new("User");
        spec.order_by.push(OrderSpec::asc("url").on("images"));
        let err = SearchExecutor::new(&catalog).compile(&spec).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_depth_limit() {
        let catalog = catalog();
        let spec = SearchSpec::new("User").no_join("images.owner.images");
        let executor = SearchExecutor::new(&catalog).with_config(SearchConfig::new().with_max_relation_depth(2));
        let err = executor.compile(&spec).unwrap_err();
        assert!(err.to_string().contains("images.owner.images"));
    }
}
