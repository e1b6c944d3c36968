//! Condition compilation: canonical conditions to backend predicates.
//!
//! Negation is pushed down while compiling: `not` on `and`/`or` flips the
//! connective and negates every operand (De Morgan), `not` on a leaf picks the
//! negated operator. A compiled clause may vanish (`None`), which happens for
//! empty operands under `filter` and for `and`/`or` left with no operands.

use std::collections::BTreeMap;

use quarry_proto::search::path_prefixes;
use quarry_proto::{CompareOp, Condition, Operand, Quantifier, Value};
use tracing::trace;

use super::join::relation_join;
use super::select::{BoolOp, ColumnRef, JoinClause, JoinKind, Predicate, QueryBuilder, SelectQuery, SqlOp};
use crate::catalog::{FieldKind, MetadataProvider};
use crate::error::Error;

/// The entity a condition is evaluated against, and the relations reachable
/// from it by alias.
#[derive(Debug, Clone)]
pub struct Scope {
    entity: String,
    alias: String,
    /// Relation path (relative to the scope entity) -> (alias, entity).
    joined: BTreeMap<String, (String, String)>,
    /// Whether unknown relation paths may be joined on demand.
    auto_join: bool,
    /// Joins added on demand.
    extra_joins: Vec<JoinClause>,
    /// Path of the enclosing `every`, whose condition is compiled negated.
    every_path: Option<String>,
}

impl Scope {
    /// Scope over `entity` aliased `alias`, with no joined relations.
    pub fn new(entity: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            alias: alias.into(),
            joined: BTreeMap::new(),
            auto_join: false,
            extra_joins: Vec::new(),
            every_path: None,
        }
    }

    /// Make a joined relation path addressable from conditions.
    pub fn with_joined(
        mut self,
        path: impl Into<String>,
        alias: impl Into<String>,
        entity: impl Into<String>,
    ) -> Self {
        self.joined.insert(path.into(), (alias.into(), entity.into()));
        self
    }

    fn sub_scope(entity: &str, alias: &str) -> Self {
        Self {
            auto_join: true,
            ..Self::new(entity, alias)
        }
    }

    /// Scope entity.
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// Scope alias.
    pub fn alias(&self) -> &str {
        &self.alias
    }
}

/// Compiles canonical conditions against entity metadata.
pub struct ConditionCompiler<'a> {
    meta: &'a dyn MetadataProvider,
}

impl<'a> ConditionCompiler<'a> {
    /// Create a compiler over a metadata provider.
    pub fn new(meta: &'a dyn MetadataProvider) -> Self {
        Self { meta }
    }

    /// Compile a condition in `scope`, binding parameters into `builder`.
    ///
    /// Returns `None` when the whole condition vanished. With `filter_empty`
    /// set, clauses with empty operands (null or empty string) are dropped
    /// instead of compared.
    pub fn compile(
        &self,
        condition: &Condition,
        scope: &Scope,
        builder: &mut QueryBuilder,
        filter_empty: bool,
    ) -> Result<Option<Predicate>, Error> {
        let mut scope = scope.clone();
        self.compile_node(condition, &mut scope, builder, false, filter_empty)
    }

    fn compile_node(
        &self,
        condition: &Condition,
        scope: &mut Scope,
        builder: &mut QueryBuilder,
        negated: bool,
        filter_empty: bool,
    ) -> Result<Option<Predicate>, Error> {
        match condition {
            Condition::Compare { field, op, operand } => {
                self.compile_compare(field, *op, operand, scope, builder, negated, filter_empty)
            }
            Condition::Between { field, low, high } => {
                if filter_empty && (low.is_empty() || high.is_empty()) {
                    return Ok(None);
                }
                let column = self.resolve_column(field, scope)?;
                let low = builder.bind(low.clone());
                let high = builder.bind(high.clone());
                Ok(Some(Predicate::Between {
                    column,
                    low,
                    high,
                    negated,
                }))
            }
            Condition::And(operands) | Condition::Or(operands) => {
                let op = if matches!(condition, Condition::And(_)) {
                    BoolOp::And
                } else {
                    BoolOp::Or
                };
                let op = if negated { op.flip() } else { op };
                let mut compiled = Vec::with_capacity(operands.len());
                for operand in operands {
                    if let Some(p) = self.compile_node(operand, scope, builder, negated, filter_empty)? {
                        compiled.push(p);
                    }
                }
                Ok(Predicate::group(op, compiled))
            }
            Condition::Not(inner) => self.compile_node(inner, scope, builder, !negated, filter_empty),
            Condition::Filter(inner) => self.compile_node(inner, scope, builder, negated, true),
            Condition::Exists {
                quantifier,
                path,
                condition,
            } => {
                if negated {
                    // Inside `every`, a negated quantifier without an explicit
                    // `not` comes from the reversal.
                    let message = match &scope.every_path {
                        Some(every) => format!(
                            "'{}' on '{path}' cannot be nested in 'every' on '{every}'",
                            quantifier.as_str()
                        ),
                        None => format!("'{}' on '{path}' cannot be negated", quantifier.as_str()),
                    };
                    return Err(Error::InvalidInput(message));
                }
                self.compile_exists(*quantifier, path, condition, scope, builder, filter_empty)
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn compile_compare(
        &self,
        field: &str,
        op: CompareOp,
        operand: &Operand,
        scope: &mut Scope,
        builder: &mut QueryBuilder,
        negated: bool,
        filter_empty: bool,
    ) -> Result<Option<Predicate>, Error> {
        let empty = match operand {
            Operand::Value(v) => v.is_empty(),
            Operand::List(items) => items.is_empty(),
        };
        if filter_empty && empty {
            return Ok(None);
        }
        let column = self.resolve_column(field, scope)?;

        let predicate = match op {
            CompareOp::In => {
                let Operand::List(items) = operand else {
                    return Err(Error::InvalidInput(format!(
                        "'in' on '{field}' expects a list of values"
                    )));
                };
                if items.is_empty() {
                    // Nothing is in the empty set.
                    Predicate::Constant(negated)
                } else {
                    let params = items.iter().map(|v| builder.bind(v.clone())).collect();
                    Predicate::InList {
                        column,
                        params,
                        negated,
                    }
                }
            }
            CompareOp::Contains | CompareOp::ContainedBy | CompareOp::Overlap => {
                let array = match operand {
                    Operand::List(items) => Value::from_list(items)?,
                    Operand::Value(v) if v.is_array() => v.clone(),
                    Operand::Value(_) => {
                        return Err(Error::InvalidInput(format!(
                            "'{}' on '{field}' expects a list of values",
                            op.as_str()
                        )))
                    }
                };
                let sql_op = match op {
                    CompareOp::Contains => SqlOp::Contains,
                    CompareOp::ContainedBy => SqlOp::ContainedBy,
                    _ => SqlOp::Overlap,
                };
                let compare = Predicate::Compare {
                    column,
                    op: sql_op,
                    param: builder.bind(array),
                };
                negate_wrapped(compare, negated)
            }
            _ => {
                let Operand::Value(value) = operand else {
                    return Err(Error::InvalidInput(format!(
                        "'{}' on '{field}' expects a single value",
                        op.as_str()
                    )));
                };
                if op == CompareOp::Eq && value.is_empty() {
                    Predicate::IsNull { column, negated }
                } else {
                    let sql_op = match op {
                        CompareOp::Eq => SqlOp::Eq,
                        CompareOp::Gt => SqlOp::Gt,
                        CompareOp::Ge => SqlOp::Ge,
                        CompareOp::Lt => SqlOp::Lt,
                        CompareOp::Le => SqlOp::Le,
                        CompareOp::Like => SqlOp::Like,
                        _ => SqlOp::ILike,
                    };
                    let param = builder.bind(value.clone());
                    match sql_op.negated().filter(|_| negated) {
                        Some(flipped) => Predicate::Compare {
                            column,
                            op: flipped,
                            param,
                        },
                        None => negate_wrapped(
                            Predicate::Compare {
                                column,
                                op: sql_op,
                                param,
                            },
                            negated,
                        ),
                    }
                }
            }
        };
        Ok(Some(predicate))
    }

    /// Compile `some`/`every`/`none` into `pk [NOT] IN (sub-query)`.
    ///
    /// The sub-query selects the scope entity's keys that reach at least one
    /// related entity matching the nested condition (negated for `every`).
    fn compile_exists(
        &self,
        quantifier: Quantifier,
        path: &str,
        nested: &Condition,
        scope: &mut Scope,
        builder: &mut QueryBuilder,
        filter_empty: bool,
    ) -> Result<Option<Predicate>, Error> {
        let mut sub_builder = builder.sub_builder();
        let sub_alias = format!("{}{}", sub_builder.prefix(), scope.alias);
        let root = self.meta.entity(&scope.entity)?;
        let mut subquery = SelectQuery::new(root.table_name(), sub_alias.clone(), root.identity_field.clone());
        let key = subquery.key_column();
        subquery.columns.push(key);

        let chain = self.meta.resolve_path(&scope.entity, path)?;
        let mut parent_entity = scope.entity.clone();
        let mut parent_alias = sub_alias.clone();
        for (segment, relation) in path.split('.').zip(chain) {
            let alias = format!("{parent_alias}_{segment}");
            subquery.joins.push(relation_join(
                self.meta,
                &parent_entity,
                &parent_alias,
                relation,
                &alias,
                JoinKind::Inner,
            )?);
            parent_entity = relation.related_entity.clone();
            parent_alias = alias;
        }

        let mut inner = Scope::sub_scope(&parent_entity, &parent_alias);
        if quantifier == Quantifier::Every {
            inner.every_path = Some(path.to_string());
        }
        let compiled = self.compile_node(
            nested,
            &mut inner,
            &mut sub_builder,
            quantifier == Quantifier::Every,
            filter_empty,
        )?;
        if compiled.is_none() && quantifier == Quantifier::Every {
            // Every related entity satisfies a vanished condition.
            return Ok(None);
        }
        subquery.joins.extend(inner.extra_joins);
        subquery.predicate = compiled;
        subquery.params = sub_builder.into_params();

        trace!(path, quantifier = quantifier.as_str(), sql = %subquery.to_sql(), "compiled sub-query");
        Ok(Some(Predicate::InSubquery {
            column: ColumnRef::new(scope.alias.clone(), root.identity_field.clone()),
            subquery: Box::new(subquery),
            negated: quantifier != Quantifier::Some,
        }))
    }

    /// Resolve a field reference to a qualified column.
    ///
    /// Accepts `field`, `<scope alias>.field`, `<joined alias>.field` and
    /// `relation.path.field`. A many-to-one relation field resolves to its
    /// foreign key column.
    fn resolve_column(&self, reference: &str, scope: &mut Scope) -> Result<ColumnRef, Error> {
        let Some((prefix, field)) = reference.rsplit_once('.') else {
            return self.column_on(&scope.entity, &scope.alias, reference);
        };
        if prefix == scope.alias {
            return self.column_on(&scope.entity, &scope.alias, field);
        }
        if let Some((alias, entity)) = scope.joined.get(prefix) {
            return self.column_on(entity, alias, field);
        }
        if let Some((alias, entity)) = scope.joined.values().find(|(alias, _)| alias == prefix) {
            return self.column_on(entity, alias, field);
        }

        // Relation path not joined yet.
        let chain = self.meta.resolve_path(&scope.entity, prefix)?;
        if !scope.auto_join {
            return Err(Error::InvalidInput(format!(
                "condition field '{reference}' needs relation '{prefix}' to be joined"
            )));
        }
        let mut parent_entity = scope.entity.clone();
        let mut parent_alias = scope.alias.clone();
        for (sub_path, relation) in path_prefixes(prefix).zip(chain) {
            let alias = format!("{}_{}", scope.alias, sub_path.replace('.', "_"));
            if !scope.joined.contains_key(sub_path) {
                let join = relation_join(
                    self.meta,
                    &parent_entity,
                    &parent_alias,
                    relation,
                    &alias,
                    JoinKind::Left,
                )?;
                scope.extra_joins.push(join);
                scope
                    .joined
                    .insert(sub_path.to_string(), (alias.clone(), relation.related_entity.clone()));
            }
            parent_entity = relation.related_entity.clone();
            parent_alias = alias;
        }
        self.column_on(&parent_entity, &parent_alias, field)
    }

    fn column_on(&self, entity: &str, alias: &str, field: &str) -> Result<ColumnRef, Error> {
        let descriptor = self.meta.field_descriptor(entity, field)?;
        match &descriptor.kind {
            FieldKind::Column(_) => Ok(ColumnRef::new(alias, field)),
            FieldKind::Relation(rel) => match rel.foreign_key.as_deref() {
                Some(fk) if rel.owning_side => Ok(ColumnRef::new(alias, fk)),
                _ => Err(Error::InvalidInput(format!(
                    "'{field}' on '{entity}' is a relation; compare its fields or use some/every/none"
                ))),
            },
        }
    }
}

fn negate_wrapped(predicate: Predicate, negated: bool) -> Predicate {
    if negated {
        Predicate::Not(Box::new(predicate))
    } else {
        predicate
    }
}
