//! In-memory backend.
//!
//! Evaluates [`SelectQuery`] values against tables of [`Record`] rows, the same
//! way a SQL database would: joins produce row tuples, the predicate filters
//! them, tuples are ordered and then folded back into one record per root row.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use quarry_proto::{OrderDirection, Record, Related, Value, ValueKey};
use serde_json::Value as JsonValue;
use tracing::trace;

use super::eval::{array_contains, array_overlaps, compare_values, like_match, sort_order, values_equal};
use super::QueryBackend;
use crate::error::BackendError;
use crate::query::{BoolOp, ColumnRef, IdSource, JoinClause, JoinKind, JoinOn, Predicate, SelectQuery, SqlOp};

/// Errors raised by the in-memory backend.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("row in table '{table}' has no usable primary key '{column}'")]
    MissingKey { table: String, column: String },

    #[error("unbound parameter: {0}")]
    UnboundParameter(String),

    #[error("invalid table data: {0}")]
    InvalidData(String),

    #[error("{0}")]
    Injected(String),
}

type Tables = HashMap<String, Vec<Record>>;

/// Tables of rows held in memory, with a log of executed queries.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    tables: RwLock<Tables>,
    executed: Mutex<Vec<SelectQuery>>,
    failure: Mutex<Option<String>>,
    latency: Option<Duration>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every fetch by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Builder form of [`MemoryBackend::insert`].
    pub fn with_rows(self, table: impl Into<String>, rows: impl IntoIterator<Item = Record>) -> Self {
        self.insert(table, rows);
        self
    }

    /// Append rows to a table, creating it if needed.
    pub fn insert(&self, table: impl Into<String>, rows: impl IntoIterator<Item = Record>) {
        self.tables.write().entry(table.into()).or_default().extend(rows);
    }

    /// Load tables from a JSON object of the form `{"Table": [{..row..}, ...]}`.
    pub fn load_json(&self, json: &JsonValue) -> Result<(), MemoryError> {
        let tables = json
            .as_object()
            .ok_or_else(|| MemoryError::InvalidData("expected an object of tables".into()))?;
        for (table, rows) in tables {
            let rows = rows
                .as_array()
                .ok_or_else(|| MemoryError::InvalidData(format!("table '{table}' is not an array")))?;
            let mut records = Vec::with_capacity(rows.len());
            for row in rows {
                let object = row
                    .as_object()
                    .ok_or_else(|| MemoryError::InvalidData(format!("row of '{table}' is not an object")))?;
                let mut record = Record::new();
                for (column, value) in object {
                    let value = Value::from_json(value)
                        .map_err(|e| MemoryError::InvalidData(format!("{table}.{column}: {e}")))?;
                    record.set(column.clone(), value);
                }
                records.push(record);
            }
            self.insert(table.clone(), records);
        }
        Ok(())
    }

    /// Make the next fetch fail with `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        *self.failure.lock() = Some(message.into());
    }

    /// Number of queries executed so far.
    pub fn query_count(&self) -> usize {
        self.executed.lock().len()
    }

    /// Queries executed so far, oldest first.
    pub fn executed(&self) -> Vec<SelectQuery> {
        self.executed.lock().clone()
    }

    pub fn clear_log(&self) {
        self.executed.lock().clear();
    }

    /// Run a query synchronously.
    pub fn execute(&self, query: &SelectQuery) -> Result<Vec<Record>, MemoryError> {
        let tables = self.tables.read();
        let params: HashMap<&str, &Value> = query.all_params().into_iter().collect();
        let evaluator = Evaluator {
            tables: &tables,
            params,
        };
        evaluator.select(query)
    }
}

#[async_trait]
impl QueryBackend for MemoryBackend {
    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Record>, BackendError> {
        self.executed.lock().push(query.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(message) = self.failure.lock().take() {
            return Err(MemoryError::Injected(message).into());
        }

        let records = self.execute(query)?;
        trace!(table = %query.table, rows = records.len(), "memory fetch");
        Ok(records)
    }
}

/// One joined row: alias -> row, `None` for unmatched left joins.
type Tuple<'q, 't> = HashMap<&'q str, Option<&'t Record>>;

static NULL: Value = Value::Null;

struct Evaluator<'q, 't> {
    tables: &'t Tables,
    params: HashMap<&'q str, &'q Value>,
}

impl<'q, 't> Evaluator<'q, 't> {
    fn select(&self, query: &'q SelectQuery) -> Result<Vec<Record>, MemoryError> {
        let mut tuples = self.tuples(query)?;
        if !query.order_by.is_empty() {
            tuples.sort_by(|a, b| {
                query
                    .order_by
                    .iter()
                    .map(|term| {
                        let ord = sort_order(column(a, &term.column), column(b, &term.column));
                        match term.direction {
                            OrderDirection::Asc => ord,
                            OrderDirection::Desc => ord.reverse(),
                        }
                    })
                    .find(|ord| *ord != Ordering::Equal)
                    .unwrap_or(Ordering::Equal)
            });
        }

        let groups = group_by(tuples.iter(), &query.alias, &query.table, &query.primary_key)?;
        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);

        groups
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|(row, group)| self.build(query, &query.alias, row, &group))
            .collect()
    }

    fn rows(&self, table: &str) -> Result<&'t [Record], MemoryError> {
        self.tables
            .get(table)
            .map(Vec::as_slice)
            .ok_or_else(|| MemoryError::UnknownTable(table.to_string()))
    }

    fn param(&self, name: &str) -> Result<&'q Value, MemoryError> {
        self.params
            .get(name)
            .copied()
            .ok_or_else(|| MemoryError::UnboundParameter(name.to_string()))
    }

    /// Joined and filtered tuples, unordered.
    fn tuples(&self, query: &'q SelectQuery) -> Result<Vec<Tuple<'q, 't>>, MemoryError> {
        let mut tuples: Vec<Tuple<'q, 't>> = self
            .rows(&query.table)?
            .iter()
            .map(|row| HashMap::from([(query.alias.as_str(), Some(row))]))
            .collect();

        for join in &query.joins {
            tuples = self.join(tuples, join)?;
        }

        match &query.predicate {
            Some(predicate) => {
                let mut kept = Vec::with_capacity(tuples.len());
                for tuple in tuples {
                    if self.matches(predicate, &tuple)? {
                        kept.push(tuple);
                    }
                }
                Ok(kept)
            }
            None => Ok(tuples),
        }
    }

    fn join(
        &self,
        tuples: Vec<Tuple<'q, 't>>,
        join: &'q JoinClause,
    ) -> Result<Vec<Tuple<'q, 't>>, MemoryError> {
        let related = self.rows(&join.table)?;
        let mut out = Vec::with_capacity(tuples.len());

        for tuple in tuples {
            // (link row, related row) pairs
            let matched: Vec<(Option<&'t Record>, &'t Record)> = match &join.on {
                JoinOn::Columns { left, right } => {
                    let (own, other) = if left.alias == join.alias {
                        (left, right)
                    } else {
                        (right, left)
                    };
                    let value = column(&tuple, other);
                    related
                        .iter()
                        .filter(|row| values_equal(row.get(&own.column).unwrap_or(&NULL), value))
                        .map(|row| (None, row))
                        .collect()
                }
                JoinOn::Through {
                    link_table,
                    parent_key,
                    parent_column,
                    related_column,
                    related_key,
                    ..
                } => {
                    let value = column(&tuple, parent_key);
                    let mut pairs = Vec::new();
                    for link in self.rows(link_table)? {
                        if !values_equal(link.get(parent_column).unwrap_or(&NULL), value) {
                            continue;
                        }
                        let target = link.get(related_column).unwrap_or(&NULL);
                        pairs.extend(
                            related
                                .iter()
                                .filter(|row| values_equal(row.get(related_key).unwrap_or(&NULL), target))
                                .map(|row| (Some(link), row)),
                        );
                    }
                    pairs
                }
            };

            let link_alias = match &join.on {
                JoinOn::Through { link_alias, .. } => Some(link_alias.as_str()),
                JoinOn::Columns { .. } => None,
            };

            if matched.is_empty() {
                if join.kind == JoinKind::Left {
                    let mut extended = tuple;
                    extended.insert(join.alias.as_str(), None);
                    if let Some(link_alias) = link_alias {
                        extended.insert(link_alias, None);
                    }
                    out.push(extended);
                }
                continue;
            }
            for (link, row) in matched {
                let mut extended = tuple.clone();
                extended.insert(join.alias.as_str(), Some(row));
                if let Some(link_alias) = link_alias {
                    extended.insert(link_alias, link);
                }
                out.push(extended);
            }
        }
        Ok(out)
    }

    /// Whether a tuple passes a predicate: only a `TRUE` outcome keeps it.
    fn matches(&self, predicate: &'q Predicate, tuple: &Tuple<'q, 't>) -> Result<bool, MemoryError> {
        Ok(self.truth(predicate, tuple)? == Some(true))
    }

    /// SQL three-valued evaluation; `None` is `UNKNOWN`.
    fn truth(&self, predicate: &'q Predicate, tuple: &Tuple<'q, 't>) -> Result<Option<bool>, MemoryError> {
        Ok(match predicate {
            Predicate::Compare { column: col, op, param } => {
                compare(column(tuple, col), *op, self.param(param)?)
            }
            Predicate::Between {
                column: col,
                low,
                high,
                negated,
            } => {
                let value = column(tuple, col);
                let low = compare_values(value, self.param(low)?);
                let high = compare_values(value, self.param(high)?);
                match (low, high) {
                    (Some(low), Some(high)) => {
                        Some((low != Ordering::Less && high != Ordering::Greater) != *negated)
                    }
                    _ => None,
                }
            }
            Predicate::IsNull { column: col, negated } => Some(column(tuple, col).is_null() != *negated),
            Predicate::InList {
                column: col,
                params,
                negated,
            } => {
                let value = column(tuple, col);
                if value.is_null() {
                    return Ok(None);
                }
                let mut found = false;
                let mut saw_null = false;
                for name in params {
                    let candidate = self.param(name)?;
                    if values_equal(value, candidate) {
                        found = true;
                        break;
                    }
                    saw_null |= candidate.is_null();
                }
                membership(found, saw_null, *negated)
            }
            Predicate::Constant(value) => Some(*value),
            Predicate::InSubquery {
                column: col,
                subquery,
                negated,
            } => {
                let value = column(tuple, col);
                if value.is_null() {
                    return Ok(None);
                }
                let key = subquery.key_column();
                let mut found = false;
                let mut saw_null = false;
                for sub in self.tuples(subquery)? {
                    let candidate = column(&sub, &key);
                    if values_equal(candidate, value) {
                        found = true;
                        break;
                    }
                    saw_null |= candidate.is_null();
                }
                membership(found, saw_null, *negated)
            }
            Predicate::Group { op, operands } => {
                // Kleene logic: a deciding operand wins, otherwise any
                // UNKNOWN operand makes the group UNKNOWN.
                let decisive = *op == BoolOp::Or;
                let mut unknown = false;
                for operand in operands {
                    match self.truth(operand, tuple)? {
                        Some(hit) if hit == decisive => return Ok(Some(decisive)),
                        Some(_) => {}
                        None => unknown = true,
                    }
                }
                if unknown {
                    None
                } else {
                    Some(!decisive)
                }
            }
            Predicate::Not(inner) => self.truth(inner, tuple)?.map(|hit| !hit),
        })
    }

    /// Fold the tuples of one row into a record, nesting joined relations.
    fn build(
        &self,
        query: &'q SelectQuery,
        alias: &str,
        row: &'t Record,
        tuples: &[&Tuple<'q, 't>],
    ) -> Result<Record, MemoryError> {
        let mut record = Record::new();
        for col in query.columns.iter().filter(|c| c.alias == alias) {
            record.set(col.column.clone(), row.get(&col.column).cloned().unwrap_or(Value::Null));
        }

        for join in &query.joins {
            let Some(nest) = join.nest.as_ref().filter(|n| n.parent_alias == alias) else {
                continue;
            };
            let mut children = Vec::new();
            let groups = group_by(tuples.iter().copied(), &join.alias, &join.table, &join.primary_key)?;
            for (child, group) in groups {
                children.push(self.build(query, &join.alias, child, &group)?);
            }
            let related = if nest.single {
                Related::One(children.into_iter().next().map(Box::new))
            } else {
                Related::Many(children)
            };
            record.set_relation(nest.relation.clone(), related);
        }

        for projection in query.id_projections.iter().filter(|p| p.nest.parent_alias == alias) {
            let ids = self.project_ids(&projection.source, row)?;
            record.set_relation(projection.nest.relation.clone(), Related::Ids(ids));
        }
        Ok(record)
    }

    fn project_ids(&self, source: &IdSource, row: &Record) -> Result<Vec<Value>, MemoryError> {
        let own = |col: &ColumnRef| row.get(&col.column).unwrap_or(&NULL);
        Ok(match source {
            IdSource::Column(col) => {
                let value = own(col);
                if value.is_null() {
                    Vec::new()
                } else {
                    vec![value.clone()]
                }
            }
            IdSource::Inverse {
                table,
                primary_key,
                foreign_key,
                parent_key,
            } => {
                let parent = own(parent_key);
                self.rows(table)?
                    .iter()
                    .filter(|r| values_equal(r.get(foreign_key).unwrap_or(&NULL), parent))
                    .filter_map(|r| r.get(primary_key).cloned())
                    .collect()
            }
            IdSource::Through {
                link_table,
                parent_column,
                related_column,
                parent_key,
            } => {
                let parent = own(parent_key);
                self.rows(link_table)?
                    .iter()
                    .filter(|r| values_equal(r.get(parent_column).unwrap_or(&NULL), parent))
                    .filter_map(|r| r.get(related_column).cloned())
                    .collect()
            }
        })
    }
}

/// Value of a qualified column in a tuple; null for missing rows or columns.
fn column<'t>(tuple: &Tuple<'_, 't>, col: &ColumnRef) -> &'t Value {
    tuple
        .get(col.alias.as_str())
        .copied()
        .flatten()
        .and_then(|row| row.get(&col.column))
        .unwrap_or(&NULL)
}

/// `[NOT] IN` outcome: a miss against a set holding NULL is `UNKNOWN`.
fn membership(found: bool, saw_null: bool, negated: bool) -> Option<bool> {
    if found {
        Some(!negated)
    } else if saw_null {
        None
    } else {
        Some(negated)
    }
}

/// Comparison outcome; NULL operands and incomparable values are `UNKNOWN`.
fn compare(value: &Value, op: SqlOp, param: &Value) -> Option<bool> {
    if value.is_null() || param.is_null() {
        return None;
    }
    let ordering = || compare_values(value, param);
    let like = |negated: bool, fold: bool| match (value.as_str(), param.as_str()) {
        (Some(v), Some(p)) if fold => Some(like_match(&v.to_lowercase(), &p.to_lowercase()) != negated),
        (Some(v), Some(p)) => Some(like_match(v, p) != negated),
        _ => None,
    };
    match op {
        SqlOp::Eq => Some(values_equal(value, param)),
        SqlOp::Ne => Some(!values_equal(value, param)),
        SqlOp::Gt => ordering().map(|o| o == Ordering::Greater),
        SqlOp::Ge => ordering().map(|o| o != Ordering::Less),
        SqlOp::Lt => ordering().map(|o| o == Ordering::Less),
        SqlOp::Le => ordering().map(|o| o != Ordering::Greater),
        SqlOp::Like => like(false, false),
        SqlOp::NotLike => like(true, false),
        SqlOp::ILike => like(false, true),
        SqlOp::NotILike => like(true, true),
        SqlOp::Contains => Some(array_contains(value, param)),
        SqlOp::ContainedBy => Some(array_contains(param, value)),
        SqlOp::Overlap => Some(array_overlaps(value, param)),
    }
}

/// Distinct rows of `alias` in first-seen order, each with its tuples.
/// Tuples where `alias` is unmatched are skipped.
fn group_by<'a, 'q: 'a, 't: 'a>(
    tuples: impl IntoIterator<Item = &'a Tuple<'q, 't>>,
    alias: &str,
    table: &str,
    primary_key: &str,
) -> Result<Vec<(&'t Record, Vec<&'a Tuple<'q, 't>>)>, MemoryError> {
    let mut groups: Vec<(&'t Record, Vec<&'a Tuple<'q, 't>>)> = Vec::new();
    let mut index: HashMap<ValueKey, usize> = HashMap::new();
    for tuple in tuples {
        let Some(row) = tuple.get(alias).copied().flatten() else {
            continue;
        };
        let key = row
            .get(primary_key)
            .and_then(Value::key)
            .ok_or_else(|| MemoryError::MissingKey {
                table: table.to_string(),
                column: primary_key.to_string(),
            })?;
        match index.get(&key) {
            Some(&slot) => groups[slot].1.push(tuple),
            None => {
                index.insert(key, groups.len());
                groups.push((row, vec![tuple]));
            }
        }
    }
    Ok(groups)
}
