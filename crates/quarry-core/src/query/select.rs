//! Backend-neutral select IR.
//!
//! A [`SelectQuery`] is what the engine hands to a [`QueryBackend`]: a root
//! table, joined relations, id-only relation projections, a predicate tree
//! with named parameters, ordering and pagination. SQL backends render it
//! with [`SelectQuery::to_sql`]; the in-memory backend evaluates it directly.
//!
//! [`QueryBackend`]: crate::backend::QueryBackend

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use quarry_proto::{OrderDirection, Value};

/// A column qualified by its alias.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnRef {
    pub alias: String,
    pub column: String,
}

impl ColumnRef {
    pub fn new(alias: impl Into<String>, column: impl Into<String>) -> Self {
        Self {
            alias: alias.into(),
            column: column.into(),
        }
    }
}

impl fmt::Display for ColumnRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.alias, self.column)
    }
}

/// Binary comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    Like,
    NotLike,
    ILike,
    NotILike,
    /// Array contains every element of the operand.
    Contains,
    /// Array is contained by the operand.
    ContainedBy,
    /// Arrays share at least one element.
    Overlap,
}

impl SqlOp {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SqlOp::Eq => "=",
            SqlOp::Ne => "!=",
            SqlOp::Gt => ">",
            SqlOp::Ge => ">=",
            SqlOp::Lt => "<",
            SqlOp::Le => "<=",
            SqlOp::Like => "LIKE",
            SqlOp::NotLike => "NOT LIKE",
            SqlOp::ILike => "ILIKE",
            SqlOp::NotILike => "NOT ILIKE",
            SqlOp::Contains => "@>",
            SqlOp::ContainedBy => "<@",
            SqlOp::Overlap => "&&",
        }
    }

    /// Operator with the opposite meaning, where one exists without
    /// changing null semantics.
    pub fn negated(&self) -> Option<SqlOp> {
        match self {
            SqlOp::Eq => Some(SqlOp::Ne),
            SqlOp::Ne => Some(SqlOp::Eq),
            SqlOp::Like => Some(SqlOp::NotLike),
            SqlOp::NotLike => Some(SqlOp::Like),
            SqlOp::ILike => Some(SqlOp::NotILike),
            SqlOp::NotILike => Some(SqlOp::ILike),
            _ => None,
        }
    }
}

/// Boolean connective.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoolOp {
    And,
    Or,
}

impl BoolOp {
    /// The dual connective (De Morgan).
    pub fn flip(self) -> BoolOp {
        match self {
            BoolOp::And => BoolOp::Or,
            BoolOp::Or => BoolOp::And,
        }
    }

    fn as_sql(&self) -> &'static str {
        match self {
            BoolOp::And => "AND",
            BoolOp::Or => "OR",
        }
    }
}

/// Predicate tree; leaves reference parameters by name.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        column: ColumnRef,
        op: SqlOp,
        param: String,
    },
    Between {
        column: ColumnRef,
        low: String,
        high: String,
        negated: bool,
    },
    IsNull {
        column: ColumnRef,
        negated: bool,
    },
    InList {
        column: ColumnRef,
        params: Vec<String>,
        negated: bool,
    },
    /// `1 = 1` or `1 = 0`.
    Constant(bool),
    InSubquery {
        column: ColumnRef,
        subquery: Box<SelectQuery>,
        negated: bool,
    },
    Group {
        op: BoolOp,
        operands: Vec<Predicate>,
    },
    Not(Box<Predicate>),
}

impl Predicate {
    /// Combine predicates with a connective; one operand is returned as is.
    pub fn group(op: BoolOp, mut operands: Vec<Predicate>) -> Option<Predicate> {
        match operands.len() {
            0 => None,
            1 => operands.pop(),
            _ => Some(Predicate::Group { op, operands }),
        }
    }

    fn write_sql(&self, out: &mut String) {
        match self {
            Predicate::Compare { column, op, param } => {
                out.push_str(&format!("{column} {} :{param}", op.as_sql()));
            }
            Predicate::Between {
                column,
                low,
                high,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                out.push_str(&format!("{column} {not}BETWEEN :{low} AND :{high}"));
            }
            Predicate::IsNull { column, negated } => {
                let not = if *negated { "NOT " } else { "" };
                out.push_str(&format!("{column} IS {not}NULL"));
            }
            Predicate::InList {
                column,
                params,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                let list: Vec<_> = params.iter().map(|p| format!(":{p}")).collect();
                out.push_str(&format!("{column} {not}IN ({})", list.join(", ")));
            }
            Predicate::Constant(true) => out.push_str("1 = 1"),
            Predicate::Constant(false) => out.push_str("1 = 0"),
            Predicate::InSubquery {
                column,
                subquery,
                negated,
            } => {
                let not = if *negated { "NOT " } else { "" };
                out.push_str(&format!("{column} {not}IN ({})", subquery.to_sql()));
            }
            Predicate::Group { op, operands } => {
                out.push('(');
                for (i, operand) in operands.iter().enumerate() {
                    if i > 0 {
                        out.push_str(&format!(" {} ", op.as_sql()));
                    }
                    operand.write_sql(out);
                }
                out.push(')');
            }
            Predicate::Not(inner) => {
                out.push_str("NOT (");
                inner.write_sql(out);
                out.push(')');
            }
        }
    }

    /// Render as SQL text.
    pub fn to_sql(&self) -> String {
        let mut out = String::new();
        self.write_sql(&mut out);
        out
    }
}

/// Join type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JoinKind {
    #[default]
    Left,
    Inner,
}

impl JoinKind {
    fn as_sql(&self) -> &'static str {
        match self {
            JoinKind::Left => "LEFT JOIN",
            JoinKind::Inner => "INNER JOIN",
        }
    }
}

/// Join condition.
#[derive(Debug, Clone, PartialEq)]
pub enum JoinOn {
    /// `left = right`, one side on the parent alias, the other on the joined alias.
    Columns { left: ColumnRef, right: ColumnRef },
    /// Through a link table: `link.parent_column = parent_key` and
    /// `joined.related_key = link.related_column`.
    Through {
        link_table: String,
        link_alias: String,
        parent_key: ColumnRef,
        parent_column: String,
        related_column: String,
        related_key: String,
    },
}

/// Where joined rows are attached in the result tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nest {
    /// Alias of the record that receives the relation.
    pub parent_alias: String,
    /// Relation field name.
    pub relation: String,
    /// Whether the relation holds at most one record.
    pub single: bool,
}

/// A joined table.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub kind: JoinKind,
    pub table: String,
    pub alias: String,
    pub primary_key: String,
    pub on: JoinOn,
    /// `None` for joins that only serve the predicate.
    pub nest: Option<Nest>,
}

impl JoinClause {
    fn write_sql(&self, out: &mut String) {
        match &self.on {
            JoinOn::Columns { left, right } => {
                out.push_str(&format!(
                    " {} {} {} ON {left} = {right}",
                    self.kind.as_sql(),
                    self.table,
                    self.alias
                ));
            }
            JoinOn::Through {
                link_table,
                link_alias,
                parent_key,
                parent_column,
                related_column,
                related_key,
            } => {
                out.push_str(&format!(
                    " {kind} {link_table} {link_alias} ON {link_alias}.{parent_column} = {parent_key} \
                     {kind} {} {} ON {}.{related_key} = {link_alias}.{related_column}",
                    self.table,
                    self.alias,
                    self.alias,
                    kind = self.kind.as_sql(),
                ));
            }
        }
    }
}

/// Source of the ids of an id-only relation.
#[derive(Debug, Clone, PartialEq)]
pub enum IdSource {
    /// Foreign key column on the parent row.
    Column(ColumnRef),
    /// Primary keys of related rows whose `foreign_key` equals `parent_key`.
    Inverse {
        table: String,
        primary_key: String,
        foreign_key: String,
        parent_key: ColumnRef,
    },
    /// Related keys listed in a link table for `parent_key`.
    Through {
        link_table: String,
        parent_column: String,
        related_column: String,
        parent_key: ColumnRef,
    },
}

/// An id-only relation projection: related keys without loading the entities.
#[derive(Debug, Clone, PartialEq)]
pub struct IdProjection {
    pub nest: Nest,
    pub source: IdSource,
}

impl IdProjection {
    fn select_sql(&self) -> String {
        let label = format!("{}__{}", self.nest.parent_alias, self.nest.relation);
        match &self.source {
            IdSource::Column(column) => format!("{column} AS {label}"),
            IdSource::Inverse {
                table,
                primary_key,
                foreign_key,
                parent_key,
            } => format!(
                "ARRAY(SELECT {table}.{primary_key} FROM {table} WHERE {table}.{foreign_key} = {parent_key}) AS {label}"
            ),
            IdSource::Through {
                link_table,
                parent_column,
                related_column,
                parent_key,
            } => format!(
                "ARRAY(SELECT {link_table}.{related_column} FROM {link_table} WHERE {link_table}.{parent_column} = {parent_key}) AS {label}"
            ),
        }
    }
}

/// One ordering term.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderTerm {
    pub column: ColumnRef,
    pub direction: OrderDirection,
}

/// An executable select.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub table: String,
    pub alias: String,
    pub primary_key: String,
    pub columns: Vec<ColumnRef>,
    pub joins: Vec<JoinClause>,
    pub id_projections: Vec<IdProjection>,
    pub predicate: Option<Predicate>,
    pub order_by: Vec<OrderTerm>,
    /// Applies to root records, not to joined rows.
    pub limit: Option<u32>,
    pub offset: Option<u32>,
    /// Parameters bound by this query (sub-queries carry their own).
    pub params: Vec<(String, Value)>,
}

impl SelectQuery {
    /// An empty select over `table AS alias`.
    pub fn new(table: impl Into<String>, alias: impl Into<String>, primary_key: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            alias: alias.into(),
            primary_key: primary_key.into(),
            columns: Vec::new(),
            joins: Vec::new(),
            id_projections: Vec::new(),
            predicate: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            params: Vec::new(),
        }
    }

    /// Root primary key column.
    pub fn key_column(&self) -> ColumnRef {
        ColumnRef::new(self.alias.clone(), self.primary_key.clone())
    }

    /// Value of a parameter bound by this query or one of its sub-queries.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.all_params()
            .into_iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }

    /// Parameters of this query followed by those of its sub-queries.
    pub fn all_params(&self) -> Vec<(&str, &Value)> {
        let mut out: Vec<(&str, &Value)> = self
            .params
            .iter()
            .map(|(n, v)| (n.as_str(), v))
            .collect();
        if let Some(predicate) = &self.predicate {
            collect_subquery_params(predicate, &mut out);
        }
        out
    }

    /// Render PostgreSQL-flavoured SQL with `:name` placeholders.
    pub fn to_sql(&self) -> String {
        let mut select: Vec<String> = self.columns.iter().map(ToString::to_string).collect();
        select.extend(self.id_projections.iter().map(IdProjection::select_sql));
        if select.is_empty() {
            select.push(self.key_column().to_string());
        }

        let mut out = format!("SELECT {} FROM {} {}", select.join(", "), self.table, self.alias);
        for join in &self.joins {
            join.write_sql(&mut out);
        }
        if let Some(predicate) = &self.predicate {
            out.push_str(" WHERE ");
            predicate.write_sql(&mut out);
        }
        if !self.order_by.is_empty() {
            let terms: Vec<_> = self
                .order_by
                .iter()
                .map(|t| match t.direction {
                    OrderDirection::Asc => format!("{} ASC", t.column),
                    OrderDirection::Desc => format!("{} DESC", t.column),
                })
                .collect();
            out.push_str(&format!(" ORDER BY {}", terms.join(", ")));
        }
        if let Some(limit) = self.limit {
            out.push_str(&format!(" LIMIT {limit}"));
        }
        if let Some(offset) = self.offset {
            out.push_str(&format!(" OFFSET {offset}"));
        }
        out
    }
}

fn collect_subquery_params<'a>(predicate: &'a Predicate, out: &mut Vec<(&'a str, &'a Value)>) {
    match predicate {
        Predicate::InSubquery { subquery, .. } => out.extend(subquery.all_params()),
        Predicate::Group { operands, .. } => {
            for operand in operands {
                collect_subquery_params(operand, out);
            }
        }
        Predicate::Not(inner) => collect_subquery_params(inner, out),
        _ => {}
    }
}

/// Parameter namespace for one query under construction.
///
/// Sub-builders share the sub-query counter of the builder they were spawned
/// from, so every nested query of one request gets a distinct `sq<N>_` prefix.
#[derive(Debug)]
pub struct QueryBuilder {
    prefix: String,
    params: Vec<(String, Value)>,
    subqueries: Arc<AtomicU32>,
}

impl QueryBuilder {
    /// Root builder; parameters are named `p0`, `p1`, ...
    pub fn new() -> Self {
        Self {
            prefix: String::new(),
            params: Vec::new(),
            subqueries: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Bind a value, returning its parameter name.
    pub fn bind(&mut self, value: Value) -> String {
        let name = format!("{}p{}", self.prefix, self.params.len());
        self.params.push((name.clone(), value));
        name
    }

    /// Builder for a nested query, with the next `sq<N>_` namespace.
    pub fn sub_builder(&self) -> QueryBuilder {
        let n = self.subqueries.fetch_add(1, Ordering::Relaxed) + 1;
        QueryBuilder {
            prefix: format!("sq{n}_"),
            params: Vec::new(),
            subqueries: Arc::clone(&self.subqueries),
        }
    }

    /// Parameter name prefix (empty for the root builder).
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Parameters bound so far.
    pub fn params(&self) -> &[(String, Value)] {
        &self.params
    }

    /// Consume the builder, returning its parameters.
    pub fn into_params(self) -> Vec<(String, Value)> {
        self.params
    }
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}
