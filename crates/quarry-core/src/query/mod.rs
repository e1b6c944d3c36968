//! Search compilation and execution.
//!
//! This module turns a `SearchSpec` into a primary `SelectQuery` (aliases,
//! joins, compiled condition, ordering) and loads the remaining relations with
//! batched secondary queries.

mod alias;
mod assembler;
mod condition;
mod hydrate;
mod join;
mod select;

pub use alias::{alias, AliasTable};
pub use assembler::{CompiledSearch, SearchExecutor};
pub use condition::{ConditionCompiler, Scope};
pub use hydrate::{Hydrator, RelationNode, RelationTree};
pub use join::{relation_join, JoinMode, JoinPlan, JoinPlanEntry, JoinPlanner};
pub use select::{
    BoolOp, ColumnRef, IdProjection, IdSource, JoinClause, JoinKind, JoinOn, Nest, OrderTerm, Predicate,
    QueryBuilder, SelectQuery, SqlOp,
};
