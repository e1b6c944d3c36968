//! Query backends.
//!
//! A backend executes one [`SelectQuery`] per round trip and returns one
//! [`Record`] per distinct root row, with joined relations nested under their
//! relation names and id projections as [`Related::Ids`]. Limit and offset
//! count root records.
//!
//! [`Related::Ids`]: quarry_proto::Related::Ids

mod eval;
mod memory;

use async_trait::async_trait;
use quarry_proto::Record;

use crate::error::BackendError;
use crate::query::SelectQuery;

pub use eval::{compare_values, like_match, values_equal};
pub use memory::{MemoryBackend, MemoryError};

/// Executes select queries.
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Run one query.
    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Record>, BackendError>;
}

#[async_trait]
impl<B: QueryBackend + ?Sized> QueryBackend for std::sync::Arc<B> {
    async fn fetch(&self, query: &SelectQuery) -> Result<Vec<Record>, BackendError> {
        (**self).fetch(query).await
    }
}
