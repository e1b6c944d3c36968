//! Search execution settings.

use std::time::Duration;

use crate::error::Error;
use crate::query::JoinKind;

/// Settings applied to every search run by a [`SearchExecutor`].
///
/// [`SearchExecutor`]: crate::query::SearchExecutor
#[derive(Debug, Clone, PartialEq)]
pub struct SearchConfig {
    /// Join type used for relations resolved by join.
    pub join_kind: JoinKind,
    /// Root limit applied when a search sets none.
    pub default_limit: Option<u32>,
    /// Maximum number of segments in a requested relation path.
    pub max_relation_depth: usize,
    /// Time budget for one search, primary query and hydration included.
    pub request_timeout: Option<Duration>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            join_kind: JoinKind::Left,
            default_limit: None,
            max_relation_depth: 5,
            request_timeout: None,
        }
    }
}

impl SearchConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_join_kind(mut self, kind: JoinKind) -> Self {
        self.join_kind = kind;
        self
    }

    pub fn with_default_limit(mut self, limit: u32) -> Self {
        self.default_limit = Some(limit);
        self
    }

    pub fn with_max_relation_depth(mut self, depth: usize) -> Self {
        self.max_relation_depth = depth;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Check a relation path against the depth limit.
    pub fn validate_depth(&self, path: &str, depth: usize) -> Result<(), Error> {
        if depth > self.max_relation_depth {
            return Err(Error::InvalidInput(format!(
                "relation path '{path}' has depth {depth}, maximum is {}",
                self.max_relation_depth
            )));
        }
        Ok(())
    }
}
