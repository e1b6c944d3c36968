//! Command-line arguments.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use quarry_core::query::JoinKind;
use quarry_core::SearchConfig;
use quarry_proto::AliasMode;

/// Default maximum relation path depth.
pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Command-line arguments for the `quarry` binary.
#[derive(Parser, Debug)]
#[command(name = "quarry")]
#[command(version, about = "Compile, explain and run declarative searches", long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Join type used for joined relations.
    #[arg(long, value_enum, default_value_t = JoinKindArg::Left, global = true)]
    pub join_kind: JoinKindArg,

    /// Root limit applied when a search sets none.
    #[arg(long, global = true)]
    pub default_limit: Option<u32>,

    /// Maximum relation path depth.
    #[arg(long, default_value_t = DEFAULT_MAX_DEPTH, global = true)]
    pub max_depth: usize,

    /// Request timeout in milliseconds. Set to 0 to disable.
    #[arg(long, default_value_t = 0, global = true)]
    pub timeout_ms: u64,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the join plan, SQL and parameters of a search.
    Explain {
        /// Schema bundle (JSON).
        #[arg(long)]
        schema: PathBuf,
        /// Search document (JSON).
        #[arg(long)]
        search: PathBuf,
        /// Override the aliasing mode of the search.
        #[arg(long)]
        aliasing: Option<AliasMode>,
    },
    /// List the columns and reachable relation paths of an entity.
    Describe {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        entity: String,
        /// Relation path depth to explore.
        #[arg(long, default_value_t = 2)]
        depth: usize,
    },
    /// Run a search against a JSON dataset held in memory.
    Run {
        #[arg(long)]
        schema: PathBuf,
        #[arg(long)]
        search: PathBuf,
        /// Tables as `{"Table": [{..row..}, ...]}`.
        #[arg(long)]
        data: PathBuf,
        #[arg(long)]
        aliasing: Option<AliasMode>,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKindArg {
    Left,
    Inner,
}

impl From<JoinKindArg> for JoinKind {
    fn from(kind: JoinKindArg) -> Self {
        match kind {
            JoinKindArg::Left => JoinKind::Left,
            JoinKindArg::Inner => JoinKind::Inner,
        }
    }
}

impl Args {
    /// Convert command-line arguments to search configuration.
    pub fn into_config(&self) -> SearchConfig {
        let mut config = SearchConfig::new()
            .with_join_kind(self.join_kind.into())
            .with_max_relation_depth(self.max_depth);
        if let Some(limit) = self.default_limit {
            config = config.with_default_limit(limit);
        }
        if self.timeout_ms > 0 {
            config = config.with_request_timeout(Duration::from_millis(self.timeout_ms));
        }
        config
    }
}
