//! Subcommand implementations.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use quarry_core::backend::MemoryError;
use quarry_core::catalog::{FieldRole, MetadataProvider};
use quarry_core::query::{JoinMode, SearchExecutor};
use quarry_core::{Catalog, MemoryBackend, RequestContext};
use quarry_proto::{AliasMode, SearchSpec};
use serde_json::Value as JsonValue;

/// CLI errors.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Core(#[from] quarry_core::Error),

    #[error(transparent)]
    Proto(#[from] quarry_proto::Error),

    #[error("invalid dataset: {0}")]
    Data(#[from] MemoryError),
}

fn read_json(path: &Path) -> Result<JsonValue, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&text).map_err(|source| CliError::Json {
        path: path.to_path_buf(),
        source,
    })
}

pub fn load_catalog(path: &Path) -> Result<Catalog, CliError> {
    let text = std::fs::read_to_string(path).map_err(|source| CliError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(Catalog::from_json(&text)?)
}

pub fn load_search(path: &Path, aliasing: Option<AliasMode>) -> Result<SearchSpec, CliError> {
    let spec = SearchSpec::from_json(&read_json(path)?)?;
    Ok(match aliasing {
        Some(mode) => spec.aliasing(mode),
        None => spec,
    })
}

/// Human-readable compilation report.
pub fn explain(executor: &SearchExecutor<'_>, spec: &SearchSpec) -> Result<String, CliError> {
    let compiled = executor.compile(spec)?;
    let mut out = String::new();

    let _ = writeln!(out, "entity: {}", compiled.entity);
    let _ = writeln!(out, "sql: {}", compiled.query.to_sql());
    if !compiled.query.all_params().is_empty() {
        let _ = writeln!(out, "params:");
        for (name, value) in compiled.query.all_params() {
            let _ = writeln!(out, "  {name} = {}", value.to_json());
        }
    }
    if !compiled.plan.is_empty() {
        let _ = writeln!(out, "joined:");
        for entry in compiled.plan.entries() {
            let mode = match entry.mode {
                JoinMode::Join => "join",
                JoinMode::IdProjection => "ids",
            };
            let _ = writeln!(
                out,
                "  {} -> {} as {} ({mode})",
                entry.path,
                entry.related_entity(),
                entry.alias
            );
        }
    }
    let deferred = compiled.hydration.fetched_paths();
    if !deferred.is_empty() {
        let _ = writeln!(out, "hydrated: {}", deferred.join(", "));
    }
    Ok(out)
}

/// Columns and reachable relation paths of an entity.
pub fn describe(catalog: &Catalog, entity: &str, depth: usize) -> Result<String, CliError> {
    let def = catalog.entity(entity)?;
    let mut out = String::new();
    let _ = writeln!(out, "{} (table {})", def.name, def.table_name());

    for field in def.columns() {
        let role = match catalog.field_role(entity, &field.name)? {
            FieldRole::PrimaryKey => " [pk]",
            FieldRole::RelationForeignKey => " [fk]",
            FieldRole::Column | FieldRole::Relation => "",
        };
        let kind = field.column_type().map(|t| t.display_name()).unwrap_or_default();
        let _ = writeln!(out, "  {}: {kind}{role}", field.name);
    }

    let paths = catalog.relation_paths(entity, depth)?;
    if !paths.is_empty() {
        let _ = writeln!(out, "relations:");
        for path in paths {
            let _ = writeln!(out, "  {path}");
        }
    }
    Ok(out)
}

/// Run a search against `data` and render the records as JSON.
pub async fn run(
    executor: &SearchExecutor<'_>,
    spec: SearchSpec,
    data: &Path,
) -> Result<String, CliError> {
    let backend = MemoryBackend::new();
    backend.load_json(&read_json(data)?)?;

    let records = executor.search(spec, &backend, &RequestContext::new()).await?;
    tracing::info!(records = records.len(), queries = backend.query_count(), "search complete");

    let json = JsonValue::Array(records.iter().map(|r| r.to_json()).collect());
    serde_json::to_string_pretty(&json).map_err(|source| CliError::Json {
        path: data.to_path_buf(),
        source,
    })
}
