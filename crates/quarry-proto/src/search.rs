//! Search specification: the declarative description of one logical query.
//!
//! Relation paths use dot-notation from the root entity:
//! - "images" - the `images` relation of the root entity
//! - "images.tags" - the `tags` relation of each image (implies "images")

use std::collections::BTreeMap;

use rkyv::{Archive, Deserialize, Serialize};
use serde::{Deserialize as SerdeDeserialize, Serialize as SerdeSerialize};
use serde_json::{Map, Value as JsonValue};

use crate::condition::Condition;
use crate::error::Error;

/// Root alias used when the caller does not pick one.
pub const DEFAULT_ROOT_ALIAS: &str = "model";

/// Default page number for page-based pagination.
pub const DEFAULT_PAGE: u32 = 1;

/// Default page size for page-based pagination.
pub const DEFAULT_PAGE_SIZE: i64 = 50;

/// How relation paths are turned into backend identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, SerdeSerialize, SerdeDeserialize)]
#[serde(rename_all = "lowercase")]
pub enum AliasMode {
    /// Full underscore-joined path.
    #[default]
    Long,
    /// Compressed per-segment tokens, for backends with short identifier limits.
    Short,
}

impl std::str::FromStr for AliasMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "long" => Ok(AliasMode::Long),
            "short" => Ok(AliasMode::Short),
            other => Err(Error::InvalidSearch(format!("unknown aliasing mode '{other}'"))),
        }
    }
}

/// What to project from a related entity.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RelationSelect {
    /// Every column of the related entity.
    #[default]
    All,
    /// Only the listed columns (the primary key is always added).
    Fields(Vec<String>),
    /// Only the related primary keys, without loading the entities.
    IdsOnly,
}

/// A request to resolve one relation path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelationRequest {
    /// Caller-chosen backend alias, overriding the allocator.
    pub alias: Option<String>,
    /// Projection of the related entity.
    pub select: RelationSelect,
}

impl RelationRequest {
    /// Load every column of the related entity.
    pub fn all() -> Self {
        Self::default()
    }

    /// Load only the listed columns.
    pub fn fields<S: Into<String>>(fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            alias: None,
            select: RelationSelect::Fields(fields.into_iter().map(Into::into).collect()),
        }
    }

    /// Load only related ids.
    pub fn ids_only() -> Self {
        Self {
            alias: None,
            select: RelationSelect::IdsOnly,
        }
    }

    /// Use a specific alias for this path.
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    fn from_select_json(path: &str, json: &JsonValue) -> Result<Self, Error> {
        match json {
            JsonValue::Bool(true) | JsonValue::Null => Ok(Self::all()),
            JsonValue::String(s) if s == "*" => Ok(Self::all()),
            JsonValue::String(s) if s.eq_ignore_ascii_case("ids") => Ok(Self::ids_only()),
            JsonValue::Array(items) => {
                let fields = items
                    .iter()
                    .map(|item| {
                        item.as_str().map(String::from).ok_or_else(|| {
                            Error::InvalidRelationRequest(format!(
                                "field list for '{path}' must contain strings"
                            ))
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Self::fields(fields))
            }
            JsonValue::Object(map) => {
                let mut request = match map.get("select") {
                    Some(select) => Self::from_select_json(path, select)?,
                    None => Self::all(),
                };
                if let Some(alias) = map.get("alias") {
                    let alias = alias.as_str().ok_or_else(|| {
                        Error::InvalidRelationRequest(format!("alias for '{path}' must be a string"))
                    })?;
                    request.alias = Some(alias.to_string());
                }
                Ok(request)
            }
            other => Err(Error::InvalidRelationRequest(format!(
                "unsupported selection for '{path}': {other}"
            ))),
        }
    }
}

/// Parse the relation request surface.
///
/// Accepts a single path (`"images"`), a `"path alias"` pair, an array of
/// either, or a map `{path: selection}`.
pub fn parse_relation_requests(json: &JsonValue) -> Result<BTreeMap<String, RelationRequest>, Error> {
    let mut requests = BTreeMap::new();
    match json {
        JsonValue::String(entry) => {
            let (path, request) = parse_path_entry(entry)?;
            requests.insert(path, request);
        }
        JsonValue::Array(items) => {
            for item in items {
                let entry = item.as_str().ok_or_else(|| {
                    Error::InvalidRelationRequest(format!("expected a relation path, got {item}"))
                })?;
                let (path, request) = parse_path_entry(entry)?;
                requests.insert(path, request);
            }
        }
        JsonValue::Object(map) => {
            for (path, select) in map {
                validate_path(path)?;
                requests.insert(path.clone(), RelationRequest::from_select_json(path, select)?);
            }
        }
        other => {
            return Err(Error::InvalidRelationRequest(format!(
                "expected a string, array or object, got {other}"
            )))
        }
    }
    Ok(requests)
}

fn parse_path_entry(entry: &str) -> Result<(String, RelationRequest), Error> {
    let mut parts = entry.split_whitespace();
    let path = parts
        .next()
        .ok_or_else(|| Error::InvalidRelationRequest("empty relation path".into()))?;
    validate_path(path)?;
    let mut request = RelationRequest::all();
    if let Some(alias) = parts.next() {
        request.alias = Some(alias.to_string());
    }
    if parts.next().is_some() {
        return Err(Error::InvalidRelationRequest(format!(
            "expected 'path' or 'path alias', got '{entry}'"
        )));
    }
    Ok((path.to_string(), request))
}

fn validate_path(path: &str) -> Result<(), Error> {
    if path.is_empty() || path.split('.').any(str::is_empty) {
        return Err(Error::InvalidRelationRequest(format!(
            "malformed relation path '{path}'"
        )));
    }
    Ok(())
}

/// Every prefix of a relation path, shortest first, including the path itself.
pub fn path_prefixes(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('.')
        .map(move |(idx, _)| &path[..idx])
        .chain(std::iter::once(path))
}

/// Parent of a relation path, `None` for top-level paths.
pub fn parent_path(path: &str) -> Option<&str> {
    path.rsplit_once('.').map(|(parent, _)| parent)
}

/// Last segment of a relation path.
pub fn relation_name(path: &str) -> &str {
    path.rsplit('.').next().unwrap_or(path)
}

/// Number of segments in a relation path.
pub fn path_depth(path: &str) -> usize {
    path.matches('.').count() + 1
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

/// Order specification for sorting results.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct OrderSpec {
    /// Owning alias; `None` means the root alias.
    pub alias: Option<String>,
    /// Field to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Create an ascending order spec on the root entity.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            alias: None,
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order spec on the root entity.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            alias: None,
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }

    /// Attach the order spec to a specific alias.
    pub fn on(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Parse one sort reference: `[alias.]field[!]`, where `!` means descending.
    pub fn parse(reference: &str) -> Result<Self, Error> {
        let reference = reference.trim();
        let (reference, direction) = match reference.strip_suffix('!') {
            Some(rest) => (rest, OrderDirection::Desc),
            None => (reference, OrderDirection::Asc),
        };
        let (alias, field) = match reference.rsplit_once('.') {
            Some((alias, field)) => (Some(alias.to_string()), field),
            None => (None, reference),
        };
        if field.is_empty() || alias.as_deref() == Some("") {
            return Err(Error::InvalidSort(reference.to_string()));
        }
        Ok(Self {
            alias,
            field: field.to_string(),
            direction,
        })
    }
}

/// Parse a comma-separated sort string.
pub fn parse_sort(sort: &str) -> Result<Vec<OrderSpec>, Error> {
    sort.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(OrderSpec::parse)
        .collect()
}

/// Parse the sort surface: a comma-separated string or an array of references.
pub fn parse_sort_json(json: &JsonValue) -> Result<Vec<OrderSpec>, Error> {
    match json {
        JsonValue::String(s) => parse_sort(s),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| Error::InvalidSort(item.to_string()))
                    .and_then(OrderSpec::parse)
            })
            .collect(),
        other => Err(Error::InvalidSort(other.to_string())),
    }
}

/// Limit/offset pair.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize, SerdeSerialize, SerdeDeserialize)]
pub struct Pagination {
    /// Maximum number of root records; `None` means unlimited.
    pub limit: Option<u32>,
    /// Number of root records to skip.
    pub offset: u32,
}

impl Pagination {
    /// Page-based pagination. Missing values fall back to page 1 and 50 per
    /// page; a page size of zero or less disables limiting.
    pub fn page(page: Option<u32>, page_size: Option<i64>) -> Self {
        let page = page.unwrap_or(DEFAULT_PAGE).max(1);
        let page_size = page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size <= 0 {
            return Self {
                limit: None,
                offset: 0,
            };
        }
        let size = u32::try_from(page_size).unwrap_or(u32::MAX);
        Self {
            limit: Some(size),
            offset: (page - 1).saturating_mul(size),
        }
    }
}

/// The declarative description of one search.
///
/// Built per logical query through the fluent methods, then handed by value to
/// the executor.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchSpec {
    /// Root entity type.
    pub root_entity: String,
    /// Backend alias of the root entity.
    pub alias: String,
    /// Root columns to select (`None` = all).
    pub select: Option<Vec<String>>,
    /// Root columns to leave out.
    pub exclude_select: Option<Vec<String>>,
    /// Relations resolved with joins in the primary query.
    pub join_relations: BTreeMap<String, RelationRequest>,
    /// Relations resolved by batched secondary queries.
    pub no_join_relations: BTreeMap<String, RelationRequest>,
    /// Root filter.
    pub condition: Option<Condition>,
    /// Ordering.
    pub order_by: Vec<OrderSpec>,
    /// Maximum number of root records.
    pub limit: Option<u32>,
    /// Number of root records to skip.
    pub offset: Option<u32>,
    /// Alias allocation mode.
    pub aliasing: AliasMode,
}

impl SearchSpec {
    /// Create an empty search over an entity.
    pub fn new(root_entity: impl Into<String>) -> Self {
        Self {
            root_entity: root_entity.into(),
            alias: DEFAULT_ROOT_ALIAS.to_string(),
            select: None,
            exclude_select: None,
            join_relations: BTreeMap::new(),
            no_join_relations: BTreeMap::new(),
            condition: None,
            order_by: Vec::new(),
            limit: None,
            offset: None,
            aliasing: AliasMode::Long,
        }
    }

    /// Set the root alias.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = alias.into();
        self
    }

    /// Select only these root columns.
    pub fn select<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Leave these root columns out.
    pub fn exclude_select<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.exclude_select = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Join a relation path, loading every related column.
    pub fn join(self, path: impl Into<String>) -> Self {
        self.join_with(path, RelationRequest::all())
    }

    /// Join a relation path with an explicit request.
    pub fn join_with(mut self, path: impl Into<String>, request: RelationRequest) -> Self {
        self.join_relations.insert(path.into(), request);
        self
    }

    /// Resolve a relation path through batched secondary queries.
    pub fn no_join(self, path: impl Into<String>) -> Self {
        self.no_join_with(path, RelationRequest::all())
    }

    /// Resolve a relation path through batched secondary queries, with an explicit request.
    pub fn no_join_with(mut self, path: impl Into<String>, request: RelationRequest) -> Self {
        self.no_join_relations.insert(path.into(), request);
        self
    }

    /// Set the root filter, replacing any previous one.
    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// AND a condition into the existing filter.
    pub fn and_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(match self.condition.take() {
            Some(existing) => Condition::and([existing, condition]),
            None => condition,
        });
        self
    }

    /// Add ordering.
    pub fn order_by(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Add ordering from the sort surface (`"name,model.createdAt!"`).
    pub fn sort(mut self, sort: &str) -> Result<Self, Error> {
        self.order_by.extend(parse_sort(sort)?);
        Ok(self)
    }

    /// Set the limit.
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the offset.
    pub fn offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Apply page-based pagination (see [`Pagination::page`]).
    pub fn paginate(mut self, page: Option<u32>, page_size: Option<i64>) -> Self {
        let pagination = Pagination::page(page, page_size);
        self.limit = pagination.limit;
        self.offset = (pagination.offset > 0).then_some(pagination.offset);
        self
    }

    /// Set the aliasing mode.
    pub fn aliasing(mut self, mode: AliasMode) -> Self {
        self.aliasing = mode;
        self
    }

    /// Parse a search document.
    ///
    /// Recognized keys: `entity` (required), `alias`, `select`,
    /// `excludeSelect`, `join`, `noJoin`, `condition`, `sort`, `limit`,
    /// `offset`, `page`, `pageSize`, `aliasing`.
    pub fn from_json(json: &JsonValue) -> Result<Self, Error> {
        let doc = json
            .as_object()
            .ok_or_else(|| Error::InvalidSearch("search document must be an object".into()))?;

        let entity = doc
            .get("entity")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| Error::InvalidSearch("missing 'entity'".into()))?;
        let mut spec = SearchSpec::new(entity);

        if let Some(alias) = doc.get("alias") {
            spec.alias = string_field("alias", alias)?;
        }
        if let Some(select) = doc.get("select") {
            spec.select = Some(string_list("select", select)?);
        }
        if let Some(exclude) = doc.get("excludeSelect") {
            spec.exclude_select = Some(string_list("excludeSelect", exclude)?);
        }
        if let Some(join) = doc.get("join") {
            spec.join_relations = parse_relation_requests(join)?;
        }
        if let Some(no_join) = doc.get("noJoin") {
            spec.no_join_relations = parse_relation_requests(no_join)?;
        }
        if let Some(condition) = doc.get("condition") {
            spec.condition = Some(Condition::from_json(condition)?);
        }
        if let Some(sort) = doc.get("sort") {
            spec.order_by = parse_sort_json(sort)?;
        }
        if doc.contains_key("page") || doc.contains_key("pageSize") {
            let page = optional_u64(doc, "page")?.map(|p| u32::try_from(p).unwrap_or(u32::MAX));
            let page_size = optional_i64(doc, "pageSize")?;
            spec = spec.paginate(page, page_size);
        }
        if let Some(limit) = optional_u64(doc, "limit")? {
            spec.limit = Some(u32::try_from(limit).unwrap_or(u32::MAX));
        }
        if let Some(offset) = optional_u64(doc, "offset")? {
            spec.offset = Some(u32::try_from(offset).unwrap_or(u32::MAX));
        }
        if let Some(aliasing) = doc.get("aliasing") {
            spec.aliasing = string_field("aliasing", aliasing)?.parse()?;
        }
        Ok(spec)
    }
}

fn string_field(key: &str, json: &JsonValue) -> Result<String, Error> {
    json.as_str()
        .map(String::from)
        .ok_or_else(|| Error::InvalidSearch(format!("'{key}' must be a string")))
}

fn string_list(key: &str, json: &JsonValue) -> Result<Vec<String>, Error> {
    match json {
        JsonValue::String(s) => Ok(s
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()),
        JsonValue::Array(items) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(String::from)
                    .ok_or_else(|| Error::InvalidSearch(format!("'{key}' must contain strings")))
            })
            .collect(),
        _ => Err(Error::InvalidSearch(format!("'{key}' must be a string or an array"))),
    }
}

fn optional_u64(doc: &Map<String, JsonValue>, key: &str) -> Result<Option<u64>, Error> {
    match doc.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value
            .as_u64()
            .map(Some)
            .ok_or_else(|| Error::InvalidSearch(format!("'{key}' must be a non-negative integer"))),
    }
}

fn optional_i64(doc: &Map<String, JsonValue>, key: &str) -> Result<Option<i64>, Error> {
    match doc.get(key) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(value) => value
            .as_i64()
            .map(Some)
            .ok_or_else(|| Error::InvalidSearch(format!("'{key}' must be an integer"))),
    }
}
