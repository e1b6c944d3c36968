//! Backend alias allocation for relation paths.

use std::collections::{BTreeMap, HashMap};

use quarry_proto::AliasMode;

use crate::error::Error;

/// Compute the alias of a dotted path whose first segment is the root alias.
///
/// Long mode joins the segments with `_`, doubling underscores inside a
/// segment so that `a_b` and `a.b` stay apart. Names with a leading or
/// trailing underscore can still meet another path's alias; [`AliasTable`]
/// reports that as a collision. Short mode keeps the root segment
/// and replaces every later segment by its first character, its remaining
/// uppercase letters lowercased, its index and its length
/// (`model.mainPhoto` becomes `model_mp19`).
pub fn alias(path: &str, mode: AliasMode) -> String {
    match mode {
        AliasMode::Long => path
            .split('.')
            .enumerate()
            .map(|(index, segment)| {
                if index == 0 {
                    segment.to_string()
                } else {
                    segment.replace('_', "__")
                }
            })
            .collect::<Vec<_>>()
            .join("_"),
        AliasMode::Short => path
            .split('.')
            .enumerate()
            .map(|(index, segment)| {
                if index == 0 {
                    segment.to_string()
                } else {
                    short_segment(segment, index)
                }
            })
            .collect::<Vec<_>>()
            .join("_"),
    }
}

fn short_segment(segment: &str, index: usize) -> String {
    let mut chars = segment.chars();
    let mut token = String::new();
    if let Some(first) = chars.next() {
        token.push(first);
    }
    token.extend(chars.filter(char::is_ascii_uppercase).map(|c| c.to_ascii_lowercase()));
    token.push_str(&index.to_string());
    token.push_str(&segment.chars().count().to_string());
    token
}

/// Path to alias mapping for one search.
///
/// The root path (`""`) maps to the root alias. Every registration is checked
/// against the aliases already handed out, so two paths can never share one.
#[derive(Debug, Clone)]
pub struct AliasTable {
    mode: AliasMode,
    root: String,
    by_path: BTreeMap<String, String>,
    by_alias: HashMap<String, String>,
}

impl AliasTable {
    /// Create a table whose root path maps to `root_alias`.
    pub fn new(root_alias: impl Into<String>, mode: AliasMode) -> Self {
        let root = root_alias.into();
        let mut by_path = BTreeMap::new();
        let mut by_alias = HashMap::new();
        by_path.insert(String::new(), root.clone());
        by_alias.insert(root.clone(), String::new());
        Self {
            mode,
            root,
            by_path,
            by_alias,
        }
    }

    /// The root alias.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Aliasing mode.
    pub fn mode(&self) -> AliasMode {
        self.mode
    }

    /// Alias already registered for a path.
    pub fn get(&self, path: &str) -> Option<&str> {
        self.by_path.get(path).map(String::as_str)
    }

    /// Allocate (or return the memoized) alias of a relation path.
    pub fn allocate(&mut self, path: &str) -> Result<String, Error> {
        if let Some(existing) = self.by_path.get(path) {
            return Ok(existing.clone());
        }
        let full = if path.is_empty() {
            self.root.clone()
        } else {
            format!("{}.{path}", self.root)
        };
        self.register(path, alias(&full, self.mode))
    }

    /// Register a caller-chosen alias for a path.
    pub fn assign(&mut self, path: &str, alias: &str) -> Result<String, Error> {
        match self.by_path.get(path) {
            Some(existing) if existing == alias => Ok(existing.clone()),
            Some(existing) => Err(Error::InvalidInput(format!(
                "relation path '{path}' already uses alias '{existing}', cannot alias it '{alias}'"
            ))),
            None => self.register(path, alias.to_string()),
        }
    }

    fn register(&mut self, path: &str, alias: String) -> Result<String, Error> {
        if let Some(owner) = self.by_alias.get(&alias) {
            if owner != path {
                return Err(Error::AliasCollision {
                    alias,
                    first: display_path(owner),
                    second: display_path(path),
                });
            }
        }
        self.by_alias.insert(alias.clone(), path.to_string());
        self.by_path.insert(path.to_string(), alias.clone());
        Ok(alias)
    }

    /// Registered `(path, alias)` pairs in path order; the root comes first.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.by_path.iter().map(|(p, a)| (p.as_str(), a.as_str()))
    }
}

fn display_path(path: &str) -> String {
    if path.is_empty() {
        "<root>".to_string()
    } else {
        path.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_long_mode() {
        assert_eq!(alias("model", AliasMode::Long), "model");
        assert_eq!(alias("model.images.tags", AliasMode::Long), "model_images_tags");
    }

    #[test]
    fn test_short_mode() {
        assert_eq!(alias("model.mainPhoto", AliasMode::Short), "model_mp19");
        assert_eq!(alias("model.images.tags", AliasMode::Short), "model_i16_t24");
        assert_eq!(alias("model", AliasMode::Short), "model");
    }

    #[test]
    fn test_long_mode_is_deterministic_and_distinct() {
        let paths = ["model.a", "model.a.b", "model.ab", "model.b.a"];
        for p in paths {
            assert_eq!(alias(p, AliasMode::Long), alias(p, AliasMode::Long));
        }
        let mut aliases: Vec<_> = paths.iter().map(|p| alias(p, AliasMode::Long)).collect();
        aliases.sort();
        aliases.dedup();
        assert_eq!(aliases.len(), paths.len());
    }

    #[test]
    fn test_long_mode_keeps_snake_case_apart() {
        assert_eq!(alias("model.main_photo", AliasMode::Long), "model_main__photo");
        assert_eq!(alias("model.main.photo", AliasMode::Long), "model_main_photo");
        assert_eq!(alias("root_alias.tags", AliasMode::Long), "root_alias_tags");

        let mut table = AliasTable::new("model", AliasMode::Long);
        let nested = table.allocate("a.b").unwrap();
        let snake = table.allocate("a_b").unwrap();
        assert_ne!(nested, snake);
    }

    #[test]
    fn test_table_memoizes() {
        let mut table = AliasTable::new("model", AliasMode::Long);
        assert_eq!(table.get(""), Some("model"));
        let first = table.allocate("images").unwrap();
        assert_eq!(first, "model_images");
        assert_eq!(table.allocate("images").unwrap(), first);
        assert_eq!(table.iter().count(), 2);
    }

    #[test]
    fn test_short_collision_is_detected() {
        // "profile" and "preview" both compress to p17.
        let mut table = AliasTable::new("model", AliasMode::Short);
        table.allocate("profile").unwrap();
        let err = table.allocate("preview").unwrap_err();
        match err {
            Error::AliasCollision {
                alias,
                first,
                second,
            } => {
                assert_eq!(alias, "model_p17");
                assert_eq!(first, "profile");
                assert_eq!(second, "preview");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_assigned_alias_cannot_shadow_root() {
        let mut table = AliasTable::new("model", AliasMode::Long);
        assert!(table.assign("images", "img").is_ok());
        assert!(matches!(
            table.assign("tags", "model"),
            Err(Error::AliasCollision { .. })
        ));
    }
}
