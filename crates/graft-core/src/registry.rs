//! Registry of syncable entity types.
//!
//! The registry is built once when a replicator is set up and passed by
//! reference to everything that needs to classify types. It answers two
//! questions: which types belong to a list-syncables category, and which
//! node types carry file content.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Coarse category used to filter list-syncables requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SyncCategory {
    Pages,
    Files,
    Folders,
    Schema,
}

impl SyncCategory {
    /// Parse a category name, case-insensitively.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pages" => Some(Self::Pages),
            "files" => Some(Self::Files),
            "folders" => Some(Self::Folders),
            "schema" => Some(Self::Schema),
            _ => None,
        }
    }
}

/// Whether a type names nodes or relationships.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Node,
    Relationship,
}

/// Registration record for one type name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeEntry {
    pub kind: EntityKind,
    pub category: Option<SyncCategory>,
    /// Node type whose instances carry binary content.
    pub file: bool,
}

/// Node and relationship type names selected by a filter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeSelection {
    pub node_types: Vec<String>,
    pub relationship_types: Vec<String>,
}

impl TypeSelection {
    pub fn is_empty(&self) -> bool {
        self.node_types.is_empty() && self.relationship_types.is_empty()
    }

    fn push(&mut self, name: &str, kind: EntityKind) {
        let list = match kind {
            EntityKind::Node => &mut self.node_types,
            EntityKind::Relationship => &mut self.relationship_types,
        };
        if !list.iter().any(|existing| existing == name) {
            list.push(name.to_string());
        }
    }
}

/// Explicit type registry.
#[derive(Debug, Clone, Default)]
pub struct TypeRegistry {
    types: BTreeMap<String, TypeEntry>,
}

impl TypeRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The content-management types: pages, files, folders and schema.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register_node("Page", Some(SyncCategory::Pages));
        registry.register_file_node("File", Some(SyncCategory::Files));
        registry.register_node("Folder", Some(SyncCategory::Folders));
        registry.register_node("SchemaNode", Some(SyncCategory::Schema));
        registry.register_relationship("SchemaRelationship", Some(SyncCategory::Schema));
        registry
    }

    pub fn register_node(&mut self, name: impl Into<String>, category: Option<SyncCategory>) {
        self.types.insert(
            name.into(),
            TypeEntry {
                kind: EntityKind::Node,
                category,
                file: false,
            },
        );
    }

    pub fn register_file_node(&mut self, name: impl Into<String>, category: Option<SyncCategory>) {
        self.types.insert(
            name.into(),
            TypeEntry {
                kind: EntityKind::Node,
                category,
                file: true,
            },
        );
    }

    pub fn register_relationship(
        &mut self,
        name: impl Into<String>,
        category: Option<SyncCategory>,
    ) {
        self.types.insert(
            name.into(),
            TypeEntry {
                kind: EntityKind::Relationship,
                category,
                file: false,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&TypeEntry> {
        self.types.get(name)
    }

    pub fn is_file_type(&self, name: &str) -> bool {
        self.types.get(name).is_some_and(|entry| entry.file)
    }

    /// Resolve a raw filter into concrete type names.
    ///
    /// Each entry is either a category name (`pages`, `files`, `folders`,
    /// `schema`) or a registered type name. Unknown entries are skipped.
    pub fn resolve_filter<S: AsRef<str>>(&self, filter: &[S]) -> TypeSelection {
        let mut selection = TypeSelection::default();

        for raw in filter {
            let raw = raw.as_ref().trim();
            if let Some(category) = SyncCategory::parse(raw) {
                for (name, entry) in &self.types {
                    if entry.category == Some(category) {
                        selection.push(name, entry.kind);
                    }
                }
            } else if let Some(entry) = self.types.get(raw) {
                selection.push(raw, entry.kind);
            }
        }

        selection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_category_selects_both_kinds() {
        let registry = TypeRegistry::standard();
        let selection = registry.resolve_filter(&["schema"]);

        assert_eq!(selection.node_types, vec!["SchemaNode".to_string()]);
        assert_eq!(
            selection.relationship_types,
            vec!["SchemaRelationship".to_string()]
        );
    }

    #[test]
    fn test_mixed_filter_deduplicates_and_skips_unknown() {
        let registry = TypeRegistry::standard();
        let selection = registry.resolve_filter(&["Pages", "Page", "Bogus", " folders "]);

        assert_eq!(
            selection.node_types,
            vec!["Page".to_string(), "Folder".to_string()]
        );
        assert!(selection.relationship_types.is_empty());
    }

    #[test]
    fn test_file_types() {
        let registry = TypeRegistry::standard();
        assert!(registry.is_file_type("File"));
        assert!(!registry.is_file_type("Folder"));
        assert!(!registry.is_file_type("Unregistered"));
    }
}
