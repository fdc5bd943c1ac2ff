//! Session-scoped identifier remapping.

use std::collections::HashMap;

use crate::types::EntityId;

/// Outcome of resolving a source-instance id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolved {
    /// The id was created or merged earlier in this session.
    Mapped(EntityId),
    /// No mapping exists; the literal source id is returned unchanged.
    Unmapped(EntityId),
}

impl Resolved {
    pub fn id(&self) -> &EntityId {
        match self {
            Resolved::Mapped(id) | Resolved::Unmapped(id) => id,
        }
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, Resolved::Mapped(_))
    }
}

/// Source id → destination id, populated as entities are applied.
///
/// Lives exactly as long as one sync session and is never persisted.
#[derive(Debug, Default)]
pub struct IdentityMap {
    ids: HashMap<EntityId, EntityId>,
}

impl IdentityMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping, returning the previous destination if any.
    pub fn insert(&mut self, source: EntityId, destination: EntityId) -> Option<EntityId> {
        self.ids.insert(source, destination)
    }

    pub fn get(&self, source: &EntityId) -> Option<&EntityId> {
        self.ids.get(source)
    }

    /// Translate `source`, falling back to the literal id when unmapped.
    pub fn resolve(&self, source: &EntityId) -> Resolved {
        match self.ids.get(source) {
            Some(dest) => Resolved::Mapped(dest.clone()),
            None => Resolved::Unmapped(source.clone()),
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }
}
