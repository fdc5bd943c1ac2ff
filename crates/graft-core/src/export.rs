//! Export sets: the deduplicated closure of entities selected for a transfer.
//!
//! [`ExportSet::add`] is the only cycle guard. A neighbour is expanded only
//! when adding it succeeded, so every id is expanded at most once and the
//! walk terminates on any finite graph, cyclic or not, without a depth bound.

use std::collections::HashSet;

use crate::syncable::{NodeRef, RelationshipRef, Syncable, SyncableRef};
use crate::types::EntityId;

/// Default size of one file chunk on the wire, in bytes.
pub const DEFAULT_CHUNK_SIZE: u64 = 65_536;

/// Size units contributed by a file on top of its node: one per full chunk,
/// plus two for the begin and end frames.
pub fn chunk_units(file_size: u64, chunk_size: u64) -> u64 {
    file_size / chunk_size.max(1) + 2
}

/// The entities reachable from a root, in insertion (depth-first) order.
#[derive(Debug, Clone)]
pub struct ExportSet {
    nodes: Vec<NodeRef>,
    relationships: Vec<RelationshipRef>,
    node_ids: HashSet<EntityId>,
    relationship_ids: HashSet<EntityId>,
    total_size: u64,
    chunk_size: u64,
}

impl ExportSet {
    /// Create an empty set that sizes files against `chunk_size`.
    pub fn new(chunk_size: u64) -> Self {
        Self {
            nodes: Vec::new(),
            relationships: Vec::new(),
            node_ids: HashSet::new(),
            relationship_ids: HashSet::new(),
            total_size: 0,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Compute the closure of `root`.
    ///
    /// With `recursive = false` only the root itself is added. Otherwise the
    /// walk visits neighbours depth-first in enumeration order, descending
    /// into a neighbour only if [`add`](Self::add) returned true for it.
    /// The explicit stack yields the same order as the recursive definition.
    pub fn build<T: Syncable>(root: &T, recursive: bool, chunk_size: u64) -> Self {
        let mut set = Self::new(chunk_size);

        if let Some(root_ref) = root.sync_ref() {
            set.add(root_ref);
        }

        if !recursive {
            return set;
        }

        let mut stack = vec![root.sync_data().into_iter()];
        while let Some(frontier) = stack.last_mut() {
            match frontier.next() {
                Some(child) => {
                    let added = match child.sync_ref() {
                        Some(child_ref) => set.add(child_ref),
                        None => false,
                    };
                    if added {
                        stack.push(child.sync_data().into_iter());
                    }
                }
                None => {
                    stack.pop();
                }
            }
        }

        set
    }

    /// Insert an entity. Returns true if its id was not yet present in the
    /// collection for its kind.
    pub fn add(&mut self, entity: SyncableRef) -> bool {
        match entity {
            SyncableRef::Node(node) => self.add_node(node),
            SyncableRef::Relationship(rel) => self.add_relationship(rel),
        }
    }

    pub fn add_node(&mut self, node: NodeRef) -> bool {
        if !self.node_ids.insert(node.id.clone()) {
            return false;
        }

        self.total_size += 1;
        if let Some(size) = node.file_size {
            self.total_size += chunk_units(size, self.chunk_size);
        }
        self.nodes.push(node);
        true
    }

    pub fn add_relationship(&mut self, rel: RelationshipRef) -> bool {
        if !self.relationship_ids.insert(rel.id.clone()) {
            return false;
        }

        self.total_size += 1;
        self.relationships.push(rel);
        true
    }

    /// Nodes in insertion order.
    pub fn nodes(&self) -> &[NodeRef] {
        &self.nodes
    }

    /// Relationships in insertion order.
    pub fn relationships(&self) -> &[RelationshipRef] {
        &self.relationships
    }

    pub fn contains_node(&self, id: &EntityId) -> bool {
        self.node_ids.contains(id)
    }

    pub fn contains_relationship(&self, id: &EntityId) -> bool {
        self.relationship_ids.contains(id)
    }

    /// Nodes + relationships + chunk units of every file node.
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunk_size(&self) -> u64 {
        self.chunk_size
    }

    /// Number of distinct entities (not size units).
    pub fn len(&self) -> usize {
        self.nodes.len() + self.relationships.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty() && self.relationships.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    /// Adjacency-list graph where every edge is also a relationship entity.
    struct Graph {
        nodes: Vec<&'static str>,
        edges: Vec<(&'static str, &'static str)>,
        files: HashMap<&'static str, u64>,
    }

    #[derive(Clone, Copy)]
    enum Handle<'g> {
        Node(&'g Graph, &'static str),
        Edge(&'g Graph, usize),
    }

    impl<'g> Syncable for Handle<'g> {
        fn sync_node(&self) -> Option<NodeRef> {
            match self {
                Handle::Node(g, id) => {
                    let mut node = NodeRef::new(*id, "Page");
                    node.file_size = g.files.get(id).copied();
                    Some(node)
                }
                Handle::Edge(..) => None,
            }
        }

        fn sync_relationship(&self) -> Option<RelationshipRef> {
            match self {
                Handle::Edge(g, i) => {
                    let (s, t) = g.edges[*i];
                    Some(RelationshipRef::new(format!("{}->{}", s, t), "LINK", s, t))
                }
                Handle::Node(..) => None,
            }
        }

        fn sync_data(&self) -> Vec<Self> {
            match self {
                Handle::Node(g, id) => {
                    let mut out = Vec::new();
                    for (i, (s, t)) in g.edges.iter().enumerate() {
                        if s == id {
                            out.push(Handle::Node(*g, *t));
                            out.push(Handle::Edge(*g, i));
                        }
                    }
                    out
                }
                Handle::Edge(..) => Vec::new(),
            }
        }
    }

    fn graph(nodes: &[&'static str], edges: &[(&'static str, &'static str)]) -> Graph {
        Graph {
            nodes: nodes.to_vec(),
            edges: edges.to_vec(),
            files: HashMap::new(),
        }
    }

    fn node_ids(set: &ExportSet) -> Vec<&str> {
        set.nodes().iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_two_cycle_terminates() {
        let g = graph(&["A", "B"], &[("A", "B"), ("B", "A")]);
        let set = ExportSet::build(&Handle::Node(&g, "A"), true, DEFAULT_CHUNK_SIZE);

        assert_eq!(node_ids(&set), vec!["A", "B"]);
        assert_eq!(set.relationships().len(), 2);
        assert_eq!(set.total_size(), 4);
    }

    #[test]
    fn test_long_cycle_terminates() {
        let names = ["n0", "n1", "n2", "n3", "n4", "n5", "n6"];
        let mut edges = Vec::new();
        for i in 0..names.len() {
            edges.push((names[i], names[(i + 1) % names.len()]));
        }
        let g = graph(&names, &edges);
        let set = ExportSet::build(&Handle::Node(&g, "n0"), true, DEFAULT_CHUNK_SIZE);

        assert_eq!(node_ids(&set), names.to_vec());
        assert_eq!(set.relationships().len(), names.len());
        assert_eq!(g.nodes.len(), set.nodes().len());
    }

    #[test]
    fn test_depth_first_insertion_order() {
        // A -> B -> D, A -> C: D must come before C.
        let g = graph(&["A", "B", "C", "D"], &[("A", "B"), ("A", "C"), ("B", "D")]);
        let set = ExportSet::build(&Handle::Node(&g, "A"), true, DEFAULT_CHUNK_SIZE);

        assert_eq!(node_ids(&set), vec!["A", "B", "D", "C"]);
    }

    #[test]
    fn test_non_recursive_only_root() {
        let g = graph(&["A", "B"], &[("A", "B")]);
        let set = ExportSet::build(&Handle::Node(&g, "A"), false, DEFAULT_CHUNK_SIZE);

        assert_eq!(node_ids(&set), vec!["A"]);
        assert!(set.relationships().is_empty());
        assert_eq!(set.total_size(), 1);
    }

    #[test]
    fn test_self_loop() {
        let g = graph(&["A"], &[("A", "A")]);
        let set = ExportSet::build(&Handle::Node(&g, "A"), true, DEFAULT_CHUNK_SIZE);

        assert_eq!(node_ids(&set), vec!["A"]);
        assert_eq!(set.relationships().len(), 1);
    }

    #[test]
    fn test_add_is_idempotent() {
        let mut set = ExportSet::new(DEFAULT_CHUNK_SIZE);
        assert!(set.add(SyncableRef::Node(NodeRef::new("x", "Page"))));
        assert!(!set.add(SyncableRef::Node(NodeRef::new("x", "Page"))));

        // Same id in the relationship collection is a different entity.
        assert!(set.add(SyncableRef::Relationship(RelationshipRef::new(
            "x", "LINK", "a", "b"
        ))));
        assert_eq!(set.len(), 2);
        assert_eq!(set.total_size(), 2);
    }

    #[test]
    fn test_file_size_estimation() {
        let mut set = ExportSet::new(1_048_576);
        set.add_node(NodeRef::new("f", "File").with_file_size(10_485_760));

        assert_eq!(chunk_units(10_485_760, 1_048_576), 12);
        assert_eq!(set.total_size(), 13);
    }

    #[test]
    fn test_small_file_still_has_framing_units() {
        let mut g = graph(&["F"], &[]);
        g.files.insert("F", 100);
        let set = ExportSet::build(&Handle::Node(&g, "F"), true, 4096);

        // 1 node + 0 full chunks + 2 framing
        assert_eq!(set.total_size(), 3);
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;
        use proptest::prelude::prop;

        proptest! {
            #[test]
            fn total_size_counts_each_id_once(
                ids in prop::collection::vec("[a-e]", 0..30),
                sizes in prop::collection::vec(prop::option::of(0u64..100_000), 30),
                chunk_size in 1u64..10_000,
            ) {
                let mut set = ExportSet::new(chunk_size);
                let mut expected = 0u64;
                let mut seen = HashSet::new();

                for (id, size) in ids.iter().zip(&sizes) {
                    let mut node = NodeRef::new(id.as_str(), "Page");
                    node.file_size = *size;
                    let added = set.add_node(node);

                    prop_assert_eq!(added, seen.insert(id.clone()));
                    if added {
                        expected += 1 + size.map_or(0, |s| chunk_units(s, chunk_size));
                    }
                }
                prop_assert_eq!(set.total_size(), expected);
                prop_assert_eq!(set.len(), seen.len());
            }
        }
    }
}
