//! Proptest generators for property-based testing.

use proptest::prelude::*;

use graft_core::{EntityId, NodeRef, Primitive, PropertyMap, PropertyValue, RelationshipRef};

use crate::fixtures::SyntheticGraph;

/// Generate an entity id.
pub fn entity_id() -> impl Strategy<Value = EntityId> {
    "[a-z0-9]{1,16}".prop_map(EntityId::new)
}

/// Generate a type name.
pub fn type_name() -> impl Strategy<Value = String> {
    "[A-Z][A-Za-z]{0,15}".prop_map(String::from)
}

/// Generate a list member.
pub fn primitive() -> impl Strategy<Value = Primitive> {
    prop_oneof![
        ".{0,16}".prop_map(Primitive::String),
        any::<i64>().prop_map(Primitive::Integer),
        (-1.0e9f64..1.0e9).prop_map(Primitive::Float),
        any::<bool>().prop_map(Primitive::Boolean),
        (0i64..=i64::MAX / 2).prop_map(Primitive::Timestamp),
    ]
}

/// Generate a portable property value.
pub fn property_value() -> impl Strategy<Value = PropertyValue> {
    prop_oneof![
        ".{0,32}".prop_map(PropertyValue::String),
        any::<i64>().prop_map(PropertyValue::Integer),
        (-1.0e9f64..1.0e9).prop_map(PropertyValue::Float),
        any::<bool>().prop_map(PropertyValue::Boolean),
        (0i64..=i64::MAX / 2).prop_map(PropertyValue::Timestamp),
        prop::collection::vec(primitive(), 0..4).prop_map(PropertyValue::List),
        entity_id().prop_map(PropertyValue::Reference),
    ]
}

/// Generate a property map with up to `max_len` entries.
pub fn property_map(max_len: usize) -> impl Strategy<Value = PropertyMap> {
    prop::collection::btree_map("[a-z][a-zA-Z]{0,11}", property_value(), 0..=max_len).prop_map(
        |entries| {
            let mut map = PropertyMap::new();
            for (key, value) in entries {
                map.insert(key, value);
            }
            map
        },
    )
}

/// Generate a node snapshot.
pub fn node_ref() -> impl Strategy<Value = NodeRef> {
    (entity_id(), type_name(), property_map(8))
        .prop_map(|(id, ty, props)| NodeRef::new(id, ty).with_properties(props))
}

/// Generate a relationship snapshot.
pub fn relationship_ref() -> impl Strategy<Value = RelationshipRef> {
    (entity_id(), type_name(), entity_id(), entity_id(), property_map(4)).prop_map(
        |(id, ty, start, end, props)| RelationshipRef::new(id, ty, start, end).with_properties(props),
    )
}

/// Shape of a random directed graph: node count and edges by index.
///
/// Self-loops are allowed. Parallel edges share a relationship id and so
/// collapse into one relationship in an export set.
#[derive(Debug, Clone)]
pub struct GraphShape {
    pub nodes: usize,
    pub edges: Vec<(usize, usize)>,
}

impl GraphShape {
    /// Materialize as pages `n0..` linked by `LINK` relationships.
    pub fn build(&self) -> SyntheticGraph {
        let mut graph = SyntheticGraph::new();
        for i in 0..self.nodes {
            graph.add_page(&format!("n{}", i));
        }
        for &(start, end) in &self.edges {
            graph.link(&format!("n{}", start), &format!("n{}", end));
        }
        graph
    }
}

/// Generate a graph shape with up to `max_nodes` nodes.
pub fn graph_shape(max_nodes: usize) -> impl Strategy<Value = GraphShape> {
    (1..=max_nodes.max(1)).prop_flat_map(|nodes| {
        prop::collection::vec((0..nodes, 0..nodes), 0..=nodes * 3)
            .prop_map(move |edges| GraphShape { nodes, edges })
    })
}
