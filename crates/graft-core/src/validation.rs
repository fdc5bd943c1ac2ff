//! Structural checks applied to incoming snapshots before they touch a store.

use crate::error::ValidationError;
use crate::syncable::{NodeRef, RelationshipRef};
use crate::types::{EntityId, PropertyMap};

/// Maximum number of properties on one entity.
pub const MAX_PROPERTIES: usize = 1024;

/// Maximum length of a type name in bytes.
pub const MAX_TYPE_NAME_LEN: usize = 256;

/// Validate a node snapshot.
pub fn validate_node(node: &NodeRef) -> Result<(), ValidationError> {
    validate_common(&node.id, &node.type_name, &node.properties)
}

/// Validate a relationship snapshot, including both endpoint ids.
pub fn validate_relationship(rel: &RelationshipRef) -> Result<(), ValidationError> {
    validate_common(&rel.id, &rel.type_name, &rel.properties)?;

    if rel.source_id.is_empty() || rel.target_id.is_empty() {
        return Err(ValidationError::EmptyEndpoint(rel.id.to_string()));
    }

    Ok(())
}

fn validate_common(
    id: &EntityId,
    type_name: &str,
    properties: &PropertyMap,
) -> Result<(), ValidationError> {
    if id.is_empty() {
        return Err(ValidationError::EmptyId);
    }

    if type_name.is_empty() {
        return Err(ValidationError::EmptyTypeName(id.to_string()));
    }

    if type_name.len() > MAX_TYPE_NAME_LEN {
        return Err(ValidationError::TypeNameTooLong {
            id: id.to_string(),
            max: MAX_TYPE_NAME_LEN,
        });
    }

    if properties.len() > MAX_PROPERTIES {
        return Err(ValidationError::TooManyProperties {
            id: id.to_string(),
            count: properties.len(),
            max: MAX_PROPERTIES,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_node() {
        assert!(validate_node(&NodeRef::new("n1", "Page")).is_ok());
    }

    #[test]
    fn test_empty_id_rejected() {
        assert_eq!(
            validate_node(&NodeRef::new("", "Page")),
            Err(ValidationError::EmptyId)
        );
    }

    #[test]
    fn test_empty_type_rejected() {
        assert!(matches!(
            validate_node(&NodeRef::new("n1", "")),
            Err(ValidationError::EmptyTypeName(_))
        ));
    }

    #[test]
    fn test_relationship_endpoints_required() {
        let rel = RelationshipRef::new("r1", "LINK", "a", "");
        assert!(matches!(
            validate_relationship(&rel),
            Err(ValidationError::EmptyEndpoint(_))
        ));
    }

    #[test]
    fn test_too_many_properties() {
        let props: PropertyMap = (0..=MAX_PROPERTIES)
            .map(|i| (format!("k{}", i), crate::PropertyValue::Integer(i as i64)))
            .collect();
        let node = NodeRef::new("n1", "Page").with_properties(props);
        assert!(matches!(
            validate_node(&node),
            Err(ValidationError::TooManyProperties { .. })
        ));
    }
}
