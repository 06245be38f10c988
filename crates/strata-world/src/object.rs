//! Generic map objects: typed records placed on a block.

use serde::{Deserialize, Serialize};
use strata_common::{BlockPos, ObjectId, PropertiesSet};

/// A typed domain record (building, plant, item, ...) with an opaque payload.
///
/// Only the envelope is interpreted here; `payload` belongs to whatever
/// system owns `type_tag`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapObject {
    /// Object id
    pub id: ObjectId,
    /// Domain type tag
    pub type_tag: u16,
    /// Block the object sits on
    pub pos: BlockPos,
    /// Object flags, see `ObjectProperty`
    pub props: PropertiesSet,
    /// Opaque domain payload
    pub payload: Vec<u8>,
}

impl MapObject {
    /// Creates an object with no flags and an empty payload.
    #[must_use]
    pub fn new(id: ObjectId, type_tag: u16, pos: BlockPos) -> Self {
        Self {
            id,
            type_tag,
            pos,
            props: PropertiesSet::EMPTY,
            payload: Vec::new(),
        }
    }

    /// Replaces the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = payload.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_common::{IdKind, ObjectProperty};

    #[test]
    fn test_object_builder() {
        let mut obj = MapObject::new(ObjectId::new(7, IdKind::Object), 3, BlockPos::new(0, 1, 2, 3))
            .with_payload([1u8, 2, 3]);
        obj.props.set(ObjectProperty::SOLID);
        assert_eq!(obj.id.serial(), 7);
        assert_eq!(obj.payload, vec![1, 2, 3]);
        assert!(obj.props.get(ObjectProperty::SOLID));
        assert!(!obj.props.get(ObjectProperty::MOVABLE));
    }
}
