use std::collections::HashMap;

use fxhash::FxBuildHasher;
use plover_protocol as protocol;
use protocol::{Key, ObjType, ObjectId, OpId, ScalarValue};

/// The value a visible operation assigns to a property: either a primitive
/// (counters already folded) or a link to a child object.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ChildValue {
    Primitive(ScalarValue),
    Child(ObjectId, ObjType),
}

/// Per-object metadata: where the object hangs in the tree and which
/// assignments are currently visible for each of its properties. The
/// latter is what lets a patch re-emit the full conflict set for a key
/// when a nested object is touched.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ObjState {
    pub obj_type: ObjType,
    pub parent: Option<(ObjectId, Key)>,
    pub props: HashMap<Key, HashMap<OpId, ChildValue>>,
}

impl ObjState {
    pub fn new(obj_type: ObjType, parent: Option<(ObjectId, Key)>) -> ObjState {
        ObjState {
            obj_type,
            parent,
            props: HashMap::new(),
        }
    }

    pub fn is_seq(&self) -> bool {
        self.obj_type.is_sequence()
    }

    /// The currently visible assignments for a key, empty if the key has
    /// been deleted or never written.
    pub fn conflicts(&self, key: &Key) -> impl Iterator<Item = (&OpId, &ChildValue)> {
        self.props.get(key).into_iter().flatten()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ObjectStore {
    objs: HashMap<ObjectId, ObjState, FxBuildHasher>,
}

impl ObjectStore {
    pub fn new() -> ObjectStore {
        let mut objs = HashMap::default();
        objs.insert(ObjectId::Root, ObjState::new(ObjType::Map, None));
        ObjectStore { objs }
    }

    pub fn get(&self, id: &ObjectId) -> Option<&ObjState> {
        self.objs.get(id)
    }

    pub fn register(&mut self, id: ObjectId, state: ObjState) {
        // an object created concurrently by two changes would be a
        // duplicate op id, caught by the merge; re-registering on replay
        // of the same make op is harmless
        self.objs.entry(id).or_insert(state);
    }

    /// Replace the visible assignments for one property.
    pub fn set_prop(&mut self, obj: &ObjectId, key: Key, values: HashMap<OpId, ChildValue>) {
        if let Some(state) = self.objs.get_mut(obj) {
            if values.is_empty() {
                state.props.insert(key, HashMap::new());
            } else {
                state.props.insert(key, values);
            }
        }
    }
}
