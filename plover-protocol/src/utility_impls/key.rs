use crate::{ElementId, Key, OpId};

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::Map(s.into())
    }
}

impl From<OpId> for Key {
    fn from(id: OpId) -> Self {
        Key::Seq(ElementId::Id(id))
    }
}

impl From<&OpId> for Key {
    fn from(id: &OpId) -> Self {
        Key::Seq(ElementId::Id(id.clone()))
    }
}

impl From<ElementId> for Key {
    fn from(id: ElementId) -> Self {
        Key::Seq(id)
    }
}
