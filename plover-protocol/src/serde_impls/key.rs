use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::{ElementId, Key};

impl Serialize for Key {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Key::Map(s) => serializer.serialize_str(s),
            Key::Seq(eid) => eid.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Key {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if let Ok(eid) = ElementId::from_str(&s) {
            Ok(Key::Seq(eid))
        } else {
            Ok(Key::Map(s.into()))
        }
    }
}
