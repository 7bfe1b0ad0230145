use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::ObjType;

impl Serialize for ObjType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.to_string().as_str())
    }
}

impl<'de> Deserialize<'de> for ObjType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        const VARIANTS: &[&str] = &["map", "table", "list", "text"];
        let s = String::deserialize(deserializer)?;
        ObjType::from_str(&s).map_err(|_| de::Error::unknown_variant(&s, VARIANTS))
    }
}
