use std::{collections::HashMap, fmt};

use serde::{
    de,
    de::{Error, MapAccess, Unexpected},
    ser::SerializeStruct,
    Deserialize, Deserializer, Serialize, Serializer,
};
use smol_str::SmolStr;

use super::read_field;
use crate::{DataType, Diff, DiffEdit, MapDiff, ObjType, ObjectId, OpId, ScalarValue, SeqDiff};

impl Serialize for Diff {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Diff::Map(diff) => diff.serialize(serializer),
            Diff::Seq(diff) => diff.serialize(serializer),
            Diff::Value(val) => match val {
                ScalarValue::Counter(_) => {
                    let mut op = serializer.serialize_struct("Value", 2)?;
                    op.serialize_field("value", &val)?;
                    op.serialize_field("datatype", "counter")?;
                    op.end()
                }
                ScalarValue::Timestamp(_) => {
                    let mut op = serializer.serialize_struct("Value", 2)?;
                    op.serialize_field("value", &val)?;
                    op.serialize_field("datatype", "timestamp")?;
                    op.end()
                }
                _ => {
                    let mut op = serializer.serialize_struct("Value", 1)?;
                    op.serialize_field("value", &val)?;
                    op.end()
                }
            },
        }
    }
}

impl Serialize for MapDiff {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_struct("MapDiff", 3)?;
        map.serialize_field("objectId", &self.object_id)?;
        map.serialize_field("type", &self.obj_type)?;
        map.serialize_field("props", &self.props)?;
        map.end()
    }
}

impl Serialize for SeqDiff {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_struct("SeqDiff", 3)?;
        map.serialize_field("objectId", &self.object_id)?;
        map.serialize_field("type", &self.obj_type)?;
        map.serialize_field("edits", &self.edits)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Diff {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DiffVisitor;
        const FIELDS: &[&str] = &["edits", "objectId", "type", "props", "value", "datatype"];

        impl<'de> de::Visitor<'de> for DiffVisitor {
            type Value = Diff;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("A diff")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Self::Value, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut edits: Option<Vec<DiffEdit>> = None;
                let mut object_id: Option<ObjectId> = None;
                let mut obj_type: Option<ObjType> = None;
                let mut props: Option<HashMap<SmolStr, HashMap<OpId, Diff>>> = None;
                let mut value: Option<ScalarValue> = None;
                let mut datatype: Option<DataType> = None;

                while let Some(field) = map.next_key::<String>()? {
                    match field.as_ref() {
                        "edits" => read_field("edits", &mut edits, &mut map)?,
                        "objectId" => read_field("objectId", &mut object_id, &mut map)?,
                        "type" => read_field("type", &mut obj_type, &mut map)?,
                        "props" => read_field("props", &mut props, &mut map)?,
                        "value" => read_field("value", &mut value, &mut map)?,
                        "datatype" => read_field("datatype", &mut datatype, &mut map)?,
                        _ => return Err(Error::unknown_field(&field, FIELDS)),
                    }
                }
                if value.is_some() || datatype.is_some() {
                    let datatype = datatype.unwrap_or(DataType::Undefined);
                    let value = value.ok_or_else(|| Error::missing_field("value"))?;
                    let value = value.as_datatype(datatype).map_err(|e| {
                        Error::invalid_value(
                            Unexpected::Other(e.unexpected.as_str()),
                            &e.expected.as_str(),
                        )
                    })?;
                    Ok(Diff::Value(value))
                } else {
                    let object_id = object_id.ok_or_else(|| Error::missing_field("objectId"))?;
                    let obj_type = obj_type.ok_or_else(|| Error::missing_field("type"))?;
                    if obj_type.is_sequence() {
                        let edits = edits.ok_or_else(|| Error::missing_field("edits"))?;
                        Ok(Diff::Seq(SeqDiff {
                            object_id,
                            obj_type,
                            edits,
                        }))
                    } else {
                        let props = props.ok_or_else(|| Error::missing_field("props"))?;
                        Ok(Diff::Map(MapDiff {
                            object_id,
                            obj_type,
                            props,
                        }))
                    }
                }
            }
        }
        deserializer.deserialize_struct("Diff", &FIELDS, DiffVisitor)
    }
}
