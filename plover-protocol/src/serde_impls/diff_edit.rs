use std::fmt;

use serde::{
    de::{Error, MapAccess, Visitor},
    ser::{SerializeStruct, Serializer},
    Deserialize, Deserializer, Serialize,
};

use super::read_field;
use crate::{Diff, DiffEdit, ElementId, OpId, ScalarValue};

// Normally, we would use `#[derive(Serialize)]`, but the edits are tagged
// with an `action` string and the multi-insert variant carries an optional
// `datatype` so the whole thing is written out by hand.
impl Serialize for DiffEdit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            DiffEdit::SingleElementInsert {
                index,
                elem_id,
                op_id,
                value,
            } => {
                let mut ss = serializer.serialize_struct("DiffEdit", 5)?;
                ss.serialize_field("action", "insert")?;
                ss.serialize_field("index", index)?;
                ss.serialize_field("elemId", elem_id)?;
                ss.serialize_field("opId", op_id)?;
                ss.serialize_field("value", value)?;
                ss.end()
            }
            DiffEdit::MultiElementInsert {
                index,
                elem_id,
                values,
            } => {
                let datatype = values[0].as_numerical_datatype();
                let mut ss = serializer.serialize_struct("DiffEdit", datatype.map_or(4, |_| 5))?;
                ss.serialize_field("action", "multi-insert")?;
                ss.serialize_field("index", index)?;
                ss.serialize_field("elemId", elem_id)?;
                if let Some(datatype) = datatype {
                    ss.serialize_field("datatype", &datatype)?;
                }
                ss.serialize_field("values", values)?;
                ss.end()
            }
            DiffEdit::Update {
                index,
                op_id,
                value,
            } => {
                let mut ss = serializer.serialize_struct("DiffEdit", 4)?;
                ss.serialize_field("action", "update")?;
                ss.serialize_field("index", index)?;
                ss.serialize_field("opId", op_id)?;
                ss.serialize_field("value", value)?;
                ss.end()
            }
            DiffEdit::Remove { index, count } => {
                let mut ss = serializer.serialize_struct("DiffEdit", 3)?;
                ss.serialize_field("action", "remove")?;
                ss.serialize_field("index", index)?;
                ss.serialize_field("count", count)?;
                ss.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for DiffEdit {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        const FIELDS: &[&str] = &[
            "action", "index", "elemId", "opId", "value", "values", "datatype", "count",
        ];
        struct DiffEditVisitor;
        impl<'de> Visitor<'de> for DiffEditVisitor {
            type Value = DiffEdit;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("A diff edit")
            }

            fn visit_map<V>(self, mut map: V) -> Result<DiffEdit, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut action: Option<String> = None;
                let mut index: Option<u64> = None;
                let mut elem_id: Option<ElementId> = None;
                let mut op_id: Option<OpId> = None;
                let mut value: Option<Diff> = None;
                let mut values: Option<Vec<ScalarValue>> = None;
                let mut datatype: Option<crate::DataType> = None;
                let mut count: Option<u64> = None;
                while let Some(field) = map.next_key::<String>()? {
                    match field.as_ref() {
                        "action" => read_field("action", &mut action, &mut map)?,
                        "index" => read_field("index", &mut index, &mut map)?,
                        "elemId" => read_field("elemId", &mut elem_id, &mut map)?,
                        "opId" => read_field("opId", &mut op_id, &mut map)?,
                        "value" => read_field("value", &mut value, &mut map)?,
                        "values" => read_field("values", &mut values, &mut map)?,
                        "datatype" => read_field("datatype", &mut datatype, &mut map)?,
                        "count" => read_field("count", &mut count, &mut map)?,
                        _ => return Err(Error::unknown_field(&field, FIELDS)),
                    }
                }
                let action = action.ok_or_else(|| Error::missing_field("action"))?;
                let index = index.ok_or_else(|| Error::missing_field("index"))?;
                match action.as_str() {
                    "insert" => {
                        let elem_id = elem_id.ok_or_else(|| Error::missing_field("elemId"))?;
                        let op_id = op_id.ok_or_else(|| Error::missing_field("opId"))?;
                        let value = value.ok_or_else(|| Error::missing_field("value"))?;
                        Ok(DiffEdit::SingleElementInsert {
                            index,
                            elem_id,
                            op_id,
                            value,
                        })
                    }
                    "multi-insert" => {
                        let elem_id = elem_id.ok_or_else(|| Error::missing_field("elemId"))?;
                        let values = values.ok_or_else(|| Error::missing_field("values"))?;
                        let values = if let Some(datatype) = datatype {
                            values
                                .into_iter()
                                .map(|v| {
                                    v.as_datatype(datatype).map_err(|e| {
                                        Error::custom(format!("bad multi-insert value: {}", e))
                                    })
                                })
                                .collect::<Result<Vec<_>, _>>()?
                        } else {
                            values
                        };
                        Ok(DiffEdit::MultiElementInsert {
                            index,
                            elem_id,
                            values,
                        })
                    }
                    "update" => {
                        let op_id = op_id.ok_or_else(|| Error::missing_field("opId"))?;
                        let value = value.ok_or_else(|| Error::missing_field("value"))?;
                        Ok(DiffEdit::Update {
                            index,
                            op_id,
                            value,
                        })
                    }
                    "remove" => {
                        let count = count.ok_or_else(|| Error::missing_field("count"))?;
                        Ok(DiffEdit::Remove { index, count })
                    }
                    other => Err(Error::unknown_variant(
                        other,
                        &["insert", "multi-insert", "update", "remove"],
                    )),
                }
            }
        }
        deserializer.deserialize_struct("DiffEdit", FIELDS, DiffEditVisitor)
    }
}
