use serde::{
    de::{Error, MapAccess, Unexpected, Visitor},
    ser::SerializeStruct,
    Deserialize, Deserializer, Serialize, Serializer,
};

use super::read_field;
use crate::{DataType, Key, ObjType, ObjectId, Op, OpId, OpType, ScalarValue, SortedVec};

impl Serialize for Op {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut fields = 4;

        if self.insert {
            fields += 1
        }

        match &self.action {
            OpType::Set(ScalarValue::Timestamp(_)) | OpType::Set(ScalarValue::Counter(_)) => {
                fields += 2
            }
            OpType::Inc(_) | OpType::Set(_) => fields += 1,
            _ => {}
        }

        let mut op = serializer.serialize_struct("Operation", fields)?;
        op.serialize_field("action", &self.action)?;
        op.serialize_field("obj", &self.obj)?;
        op.serialize_field(
            if self.key.is_map_key() { "key" } else { "elemId" },
            &self.key,
        )?;
        if self.insert {
            op.serialize_field("insert", &self.insert)?;
        }
        match &self.action {
            OpType::Inc(n) => op.serialize_field("value", &n)?,
            OpType::Set(ScalarValue::Counter(value)) => {
                op.serialize_field("value", &value)?;
                op.serialize_field("datatype", &DataType::Counter)?;
            }
            OpType::Set(ScalarValue::Timestamp(value)) => {
                op.serialize_field("value", &value)?;
                op.serialize_field("datatype", &DataType::Timestamp)?;
            }
            OpType::Set(value) => op.serialize_field("value", &value)?,
            OpType::Del | OpType::Make(..) => {}
        }
        op.serialize_field("pred", &self.pred)?;
        op.end()
    }
}

// We need to manually implement serialization for `RawOpType` because we
// serialize it as a string rather than an enum map.
#[derive(PartialEq, Debug, Clone, Copy)]
pub enum RawOpType {
    MakeMap,
    MakeTable,
    MakeList,
    MakeText,
    Del,
    Inc,
    Set,
}

impl Serialize for RawOpType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = match self {
            RawOpType::MakeMap => "makeMap",
            RawOpType::MakeTable => "makeTable",
            RawOpType::MakeList => "makeList",
            RawOpType::MakeText => "makeText",
            RawOpType::Del => "del",
            RawOpType::Inc => "inc",
            RawOpType::Set => "set",
        };
        serializer.serialize_str(s)
    }
}

impl<'de> Deserialize<'de> for RawOpType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        const VARIANTS: &[&str] = &[
            "makeMap", "makeTable", "makeList", "makeText", "del", "inc", "set",
        ];
        let raw_type = String::deserialize(deserializer)?;
        match raw_type.as_str() {
            "makeMap" => Ok(RawOpType::MakeMap),
            "makeTable" => Ok(RawOpType::MakeTable),
            "makeList" => Ok(RawOpType::MakeList),
            "makeText" => Ok(RawOpType::MakeText),
            "del" => Ok(RawOpType::Del),
            "inc" => Ok(RawOpType::Inc),
            "set" => Ok(RawOpType::Set),
            other => Err(Error::unknown_variant(other, VARIANTS)),
        }
    }
}

impl<'de> Deserialize<'de> for Op {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        const FIELDS: &[&str] = &[
            "action", "obj", "key", "elemId", "pred", "insert", "datatype", "value",
        ];
        struct OperationVisitor;
        impl<'de> Visitor<'de> for OperationVisitor {
            type Value = Op;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("An operation object")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Op, V::Error>
            where
                V: MapAccess<'de>,
            {
                let mut action: Option<RawOpType> = None;
                let mut obj: Option<ObjectId> = None;
                let mut key: Option<Key> = None;
                let mut pred: Option<SortedVec<OpId>> = None;
                let mut insert: Option<bool> = None;
                let mut datatype: Option<DataType> = None;
                let mut value: Option<Option<ScalarValue>> = None;
                while let Some(field) = map.next_key::<String>()? {
                    match field.as_ref() {
                        "action" => read_field("action", &mut action, &mut map)?,
                        "obj" => read_field("obj", &mut obj, &mut map)?,
                        "key" => read_field("key", &mut key, &mut map)?,
                        "elemId" => read_field("elemId", &mut key, &mut map)?,
                        "pred" => read_field("pred", &mut pred, &mut map)?,
                        "insert" => read_field("insert", &mut insert, &mut map)?,
                        "datatype" => read_field("datatype", &mut datatype, &mut map)?,
                        "value" => read_field("value", &mut value, &mut map)?,
                        _ => return Err(Error::unknown_field(&field, FIELDS)),
                    }
                }
                let action = action.ok_or_else(|| Error::missing_field("action"))?;
                let obj = obj.ok_or_else(|| Error::missing_field("obj"))?;
                let key = key.ok_or_else(|| Error::missing_field("key"))?;
                let pred = pred.ok_or_else(|| Error::missing_field("pred"))?;
                let insert = insert.unwrap_or(false);
                let action = match action {
                    RawOpType::MakeMap => OpType::Make(ObjType::Map),
                    RawOpType::MakeTable => OpType::Make(ObjType::Table),
                    RawOpType::MakeList => OpType::Make(ObjType::List),
                    RawOpType::MakeText => OpType::Make(ObjType::Text),
                    RawOpType::Del => OpType::Del,
                    RawOpType::Set => {
                        let raw_value = value
                            .ok_or_else(|| Error::missing_field("value"))?
                            .unwrap_or(ScalarValue::Null);
                        let value = if let Some(datatype) = datatype {
                            raw_value.as_datatype(datatype).map_err(|e| {
                                Error::invalid_value(
                                    Unexpected::Other(e.unexpected.as_str()),
                                    &e.expected.as_str(),
                                )
                            })?
                        } else {
                            raw_value
                        };
                        OpType::Set(value)
                    }
                    RawOpType::Inc => match value.flatten() {
                        Some(ScalarValue::Int(n)) => Ok(OpType::Inc(n)),
                        Some(ScalarValue::Uint(n)) => Ok(OpType::Inc(n as i64)),
                        Some(ScalarValue::F64(n)) => Ok(OpType::Inc(n as i64)),
                        Some(ScalarValue::F32(n)) => Ok(OpType::Inc(n as i64)),
                        Some(ScalarValue::Counter(n)) => Ok(OpType::Inc(n)),
                        Some(ScalarValue::Timestamp(n)) => Ok(OpType::Inc(n)),
                        Some(ScalarValue::Bytes(s)) => {
                            Err(Error::invalid_value(Unexpected::Bytes(&s), &"a number"))
                        }
                        Some(ScalarValue::Str(s)) => {
                            Err(Error::invalid_value(Unexpected::Str(&s), &"a number"))
                        }
                        Some(ScalarValue::Boolean(b)) => {
                            Err(Error::invalid_value(Unexpected::Bool(b), &"a number"))
                        }
                        Some(ScalarValue::Null) => {
                            Err(Error::invalid_value(Unexpected::Other("null"), &"a number"))
                        }
                        None => Err(Error::missing_field("value")),
                    }?,
                };
                Ok(Op {
                    action,
                    obj,
                    key,
                    pred,
                    insert,
                })
            }
        }
        deserializer.deserialize_struct("Operation", FIELDS, OperationVisitor)
    }
}

impl<T> Serialize for SortedVec<T>
where
    T: Serialize + Ord,
{
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_seq(self.iter())
    }
}

impl<'de, T> Deserialize<'de> for SortedVec<T>
where
    T: Deserialize<'de> + Ord,
{
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = Vec::deserialize(deserializer)?;
        Ok(Self::from(v))
    }
}
