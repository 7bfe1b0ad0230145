use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use crate::ScalarValue;

impl Serialize for ScalarValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            ScalarValue::Bytes(b) => serializer.serialize_bytes(b),
            ScalarValue::Str(s) => serializer.serialize_str(s),
            ScalarValue::Int(n) => serializer.serialize_i64(*n),
            ScalarValue::Uint(n) => serializer.serialize_u64(*n),
            ScalarValue::F64(n) => serializer.serialize_f64(*n),
            ScalarValue::F32(n) => serializer.serialize_f32(*n),
            ScalarValue::Counter(n) => serializer.serialize_i64(*n),
            ScalarValue::Timestamp(n) => serializer.serialize_i64(*n),
            ScalarValue::Boolean(b) => serializer.serialize_bool(*b),
            ScalarValue::Null => serializer.serialize_none(),
        }
    }
}

impl<'de> Deserialize<'de> for ScalarValue {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ValueVisitor;
        impl<'de> de::Visitor<'de> for ValueVisitor {
            type Value = ScalarValue;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                formatter.write_str("a number, string, bool, or null")
            }

            fn visit_bool<E>(self, value: bool) -> Result<ScalarValue, E>
            where
                E: de::Error,
            {
                Ok(ScalarValue::Boolean(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<ScalarValue, E>
            where
                E: de::Error,
            {
                Ok(ScalarValue::Uint(value))
            }

            fn visit_i64<E>(self, value: i64) -> Result<ScalarValue, E>
            where
                E: de::Error,
            {
                Ok(ScalarValue::Int(value))
            }

            fn visit_f64<E>(self, value: f64) -> Result<ScalarValue, E>
            where
                E: de::Error,
            {
                Ok(ScalarValue::F64(value))
            }

            fn visit_str<E>(self, value: &str) -> Result<ScalarValue, E>
            where
                E: de::Error,
            {
                Ok(ScalarValue::Str(value.into()))
            }

            fn visit_unit<E>(self) -> Result<ScalarValue, E>
            where
                E: de::Error,
            {
                Ok(ScalarValue::Null)
            }

            fn visit_none<E>(self) -> Result<ScalarValue, E>
            where
                E: de::Error,
            {
                Ok(ScalarValue::Null)
            }
        }
        deserializer.deserialize_any(ValueVisitor)
    }
}
