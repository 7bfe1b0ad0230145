use serde::{Serialize, Serializer};

use super::op::RawOpType;
use crate::{ObjType, OpType};

impl Serialize for OpType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let raw_type = match self {
            OpType::Make(ObjType::Map) => RawOpType::MakeMap,
            OpType::Make(ObjType::Table) => RawOpType::MakeTable,
            OpType::Make(ObjType::List) => RawOpType::MakeList,
            OpType::Make(ObjType::Text) => RawOpType::MakeText,
            OpType::Del => RawOpType::Del,
            OpType::Inc(_) => RawOpType::Inc,
            OpType::Set(_) => RawOpType::Set,
        };
        raw_type.serialize(serializer)
    }
}
