use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

pub mod error;
mod serde_impls;
mod utility_impls;

pub use crate::error::InvalidActorId;

/// A replica identity. Stored as raw bytes, displayed and parsed as
/// lowercase hex. Actor ids compare lexicographically on their bytes,
/// which is the tiebreak order used everywhere an op id comparison is
/// needed.
#[derive(Eq, PartialEq, Hash, Clone, PartialOrd, Ord)]
pub struct ActorId(Vec<u8>);

impl ActorId {
    pub fn random() -> ActorId {
        ActorId(uuid::Uuid::new_v4().as_bytes().to_vec())
    }

    pub fn to_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_hex_string(&self) -> String {
        hex::encode(&self.0)
    }

    pub fn op_id_at(&self, seq: u64) -> OpId {
        OpId(seq, self.clone())
    }
}

/// The SHA-256 digest of a change's canonical encoding. Opaque to the
/// engine apart from equality and use as a dictionary key.
#[derive(Eq, PartialEq, Hash, Clone, Copy, PartialOrd, Ord)]
pub struct ChangeHash(pub [u8; 32]);

/// The pair (counter, actor), totally ordered by counter first, actor
/// second. Written `ctr@actor`.
#[derive(Eq, PartialEq, Hash, Clone)]
pub struct OpId(pub u64, pub ActorId);

impl OpId {
    pub fn new(seq: u64, actor: &ActorId) -> OpId {
        OpId(seq, actor.clone())
    }

    pub fn counter(&self) -> u64 {
        self.0
    }

    pub fn actor(&self) -> &ActorId {
        &self.1
    }

    /// Returns true if `other` has the same actor and a counter exactly
    /// `delta` greater than ours.
    pub fn delta(&self, other: &OpId, delta: u64) -> bool {
        self.1 == other.1 && self.0 + delta == other.0
    }
}

/// Either the root of the document (a map) or the id of the operation
/// that created the object.
#[derive(Eq, PartialEq, Debug, Hash, Clone)]
pub enum ObjectId {
    Id(OpId),
    Root,
}

#[derive(PartialEq, Eq, Debug, Hash, Clone)]
pub enum ElementId {
    Head,
    Id(OpId),
}

impl ElementId {
    pub fn as_opid(&self) -> Option<&OpId> {
        match self {
            ElementId::Head => None,
            ElementId::Id(opid) => Some(opid),
        }
    }

    pub fn into_key(self) -> Key {
        Key::Seq(self)
    }

    pub fn not_head(&self) -> bool {
        match self {
            ElementId::Head => false,
            ElementId::Id(_) => true,
        }
    }
}

#[derive(PartialEq, Eq, Debug, Hash, Clone)]
pub enum Key {
    Map(SmolStr),
    Seq(ElementId),
}

impl Key {
    pub fn head() -> Key {
        Key::Seq(ElementId::Head)
    }

    pub fn is_map_key(&self) -> bool {
        match self {
            Key::Map(_) => true,
            Key::Seq(_) => false,
        }
    }

    pub fn as_element_id(&self) -> Option<ElementId> {
        match self {
            Key::Map(_) => None,
            Key::Seq(eid) => Some(eid.clone()),
        }
    }

    pub fn to_opid(&self) -> Option<OpId> {
        match self.as_element_id()? {
            ElementId::Id(id) => Some(id),
            ElementId::Head => None,
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Hash, strum::EnumString, strum::Display)]
#[strum(serialize_all = "camelCase")]
pub enum ObjType {
    Map,
    Table,
    List,
    Text,
}

impl ObjType {
    pub fn is_sequence(self) -> bool {
        matches!(self, ObjType::List | ObjType::Text)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DataType {
    Counter,
    Timestamp,
    Bytes,
    Uint,
    Int,
    F64,
    F32,
    Undefined,
}

impl DataType {
    pub fn is_undefined(d: &DataType) -> bool {
        matches!(d, DataType::Undefined)
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum ScalarValue {
    Bytes(Vec<u8>),
    Str(SmolStr),
    Int(i64),
    Uint(u64),
    F64(f64),
    F32(f32),
    Counter(i64),
    Timestamp(i64),
    Boolean(bool),
    Null,
}

impl ScalarValue {
    /// If this value can be coerced to an i64, do so
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(n) => Some(*n),
            ScalarValue::Uint(n) => Some(*n as i64),
            ScalarValue::F32(n) => Some(*n as i64),
            ScalarValue::F64(n) => Some(*n as i64),
            ScalarValue::Counter(n) => Some(*n),
            ScalarValue::Timestamp(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_numerical_datatype(&self) -> Option<DataType> {
        match self {
            ScalarValue::Counter(..) => Some(DataType::Counter),
            ScalarValue::Timestamp(..) => Some(DataType::Timestamp),
            ScalarValue::Int(..) => Some(DataType::Int),
            ScalarValue::Uint(..) => Some(DataType::Uint),
            ScalarValue::F32(..) => Some(DataType::F32),
            ScalarValue::F64(..) => Some(DataType::F64),
            _ => None,
        }
    }

    /// Returns an Option of a new ScalarValue, interpreting this value as
    /// the given datatype, if such an interpretation exists.
    pub fn as_datatype(
        &self,
        datatype: DataType,
    ) -> Result<ScalarValue, error::InvalidScalarValue> {
        match (datatype, self) {
            (DataType::Counter, ScalarValue::Int(i)) => Ok(ScalarValue::Counter(*i)),
            (DataType::Counter, ScalarValue::Uint(u)) => Ok(ScalarValue::Counter(*u as i64)),
            (DataType::Timestamp, ScalarValue::Int(i)) => Ok(ScalarValue::Timestamp(*i)),
            (DataType::Timestamp, ScalarValue::Uint(u)) => Ok(ScalarValue::Timestamp(*u as i64)),
            (DataType::Int, ScalarValue::Int(i)) => Ok(ScalarValue::Int(*i)),
            (DataType::Int, ScalarValue::Uint(u)) => Ok(ScalarValue::Int(*u as i64)),
            (DataType::Uint, ScalarValue::Uint(u)) => Ok(ScalarValue::Uint(*u)),
            (DataType::F32, ScalarValue::F32(f)) => Ok(ScalarValue::F32(*f)),
            (DataType::F64, ScalarValue::F64(f)) => Ok(ScalarValue::F64(*f)),
            (DataType::Undefined, _) => Ok(self.clone()),
            (datatype, _) => Err(error::InvalidScalarValue {
                raw_value: self.clone(),
                expected: format!("a value of type {:?}", datatype),
                unexpected: format!("{:?}", self),
                datatype,
            }),
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum OpType {
    Make(ObjType),
    Del,
    Inc(i64),
    Set(ScalarValue),
}

/// A vector which is required to be sorted. Sorting is enforced on
/// construction and insertion, which means the canonical encoding of a
/// change does not depend on the order the frontend listed preds in.
#[derive(Debug, PartialEq, Eq, Hash, Clone, Default)]
pub struct SortedVec<T: Ord>(Vec<T>);

impl<T: Ord> SortedVec<T> {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn add(&mut self, item: T) {
        let idx = self.0.binary_search(&item).unwrap_or_else(|e| e);
        self.0.insert(idx, item);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        self.0.get(index)
    }

    pub fn contains(&self, item: &T) -> bool {
        self.0.binary_search(item).is_ok()
    }

    pub fn iter(&self) -> std::slice::Iter<T> {
        self.0.iter()
    }
}

impl<T: Ord> From<Vec<T>> for SortedVec<T> {
    fn from(mut other: Vec<T>) -> Self {
        other.sort_unstable();
        Self(other)
    }
}

impl<T: Ord> IntoIterator for SortedVec<T> {
    type Item = T;
    type IntoIter = std::vec::IntoIter<T>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[derive(Debug, PartialEq, Clone)]
pub struct Op {
    pub action: OpType,
    pub obj: ObjectId,
    pub key: Key,
    pub pred: SortedVec<OpId>,
    pub insert: bool,
}

impl Op {
    pub fn primitive_value(&self) -> Option<ScalarValue> {
        match &self.action {
            OpType::Set(v) => Some(v.clone()),
            OpType::Inc(i) => Some(ScalarValue::Int(*i)),
            _ => None,
        }
    }

    pub fn obj_type(&self) -> Option<ObjType> {
        match self.action {
            OpType::Make(objtype) => Some(objtype),
            _ => None,
        }
    }
}

/// A causally addressed batch of operations produced by one actor. This
/// is the uncompressed form; the backend works with the binary encoding
/// and only materializes this when asked to.
#[derive(Deserialize, Serialize, PartialEq, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Change {
    #[serde(rename = "ops")]
    pub operations: Vec<Op>,
    #[serde(rename = "actor")]
    pub actor_id: ActorId,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hash: Option<ChangeHash>,
    pub seq: u64,
    #[serde(rename = "startOp")]
    pub start_op: u64,
    pub time: i64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub message: Option<String>,
    #[serde(default)]
    pub deps: Vec<ChangeHash>,
}

impl Change {
    pub fn max_op(&self) -> u64 {
        self.start_op + (self.operations.len() as u64) - 1
    }
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patch {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub actor: Option<ActorId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub seq: Option<u64>,
    pub clock: HashMap<ActorId, u64>,
    pub deps: Vec<ChangeHash>,
    pub max_op: u64,
    pub pending_changes: usize,
    pub diffs: RootDiff,
}

/// The root of a diff is always a map and has no object id or type tags;
/// its serialized form carries them anyway so the frontend can treat it
/// uniformly with nested object diffs.
#[derive(Debug, PartialEq, Clone, Default)]
pub struct RootDiff {
    pub props: HashMap<SmolStr, HashMap<OpId, Diff>>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct MapDiff {
    pub object_id: ObjectId,
    pub obj_type: ObjType,
    pub props: HashMap<SmolStr, HashMap<OpId, Diff>>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct SeqDiff {
    pub object_id: ObjectId,
    pub obj_type: ObjType,
    pub edits: Vec<DiffEdit>,
}

#[derive(Debug, PartialEq, Clone)]
pub enum Diff {
    Map(MapDiff),
    Seq(SeqDiff),
    Value(ScalarValue),
}

impl Diff {
    pub fn object_id(&self) -> Option<&ObjectId> {
        match self {
            Diff::Map(diff) => Some(&diff.object_id),
            Diff::Seq(diff) => Some(&diff.object_id),
            Diff::Value(..) => None,
        }
    }
}

#[derive(Debug, PartialEq, Clone)]
pub enum DiffEdit {
    /// Describes the insertion of a single element into a list or text
    /// object. The element can be a nested object.
    SingleElementInsert {
        index: u64,
        elem_id: ElementId,
        op_id: OpId,
        value: Diff,
    },
    /// Describes the insertion of a consecutive run of elements, all
    /// produced by one operation run and all primitive values.
    MultiElementInsert {
        index: u64,
        elem_id: ElementId,
        values: Vec<ScalarValue>,
    },
    /// Describes the update of the element at `index`; several updates at
    /// the same index record a conflict.
    Update {
        index: u64,
        op_id: OpId,
        value: Diff,
    },
    Remove { index: u64, count: u64 },
}
