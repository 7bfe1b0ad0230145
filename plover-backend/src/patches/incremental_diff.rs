use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use plover_protocol as protocol;
use protocol::{
    Diff, DiffEdit, ElementId, Key, MapDiff, ObjType, ObjectId, OpId, RootDiff, SeqDiff,
};

use super::Edits;
use crate::{
    actor_map::ActorMap,
    error::BackendError,
    object_store::ChildValue,
    op_set::OpSet,
};

/// The value carried by a pending edit: either a primitive, or a link to
/// a child object whose own diff is resolved when the patch is finalized.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum PendingValue {
    Primitive(protocol::ScalarValue),
    Child(ObjectId),
}

impl From<&ChildValue> for PendingValue {
    fn from(v: &ChildValue) -> PendingValue {
        match v {
            ChildValue::Primitive(value) => PendingValue::Primitive(value.clone()),
            ChildValue::Child(id, _) => PendingValue::Child(id.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum PendingEdit {
    Insert {
        index: u64,
        elem: ElementId,
        op_id: OpId,
        value: PendingValue,
        change: usize,
    },
    Update {
        index: u64,
        op_id: OpId,
        value: PendingValue,
        change: usize,
    },
    Remove {
        index: u64,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum PendingObjDiff {
    /// Touched keys of a map or table; the current conflict set for each
    /// is read back from the object store when the patch is finalized.
    Assign(HashSet<Key>),
    /// Ordered list edits for a list or text object.
    Seq(Vec<PendingEdit>),
}

/// `IncrementalPatch` accumulates, per object, the differences one call
/// to `apply_changes` makes. The merge records the outcome of every
/// property it touches and `finalize` turns the result into the tree
/// shaped diff the frontend consumes, linking every touched object back
/// up to the root.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct IncrementalPatch {
    objs: HashMap<ObjectId, PendingObjDiff>,
    change: usize,
}

impl IncrementalPatch {
    pub(crate) fn new() -> IncrementalPatch {
        IncrementalPatch {
            objs: HashMap::new(),
            change: 0,
        }
    }

    /// Mark the start of the next change of the batch. Edits recorded for
    /// different changes never supersede each other.
    pub(crate) fn begin_change(&mut self) {
        self.change += 1;
    }

    pub(crate) fn record_set(&mut self, oid: &ObjectId, key: Key) {
        match self
            .objs
            .entry(oid.clone())
            .or_insert_with(|| PendingObjDiff::Assign(HashSet::new()))
        {
            PendingObjDiff::Assign(keys) => {
                keys.insert(key);
            }
            PendingObjDiff::Seq(_) => {}
        }
    }

    fn seq_edits(&mut self, oid: &ObjectId) -> &mut Vec<PendingEdit> {
        match self
            .objs
            .entry(oid.clone())
            .or_insert_with(|| PendingObjDiff::Seq(Vec::new()))
        {
            PendingObjDiff::Seq(edits) => edits,
            // a sequence object only ever receives sequence edits
            PendingObjDiff::Assign(_) => unreachable!("list edit recorded against map diff"),
        }
    }

    pub(crate) fn record_seq_insert(
        &mut self,
        oid: &ObjectId,
        index: u64,
        elem: ElementId,
        values: Vec<(OpId, ChildValue)>,
    ) {
        let change = self.change;
        let edits = self.seq_edits(oid);
        let mut values = values.into_iter();
        if let Some((op_id, value)) = values.next() {
            edits.push(PendingEdit::Insert {
                index,
                elem,
                op_id,
                value: PendingValue::from(&value),
                change,
            });
        }
        for (op_id, value) in values {
            edits.push(PendingEdit::Update {
                index,
                op_id,
                value: PendingValue::from(&value),
                change,
            });
        }
    }

    pub(crate) fn record_seq_updates(
        &mut self,
        oid: &ObjectId,
        index: u64,
        values: Vec<(OpId, ChildValue)>,
    ) {
        let change = self.change;
        let edits = self.seq_edits(oid);
        supersede_updates(edits, index, change);
        for (op_id, value) in values {
            edits.push(PendingEdit::Update {
                index,
                op_id,
                value: PendingValue::from(&value),
                change,
            });
        }
    }

    pub(crate) fn record_seq_remove(&mut self, oid: &ObjectId, index: u64) {
        let edits = self.seq_edits(oid);
        edits.push(PendingEdit::Remove { index });
    }

    /// Generate the root diff: walk every touched object up to the root,
    /// re-emitting the property that contains it in each untouched parent,
    /// then recursively resolve child links into nested diffs.
    pub(crate) fn finalize(
        mut self,
        op_set: &OpSet,
        actors: &ActorMap,
    ) -> Result<RootDiff, BackendError> {
        if self.objs.is_empty() {
            return Ok(RootDiff::default());
        }

        let mut objs: Vec<ObjectId> = self.objs.keys().cloned().collect();
        while let Some(obj_id) = objs.pop() {
            if obj_id == ObjectId::Root {
                continue;
            }
            let parent_link = op_set.objs.get(&obj_id).and_then(|o| o.parent.clone());
            let (parent, key) = match parent_link {
                Some(link) => link,
                None => continue,
            };
            let parent_touched = self.objs.contains_key(&parent);
            self.link_child(op_set, actors, &parent, &key, &obj_id);
            if !parent_touched {
                objs.push(parent);
            }
        }

        let mut pending = self.objs;
        let mut props = HashMap::new();
        if let Some(PendingObjDiff::Assign(keys)) = pending.remove(&ObjectId::Root) {
            let root = op_set
                .objs
                .get(&ObjectId::Root)
                .expect("no root object");
            for key in &keys {
                let key_string = match key {
                    Key::Map(s) => s.clone(),
                    Key::Seq(_) => continue,
                };
                let mut opid_to_value = HashMap::new();
                for (opid, value) in root.conflicts(key) {
                    opid_to_value
                        .insert(opid.clone(), gen_value(value, op_set, &mut pending)?);
                }
                props.insert(key_string, opid_to_value);
            }
        }
        Ok(RootDiff { props })
    }

    /// Make sure `parent` re-emits the property holding `child`. For map
    /// parents it is enough to mark the key; for sequence parents the
    /// child's visible index is located by a seek over the finalized
    /// columns.
    fn link_child(
        &mut self,
        op_set: &OpSet,
        actors: &ActorMap,
        parent: &ObjectId,
        key: &Key,
        child: &ObjectId,
    ) {
        let parent_meta = match op_set.objs.get(parent) {
            Some(meta) => meta,
            None => return,
        };
        if parent_meta.is_seq() {
            let references_child = match self.objs.get(parent) {
                Some(PendingObjDiff::Seq(edits)) => edits.iter().any(|e| match e {
                    PendingEdit::Insert { value, .. } | PendingEdit::Update { value, .. } => {
                        *value == PendingValue::Child(child.clone())
                    }
                    PendingEdit::Remove { .. } => false,
                }),
                _ => false,
            };
            if references_child {
                return;
            }
            let elem = match key.to_opid() {
                Some(elem) => elem,
                None => return,
            };
            let index = match op_set.visible_index_of(parent, &elem, actors.actors()) {
                Some(index) => index,
                // the child is no longer visible, nothing to re-emit
                None => return,
            };
            let values: Vec<(OpId, ChildValue)> = parent_meta
                .conflicts(key)
                .map(|(id, v)| (id.clone(), v.clone()))
                .sorted_by(|a, b| a.0.cmp(&b.0))
                .collect();
            if !values.is_empty() {
                self.record_seq_updates(parent, index, values);
            }
        } else {
            self.record_set(parent, key.clone());
        }
    }
}

/// Drop trailing updates at the same index recorded by the same change;
/// the caller is about to re-emit the full conflict set for the property,
/// so stale values would otherwise be duplicated.
fn supersede_updates(edits: &mut Vec<PendingEdit>, index: u64, change: usize) {
    while let Some(PendingEdit::Update {
        index: last_index,
        change: last_change,
        ..
    }) = edits.last()
    {
        if *last_index == index && *last_change == change {
            edits.pop();
        } else {
            break;
        }
    }
}

fn gen_value(
    value: &ChildValue,
    op_set: &OpSet,
    pending: &mut HashMap<ObjectId, PendingObjDiff>,
) -> Result<Diff, BackendError> {
    match value {
        ChildValue::Primitive(v) => Ok(Diff::Value(v.clone())),
        ChildValue::Child(id, obj_type) => gen_obj_diff(id, *obj_type, op_set, pending),
    }
}

fn gen_obj_diff(
    obj_id: &ObjectId,
    obj_type: ObjType,
    op_set: &OpSet,
    pending: &mut HashMap<ObjectId, PendingObjDiff>,
) -> Result<Diff, BackendError> {
    match pending.remove(obj_id) {
        Some(PendingObjDiff::Assign(keys)) => {
            let meta = match op_set.objs.get(obj_id) {
                Some(meta) => meta,
                None => return Err(BackendError::MissingObject(obj_id.clone())),
            };
            let mut props = HashMap::new();
            for key in &keys {
                let key_string = match key {
                    Key::Map(s) => s.clone(),
                    Key::Seq(_) => continue,
                };
                let mut opid_to_value = HashMap::new();
                for (opid, value) in meta.conflicts(key) {
                    opid_to_value.insert(opid.clone(), gen_value(value, op_set, pending)?);
                }
                props.insert(key_string, opid_to_value);
            }
            Ok(Diff::Map(MapDiff {
                object_id: obj_id.clone(),
                obj_type,
                props,
            }))
        }
        Some(PendingObjDiff::Seq(pending_edits)) => {
            let mut edits = Edits::new();
            for edit in pending_edits {
                match edit {
                    PendingEdit::Insert {
                        index,
                        elem,
                        op_id,
                        value,
                        ..
                    } => {
                        let value = gen_pending_value(&value, op_set, pending)?;
                        edits.append_edit(DiffEdit::SingleElementInsert {
                            index,
                            elem_id: elem,
                            op_id,
                            value,
                        });
                    }
                    PendingEdit::Update {
                        index,
                        op_id,
                        value,
                        ..
                    } => {
                        let value = gen_pending_value(&value, op_set, pending)?;
                        edits.append_edit(DiffEdit::Update {
                            index,
                            op_id,
                            value,
                        });
                    }
                    PendingEdit::Remove { index } => {
                        edits.append_edit(DiffEdit::Remove { index, count: 1 });
                    }
                }
            }
            Ok(Diff::Seq(SeqDiff {
                object_id: obj_id.clone(),
                obj_type,
                edits: edits.into_vec(),
            }))
        }
        None => {
            // the object was not touched by this patch, an empty diff of
            // the right shape is enough for the frontend to recurse into
            Ok(match obj_type {
                ObjType::Map | ObjType::Table => Diff::Map(MapDiff {
                    object_id: obj_id.clone(),
                    obj_type,
                    props: HashMap::new(),
                }),
                ObjType::List | ObjType::Text => Diff::Seq(SeqDiff {
                    object_id: obj_id.clone(),
                    obj_type,
                    edits: Vec::new(),
                }),
            })
        }
    }
}

fn gen_pending_value(
    value: &PendingValue,
    op_set: &OpSet,
    pending: &mut HashMap<ObjectId, PendingObjDiff>,
) -> Result<Diff, BackendError> {
    match value {
        PendingValue::Primitive(v) => Ok(Diff::Value(v.clone())),
        PendingValue::Child(id) => {
            let obj_type = op_set
                .objs
                .get(id)
                .map(|o| o.obj_type)
                .ok_or_else(|| BackendError::MissingObject(id.clone()))?;
            gen_obj_diff(id, obj_type, op_set, pending)
        }
    }
}
