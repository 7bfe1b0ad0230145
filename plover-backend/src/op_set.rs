//! The columnar document store and the streaming merge that maintains it.
//!
//! The document is a set of parallel column buffers holding every
//! surviving operation, ordered by (object, key, op id). Applying a
//! change never mutates the buffers in place: each op sequence of the
//! change resets the column decoders, seeks to the sequence's region and
//! re-emits the document row by row into fresh encoders, splicing the
//! incoming ops in at their merge position and extending the succ lists
//! of the ops they overwrite. Only when a merge completes are the new
//! buffers swapped in, so a failed apply leaves the document untouched.

use std::{
    collections::{HashMap, HashSet},
    ops::Range,
    sync::Arc,
};

use plover_protocol as protocol;
use protocol::{ActorId, ElementId, Key, ObjectId, OpId, OpType, ScalarValue};
use tracing::instrument;

use crate::{
    actor_map::ActorMap,
    change::Change,
    columnar::{DocOp, DocOpEncoder, DocOpIterator},
    error::BackendError,
    object_store::{ChildValue, ObjectStore},
    op_sequence::{group_related_ops, ChangeOp, OpSequence},
    patches::IncrementalPatch,
};

#[derive(Debug, Clone)]
pub(crate) struct OpSet {
    ops_data: Arc<Vec<u8>>,
    ops_ranges: HashMap<u32, Range<usize>>,
    pub(crate) num_ops: usize,
    pub(crate) objs: ObjectStore,
}

impl OpSet {
    pub fn init() -> OpSet {
        OpSet {
            ops_data: Arc::new(Vec::new()),
            ops_ranges: HashMap::new(),
            num_ops: 0,
            objs: ObjectStore::new(),
        }
    }

    pub fn iter<'a>(&'a self, actors: &'a [ActorId]) -> DocOpIterator<'a> {
        DocOpIterator::new(&self.ops_data, actors, &self.ops_ranges)
    }

    pub fn columns(&self) -> (&[u8], &HashMap<u32, Range<usize>>) {
        (&self.ops_data, &self.ops_ranges)
    }

    /// Wrap the merged columns of a loaded document, counting its rows and
    /// rebuilding the object metadata in a single pass.
    pub fn from_document(
        ops_data: Vec<u8>,
        ops_ranges: HashMap<u32, Range<usize>>,
        actors: &[ActorId],
    ) -> Result<OpSet, BackendError> {
        let data = Arc::new(ops_data);
        let mut objs = ObjectStore::new();
        let mut num_ops = 0;
        {
            let mut iter = DocOpIterator::new(&data, actors, &ops_ranges);
            let mut property: Option<(ObjectId, Key)> = None;
            let mut rows: Vec<DocOp> = Vec::new();
            for row in &mut iter {
                num_ops += 1;
                if let OpType::Make(obj_type) = row.action {
                    objs.register(
                        ObjectId::Id(row.id.clone()),
                        crate::object_store::ObjState::new(
                            obj_type,
                            Some((row.obj.clone(), row.operation_key())),
                        ),
                    );
                }
                let next = (row.obj.clone(), row.operation_key());
                if property.as_ref() != Some(&next) {
                    if let Some((obj, key)) = property.take() {
                        let values = visible_values(&rows);
                        if !values.is_empty() {
                            objs.set_prop(&obj, key, values.into_iter().collect());
                        }
                        rows.clear();
                    }
                    property = Some(next);
                }
                rows.push(row);
            }
            if let Some((obj, key)) = property.take() {
                let values = visible_values(&rows);
                if !values.is_empty() {
                    objs.set_prop(&obj, key, values.into_iter().collect());
                }
            }
            if !iter.exhausted() {
                return Err(BackendError::ExcessOps);
            }
        }
        Ok(OpSet {
            ops_data: data,
            ops_ranges,
            num_ops,
            objs,
        })
    }

    /// Merge one change's operations into the document.
    #[instrument(level = "debug", skip(self, change, actors, patch))]
    pub fn apply_change(
        &mut self,
        change: &Change,
        actors: &mut ActorMap,
        patch: &mut IncrementalPatch,
    ) -> Result<(), BackendError> {
        // extend the actor table; if an actor lands in the middle of the
        // sort order the indices stored in the columns are stale and the
        // columns have to be rewritten first
        let old_actors = actors.to_vec();
        let mut shifted = false;
        for a in change.actors() {
            shifted |= actors.import(a);
        }
        if shifted && self.num_ops > 0 {
            self.rebuild_columns(&old_actors, actors)?;
        }

        let actor = change.actor_id().clone();
        let mut ops = Vec::new();
        for (i, op) in change.iter_ops().enumerate() {
            ops.push(ChangeOp {
                id: OpId(change.start_op + i as u64, actor.clone()),
                action: op.action,
                obj: op.obj,
                key: op.key,
                insert: op.insert,
                pred: op.pred.into_iter().collect(),
            });
        }

        let sequences = group_related_ops(&ops, &mut self.objs);
        for seq in &sequences {
            self.merge_sequence(&ops[seq.ops.clone()], seq, actors, patch)?;
        }
        Ok(())
    }

    /// Decode every row against the old actor table and re-encode it
    /// against the new one.
    fn rebuild_columns(
        &mut self,
        old_actors: &[ActorId],
        actors: &ActorMap,
    ) -> Result<(), BackendError> {
        let data = self.ops_data.clone();
        let ranges = self.ops_ranges.clone();
        let mut out = DocOpEncoder::new();
        let mut table = actors.to_vec();
        {
            let mut iter = DocOpIterator::new(&data, old_actors, &ranges);
            let mut count = 0;
            for row in &mut iter {
                out.append(&row, &mut table);
                count += 1;
            }
            if !iter.exhausted() || count != self.num_ops {
                return Err(BackendError::ExcessOps);
            }
        }
        let (new_data, new_ranges) = out.finish();
        self.ops_data = Arc::new(new_data);
        self.ops_ranges = new_ranges;
        Ok(())
    }

    fn merge_sequence(
        &mut self,
        ops: &[ChangeOp],
        seq: &OpSequence,
        actors: &ActorMap,
        patch: &mut IncrementalPatch,
    ) -> Result<(), BackendError> {
        let obj = seq.obj.clone();
        let obj_type = self
            .objs
            .get(&obj)
            .ok_or_else(|| BackendError::MissingObject(obj.clone()))?
            .obj_type;

        let data = self.ops_data.clone();
        let ranges = self.ops_ranges.clone();
        let num_ops = self.num_ops;
        let mut m = Merge {
            iter: DocOpIterator::new(&data, actors.actors(), &ranges),
            out: DocOpEncoder::new(),
            table: actors.to_vec(),
            lookahead: None,
            rows_read: 0,
            vis: 0,
            elem_rows: Vec::new(),
            passed: HashSet::new(),
        };

        // rows of objects that sort before the target are untouched
        while let Some(row) = m.peek() {
            if row.obj < obj {
                m.copy_row();
            } else {
                break;
            }
        }

        if obj_type.is_sequence() {
            if seq.insert {
                self.merge_seq_inserts(&mut m, &obj, ops, patch)?;
            } else {
                self.merge_seq_updates(&mut m, &obj, ops, patch)?;
            }
        } else {
            self.merge_map_updates(&mut m, &obj, ops, patch)?;
        }

        // everything after the merged region is copied wholesale
        if let Some(row) = m.lookahead.take() {
            m.out.append(&row, &mut m.table);
        }
        let remaining = num_ops - m.rows_read;
        m.out.copy_rows(&mut m.iter, remaining)?;
        if !m.iter.exhausted() {
            return Err(BackendError::ExcessOps);
        }

        let new_len = m.out.len();
        let (new_data, new_ranges) = m.out.finish();
        self.ops_data = Arc::new(new_data);
        self.ops_ranges = new_ranges;
        self.num_ops = new_len;
        Ok(())
    }

    fn merge_map_updates(
        &mut self,
        m: &mut Merge,
        obj: &ObjectId,
        ops: &[ChangeOp],
        patch: &mut IncrementalPatch,
    ) -> Result<(), BackendError> {
        let mut i = 0;
        while i < ops.len() {
            let key = ops[i].key.clone();
            let mut j = i;
            while j < ops.len() && ops[j].key == key {
                j += 1;
            }
            let batch = &ops[i..j];

            // copy rows of this object with keys before the batch key
            while let Some(row) = m.peek() {
                let earlier = row.obj == *obj
                    && match (&row.key, &key) {
                        (Key::Map(a), Key::Map(b)) => a < b,
                        _ => false,
                    };
                if earlier {
                    m.copy_row();
                } else {
                    break;
                }
            }
            let mut prop_rows = Vec::new();
            while let Some(row) = m.peek() {
                if row.obj == *obj && row.key == key {
                    prop_rows.push(m.take().unwrap());
                } else {
                    break;
                }
            }

            let outcome = merge_property(m, obj, &key, prop_rows, batch)?;
            self.objs
                .set_prop(obj, key.clone(), outcome.new_visible.into_iter().collect());
            patch.record_set(obj, key);
            i = j;
        }
        Ok(())
    }

    fn merge_seq_updates(
        &mut self,
        m: &mut Merge,
        obj: &ObjectId,
        ops: &[ChangeOp],
        patch: &mut IncrementalPatch,
    ) -> Result<(), BackendError> {
        let mut i = 0;
        while i < ops.len() {
            let elem = match &ops[i].key {
                Key::Seq(ElementId::Id(id)) => id.clone(),
                _ => {
                    return Err(BackendError::ReferenceNotFound {
                        object: obj.clone(),
                        elem: ElementId::Head,
                    })
                }
            };
            let elem_key: Key = elem.clone().into();
            let mut j = i;
            while j < ops.len() && ops[j].key == elem_key {
                j += 1;
            }
            let batch = &ops[i..j];

            // advance to the element's insertion op
            let mut found = false;
            while let Some(row) = m.peek() {
                if row.obj != *obj {
                    break;
                }
                if row.insert && row.id == elem {
                    found = true;
                    break;
                }
                m.copy_row_in_list();
            }
            if !found {
                return Err(if m.passed.contains(&elem) {
                    BackendError::OutOfOrderListAccess {
                        object: obj.clone(),
                    }
                } else {
                    BackendError::ReferenceNotFound {
                        object: obj.clone(),
                        elem: ElementId::Id(elem),
                    }
                });
            }
            m.close_elem();

            let mut prop_rows = vec![m.take().unwrap()];
            m.passed.insert(elem.clone());
            while let Some(row) = m.peek() {
                if row.obj == *obj && !row.insert && row.key == elem_key {
                    prop_rows.push(m.take().unwrap());
                } else {
                    break;
                }
            }

            let outcome = merge_property(m, obj, &elem_key, prop_rows, batch)?;
            self.objs.set_prop(
                obj,
                elem_key.clone(),
                outcome.new_visible.iter().cloned().collect(),
            );
            let was = !outcome.old_visible.is_empty();
            let now = !outcome.new_visible.is_empty();
            match (was, now) {
                (true, true) => {
                    patch.record_seq_updates(obj, m.vis, outcome.new_visible);
                    m.vis += 1;
                }
                (true, false) => {
                    patch.record_seq_remove(obj, m.vis);
                }
                (false, true) => {
                    // a previously deleted element has come back into view
                    patch.record_seq_insert(obj, m.vis, ElementId::Id(elem), outcome.new_visible);
                    m.vis += 1;
                }
                (false, false) => {}
            }
            i = j;
        }
        Ok(())
    }

    fn merge_seq_inserts(
        &mut self,
        m: &mut Merge,
        obj: &ObjectId,
        ops: &[ChangeOp],
        patch: &mut IncrementalPatch,
    ) -> Result<(), BackendError> {
        let new_id = ops[0].id.clone();
        match &ops[0].key {
            Key::Seq(ElementId::Head) => {}
            Key::Seq(ElementId::Id(reference)) => {
                // advance past the reference element and its updates
                let mut found = false;
                while let Some(row) = m.peek() {
                    if row.obj != *obj {
                        break;
                    }
                    if row.insert && row.id == *reference {
                        found = true;
                        m.copy_row_in_list();
                        while let Some(row2) = m.peek() {
                            if row2.obj == *obj && !row2.insert {
                                m.copy_row_in_list();
                            } else {
                                break;
                            }
                        }
                        break;
                    }
                    m.copy_row_in_list();
                }
                if !found {
                    return Err(if m.passed.contains(reference) {
                        BackendError::OutOfOrderListAccess {
                            object: obj.clone(),
                        }
                    } else {
                        BackendError::ReferenceNotFound {
                            object: obj.clone(),
                            elem: ElementId::Id(reference.clone()),
                        }
                    });
                }
            }
            Key::Map(_) => {
                return Err(BackendError::ReferenceNotFound {
                    object: obj.clone(),
                    elem: ElementId::Head,
                })
            }
        }

        // concurrent inserts after the same reference: greater op ids sit
        // closer to the reference, so skip over them
        while let Some(row) = m.peek() {
            if row.obj == *obj && row.insert && row.id > new_id {
                m.copy_row_in_list();
                while let Some(row2) = m.peek() {
                    if row2.obj == *obj && !row2.insert {
                        m.copy_row_in_list();
                    } else {
                        break;
                    }
                }
            } else {
                break;
            }
        }
        if let Some(row) = m.peek() {
            if row.obj == *obj && row.id == new_id {
                return Err(BackendError::DuplicateOperationId(new_id));
            }
        }
        m.close_elem();

        for c in ops {
            if let OpType::Del = c.action {
                // inserting an element and deleting it in the same op run
                // leaves nothing to record
                continue;
            }
            let row = DocOp {
                id: c.id.clone(),
                obj: obj.clone(),
                key: c.key.clone(),
                insert: true,
                action: c.action.clone(),
                succ: Vec::new(),
            };
            m.emit(&row);
            m.passed.insert(c.id.clone());
            let value = match &c.action {
                OpType::Make(t) => ChildValue::Child(ObjectId::Id(c.id.clone()), *t),
                OpType::Set(v) => ChildValue::Primitive(v.clone()),
                OpType::Inc(_) | OpType::Del => continue,
            };
            let elem_key: Key = c.id.clone().into();
            self.objs.set_prop(
                obj,
                elem_key,
                Some((c.id.clone(), value.clone())).into_iter().collect(),
            );
            patch.record_seq_insert(
                obj,
                m.vis,
                ElementId::Id(c.id.clone()),
                vec![(c.id.clone(), value)],
            );
            m.vis += 1;
        }
        Ok(())
    }

    /// The visible index of `elem` within `obj` on the current columns,
    /// or None if the element is not visible.
    pub(crate) fn visible_index_of(
        &self,
        obj: &ObjectId,
        elem: &OpId,
        actors: &[ActorId],
    ) -> Option<u64> {
        let mut index = 0;
        let mut current: Option<OpId> = None;
        let mut rows: Vec<DocOp> = Vec::new();
        for row in self.iter(actors) {
            if row.obj != *obj {
                if current.is_some() {
                    break;
                }
                continue;
            }
            if row.insert {
                if let Some(prev) = current.take() {
                    if !visible_values(&rows).is_empty() {
                        if prev == *elem {
                            return Some(index);
                        }
                        index += 1;
                    } else if prev == *elem {
                        return None;
                    }
                    rows.clear();
                }
                current = Some(row.id.clone());
            }
            rows.push(row);
        }
        if let Some(prev) = current {
            if prev == *elem && !visible_values(&rows).is_empty() {
                return Some(index);
            }
        }
        None
    }
}

struct PropertyOutcome {
    old_visible: Vec<(OpId, ChildValue)>,
    new_visible: Vec<(OpId, ChildValue)>,
}

/// Merge the ops a change contributes to one property with the document
/// rows of that property, emitting the result in ascending op id order.
/// Deletions are never emitted; they only extend succ lists. Every pred
/// of every incoming op must match a document row or an earlier op of the
/// same batch.
fn merge_property(
    m: &mut Merge,
    obj: &ObjectId,
    key: &Key,
    mut prop_rows: Vec<DocOp>,
    batch: &[ChangeOp],
) -> Result<PropertyOutcome, BackendError> {
    tracing::debug!(?obj, ?key, ops = batch.len(), rows = prop_rows.len(), "merging property");
    for c in batch {
        if prop_rows.iter().any(|r| r.id == c.id) {
            return Err(BackendError::DuplicateOperationId(c.id.clone()));
        }
    }
    let old_visible = visible_values(&prop_rows);

    let mut batch_succ: HashMap<OpId, Vec<OpId>> = HashMap::new();
    for c in batch {
        for p in &c.pred {
            if let Some(row) = prop_rows.iter_mut().find(|r| r.id == *p) {
                insert_sorted(&mut row.succ, c.id.clone());
            } else if batch
                .iter()
                .any(|b| b.id == *p && !matches!(b.action, OpType::Del) && b.id < c.id)
            {
                insert_sorted(batch_succ.entry(p.clone()).or_default(), c.id.clone());
            } else {
                return Err(BackendError::UnmatchedPred(p.clone()));
            }
        }
    }

    let batch_rows: Vec<DocOp> = batch
        .iter()
        .filter(|c| !matches!(c.action, OpType::Del))
        .map(|c| DocOp {
            id: c.id.clone(),
            obj: obj.clone(),
            key: c.key.clone(),
            insert: c.insert,
            action: c.action.clone(),
            succ: batch_succ.remove(&c.id).unwrap_or_default(),
        })
        .collect();

    let mut merged: Vec<DocOp> = Vec::with_capacity(prop_rows.len() + batch_rows.len());
    let mut a = prop_rows.into_iter().peekable();
    let mut b = batch_rows.into_iter().peekable();
    loop {
        match (a.peek(), b.peek()) {
            (Some(x), Some(y)) => {
                if x.id < y.id {
                    merged.push(a.next().unwrap());
                } else {
                    merged.push(b.next().unwrap());
                }
            }
            (Some(_), None) => merged.push(a.next().unwrap()),
            (None, Some(_)) => merged.push(b.next().unwrap()),
            (None, None) => break,
        }
    }
    for row in &merged {
        m.emit(row);
    }

    let new_visible = visible_values(&merged);
    Ok(PropertyOutcome {
        old_visible,
        new_visible,
    })
}

/// The visible assignments among the rows of one property. An op is
/// visible iff its succ list is empty; the one exception is a counter,
/// which stays visible while all of its successors are increments, with
/// the increment chain folded into its value.
pub(crate) fn visible_values(rows: &[DocOp]) -> Vec<(OpId, ChildValue)> {
    let mut out = Vec::new();
    for r in rows {
        if r.is_inc() {
            continue;
        }
        let visible = if r.succ.is_empty() {
            true
        } else if let OpType::Set(ScalarValue::Counter(_)) = r.action {
            let inc_ids: HashSet<&OpId> = rows.iter().filter(|x| x.is_inc()).map(|x| &x.id).collect();
            r.succ.iter().all(|s| inc_ids.contains(s))
        } else {
            false
        };
        if !visible {
            continue;
        }
        let value = match &r.action {
            OpType::Make(t) => ChildValue::Child(ObjectId::Id(r.id.clone()), *t),
            OpType::Set(ScalarValue::Counter(base)) => {
                let mut pending: Vec<OpId> = r.succ.clone();
                let mut folded: HashSet<OpId> = HashSet::new();
                let mut sum = *base;
                while let Some(id) = pending.pop() {
                    if !folded.insert(id.clone()) {
                        continue;
                    }
                    if let Some(inc) = rows.iter().find(|x| x.id == id && x.is_inc()) {
                        if let OpType::Inc(delta) = inc.action {
                            sum += delta;
                        }
                        pending.extend(inc.succ.iter().cloned());
                    }
                }
                ChildValue::Primitive(ScalarValue::Counter(sum))
            }
            OpType::Set(v) => ChildValue::Primitive(v.clone()),
            _ => continue,
        };
        out.push((r.id.clone(), value));
    }
    out
}

pub(crate) fn insert_sorted(ids: &mut Vec<OpId>, id: OpId) {
    let idx = ids.binary_search(&id).unwrap_or_else(|e| e);
    ids.insert(idx, id);
}

/// The streaming state of one sequence merge: a cursor over the current
/// columns, the encoders building the new ones, and the bookkeeping that
/// turns row positions into visible list indices.
struct Merge<'a> {
    iter: DocOpIterator<'a>,
    out: DocOpEncoder,
    table: Vec<ActorId>,
    lookahead: Option<DocOp>,
    rows_read: usize,
    vis: u64,
    elem_rows: Vec<DocOp>,
    passed: HashSet<OpId>,
}

impl<'a> Merge<'a> {
    fn peek(&mut self) -> Option<&DocOp> {
        if self.lookahead.is_none() {
            if let Some(row) = self.iter.next() {
                self.rows_read += 1;
                self.lookahead = Some(row);
            }
        }
        self.lookahead.as_ref()
    }

    fn take(&mut self) -> Option<DocOp> {
        self.peek();
        self.lookahead.take()
    }

    fn emit(&mut self, row: &DocOp) {
        self.out.append(row, &mut self.table);
    }

    /// Copy the lookahead row through unchanged.
    fn copy_row(&mut self) {
        if let Some(row) = self.take() {
            self.out.append(&row, &mut self.table);
        }
    }

    /// Copy the lookahead row through unchanged while inside the target
    /// list, keeping count of the visible elements that precede the merge
    /// point.
    fn copy_row_in_list(&mut self) {
        if let Some(row) = self.take() {
            if row.insert {
                self.close_elem();
                self.passed.insert(row.id.clone());
            }
            self.elem_rows.push(row.clone());
            self.out.append(&row, &mut self.table);
        }
    }

    /// Account the element whose rows have been streaming through, if any.
    fn close_elem(&mut self) {
        if !self.elem_rows.is_empty() {
            if !visible_values(&self.elem_rows).is_empty() {
                self.vis += 1;
            }
            self.elem_rows.clear();
        }
    }
}
