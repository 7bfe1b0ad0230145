use std::collections::HashMap;

use plover_protocol as protocol;
use protocol::{Diff, DiffEdit, ElementId, Key, MapDiff, ObjType, ObjectId, OpId, RootDiff, SeqDiff};

use super::Edits;
use crate::{
    actor_map::ActorMap,
    error::BackendError,
    object_store::ChildValue,
    op_set::{visible_values, OpSet},
};

#[derive(Default)]
struct Draft {
    /// Visible assignments per property, in document (and therefore list)
    /// order.
    props: Vec<(Key, Vec<(OpId, ChildValue)>)>,
}

/// Build a diff describing the entire document, as if it were being sent
/// to a fresh frontend. One pass over the columns collects the visible
/// assignments of every object; the objects are then assembled into a
/// tree from the root. This works in a single pass because an op always
/// has a higher counter than the op that created its object, so parent
/// regions precede child regions in the columns.
pub(crate) fn generate_from_scratch_diff(
    op_set: &OpSet,
    actors: &ActorMap,
) -> Result<RootDiff, BackendError> {
    let mut drafts: HashMap<ObjectId, Draft> = HashMap::new();
    {
        let mut property: Option<(ObjectId, Key)> = None;
        let mut rows = Vec::new();
        for row in op_set.iter(actors.actors()) {
            let next = (row.obj.clone(), row.operation_key());
            if property.as_ref() != Some(&next) {
                if let Some((obj, key)) = property.take() {
                    let values = visible_values(&rows);
                    if !values.is_empty() {
                        drafts.entry(obj).or_default().props.push((key, values));
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
                drafts.entry(obj).or_default().props.push((key, values));
            }
        }
    }

    let mut props = HashMap::new();
    if let Some(root) = drafts.remove(&ObjectId::Root) {
        for (key, values) in root.props {
            let key_string = match key {
                Key::Map(s) => s,
                Key::Seq(_) => continue,
            };
            let mut opid_to_value = HashMap::new();
            for (opid, value) in &values {
                opid_to_value.insert(opid.clone(), construct_value(value, &mut drafts)?);
            }
            props.insert(key_string, opid_to_value);
        }
    }
    Ok(RootDiff { props })
}

fn construct_value(
    value: &ChildValue,
    drafts: &mut HashMap<ObjectId, Draft>,
) -> Result<Diff, BackendError> {
    match value {
        ChildValue::Primitive(v) => Ok(Diff::Value(v.clone())),
        ChildValue::Child(id, obj_type) => construct_object(id, *obj_type, drafts),
    }
}

fn construct_object(
    obj_id: &ObjectId,
    obj_type: ObjType,
    drafts: &mut HashMap<ObjectId, Draft>,
) -> Result<Diff, BackendError> {
    let draft = drafts.remove(obj_id).unwrap_or_default();
    match obj_type {
        ObjType::Map | ObjType::Table => {
            let mut props = HashMap::new();
            for (key, values) in draft.props {
                let key_string = match key {
                    Key::Map(s) => s,
                    Key::Seq(_) => continue,
                };
                let mut opid_to_value = HashMap::new();
                for (opid, value) in &values {
                    opid_to_value.insert(opid.clone(), construct_value(value, drafts)?);
                }
                props.insert(key_string, opid_to_value);
            }
            Ok(Diff::Map(MapDiff {
                object_id: obj_id.clone(),
                obj_type,
                props,
            }))
        }
        ObjType::List | ObjType::Text => {
            let mut edits = Edits::new();
            let mut index: u64 = 0;
            for (key, values) in draft.props {
                let elem = match key.to_opid() {
                    Some(elem) => elem,
                    None => continue,
                };
                let mut first = true;
                for (opid, value) in &values {
                    let value = construct_value(value, drafts)?;
                    if first {
                        edits.append_edit(DiffEdit::SingleElementInsert {
                            index,
                            elem_id: ElementId::Id(elem.clone()),
                            op_id: opid.clone(),
                            value,
                        });
                        first = false;
                    } else {
                        edits.append_edit(DiffEdit::Update {
                            index,
                            op_id: opid.clone(),
                            value,
                        });
                    }
                }
                index += 1;
            }
            Ok(Diff::Seq(SeqDiff {
                object_id: obj_id.clone(),
                obj_type,
                edits: edits.into_vec(),
            }))
        }
    }
}
