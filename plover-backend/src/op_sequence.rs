use std::ops::Range;

use plover_protocol as protocol;
use protocol::{Key, ObjectId, OpId, OpType};

use crate::object_store::{ObjState, ObjectStore};

/// One operation of an incoming change, with its op id resolved from the
/// change's startOp.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ChangeOp {
    pub id: OpId,
    pub action: OpType,
    pub obj: ObjectId,
    pub key: Key,
    pub insert: bool,
    pub pred: Vec<OpId>,
}

impl ChangeOp {
    pub fn operation_key(&self) -> Key {
        if self.insert {
            self.id.clone().into()
        } else {
            self.key.clone()
        }
    }
}

/// A run of consecutive ops that the merge can stream against one region
/// of the document without re-seeking.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OpSequence {
    pub obj: ObjectId,
    pub insert: bool,
    pub ops: Range<usize>,
}

/// Partition a change's ops into sequences of consecutive ops that touch
/// the same region: same object and either string keys in non-decreasing
/// order, non-insert list updates (optimistically grouped, the merge
/// validates the element order), or a chain of inserts where each op's key
/// is the previous op's id. As a side effect every make op registers its
/// object in the store so that later sequences of the same change can
/// address it.
pub(crate) fn group_related_ops(ops: &[ChangeOp], objs: &mut ObjectStore) -> Vec<OpSequence> {
    for op in ops {
        if let OpType::Make(obj_type) = op.action {
            objs.register(
                ObjectId::Id(op.id.clone()),
                ObjState::new(obj_type, Some((op.obj.clone(), op.operation_key()))),
            );
        }
    }

    let mut sequences: Vec<OpSequence> = Vec::new();
    for (i, op) in ops.iter().enumerate() {
        let related = sequences.last().and_then(|seq| {
            let prev = &ops[seq.ops.end - 1];
            if prev.obj != op.obj {
                return None;
            }
            match (prev.insert, op.insert) {
                (true, true) => {
                    // a chained insert continues the run
                    if op.key == prev.id.clone().into() {
                        Some(())
                    } else {
                        None
                    }
                }
                (false, false) => match (&prev.key, &op.key) {
                    (Key::Map(a), Key::Map(b)) if a <= b => Some(()),
                    (Key::Seq(_), Key::Seq(_)) => Some(()),
                    _ => None,
                },
                _ => None,
            }
        });
        match related {
            Some(()) => {
                let seq = sequences.last_mut().unwrap();
                seq.ops.end = i + 1;
            }
            None => sequences.push(OpSequence {
                obj: op.obj.clone(),
                insert: op.insert,
                ops: i..i + 1,
            }),
        }
    }
    sequences
}

#[cfg(test)]
mod tests {
    use std::convert::TryInto;

    use super::*;
    use protocol::ScalarValue;

    fn opid(s: &str) -> OpId {
        s.try_into().unwrap()
    }

    fn set(id: &str, obj: ObjectId, key: Key, insert: bool) -> ChangeOp {
        ChangeOp {
            id: opid(id),
            action: OpType::Set(ScalarValue::Int(1)),
            obj,
            key,
            insert,
            pred: Vec::new(),
        }
    }

    #[test]
    fn groups_ascending_map_keys() {
        let mut objs = ObjectStore::new();
        let ops = vec![
            set("1@aa", ObjectId::Root, "a".into(), false),
            set("2@aa", ObjectId::Root, "b".into(), false),
            set("3@aa", ObjectId::Root, "a".into(), false),
        ];
        let seqs = group_related_ops(&ops, &mut objs);
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0].ops, 0..2);
        assert_eq!(seqs[1].ops, 2..3);
    }

    #[test]
    fn groups_chained_inserts() {
        let mut objs = ObjectStore::new();
        let list = ObjectId::Id(opid("1@aa"));
        let ops = vec![
            set("2@aa", list.clone(), Key::head(), true),
            set("3@aa", list.clone(), opid("2@aa").into(), true),
            set("4@aa", list.clone(), opid("2@aa").into(), true),
        ];
        let seqs = group_related_ops(&ops, &mut objs);
        // the third op references 2@aa again rather than chaining off 3@aa,
        // so it starts a new sequence
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0].ops, 0..2);
    }

    #[test]
    fn make_registers_object() {
        let mut objs = ObjectStore::new();
        let ops = vec![ChangeOp {
            id: opid("1@aa"),
            action: OpType::Make(protocol::ObjType::List),
            obj: ObjectId::Root,
            key: "birds".into(),
            insert: false,
            pred: Vec::new(),
        }];
        group_related_ops(&ops, &mut objs);
        let state = objs.get(&ObjectId::Id(opid("1@aa"))).unwrap();
        assert!(state.is_seq());
        assert_eq!(
            state.parent,
            Some((ObjectId::Root, Key::Map("birds".into())))
        );
    }
}
