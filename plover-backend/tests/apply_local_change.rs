use std::convert::TryInto;

use maplit::hashmap;
use plover_backend::{Backend, BackendError};
use plover_protocol as amp;
use amp::{ActorId, Diff, ObjectId, Op, OpType, SortedVec};

fn actor(s: &str) -> ActorId {
    s.try_into().unwrap()
}

fn local_change(actor_id: &ActorId, seq: u64, start_op: u64, ops: Vec<Op>) -> amp::Change {
    amp::Change {
        actor_id: actor_id.clone(),
        seq,
        start_op,
        time: 0,
        message: None,
        hash: None,
        deps: vec![],
        operations: ops,
    }
}

#[test]
fn test_apply_local_change_returns_actor_and_seq() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let (patch, bin) = backend
        .apply_local_change(local_change(
            &a,
            1,
            1,
            vec![Op {
                action: OpType::Set("magpie".into()),
                obj: ObjectId::Root,
                key: "bird".into(),
                insert: false,
                pred: SortedVec::new(),
            }],
        ))
        .unwrap();

    assert_eq!(patch.actor, Some(a.clone()));
    assert_eq!(patch.seq, Some(1));
    assert_eq!(patch.max_op, 1);
    assert_eq!(patch.clock, hashmap! {a.clone() => 1});
    // the patch's deps exclude the change that produced it
    assert_eq!(patch.deps, vec![]);
    assert_eq!(backend.get_heads(), vec![bin.hash]);
    assert_eq!(
        patch.diffs.props,
        hashmap! {
            "bird".into() => hashmap!{
                a.op_id_at(1) => Diff::Value("magpie".into())
            }
        }
    );
}

#[test]
fn test_apply_local_change_adds_dep_on_previous() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let (_, bin1) = backend
        .apply_local_change(local_change(
            &a,
            1,
            1,
            vec![Op {
                action: OpType::Set("magpie".into()),
                obj: ObjectId::Root,
                key: "bird".into(),
                insert: false,
                pred: SortedVec::new(),
            }],
        ))
        .unwrap();
    let (_, bin2) = backend
        .apply_local_change(local_change(
            &a,
            2,
            2,
            vec![Op {
                action: OpType::Set("wren".into()),
                obj: ObjectId::Root,
                key: "bird".into(),
                insert: false,
                pred: vec![a.op_id_at(1)].into(),
            }],
        ))
        .unwrap();
    assert_eq!(bin2.deps, vec![bin1.hash]);
    assert_eq!(backend.get_heads(), vec![bin2.hash]);
}

#[test]
fn test_apply_local_change_rejects_replayed_seq() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    backend
        .apply_local_change(local_change(
            &a,
            1,
            1,
            vec![Op {
                action: OpType::Set("magpie".into()),
                obj: ObjectId::Root,
                key: "bird".into(),
                insert: false,
                pred: SortedVec::new(),
            }],
        ))
        .unwrap();
    let err = backend
        .apply_local_change(local_change(
            &a,
            1,
            2,
            vec![Op {
                action: OpType::Set("wren".into()),
                obj: ObjectId::Root,
                key: "bird".into(),
                insert: false,
                pred: vec![a.op_id_at(1)].into(),
            }],
        ))
        .unwrap_err();
    assert!(matches!(err, BackendError::DuplicateChange(_)));
}
