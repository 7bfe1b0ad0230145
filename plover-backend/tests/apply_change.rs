use std::convert::TryInto;

use maplit::hashmap;
use plover_backend::{Backend, BackendError, Change};
use plover_protocol as amp;
use amp::{
    ActorId, Diff, DiffEdit, ElementId, Key, ObjType, ObjectId, Op, OpId, OpType, ScalarValue,
    SortedVec,
};

fn actor(s: &str) -> ActorId {
    s.try_into().unwrap()
}

fn set(obj: ObjectId, key: Key, value: ScalarValue, pred: Vec<OpId>) -> Op {
    Op {
        action: OpType::Set(value),
        obj,
        key,
        insert: false,
        pred: pred.into(),
    }
}

fn insert(obj: ObjectId, key: Key, value: ScalarValue) -> Op {
    Op {
        action: OpType::Set(value),
        obj,
        key,
        insert: true,
        pred: SortedVec::new(),
    }
}

fn change(actor_id: &ActorId, seq: u64, start_op: u64, deps: Vec<amp::ChangeHash>, ops: Vec<Op>) -> Change {
    amp::Change {
        actor_id: actor_id.clone(),
        seq,
        start_op,
        time: 0,
        message: None,
        hash: None,
        deps,
        operations: ops,
    }
    .into()
}

#[test]
fn test_map_set() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![set(ObjectId::Root, "bird".into(), "magpie".into(), vec![])],
    );
    let patch = backend.apply_changes(vec![c1.clone()]).unwrap();

    assert_eq!(
        patch.diffs.props,
        hashmap! {
            "bird".into() => hashmap!{
                a.op_id_at(1) => Diff::Value("magpie".into())
            }
        }
    );
    assert_eq!(patch.clock, hashmap! {a.clone() => 1});
    assert_eq!(backend.get_heads(), vec![c1.hash]);
    assert_eq!(patch.deps, vec![c1.hash]);
    assert_eq!(patch.max_op, 1);
}

#[test]
fn test_map_overwrite() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![set(ObjectId::Root, "bird".into(), "magpie".into(), vec![])],
    );
    backend.apply_changes(vec![c1.clone()]).unwrap();
    let c2 = change(
        &a,
        2,
        2,
        vec![c1.hash],
        vec![set(
            ObjectId::Root,
            "bird".into(),
            "blackbird".into(),
            vec![a.op_id_at(1)],
        )],
    );
    let patch = backend.apply_changes(vec![c2.clone()]).unwrap();

    assert_eq!(
        patch.diffs.props,
        hashmap! {
            "bird".into() => hashmap!{
                a.op_id_at(2) => Diff::Value("blackbird".into())
            }
        }
    );
    assert_eq!(backend.get_heads(), vec![c2.hash]);
    assert_eq!(patch.clock, hashmap! {a.clone() => 2});
}

#[test]
fn test_concurrent_map_conflict() {
    let a = actor("aaaa1111aaaa1111");
    let b = actor("bbbb2222bbbb2222");
    let mut backend = Backend::init();
    let ca = change(
        &a,
        1,
        1,
        vec![],
        vec![set(ObjectId::Root, "bird".into(), "magpie".into(), vec![])],
    );
    let cb = change(
        &b,
        1,
        1,
        vec![],
        vec![set(ObjectId::Root, "bird".into(), "blackbird".into(), vec![])],
    );
    let patch = backend
        .apply_changes(vec![ca.clone(), cb.clone()])
        .unwrap();

    assert_eq!(
        patch.diffs.props,
        hashmap! {
            "bird".into() => hashmap!{
                a.op_id_at(1) => Diff::Value("magpie".into()),
                b.op_id_at(1) => Diff::Value("blackbird".into()),
            }
        }
    );
    let mut expected_heads = vec![ca.hash, cb.hash];
    expected_heads.sort();
    assert_eq!(backend.get_heads(), expected_heads);
    assert_eq!(patch.clock, hashmap! {a.clone() => 1, b.clone() => 1});
}

#[test_env_log::test]
fn test_list_insert_and_delete_in_one_change() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let list_id: ObjectId = a.op_id_at(1).into();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![
            Op {
                action: OpType::Make(ObjType::List),
                obj: ObjectId::Root,
                key: "birds".into(),
                insert: false,
                pred: SortedVec::new(),
            },
            insert(list_id.clone(), Key::head(), "chaffinch".into()),
            Op {
                action: OpType::Del,
                obj: list_id.clone(),
                key: a.op_id_at(2).into(),
                insert: false,
                pred: vec![a.op_id_at(2)].into(),
            },
        ],
    );
    let patch = backend.apply_changes(vec![c1]).unwrap();

    let list_diff = &patch.diffs.props["birds"][&a.op_id_at(1)];
    match list_diff {
        Diff::Seq(seq) => {
            assert_eq!(seq.obj_type, ObjType::List);
            assert_eq!(
                seq.edits,
                vec![
                    DiffEdit::SingleElementInsert {
                        index: 0,
                        elem_id: ElementId::Id(a.op_id_at(2)),
                        op_id: a.op_id_at(2),
                        value: Diff::Value("chaffinch".into()),
                    },
                    DiffEdit::Remove { index: 0, count: 1 },
                ]
            );
        }
        other => panic!("expected seq diff, got {:?}", other),
    }

    // the list is empty afterwards
    let from_scratch = backend.get_patch().unwrap();
    match &from_scratch.diffs.props["birds"][&a.op_id_at(1)] {
        Diff::Seq(seq) => assert_eq!(seq.edits, vec![]),
        other => panic!("expected seq diff, got {:?}", other),
    }
}

#[test]
fn test_counter_increment() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![set(
            ObjectId::Root,
            "counter".into(),
            ScalarValue::Counter(1),
            vec![],
        )],
    );
    backend.apply_changes(vec![c1.clone()]).unwrap();
    let c2 = change(
        &a,
        2,
        2,
        vec![c1.hash],
        vec![Op {
            action: OpType::Inc(2),
            obj: ObjectId::Root,
            key: "counter".into(),
            insert: false,
            pred: vec![a.op_id_at(1)].into(),
        }],
    );
    let patch = backend.apply_changes(vec![c2]).unwrap();

    assert_eq!(
        patch.diffs.props,
        hashmap! {
            "counter".into() => hashmap!{
                a.op_id_at(1) => Diff::Value(ScalarValue::Counter(3))
            }
        }
    );

    // the materialized document agrees
    let from_scratch = backend.get_patch().unwrap();
    assert_eq!(
        from_scratch.diffs.props["counter"][&a.op_id_at(1)],
        Diff::Value(ScalarValue::Counter(3))
    );
}

#[test]
fn test_concurrent_insert_ordering() {
    let a = actor("aaaa1111aaaa1111");
    let b = actor("bbbb2222bbbb2222");
    let list_id: ObjectId = a.op_id_at(1).into();

    let base = change(
        &a,
        1,
        1,
        vec![],
        vec![Op {
            action: OpType::Make(ObjType::List),
            obj: ObjectId::Root,
            key: "letters".into(),
            insert: false,
            pred: SortedVec::new(),
        }],
    );
    let ca = change(
        &a,
        2,
        2,
        vec![base.hash],
        vec![insert(list_id.clone(), Key::head(), "x".into())],
    );
    let cb = change(
        &b,
        1,
        2,
        vec![base.hash],
        vec![insert(list_id.clone(), Key::head(), "y".into())],
    );

    // two backends ingest the concurrent inserts in opposite orders
    let mut backend1 = Backend::init();
    backend1
        .apply_changes(vec![base.clone(), ca.clone(), cb.clone()])
        .unwrap();
    let mut backend2 = Backend::init();
    backend2
        .apply_changes(vec![base.clone(), cb.clone(), ca.clone()])
        .unwrap();

    for backend in &[&backend1, &backend2] {
        let patch = backend.get_patch().unwrap();
        match &patch.diffs.props["letters"][&a.op_id_at(1)] {
            Diff::Seq(seq) => {
                // 2@b sorts after 2@a, so b's element sits closer to the head
                assert_eq!(
                    seq.edits,
                    vec![
                        DiffEdit::SingleElementInsert {
                            index: 0,
                            elem_id: ElementId::Id(b.op_id_at(2)),
                            op_id: b.op_id_at(2),
                            value: Diff::Value("y".into()),
                        },
                        DiffEdit::SingleElementInsert {
                            index: 1,
                            elem_id: ElementId::Id(a.op_id_at(2)),
                            op_id: a.op_id_at(2),
                            value: Diff::Value("x".into()),
                        },
                    ]
                );
            }
            other => panic!("expected seq diff, got {:?}", other),
        }
    }
    assert_eq!(backend1.get_heads(), backend2.get_heads());
}

#[test]
fn test_chained_inserts_fuse_to_multi_insert() {
    let a = actor("aaaa1111aaaa1111");
    let list_id: ObjectId = a.op_id_at(1).into();
    let mut backend = Backend::init();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![
            Op {
                action: OpType::Make(ObjType::Text),
                obj: ObjectId::Root,
                key: "text".into(),
                insert: false,
                pred: SortedVec::new(),
            },
            insert(list_id.clone(), Key::head(), "h".into()),
            insert(list_id.clone(), a.op_id_at(2).into(), "e".into()),
            insert(list_id.clone(), a.op_id_at(3).into(), "y".into()),
        ],
    );
    let patch = backend.apply_changes(vec![c1]).unwrap();
    match &patch.diffs.props["text"][&a.op_id_at(1)] {
        Diff::Seq(seq) => {
            assert_eq!(seq.obj_type, ObjType::Text);
            assert_eq!(
                seq.edits,
                vec![DiffEdit::MultiElementInsert {
                    index: 0,
                    elem_id: ElementId::Id(a.op_id_at(2)),
                    values: vec!["h".into(), "e".into(), "y".into()],
                }]
            );
        }
        other => panic!("expected seq diff, got {:?}", other),
    }
}

#[test]
fn test_missing_dependency_is_rejected() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![set(ObjectId::Root, "bird".into(), "magpie".into(), vec![])],
    );
    let c2 = change(
        &a,
        2,
        2,
        vec![c1.hash],
        vec![set(
            ObjectId::Root,
            "bird".into(),
            "blackbird".into(),
            vec![a.op_id_at(1)],
        )],
    );
    let err = backend.apply_changes(vec![c2]).unwrap_err();
    match err {
        BackendError::MissingDependency(hash) => assert_eq!(hash, c1.hash),
        other => panic!("expected missing dependency, got {:?}", other),
    }
    // the failed call left no trace
    assert_eq!(backend.get_heads(), vec![]);
    assert_eq!(backend.get_changes(&[]).len(), 0);
}

#[test]
fn test_seq_skip_is_rejected() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![set(ObjectId::Root, "bird".into(), "magpie".into(), vec![])],
    );
    let mut c3 = amp::Change {
        actor_id: a.clone(),
        seq: 3,
        start_op: 2,
        time: 0,
        message: None,
        hash: None,
        deps: vec![c1.hash],
        operations: vec![set(
            ObjectId::Root,
            "bird".into(),
            "wren".into(),
            vec![a.op_id_at(1)],
        )],
    };
    c3.deps = vec![c1.hash];
    let c3: Change = c3.into();
    backend.apply_changes(vec![c1]).unwrap();
    let err = backend.apply_changes(vec![c3]).unwrap_err();
    match err {
        BackendError::BadSequence {
            expected, got, ..
        } => {
            assert_eq!(expected, 2);
            assert_eq!(got, 3);
        }
        other => panic!("expected bad sequence, got {:?}", other),
    }
}

#[test]
fn test_unmatched_pred_is_rejected() {
    let a = actor("aaaa1111aaaa1111");
    let b = actor("bbbb2222bbbb2222");
    let mut backend = Backend::init();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![set(ObjectId::Root, "bird".into(), "magpie".into(), vec![])],
    );
    backend.apply_changes(vec![c1.clone()]).unwrap();
    let c2 = change(
        &b,
        1,
        5,
        vec![c1.hash],
        vec![set(
            ObjectId::Root,
            "bird".into(),
            "wren".into(),
            vec![b.op_id_at(3)],
        )],
    );
    let err = backend.apply_changes(vec![c2]).unwrap_err();
    assert!(matches!(err, BackendError::UnmatchedPred(_)));
}

#[test]
fn test_reference_not_found() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let list_id: ObjectId = a.op_id_at(1).into();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![Op {
            action: OpType::Make(ObjType::List),
            obj: ObjectId::Root,
            key: "birds".into(),
            insert: false,
            pred: SortedVec::new(),
        }],
    );
    backend.apply_changes(vec![c1.clone()]).unwrap();
    let c2 = change(
        &a,
        2,
        2,
        vec![c1.hash],
        vec![Op {
            action: OpType::Set("oriole".into()),
            obj: list_id,
            key: a.op_id_at(99).into(),
            insert: true,
            pred: SortedVec::new(),
        }],
    );
    let err = backend.apply_changes(vec![c2]).unwrap_err();
    assert!(matches!(err, BackendError::ReferenceNotFound { .. }));
}

#[test]
fn test_duplicate_change_is_ignored() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![set(ObjectId::Root, "bird".into(), "magpie".into(), vec![])],
    );
    backend.apply_changes(vec![c1.clone()]).unwrap();
    let patch = backend.apply_changes(vec![c1.clone()]).unwrap();
    assert_eq!(patch.diffs.props.len(), 0);
    assert_eq!(backend.get_changes(&[]).len(), 1);
}

#[test]
fn test_nested_map_update_links_to_root() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let map_id: ObjectId = a.op_id_at(1).into();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![
            Op {
                action: OpType::Make(ObjType::Map),
                obj: ObjectId::Root,
                key: "outer".into(),
                insert: false,
                pred: SortedVec::new(),
            },
            set(map_id.clone(), "inner".into(), "a".into(), vec![]),
        ],
    );
    backend.apply_changes(vec![c1.clone()]).unwrap();
    // a later change touching only the nested map still produces a patch
    // rooted at the document root
    let c2 = change(
        &a,
        2,
        3,
        vec![c1.hash],
        vec![set(
            map_id.clone(),
            "inner".into(),
            "b".into(),
            vec![a.op_id_at(2)],
        )],
    );
    let patch = backend.apply_changes(vec![c2]).unwrap();
    match &patch.diffs.props["outer"][&a.op_id_at(1)] {
        Diff::Map(map) => {
            assert_eq!(map.obj_type, ObjType::Map);
            assert_eq!(
                map.props,
                hashmap! {
                    "inner".into() => hashmap!{
                        a.op_id_at(3) => Diff::Value("b".into())
                    }
                }
            );
        }
        other => panic!("expected map diff, got {:?}", other),
    }
}

#[test]
fn test_map_delete() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![set(ObjectId::Root, "bird".into(), "magpie".into(), vec![])],
    );
    backend.apply_changes(vec![c1.clone()]).unwrap();
    let c2 = change(
        &a,
        2,
        2,
        vec![c1.hash],
        vec![Op {
            action: OpType::Del,
            obj: ObjectId::Root,
            key: "bird".into(),
            insert: false,
            pred: vec![a.op_id_at(1)].into(),
        }],
    );
    let patch = backend.apply_changes(vec![c2]).unwrap();
    // a deletion shows up as an empty conflict set for the key
    assert_eq!(
        patch.diffs.props,
        hashmap! { "bird".into() => hashmap!{} }
    );
    let from_scratch = backend.get_patch().unwrap();
    assert_eq!(from_scratch.diffs.props.len(), 0);
}
