use std::convert::TryInto;

use maplit::hashmap;
use plover_backend::{Backend, Change};
use plover_protocol as amp;
use amp::{
    ActorId, Diff, DiffEdit, ElementId, Key, ObjType, ObjectId, Op, OpType, ScalarValue, SortedVec,
};

fn actor(s: &str) -> ActorId {
    s.try_into().unwrap()
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
fn test_get_patch_rebuilds_nested_state() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let list_id: ObjectId = a.op_id_at(1).into();
    let map_id: ObjectId = a.op_id_at(2).into();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![
            Op {
                action: OpType::Make(ObjType::List),
                obj: ObjectId::Root,
                key: "rows".into(),
                insert: false,
                pred: SortedVec::new(),
            },
            Op {
                action: OpType::Make(ObjType::Map),
                obj: list_id.clone(),
                key: Key::head(),
                insert: true,
                pred: SortedVec::new(),
            },
            Op {
                action: OpType::Set(ScalarValue::Str("chaffinch".into())),
                obj: map_id.clone(),
                key: "name".into(),
                insert: false,
                pred: SortedVec::new(),
            },
        ],
    );
    backend.apply_changes(vec![c1]).unwrap();

    let patch = backend.get_patch().unwrap();
    match &patch.diffs.props["rows"][&a.op_id_at(1)] {
        Diff::Seq(seq) => {
            assert_eq!(seq.edits.len(), 1);
            match &seq.edits[0] {
                DiffEdit::SingleElementInsert {
                    index,
                    elem_id,
                    value: Diff::Map(map),
                    ..
                } => {
                    assert_eq!(*index, 0);
                    assert_eq!(elem_id, &ElementId::Id(a.op_id_at(2)));
                    assert_eq!(
                        map.props,
                        hashmap! {
                            "name".into() => hashmap!{
                                a.op_id_at(3) => Diff::Value("chaffinch".into())
                            }
                        }
                    );
                }
                other => panic!("expected insert of a map, got {:?}", other),
            }
        }
        other => panic!("expected seq diff, got {:?}", other),
    }
}

#[test]
fn test_update_inside_list_element_links_through_parent() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let list_id: ObjectId = a.op_id_at(1).into();
    let map_id: ObjectId = a.op_id_at(2).into();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![
            Op {
                action: OpType::Make(ObjType::List),
                obj: ObjectId::Root,
                key: "rows".into(),
                insert: false,
                pred: SortedVec::new(),
            },
            Op {
                action: OpType::Make(ObjType::Map),
                obj: list_id.clone(),
                key: Key::head(),
                insert: true,
                pred: SortedVec::new(),
            },
            Op {
                action: OpType::Set(ScalarValue::Str("chaffinch".into())),
                obj: map_id.clone(),
                key: "name".into(),
                insert: false,
                pred: SortedVec::new(),
            },
        ],
    );
    backend.apply_changes(vec![c1.clone()]).unwrap();

    // only the nested map changes; the patch must still reach it through
    // an update edit on the list
    let c2 = change(
        &a,
        2,
        4,
        vec![c1.hash],
        vec![Op {
            action: OpType::Set(ScalarValue::Str("goldfinch".into())),
            obj: map_id.clone(),
            key: "name".into(),
            insert: false,
            pred: vec![a.op_id_at(3)].into(),
        }],
    );
    let patch = backend.apply_changes(vec![c2]).unwrap();
    match &patch.diffs.props["rows"][&a.op_id_at(1)] {
        Diff::Seq(seq) => {
            assert_eq!(seq.edits.len(), 1);
            match &seq.edits[0] {
                DiffEdit::Update {
                    index,
                    value: Diff::Map(map),
                    ..
                } => {
                    assert_eq!(*index, 0);
                    assert_eq!(
                        map.props,
                        hashmap! {
                            "name".into() => hashmap!{
                                a.op_id_at(4) => Diff::Value("goldfinch".into())
                            }
                        }
                    );
                }
                other => panic!("expected update carrying a map, got {:?}", other),
            }
        }
        other => panic!("expected seq diff, got {:?}", other),
    }
}

#[test]
fn test_get_patch_after_load_matches() {
    let a = actor("aaaa1111aaaa1111");
    let mut backend = Backend::init();
    let text_id: ObjectId = a.op_id_at(1).into();
    let c1 = change(
        &a,
        1,
        1,
        vec![],
        vec![
            Op {
                action: OpType::Make(ObjType::Text),
                obj: ObjectId::Root,
                key: "note".into(),
                insert: false,
                pred: SortedVec::new(),
            },
            Op {
                action: OpType::Set("h".into()),
                obj: text_id.clone(),
                key: Key::head(),
                insert: true,
                pred: SortedVec::new(),
            },
            Op {
                action: OpType::Set("i".into()),
                obj: text_id.clone(),
                key: a.op_id_at(2).into(),
                insert: true,
                pred: SortedVec::new(),
            },
        ],
    );
    backend.apply_changes(vec![c1]).unwrap();
    let loaded = Backend::load(backend.save().unwrap()).unwrap();
    assert_eq!(loaded.get_patch().unwrap(), backend.get_patch().unwrap());
    match &loaded.get_patch().unwrap().diffs.props["note"][&a.op_id_at(1)] {
        Diff::Seq(seq) => {
            assert_eq!(
                seq.edits,
                vec![DiffEdit::MultiElementInsert {
                    index: 0,
                    elem_id: ElementId::Id(a.op_id_at(2)),
                    values: vec!["h".into(), "i".into()],
                }]
            );
        }
        other => panic!("expected seq diff, got {:?}", other),
    }
}
