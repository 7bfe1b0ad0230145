use std::convert::TryInto;

use plover_backend::{Backend, Change};
use plover_protocol as amp;
use amp::{ActorId, Key, ObjType, ObjectId, Op, OpType, ScalarValue, SortedVec};

fn actor(s: &str) -> ActorId {
    s.try_into().unwrap()
}

fn build_backend() -> (Backend, Vec<Change>) {
    let a = actor("aaaa1111aaaa1111");
    let b = actor("bbbb2222bbbb2222");
    let list_id: ObjectId = a.op_id_at(2).into();
    let c1: Change = amp::Change {
        actor_id: a.clone(),
        seq: 1,
        start_op: 1,
        time: 0,
        message: Some("init".into()),
        hash: None,
        deps: vec![],
        operations: vec![
            Op {
                action: OpType::Set("magpie".into()),
                obj: ObjectId::Root,
                key: "bird".into(),
                insert: false,
                pred: SortedVec::new(),
            },
            Op {
                action: OpType::Make(ObjType::List),
                obj: ObjectId::Root,
                key: "list".into(),
                insert: false,
                pred: SortedVec::new(),
            },
            Op {
                action: OpType::Set(ScalarValue::Int(1)),
                obj: list_id.clone(),
                key: Key::head(),
                insert: true,
                pred: SortedVec::new(),
            },
            Op {
                action: OpType::Set(ScalarValue::Int(2)),
                obj: list_id.clone(),
                key: a.op_id_at(3).into(),
                insert: true,
                pred: SortedVec::new(),
            },
        ],
    }
    .into();
    let c2: Change = amp::Change {
        actor_id: b.clone(),
        seq: 1,
        start_op: 5,
        time: 0,
        message: None,
        hash: None,
        deps: vec![c1.hash],
        operations: vec![Op {
            action: OpType::Set(ScalarValue::Uint(3)),
            obj: list_id,
            key: a.op_id_at(4).into(),
            insert: true,
            pred: SortedVec::new(),
        }],
    }
    .into();
    let mut backend = Backend::init();
    backend
        .apply_changes(vec![c1.clone(), c2.clone()])
        .unwrap();
    (backend, vec![c1, c2])
}

#[test_env_log::test]
fn test_save_load_roundtrip() {
    let (backend, changes) = build_backend();
    let saved = backend.save().unwrap();
    let loaded = Backend::load(saved.clone()).unwrap();

    assert_eq!(loaded.get_heads(), backend.get_heads());
    assert_eq!(
        loaded.get_patch().unwrap().clock,
        backend.get_patch().unwrap().clock
    );
    assert_eq!(loaded.get_patch().unwrap(), backend.get_patch().unwrap());
    assert_eq!(loaded.get_changes(&[]).len(), changes.len());

    // the stored change bytes come back verbatim
    for (loaded_change, original) in loaded.get_changes(&[]).iter().zip(&changes) {
        assert_eq!(loaded_change.raw_bytes(), original.raw_bytes());
    }
}

#[test]
fn test_save_is_idempotent_over_load() {
    let (backend, _) = build_backend();
    let saved = backend.save().unwrap();
    let loaded = Backend::load(saved.clone()).unwrap();
    assert_eq!(loaded.save().unwrap(), saved);
}

#[test]
fn test_load_rejects_corrupted_checksum() {
    let (backend, _) = build_backend();
    let mut saved = backend.save().unwrap();
    saved[4] ^= 0xff;
    assert!(Backend::load(saved).is_err());
}

#[test]
fn test_apply_after_load() {
    let (backend, changes) = build_backend();
    let a = actor("aaaa1111aaaa1111");
    let mut loaded = Backend::load(backend.save().unwrap()).unwrap();
    let c3: Change = amp::Change {
        actor_id: a.clone(),
        seq: 2,
        start_op: 5,
        time: 0,
        message: None,
        hash: None,
        deps: loaded.get_heads(),
        operations: vec![Op {
            action: OpType::Set("wren".into()),
            obj: ObjectId::Root,
            key: "bird".into(),
            insert: false,
            pred: vec![a.op_id_at(1)].into(),
        }],
    }
    .into();
    let _ = changes;
    let patch = loaded.apply_changes(vec![c3.clone()]).unwrap();
    assert_eq!(
        patch.diffs.props["bird"][&a.op_id_at(5)],
        plover_protocol::Diff::Value("wren".into())
    );
    assert_eq!(loaded.get_heads(), vec![c3.hash]);
}

#[test]
fn test_loaded_document_equals_original_after_new_changes() {
    let (mut backend, _) = build_backend();
    let mut loaded = Backend::load(backend.save().unwrap()).unwrap();
    let a = actor("aaaa1111aaaa1111");
    let c3: Change = amp::Change {
        actor_id: a.clone(),
        seq: 2,
        start_op: 5,
        time: 0,
        message: None,
        hash: None,
        deps: backend.get_heads(),
        operations: vec![Op {
            action: OpType::Set(ScalarValue::Boolean(true)),
            obj: ObjectId::Root,
            key: "done".into(),
            insert: false,
            pred: SortedVec::new(),
        }],
    }
    .into();
    backend.apply_changes(vec![c3.clone()]).unwrap();
    loaded.apply_changes(vec![c3]).unwrap();
    assert_eq!(backend.save().unwrap(), loaded.save().unwrap());
}
